// Board persistence: organizations, memberships, projects, tasks and their
// assignments. Also the source of the facts the authorization cascade reads.

mod memory;
mod postgres;

use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sqlx::PgPool;
use taskman_common::types::{
    MemberRole, OrgMember, Organization, Project, ProjectStatus, Task, TaskStatus,
};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::authz::{AssignmentFacts, MembershipFacts, ResourceFacts, ResourceRef};

pub use memory::MemoryBoardStore;

pub const INVITE_CODE_LEN: usize = 6;
pub const INVITE_CODE_TTL_DAYS: i64 = 7;
const INVITE_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const INVITE_CODE_ATTEMPTS: usize = 5;

/// Whether the creator of a project or task is recorded as one of its assignees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssigneeSeeding {
    IncludeCreator,
    ExplicitOnly,
}

impl AssigneeSeeding {
    fn seed(self, creator: Uuid, explicit: &[Uuid]) -> Vec<Uuid> {
        let mut assignees = Vec::with_capacity(explicit.len() + 1);
        if self == Self::IncludeCreator {
            assignees.push(creator);
        }
        for user_id in explicit {
            if !assignees.contains(user_id) {
                assignees.push(*user_id);
            }
        }
        assignees
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invite code is invalid")]
    InvalidInviteCode,
    #[error("invite code has expired")]
    InviteCodeExpired,
    /// Another organization already holds the generated code.
    #[error("invite code is already in use")]
    InviteCodeTaken,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        Self::Internal(error.into())
    }
}

#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub description: String,
    pub deadline: Option<DateTime<Utc>>,
    pub assignee_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    /// Replaces the whole assignment set when present.
    pub assignee_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub description: String,
    pub deadline: Option<DateTime<Utc>>,
    pub assignee_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    /// Replaces the whole assignment set when present.
    pub assignee_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Moved<T, S> {
    pub record: T,
    pub old_status: S,
}

#[derive(Clone)]
pub enum BoardStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryBoardStore>>),
}

impl std::fmt::Debug for BoardStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Postgres(_) => f.write_str("BoardStore::Postgres"),
            Self::Memory(_) => f.write_str("BoardStore::Memory"),
        }
    }
}

impl BoardStore {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryBoardStore::default())))
    }

    /// The creator becomes the first admin. A generated invite code that
    /// collides with an existing one is replaced and the insert retried.
    pub async fn create_organization(
        &self,
        creator: Uuid,
        name: &str,
    ) -> Result<Organization, StoreError> {
        self.create_organization_with_codes(creator, name, std::iter::repeat_with(generate_invite_code))
            .await
    }

    async fn create_organization_with_codes<I>(
        &self,
        creator: Uuid,
        name: &str,
        codes: I,
    ) -> Result<Organization, StoreError>
    where
        I: IntoIterator<Item = String>,
    {
        let code_expires_at = Utc::now() + Duration::days(INVITE_CODE_TTL_DAYS);
        for invite_code in codes.into_iter().take(INVITE_CODE_ATTEMPTS) {
            let created = match self {
                Self::Postgres(pool) => {
                    postgres::create_organization(pool, creator, name, &invite_code, code_expires_at)
                        .await
                }
                Self::Memory(store) => store.write().await.create_organization(
                    creator,
                    name,
                    invite_code,
                    code_expires_at,
                ),
            };

            match created {
                Err(StoreError::InviteCodeTaken) => {
                    warn!(user_id = %creator, "invite code collision, generating another");
                }
                other => return other,
            }
        }

        Err(anyhow!("no unused invite code after {INVITE_CODE_ATTEMPTS} attempts").into())
    }

    /// Every organization `user_id` belongs to, newest first, with the
    /// caller's role and the member count.
    pub async fn list_organizations(&self, user_id: Uuid) -> Result<Vec<Organization>, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::list_organizations(pool, user_id).await,
            Self::Memory(store) => Ok(store.read().await.list_organizations(user_id)),
        }
    }

    /// The organization as seen by `user_id`, whose role is filled in.
    pub async fn get_organization(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<Organization, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::get_organization(pool, org_id, user_id).await,
            Self::Memory(store) => store.read().await.get_organization(org_id, user_id),
        }
    }

    pub async fn rename_organization(
        &self,
        org_id: Uuid,
        name: String,
    ) -> Result<Organization, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::rename_organization(pool, org_id, &name).await,
            Self::Memory(store) => store.write().await.rename_organization(org_id, name),
        }
    }

    /// Members in the order they joined.
    pub async fn list_members(&self, org_id: Uuid) -> Result<Vec<OrgMember>, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::list_members(pool, org_id).await,
            Self::Memory(store) => Ok(store.read().await.list_members(org_id)),
        }
    }

    pub async fn remove_member(&self, org_id: Uuid, user_id: Uuid) -> Result<(), StoreError> {
        match self {
            Self::Postgres(pool) => postgres::remove_member(pool, org_id, user_id).await,
            Self::Memory(store) => store.write().await.remove_member(org_id, user_id),
        }
    }

    pub async fn join_organization(
        &self,
        user_id: Uuid,
        invite_code: &str,
    ) -> Result<Organization, StoreError> {
        let invite_code = invite_code.trim().to_ascii_uppercase();
        match self {
            Self::Postgres(pool) => postgres::join_organization(pool, user_id, &invite_code).await,
            Self::Memory(store) => store.write().await.join_organization(user_id, &invite_code),
        }
    }

    pub async fn add_member(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> Result<(), StoreError> {
        match self {
            Self::Postgres(pool) => postgres::add_member(pool, org_id, user_id, role).await,
            Self::Memory(store) => store.write().await.add_member(org_id, user_id, role),
        }
    }

    pub async fn get_project(&self, project_id: Uuid) -> Result<Project, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::get_project(pool, project_id).await,
            Self::Memory(store) => store.read().await.get_project(project_id),
        }
    }

    pub async fn list_projects(&self, org_id: Uuid) -> Result<Vec<Project>, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::list_projects(pool, org_id).await,
            Self::Memory(store) => Ok(store.read().await.list_projects(org_id)),
        }
    }

    pub async fn create_project(
        &self,
        org_id: Uuid,
        creator: Uuid,
        input: NewProject,
        seeding: AssigneeSeeding,
    ) -> Result<Project, StoreError> {
        let assignee_ids = seeding.seed(creator, &input.assignee_ids);
        match self {
            Self::Postgres(pool) => {
                postgres::create_project(pool, org_id, creator, input, assignee_ids).await
            }
            Self::Memory(store) => {
                Ok(store.write().await.create_project(org_id, creator, input, assignee_ids))
            }
        }
    }

    pub async fn update_project(
        &self,
        project_id: Uuid,
        changes: ProjectChanges,
    ) -> Result<Project, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::update_project(pool, project_id, changes).await,
            Self::Memory(store) => store.write().await.update_project(project_id, changes),
        }
    }

    pub async fn move_project(
        &self,
        project_id: Uuid,
        status: ProjectStatus,
    ) -> Result<Moved<Project, ProjectStatus>, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::move_project(pool, project_id, status).await,
            Self::Memory(store) => store.write().await.move_project(project_id, status),
        }
    }

    /// Deletes the project together with its tasks.
    pub async fn delete_project(&self, project_id: Uuid) -> Result<Project, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::delete_project(pool, project_id).await,
            Self::Memory(store) => store.write().await.delete_project(project_id),
        }
    }

    pub async fn list_tasks(&self, project_id: Uuid) -> Result<Vec<Task>, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::list_tasks(pool, project_id).await,
            Self::Memory(store) => Ok(store.read().await.list_tasks(project_id)),
        }
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<Task, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::get_task(pool, task_id).await,
            Self::Memory(store) => store.read().await.get_task(task_id),
        }
    }

    /// Parent project of a task, if the task exists.
    pub async fn task_project(&self, task_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::task_project(pool, task_id).await,
            Self::Memory(store) => Ok(store.read().await.task_project(task_id)),
        }
    }

    pub async fn create_task(
        &self,
        project_id: Uuid,
        creator: Uuid,
        input: NewTask,
        seeding: AssigneeSeeding,
    ) -> Result<Task, StoreError> {
        let assignee_ids = seeding.seed(creator, &input.assignee_ids);
        match self {
            Self::Postgres(pool) => {
                postgres::create_task(pool, project_id, creator, input, assignee_ids).await
            }
            Self::Memory(store) => {
                store.write().await.create_task(project_id, creator, input, assignee_ids)
            }
        }
    }

    pub async fn update_task(&self, task_id: Uuid, changes: TaskChanges) -> Result<Task, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::update_task(pool, task_id, changes).await,
            Self::Memory(store) => store.write().await.update_task(task_id, changes),
        }
    }

    pub async fn move_task(
        &self,
        task_id: Uuid,
        status: TaskStatus,
    ) -> Result<Moved<Task, TaskStatus>, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::move_task(pool, task_id, status).await,
            Self::Memory(store) => store.write().await.move_task(task_id, status),
        }
    }

    pub async fn delete_task(&self, task_id: Uuid) -> Result<Task, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::delete_task(pool, task_id).await,
            Self::Memory(store) => store.write().await.delete_task(task_id),
        }
    }
}

impl MembershipFacts for BoardStore {
    async fn membership_role(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> anyhow::Result<Option<MemberRole>> {
        match self {
            Self::Postgres(pool) => postgres::membership_role(pool, org_id, user_id).await,
            Self::Memory(store) => Ok(store.read().await.membership_role(org_id, user_id)),
        }
    }
}

impl AssignmentFacts for BoardStore {
    async fn resource_facts(&self, resource: ResourceRef) -> anyhow::Result<Option<ResourceFacts>> {
        match self {
            Self::Postgres(pool) => postgres::resource_facts(pool, resource).await,
            Self::Memory(store) => Ok(store.read().await.resource_facts(resource)),
        }
    }

    async fn is_assignee(&self, resource: ResourceRef, user_id: Uuid) -> anyhow::Result<bool> {
        match self {
            Self::Postgres(pool) => postgres::is_assignee(pool, resource, user_id).await,
            Self::Memory(store) => Ok(store.read().await.is_assignee(resource, user_id)),
        }
    }
}

/// Six characters drawn uniformly from `A-Z0-9`.
fn generate_invite_code() -> String {
    let mut rng = rand::thread_rng();
    (0..INVITE_CODE_LEN)
        .map(|_| char::from(INVITE_CODE_ALPHABET[rng.gen_range(0..INVITE_CODE_ALPHABET.len())]))
        .collect()
}
