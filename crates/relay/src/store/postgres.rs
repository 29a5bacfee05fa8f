use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use taskman_common::types::{
    MemberRole, OrgMember, Organization, Project, ProjectStatus, Task, TaskStatus,
};
use uuid::Uuid;

use super::{Moved, NewProject, NewTask, ProjectChanges, StoreError, TaskChanges};
use crate::authz::{ResourceFacts, ResourceRef};

const INVITE_CODE_CONSTRAINT: &str = "organizations_invite_code_key";

macro_rules! project_select {
    ($filter:literal, $order:literal) => {
        concat!(
            "SELECT p.id, p.org_id, p.name, p.description, p.status, p.created_by, p.deadline, ",
            "p.created_at, p.updated_at, ",
            "COALESCE(ARRAY_AGG(pa.user_id ORDER BY pa.position) ",
            "FILTER (WHERE pa.user_id IS NOT NULL), '{}') AS assignee_ids ",
            "FROM projects AS p ",
            "LEFT JOIN project_assignees AS pa ON pa.project_id = p.id ",
            $filter,
            " GROUP BY p.id ",
            $order
        )
    };
}

macro_rules! task_select {
    ($filter:literal, $order:literal) => {
        concat!(
            "SELECT t.id, t.project_id, t.name, t.description, t.status, t.created_by, t.deadline, ",
            "t.created_at, t.updated_at, ",
            "COALESCE(ARRAY_AGG(ta.user_id ORDER BY ta.position) ",
            "FILTER (WHERE ta.user_id IS NOT NULL), '{}') AS assignee_ids ",
            "FROM tasks AS t ",
            "LEFT JOIN task_assignees AS ta ON ta.task_id = t.id ",
            $filter,
            " GROUP BY t.id ",
            $order
        )
    };
}

#[derive(sqlx::FromRow)]
struct OrganizationRow {
    id: Uuid,
    name: String,
    created_by: Uuid,
    invite_code: String,
    code_expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl OrganizationRow {
    fn into_organization(self, role: Option<MemberRole>) -> Organization {
        Organization {
            id: self.id,
            name: self.name,
            created_by: self.created_by,
            invite_code: self.invite_code,
            code_expires_at: self.code_expires_at,
            created_at: self.created_at,
            role,
            member_count: None,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MembershipListingRow {
    #[sqlx(flatten)]
    organization: OrganizationRow,
    role: String,
    member_count: i64,
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    user_id: Uuid,
    role: String,
    joined_at: DateTime<Utc>,
}

fn parse_role(role: &str) -> anyhow::Result<MemberRole> {
    MemberRole::from_db_value(role).ok_or_else(|| anyhow!("invalid member role '{role}' in database"))
}

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: Uuid,
    org_id: Uuid,
    name: String,
    description: String,
    status: String,
    created_by: Uuid,
    deadline: Option<DateTime<Utc>>,
    assignee_ids: Vec<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProjectRow> for Project {
    type Error = anyhow::Error;

    fn try_from(row: ProjectRow) -> Result<Self, Self::Error> {
        let status = ProjectStatus::from_db_value(&row.status)
            .ok_or_else(|| anyhow!("invalid project status '{}' in database", row.status))?;
        Ok(Self {
            id: row.id,
            org_id: row.org_id,
            name: row.name,
            description: row.description,
            status,
            created_by: row.created_by,
            deadline: row.deadline,
            assignee_ids: row.assignee_ids,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    project_id: Uuid,
    name: String,
    description: String,
    status: String,
    created_by: Uuid,
    deadline: Option<DateTime<Utc>>,
    assignee_ids: Vec<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = anyhow::Error;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::from_db_value(&row.status)
            .ok_or_else(|| anyhow!("invalid task status '{}' in database", row.status))?;
        Ok(Self {
            id: row.id,
            project_id: row.project_id,
            name: row.name,
            description: row.description,
            status,
            created_by: row.created_by,
            deadline: row.deadline,
            assignee_ids: row.assignee_ids,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub(super) async fn create_organization(
    pool: &PgPool,
    creator: Uuid,
    name: &str,
    invite_code: &str,
    code_expires_at: DateTime<Utc>,
) -> Result<Organization, StoreError> {
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query_as::<_, OrganizationRow>(
        r#"
        INSERT INTO organizations (id, name, created_by, invite_code, code_expires_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, name, created_by, invite_code, code_expires_at, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(creator)
    .bind(invite_code)
    .bind(code_expires_at)
    .fetch_one(&mut *tx)
    .await;

    let row = match inserted {
        Ok(row) => row,
        Err(sqlx::Error::Database(error))
            if error.is_unique_violation()
                && error.constraint() == Some(INVITE_CODE_CONSTRAINT) =>
        {
            return Err(StoreError::InviteCodeTaken);
        }
        Err(error) => {
            return Err(anyhow::Error::new(error).context("failed to insert organization").into());
        }
    };

    sqlx::query("INSERT INTO org_members (org_id, user_id, role) VALUES ($1, $2, 'admin')")
        .bind(row.id)
        .bind(creator)
        .execute(&mut *tx)
        .await
        .context("failed to insert organization creator membership")?;

    tx.commit().await?;

    Ok(row.into_organization(Some(MemberRole::Admin)))
}

pub(super) async fn join_organization(
    pool: &PgPool,
    user_id: Uuid,
    invite_code: &str,
) -> Result<Organization, StoreError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, OrganizationRow>(
        r#"
        SELECT id, name, created_by, invite_code, code_expires_at, created_at
        FROM organizations
        WHERE invite_code = $1
        "#,
    )
    .bind(invite_code)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to look up invite code")?
    .ok_or(StoreError::InvalidInviteCode)?;

    if row.code_expires_at < Utc::now() {
        return Err(StoreError::InviteCodeExpired);
    }

    sqlx::query(
        r#"
        INSERT INTO org_members (org_id, user_id, role)
        VALUES ($1, $2, 'member')
        ON CONFLICT (org_id, user_id) DO NOTHING
        "#,
    )
    .bind(row.id)
    .bind(user_id)
    .execute(&mut *tx)
    .await
    .context("failed to insert organization membership")?;

    let role = role_in(&mut tx, row.id, user_id)
        .await?
        .ok_or_else(|| anyhow!("membership vanished while joining organization"))?;

    tx.commit().await?;

    Ok(row.into_organization(Some(role)))
}

pub(super) async fn list_organizations(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Vec<Organization>, StoreError> {
    let rows = sqlx::query_as::<_, MembershipListingRow>(
        r#"
        SELECT o.id, o.name, o.created_by, o.invite_code, o.code_expires_at, o.created_at,
               m.role,
               (SELECT COUNT(*) FROM org_members AS c WHERE c.org_id = o.id) AS member_count
        FROM organizations AS o
        INNER JOIN org_members AS m ON m.org_id = o.id AND m.user_id = $1
        ORDER BY o.created_at DESC, o.id
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("failed to list organizations")?;

    let mut organizations = Vec::with_capacity(rows.len());
    for row in rows {
        let role = parse_role(&row.role)?;
        organizations.push(Organization {
            member_count: Some(row.member_count),
            ..row.organization.into_organization(Some(role))
        });
    }
    Ok(organizations)
}

pub(super) async fn get_organization(
    pool: &PgPool,
    org_id: Uuid,
    user_id: Uuid,
) -> Result<Organization, StoreError> {
    let mut conn = pool.acquire().await?;
    let row = sqlx::query_as::<_, OrganizationRow>(
        r#"
        SELECT id, name, created_by, invite_code, code_expires_at, created_at
        FROM organizations
        WHERE id = $1
        "#,
    )
    .bind(org_id)
    .fetch_optional(&mut *conn)
    .await
    .context("failed to load organization")?
    .ok_or(StoreError::NotFound("organization"))?;

    let role = role_in(&mut conn, org_id, user_id).await?;
    Ok(row.into_organization(role))
}

pub(super) async fn rename_organization(
    pool: &PgPool,
    org_id: Uuid,
    name: &str,
) -> Result<Organization, StoreError> {
    let row = sqlx::query_as::<_, OrganizationRow>(
        r#"
        UPDATE organizations
        SET name = $2, updated_at = now()
        WHERE id = $1
        RETURNING id, name, created_by, invite_code, code_expires_at, created_at
        "#,
    )
    .bind(org_id)
    .bind(name)
    .fetch_optional(pool)
    .await
    .context("failed to rename organization")?
    .ok_or(StoreError::NotFound("organization"))?;

    Ok(row.into_organization(None))
}

pub(super) async fn list_members(pool: &PgPool, org_id: Uuid) -> Result<Vec<OrgMember>, StoreError> {
    let rows = sqlx::query_as::<_, MemberRow>(
        r#"
        SELECT user_id, role, joined_at
        FROM org_members
        WHERE org_id = $1
        ORDER BY joined_at, user_id
        "#,
    )
    .bind(org_id)
    .fetch_all(pool)
    .await
    .context("failed to list organization members")?;

    let mut members = Vec::with_capacity(rows.len());
    for row in rows {
        members.push(OrgMember {
            user_id: row.user_id,
            role: parse_role(&row.role)?,
            joined_at: row.joined_at,
        });
    }
    Ok(members)
}

pub(super) async fn remove_member(pool: &PgPool, org_id: Uuid, user_id: Uuid) -> Result<(), StoreError> {
    let removed = sqlx::query("DELETE FROM org_members WHERE org_id = $1 AND user_id = $2")
        .bind(org_id)
        .bind(user_id)
        .execute(pool)
        .await
        .context("failed to remove organization member")?;
    if removed.rows_affected() == 0 {
        return Err(StoreError::NotFound("member"));
    }
    Ok(())
}

pub(super) async fn add_member(
    pool: &PgPool,
    org_id: Uuid,
    user_id: Uuid,
    role: MemberRole,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO org_members (org_id, user_id, role)
        VALUES ($1, $2, $3)
        ON CONFLICT (org_id, user_id) DO UPDATE SET role = EXCLUDED.role
        "#,
    )
    .bind(org_id)
    .bind(user_id)
    .bind(role.as_str())
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(error)) if error.code().as_deref() == Some("23503") => {
            Err(StoreError::NotFound("organization"))
        }
        Err(error) => Err(error.into()),
    }
}

pub(super) async fn membership_role(
    pool: &PgPool,
    org_id: Uuid,
    user_id: Uuid,
) -> anyhow::Result<Option<MemberRole>> {
    let mut conn = pool.acquire().await.context("failed to acquire connection")?;
    role_in(&mut conn, org_id, user_id).await
}

async fn role_in(
    conn: &mut PgConnection,
    org_id: Uuid,
    user_id: Uuid,
) -> anyhow::Result<Option<MemberRole>> {
    sqlx::query_scalar::<_, String>(
        "SELECT role FROM org_members WHERE org_id = $1 AND user_id = $2",
    )
    .bind(org_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await
    .context("failed to query organization membership")?
    .map(|role| parse_role(&role))
    .transpose()
}

pub(super) async fn resource_facts(
    pool: &PgPool,
    resource: ResourceRef,
) -> anyhow::Result<Option<ResourceFacts>> {
    let query = match resource {
        ResourceRef::Project(_) => "SELECT org_id, created_by FROM projects WHERE id = $1",
        ResourceRef::Task(_) => {
            r#"
            SELECT p.org_id, t.created_by
            FROM tasks AS t
            INNER JOIN projects AS p ON p.id = t.project_id
            WHERE t.id = $1
            "#
        }
    };

    let facts = sqlx::query_as::<_, (Uuid, Uuid)>(query)
        .bind(resource.id())
        .fetch_optional(pool)
        .await
        .with_context(|| format!("failed to load facts for {resource}"))?
        .map(|(org_id, created_by)| ResourceFacts { org_id, created_by });

    Ok(facts)
}

pub(super) async fn is_assignee(
    pool: &PgPool,
    resource: ResourceRef,
    user_id: Uuid,
) -> anyhow::Result<bool> {
    let query = match resource {
        ResourceRef::Project(_) => {
            "SELECT EXISTS (SELECT 1 FROM project_assignees WHERE project_id = $1 AND user_id = $2)"
        }
        ResourceRef::Task(_) => {
            "SELECT EXISTS (SELECT 1 FROM task_assignees WHERE task_id = $1 AND user_id = $2)"
        }
    };

    sqlx::query_scalar::<_, bool>(query)
        .bind(resource.id())
        .bind(user_id)
        .fetch_one(pool)
        .await
        .with_context(|| format!("failed to check assignment on {resource}"))
}

pub(super) async fn list_projects(pool: &PgPool, org_id: Uuid) -> Result<Vec<Project>, StoreError> {
    let rows = sqlx::query_as::<_, ProjectRow>(project_select!(
        "WHERE p.org_id = $1",
        "ORDER BY p.created_at, p.id"
    ))
    .bind(org_id)
    .fetch_all(pool)
    .await
    .context("failed to list projects")?;

    Ok(rows.into_iter().map(Project::try_from).collect::<anyhow::Result<_>>()?)
}

pub(super) async fn get_project(pool: &PgPool, project_id: Uuid) -> Result<Project, StoreError> {
    let mut conn = pool.acquire().await?;
    fetch_project(&mut conn, project_id).await
}

async fn fetch_project(conn: &mut PgConnection, project_id: Uuid) -> Result<Project, StoreError> {
    let row = sqlx::query_as::<_, ProjectRow>(project_select!("WHERE p.id = $1", ""))
        .bind(project_id)
        .fetch_optional(conn)
        .await
        .context("failed to load project")?
        .ok_or(StoreError::NotFound("project"))?;

    Ok(Project::try_from(row)?)
}

async fn replace_project_assignees(
    conn: &mut PgConnection,
    project_id: Uuid,
    assignee_ids: &[Uuid],
) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM project_assignees WHERE project_id = $1")
        .bind(project_id)
        .execute(&mut *conn)
        .await
        .context("failed to clear project assignees")?;

    sqlx::query(
        r#"
        INSERT INTO project_assignees (project_id, user_id, position)
        SELECT $1, assignee.user_id, assignee.position
        FROM UNNEST($2::uuid[]) WITH ORDINALITY AS assignee(user_id, position)
        ON CONFLICT (project_id, user_id) DO NOTHING
        "#,
    )
    .bind(project_id)
    .bind(assignee_ids)
    .execute(&mut *conn)
    .await
    .context("failed to insert project assignees")?;

    Ok(())
}

pub(super) async fn create_project(
    pool: &PgPool,
    org_id: Uuid,
    creator: Uuid,
    input: NewProject,
    assignee_ids: Vec<Uuid>,
) -> Result<Project, StoreError> {
    let mut tx = pool.begin().await?;
    let project_id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO projects (id, org_id, name, description, status, created_by, deadline)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(project_id)
    .bind(org_id)
    .bind(&input.name)
    .bind(&input.description)
    .bind(ProjectStatus::default().as_str())
    .bind(creator)
    .bind(input.deadline)
    .execute(&mut *tx)
    .await
    .context("failed to insert project")?;

    replace_project_assignees(&mut tx, project_id, &assignee_ids).await?;
    let project = fetch_project(&mut tx, project_id).await?;
    tx.commit().await?;

    Ok(project)
}

pub(super) async fn update_project(
    pool: &PgPool,
    project_id: Uuid,
    changes: ProjectChanges,
) -> Result<Project, StoreError> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE projects
        SET name = COALESCE($2, name),
            description = COALESCE($3, description),
            deadline = COALESCE($4, deadline),
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(project_id)
    .bind(changes.name)
    .bind(changes.description)
    .bind(changes.deadline)
    .execute(&mut *tx)
    .await
    .context("failed to update project")?;
    if updated.rows_affected() == 0 {
        return Err(StoreError::NotFound("project"));
    }

    if let Some(assignee_ids) = changes.assignee_ids {
        replace_project_assignees(&mut tx, project_id, &assignee_ids).await?;
    }
    let project = fetch_project(&mut tx, project_id).await?;
    tx.commit().await?;

    Ok(project)
}

pub(super) async fn move_project(
    pool: &PgPool,
    project_id: Uuid,
    status: ProjectStatus,
) -> Result<Moved<Project, ProjectStatus>, StoreError> {
    let mut tx = pool.begin().await?;

    let old_status =
        sqlx::query_scalar::<_, String>("SELECT status FROM projects WHERE id = $1 FOR UPDATE")
            .bind(project_id)
            .fetch_optional(&mut *tx)
            .await
            .context("failed to lock project")?
            .ok_or(StoreError::NotFound("project"))?;
    let old_status = ProjectStatus::from_db_value(&old_status)
        .ok_or_else(|| anyhow!("invalid project status '{old_status}' in database"))?;

    sqlx::query("UPDATE projects SET status = $2, updated_at = now() WHERE id = $1")
        .bind(project_id)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await
        .context("failed to move project")?;

    let record = fetch_project(&mut tx, project_id).await?;
    tx.commit().await?;

    Ok(Moved { record, old_status })
}

pub(super) async fn delete_project(pool: &PgPool, project_id: Uuid) -> Result<Project, StoreError> {
    let mut tx = pool.begin().await?;
    let project = fetch_project(&mut tx, project_id).await?;

    // tasks and assignments go with it through ON DELETE CASCADE
    sqlx::query("DELETE FROM projects WHERE id = $1")
        .bind(project_id)
        .execute(&mut *tx)
        .await
        .context("failed to delete project")?;
    tx.commit().await?;

    Ok(project)
}

pub(super) async fn list_tasks(pool: &PgPool, project_id: Uuid) -> Result<Vec<Task>, StoreError> {
    let rows = sqlx::query_as::<_, TaskRow>(task_select!(
        "WHERE t.project_id = $1",
        "ORDER BY t.created_at, t.id"
    ))
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list tasks")?;

    Ok(rows.into_iter().map(Task::try_from).collect::<anyhow::Result<_>>()?)
}

pub(super) async fn task_project(pool: &PgPool, task_id: Uuid) -> Result<Option<Uuid>, StoreError> {
    let project_id = sqlx::query_scalar::<_, Uuid>("SELECT project_id FROM tasks WHERE id = $1")
        .bind(task_id)
        .fetch_optional(pool)
        .await
        .context("failed to load task parent")?;

    Ok(project_id)
}

pub(super) async fn get_task(pool: &PgPool, task_id: Uuid) -> Result<Task, StoreError> {
    let mut conn = pool.acquire().await?;
    fetch_task(&mut conn, task_id).await
}

async fn fetch_task(conn: &mut PgConnection, task_id: Uuid) -> Result<Task, StoreError> {
    let row = sqlx::query_as::<_, TaskRow>(task_select!("WHERE t.id = $1", ""))
        .bind(task_id)
        .fetch_optional(conn)
        .await
        .context("failed to load task")?
        .ok_or(StoreError::NotFound("task"))?;

    Ok(Task::try_from(row)?)
}

async fn replace_task_assignees(
    conn: &mut PgConnection,
    task_id: Uuid,
    assignee_ids: &[Uuid],
) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM task_assignees WHERE task_id = $1")
        .bind(task_id)
        .execute(&mut *conn)
        .await
        .context("failed to clear task assignees")?;

    sqlx::query(
        r#"
        INSERT INTO task_assignees (task_id, user_id, position)
        SELECT $1, assignee.user_id, assignee.position
        FROM UNNEST($2::uuid[]) WITH ORDINALITY AS assignee(user_id, position)
        ON CONFLICT (task_id, user_id) DO NOTHING
        "#,
    )
    .bind(task_id)
    .bind(assignee_ids)
    .execute(&mut *conn)
    .await
    .context("failed to insert task assignees")?;

    Ok(())
}

pub(super) async fn create_task(
    pool: &PgPool,
    project_id: Uuid,
    creator: Uuid,
    input: NewTask,
    assignee_ids: Vec<Uuid>,
) -> Result<Task, StoreError> {
    let mut tx = pool.begin().await?;

    let project_exists =
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM projects WHERE id = $1)")
            .bind(project_id)
            .fetch_one(&mut *tx)
            .await
            .context("failed to check parent project")?;
    if !project_exists {
        return Err(StoreError::NotFound("project"));
    }

    let task_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO tasks (id, project_id, name, description, status, created_by, deadline)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(task_id)
    .bind(project_id)
    .bind(&input.name)
    .bind(&input.description)
    .bind(TaskStatus::default().as_str())
    .bind(creator)
    .bind(input.deadline)
    .execute(&mut *tx)
    .await
    .context("failed to insert task")?;

    replace_task_assignees(&mut tx, task_id, &assignee_ids).await?;
    let task = fetch_task(&mut tx, task_id).await?;
    tx.commit().await?;

    Ok(task)
}

pub(super) async fn update_task(
    pool: &PgPool,
    task_id: Uuid,
    changes: TaskChanges,
) -> Result<Task, StoreError> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE tasks
        SET name = COALESCE($2, name),
            description = COALESCE($3, description),
            deadline = COALESCE($4, deadline),
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(task_id)
    .bind(changes.name)
    .bind(changes.description)
    .bind(changes.deadline)
    .execute(&mut *tx)
    .await
    .context("failed to update task")?;
    if updated.rows_affected() == 0 {
        return Err(StoreError::NotFound("task"));
    }

    if let Some(assignee_ids) = changes.assignee_ids {
        replace_task_assignees(&mut tx, task_id, &assignee_ids).await?;
    }
    let task = fetch_task(&mut tx, task_id).await?;
    tx.commit().await?;

    Ok(task)
}

pub(super) async fn move_task(
    pool: &PgPool,
    task_id: Uuid,
    status: TaskStatus,
) -> Result<Moved<Task, TaskStatus>, StoreError> {
    let mut tx = pool.begin().await?;

    let old_status =
        sqlx::query_scalar::<_, String>("SELECT status FROM tasks WHERE id = $1 FOR UPDATE")
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await
            .context("failed to lock task")?
            .ok_or(StoreError::NotFound("task"))?;
    let old_status = TaskStatus::from_db_value(&old_status)
        .ok_or_else(|| anyhow!("invalid task status '{old_status}' in database"))?;

    sqlx::query("UPDATE tasks SET status = $2, updated_at = now() WHERE id = $1")
        .bind(task_id)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await
        .context("failed to move task")?;

    let record = fetch_task(&mut tx, task_id).await?;
    tx.commit().await?;

    Ok(Moved { record, old_status })
}

pub(super) async fn delete_task(pool: &PgPool, task_id: Uuid) -> Result<Task, StoreError> {
    let mut tx = pool.begin().await?;
    let task = fetch_task(&mut tx, task_id).await?;

    sqlx::query("DELETE FROM tasks WHERE id = $1")
        .bind(task_id)
        .execute(&mut *tx)
        .await
        .context("failed to delete task")?;
    tx.commit().await?;

    Ok(task)
}
