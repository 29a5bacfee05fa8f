use std::collections::HashMap;

use chrono::{DateTime, Utc};
use taskman_common::types::{
    MemberRole, OrgMember, Organization, Project, ProjectStatus, Task, TaskStatus,
};
use uuid::Uuid;

use super::{Moved, NewProject, NewTask, ProjectChanges, StoreError, TaskChanges};
use crate::authz::{ResourceFacts, ResourceRef};

#[derive(Debug, Clone, Copy)]
struct Membership {
    role: MemberRole,
    joined_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MemoryBoardStore {
    organizations: HashMap<Uuid, Organization>,
    memberships: HashMap<(Uuid, Uuid), Membership>,
    projects: HashMap<Uuid, Project>,
    tasks: HashMap<Uuid, Task>,
}

impl MemoryBoardStore {
    pub(super) fn create_organization(
        &mut self,
        creator: Uuid,
        name: &str,
        invite_code: String,
        code_expires_at: DateTime<Utc>,
    ) -> Result<Organization, StoreError> {
        if self.organizations.values().any(|organization| organization.invite_code == invite_code) {
            return Err(StoreError::InviteCodeTaken);
        }

        let now = Utc::now();
        let organization = Organization {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            created_by: creator,
            invite_code,
            code_expires_at,
            created_at: now,
            role: None,
            member_count: None,
        };
        self.organizations.insert(organization.id, organization.clone());
        self.memberships
            .insert((organization.id, creator), Membership { role: MemberRole::Admin, joined_at: now });

        Ok(Organization { role: Some(MemberRole::Admin), ..organization })
    }

    pub(super) fn join_organization(
        &mut self,
        user_id: Uuid,
        invite_code: &str,
    ) -> Result<Organization, StoreError> {
        let organization = self
            .organizations
            .values()
            .find(|organization| organization.invite_code == invite_code)
            .cloned()
            .ok_or(StoreError::InvalidInviteCode)?;
        if organization.code_expires_at < Utc::now() {
            return Err(StoreError::InviteCodeExpired);
        }

        let membership = *self
            .memberships
            .entry((organization.id, user_id))
            .or_insert_with(|| Membership { role: MemberRole::Member, joined_at: Utc::now() });

        Ok(Organization { role: Some(membership.role), ..organization })
    }

    pub(super) fn add_member(
        &mut self,
        org_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> Result<(), StoreError> {
        if !self.organizations.contains_key(&org_id) {
            return Err(StoreError::NotFound("organization"));
        }
        self.memberships
            .entry((org_id, user_id))
            .and_modify(|membership| membership.role = role)
            .or_insert_with(|| Membership { role, joined_at: Utc::now() });
        Ok(())
    }

    pub(super) fn list_organizations(&self, user_id: Uuid) -> Vec<Organization> {
        let mut organizations = self
            .memberships
            .iter()
            .filter(|((_, member), _)| *member == user_id)
            .filter_map(|((org_id, _), membership)| {
                let organization = self.organizations.get(org_id)?;
                let member_count =
                    self.memberships.keys().filter(|(other_org, _)| other_org == org_id).count();
                Some(Organization {
                    role: Some(membership.role),
                    member_count: Some(member_count as i64),
                    ..organization.clone()
                })
            })
            .collect::<Vec<_>>();
        organizations.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then_with(|| left.id.cmp(&right.id))
        });
        organizations
    }

    pub(super) fn get_organization(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<Organization, StoreError> {
        let organization =
            self.organizations.get(&org_id).ok_or(StoreError::NotFound("organization"))?;
        Ok(Organization { role: self.membership_role(org_id, user_id), ..organization.clone() })
    }

    pub(super) fn rename_organization(
        &mut self,
        org_id: Uuid,
        name: String,
    ) -> Result<Organization, StoreError> {
        let organization =
            self.organizations.get_mut(&org_id).ok_or(StoreError::NotFound("organization"))?;
        organization.name = name;
        Ok(organization.clone())
    }

    pub(super) fn list_members(&self, org_id: Uuid) -> Vec<OrgMember> {
        let mut members = self
            .memberships
            .iter()
            .filter(|((member_org, _), _)| *member_org == org_id)
            .map(|((_, user_id), membership)| OrgMember {
                user_id: *user_id,
                role: membership.role,
                joined_at: membership.joined_at,
            })
            .collect::<Vec<_>>();
        members.sort_by(|left, right| {
            left.joined_at.cmp(&right.joined_at).then_with(|| left.user_id.cmp(&right.user_id))
        });
        members
    }

    pub(super) fn remove_member(&mut self, org_id: Uuid, user_id: Uuid) -> Result<(), StoreError> {
        self.memberships
            .remove(&(org_id, user_id))
            .map(|_| ())
            .ok_or(StoreError::NotFound("member"))
    }

    pub(super) fn membership_role(&self, org_id: Uuid, user_id: Uuid) -> Option<MemberRole> {
        self.memberships.get(&(org_id, user_id)).map(|membership| membership.role)
    }

    pub(super) fn resource_facts(&self, resource: ResourceRef) -> Option<ResourceFacts> {
        match resource {
            ResourceRef::Project(project_id) => self
                .projects
                .get(&project_id)
                .map(|project| ResourceFacts { org_id: project.org_id, created_by: project.created_by }),
            ResourceRef::Task(task_id) => {
                let task = self.tasks.get(&task_id)?;
                let project = self.projects.get(&task.project_id)?;
                Some(ResourceFacts { org_id: project.org_id, created_by: task.created_by })
            }
        }
    }

    pub(super) fn is_assignee(&self, resource: ResourceRef, user_id: Uuid) -> bool {
        let assignees = match resource {
            ResourceRef::Project(project_id) => {
                self.projects.get(&project_id).map(|project| &project.assignee_ids)
            }
            ResourceRef::Task(task_id) => self.tasks.get(&task_id).map(|task| &task.assignee_ids),
        };
        assignees.is_some_and(|assignees| assignees.contains(&user_id))
    }

    pub(super) fn get_project(&self, project_id: Uuid) -> Result<Project, StoreError> {
        self.projects.get(&project_id).cloned().ok_or(StoreError::NotFound("project"))
    }

    pub(super) fn list_projects(&self, org_id: Uuid) -> Vec<Project> {
        let mut projects = self
            .projects
            .values()
            .filter(|project| project.org_id == org_id)
            .cloned()
            .collect::<Vec<_>>();
        projects.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
        });
        projects
    }

    pub(super) fn create_project(
        &mut self,
        org_id: Uuid,
        creator: Uuid,
        input: NewProject,
        assignee_ids: Vec<Uuid>,
    ) -> Project {
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            org_id,
            name: input.name,
            description: input.description,
            status: ProjectStatus::default(),
            created_by: creator,
            deadline: input.deadline,
            assignee_ids,
            created_at: now,
            updated_at: now,
        };
        self.projects.insert(project.id, project.clone());
        project
    }

    pub(super) fn update_project(
        &mut self,
        project_id: Uuid,
        changes: ProjectChanges,
    ) -> Result<Project, StoreError> {
        let project = self.projects.get_mut(&project_id).ok_or(StoreError::NotFound("project"))?;
        if let Some(name) = changes.name {
            project.name = name;
        }
        if let Some(description) = changes.description {
            project.description = description;
        }
        if let Some(deadline) = changes.deadline {
            project.deadline = Some(deadline);
        }
        if let Some(assignee_ids) = changes.assignee_ids {
            project.assignee_ids = dedup(assignee_ids);
        }
        project.updated_at = Utc::now();
        Ok(project.clone())
    }

    pub(super) fn move_project(
        &mut self,
        project_id: Uuid,
        status: ProjectStatus,
    ) -> Result<Moved<Project, ProjectStatus>, StoreError> {
        let project = self.projects.get_mut(&project_id).ok_or(StoreError::NotFound("project"))?;
        let old_status = std::mem::replace(&mut project.status, status);
        project.updated_at = Utc::now();
        Ok(Moved { record: project.clone(), old_status })
    }

    pub(super) fn delete_project(&mut self, project_id: Uuid) -> Result<Project, StoreError> {
        let project = self.projects.remove(&project_id).ok_or(StoreError::NotFound("project"))?;
        self.tasks.retain(|_, task| task.project_id != project_id);
        Ok(project)
    }

    pub(super) fn list_tasks(&self, project_id: Uuid) -> Vec<Task> {
        let mut tasks = self
            .tasks
            .values()
            .filter(|task| task.project_id == project_id)
            .cloned()
            .collect::<Vec<_>>();
        tasks.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
        });
        tasks
    }

    pub(super) fn get_task(&self, task_id: Uuid) -> Result<Task, StoreError> {
        self.tasks.get(&task_id).cloned().ok_or(StoreError::NotFound("task"))
    }

    pub(super) fn task_project(&self, task_id: Uuid) -> Option<Uuid> {
        self.tasks.get(&task_id).map(|task| task.project_id)
    }

    pub(super) fn create_task(
        &mut self,
        project_id: Uuid,
        creator: Uuid,
        input: NewTask,
        assignee_ids: Vec<Uuid>,
    ) -> Result<Task, StoreError> {
        if !self.projects.contains_key(&project_id) {
            return Err(StoreError::NotFound("project"));
        }

        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            project_id,
            name: input.name,
            description: input.description,
            status: TaskStatus::default(),
            created_by: creator,
            deadline: input.deadline,
            assignee_ids,
            created_at: now,
            updated_at: now,
        };
        self.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    pub(super) fn update_task(
        &mut self,
        task_id: Uuid,
        changes: TaskChanges,
    ) -> Result<Task, StoreError> {
        let task = self.tasks.get_mut(&task_id).ok_or(StoreError::NotFound("task"))?;
        if let Some(name) = changes.name {
            task.name = name;
        }
        if let Some(description) = changes.description {
            task.description = description;
        }
        if let Some(deadline) = changes.deadline {
            task.deadline = Some(deadline);
        }
        if let Some(assignee_ids) = changes.assignee_ids {
            task.assignee_ids = dedup(assignee_ids);
        }
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    pub(super) fn move_task(
        &mut self,
        task_id: Uuid,
        status: TaskStatus,
    ) -> Result<Moved<Task, TaskStatus>, StoreError> {
        let task = self.tasks.get_mut(&task_id).ok_or(StoreError::NotFound("task"))?;
        let old_status = std::mem::replace(&mut task.status, status);
        task.updated_at = Utc::now();
        Ok(Moved { record: task.clone(), old_status })
    }

    pub(super) fn delete_task(&mut self, task_id: Uuid) -> Result<Task, StoreError> {
        self.tasks.remove(&task_id).ok_or(StoreError::NotFound("task"))
    }
}

fn dedup(ids: Vec<Uuid>) -> Vec<Uuid> {
    let mut unique = Vec::with_capacity(ids.len());
    for id in ids {
        if !unique.contains(&id) {
            unique.push(id);
        }
    }
    unique
}
