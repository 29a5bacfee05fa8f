//! Authorization cascade shared by every mutating REST route and the hub.
//!
//! Three checks run in a fixed order and stop at the first failure:
//!
//! 1. the actor holds a membership in the request organization, an admin one
//!    for [`Action::Administer`],
//! 2. for update/move the actor is an assignee or the creator of the resource;
//!    for delete an admin membership also suffices,
//! 3. the resource belongs to the request organization.
//!
//! Fact gathering is async and goes through [`MembershipFacts`] and
//! [`AssignmentFacts`]; the decision itself is the pure [`evaluate`].

use std::future::Future;

use taskman_common::types::MemberRole;
use tracing::debug;
use uuid::Uuid;

use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Read,
    Update,
    Move,
    Delete,
    /// Organization settings and membership management.
    Administer,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Move => "move",
            Self::Delete => "delete",
            Self::Administer => "administer",
        }
    }

    const fn needs_assignment(self) -> bool {
        matches!(self, Self::Update | Self::Move | Self::Delete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    Project(Uuid),
    Task(Uuid),
}

impl ResourceRef {
    pub const fn kind(self) -> &'static str {
        match self {
            Self::Project(_) => "project",
            Self::Task(_) => "task",
        }
    }

    pub const fn id(self) -> Uuid {
        match self {
            Self::Project(id) | Self::Task(id) => id,
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    NotAMember,
    NotAuthorized,
    ResourceMismatch,
}

impl DenyReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotAMember => "not-a-member",
            Self::NotAuthorized => "not-authorized",
            Self::ResourceMismatch => "resource-mismatch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn into_result(self) -> Result<(), DenyReason> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(reason) => Err(reason),
        }
    }
}

/// Owning organization and creator of a project or task. For a task the
/// organization is the one of its parent project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceFacts {
    pub org_id: Uuid,
    pub created_by: Uuid,
}

/// Everything [`evaluate`] needs about the target resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceScope {
    pub org_id: Uuid,
    pub is_creator: bool,
    pub is_assignee: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeFacts {
    pub membership: Option<MemberRole>,
    pub resource: Option<ResourceScope>,
}

pub fn evaluate(request_org: Uuid, action: Action, facts: &CascadeFacts) -> Decision {
    let Some(role) = facts.membership else {
        return Decision::Deny(DenyReason::NotAMember);
    };

    if action == Action::Administer && !role.is_admin() {
        return Decision::Deny(DenyReason::NotAuthorized);
    }

    let Some(resource) = facts.resource else {
        return Decision::Allow;
    };

    if action.needs_assignment() {
        let holds_assignment = resource.is_assignee || resource.is_creator;
        let admin_override = action == Action::Delete && role.is_admin();
        if !holds_assignment && !admin_override {
            return Decision::Deny(DenyReason::NotAuthorized);
        }
    }

    if resource.org_id != request_org {
        return Decision::Deny(DenyReason::ResourceMismatch);
    }

    Decision::Allow
}

pub trait MembershipFacts: Send + Sync {
    fn membership_role(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = anyhow::Result<Option<MemberRole>>> + Send;
}

pub trait AssignmentFacts: Send + Sync {
    fn resource_facts(
        &self,
        resource: ResourceRef,
    ) -> impl Future<Output = anyhow::Result<Option<ResourceFacts>>> + Send;

    fn is_assignee(
        &self,
        resource: ResourceRef,
        user_id: Uuid,
    ) -> impl Future<Output = anyhow::Result<bool>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    #[error("{0} not found")]
    ResourceNotFound(ResourceRef),
    #[error(transparent)]
    Lookup(#[from] anyhow::Error),
}

/// Gathers facts from the collaborators and runs [`evaluate`].
#[derive(Debug, Clone)]
pub struct AuthorizationCascade<F> {
    facts: F,
}

impl<F> AuthorizationCascade<F>
where
    F: MembershipFacts + AssignmentFacts,
{
    pub fn new(facts: F) -> Self {
        Self { facts }
    }

    pub fn facts(&self) -> &F {
        &self.facts
    }

    /// Tenant-level check only: is `user_id` a member of `org_id`.
    pub async fn authorize_membership(
        &self,
        user_id: Uuid,
        org_id: Uuid,
    ) -> Result<Decision, AuthzError> {
        self.authorize(user_id, org_id, Action::Read, None).await
    }

    pub async fn authorize(
        &self,
        user_id: Uuid,
        org_id: Uuid,
        action: Action,
        resource: Option<ResourceRef>,
    ) -> Result<Decision, AuthzError> {
        let membership = self.facts.membership_role(org_id, user_id).await?;

        // A non-member is rejected before any resource lookup happens.
        let scope = match (membership, resource) {
            (Some(_), Some(resource)) => Some(self.resource_scope(resource, user_id, action).await?),
            _ => None,
        };

        let decision = evaluate(org_id, action, &CascadeFacts { membership, resource: scope });
        if let Decision::Deny(reason) = decision {
            metrics::record_cascade_denial(reason);
            debug!(
                user_id = %user_id,
                org_id = %org_id,
                action = action.as_str(),
                resource = ?resource,
                reason = reason.as_str(),
                "authorization denied"
            );
        }

        Ok(decision)
    }

    async fn resource_scope(
        &self,
        resource: ResourceRef,
        user_id: Uuid,
        action: Action,
    ) -> Result<ResourceScope, AuthzError> {
        let facts = self
            .facts
            .resource_facts(resource)
            .await?
            .ok_or(AuthzError::ResourceNotFound(resource))?;

        let is_creator = facts.created_by == user_id;
        let is_assignee = if action.needs_assignment() && !is_creator {
            self.facts.is_assignee(resource, user_id).await?
        } else {
            false
        };

        Ok(ResourceScope { org_id: facts.org_id, is_creator, is_assignee })
    }
}
