//! Tenant-scoped real-time fan-out.
//!
//! The hub owns the [`ConnectionRegistry`] and the [`BroadcastRouter`] and
//! drives every connection through `Connecting -> Registered -> Active ->
//! Closed`. Mutating REST routes publish through [`SynchronizationHub::publish`]
//! after their commit; live sockets feed client frames through
//! [`SynchronizationHub::handle_client_frame`].

pub mod registry;
pub mod router;

use std::sync::Arc;

use taskman_common::{
    protocol::ws::{
        decode_client_message, EventEnvelope, EventPayload, PresenceData, ProjectMovedData,
        TaskMovedData,
    },
    types::Actor,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    authz::{
        Action, AssignmentFacts, AuthorizationCascade, AuthzError, Decision, MembershipFacts,
        ResourceRef,
    },
    error::ErrorCode,
    metrics,
};

pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, Visit};
pub use router::{BroadcastRouter, RouteReport};

/// The hub as wired into the server, backed by the board store's facts.
pub type BoardHub = SynchronizationHub<crate::store::BoardStore>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Registered,
    Active,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("actor {user_id} is not a member of organization {org_id}")]
    NotAMember { user_id: Uuid, org_id: Uuid },
    #[error(transparent)]
    Authz(#[from] AuthzError),
}

/// Result of one client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Routed(RouteReport),
    /// Presence and error frames are relay-generated; a client copy is dropped.
    Ignored,
    /// The sender got an `error` envelope; nothing was routed.
    Rejected(&'static str),
}

/// One connection's side of the hub. Owned by the socket task.
#[derive(Debug)]
pub struct HubSession {
    handle: ConnectionHandle,
    org_id: Uuid,
    state: ConnectionState,
}

impl HubSession {
    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn org_id(&self) -> Uuid {
        self.org_id
    }

    pub fn actor(&self) -> &Actor {
        self.handle.actor()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Resolves once the hub has evicted this connection.
    pub async fn revoked(&self) {
        self.handle.revoked().await;
    }

    /// Registered connections start reading client frames.
    pub fn activate(&mut self) {
        if self.state == ConnectionState::Registered {
            self.state = ConnectionState::Active;
        }
    }
}

pub struct SynchronizationHub<F> {
    registry: Arc<ConnectionRegistry>,
    router: BroadcastRouter,
    cascade: AuthorizationCascade<F>,
    verify_client_echoes: bool,
}

impl<F> SynchronizationHub<F>
where
    F: MembershipFacts + AssignmentFacts,
{
    pub fn new(facts: F, verify_client_echoes: bool) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            router: BroadcastRouter::new(Arc::clone(&registry)),
            registry,
            cascade: AuthorizationCascade::new(facts),
            verify_client_echoes,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn cascade(&self) -> &AuthorizationCascade<F> {
        &self.cascade
    }

    /// `Connecting`: the actor must hold a membership in `org_id` before
    /// anything is registered.
    pub async fn admit(&self, actor: &Actor, org_id: Uuid) -> Result<(), HubError> {
        match self.cascade.authorize_membership(actor.user_id, org_id).await? {
            Decision::Allow => Ok(()),
            Decision::Deny(_) => {
                Err(HubError::NotAMember { user_id: actor.user_id, org_id })
            }
        }
    }

    /// `Registered`: add the connection to its tenant group and announce it
    /// to the whole group, the new connection included.
    pub async fn register(
        &self,
        actor: Actor,
        org_id: Uuid,
    ) -> (HubSession, mpsc::UnboundedReceiver<Arc<EventEnvelope>>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(Uuid::new_v4(), actor, outbound);
        let user_id = handle.actor().user_id;

        self.registry.register(org_id, handle.clone()).await;
        metrics::record_connection_opened();
        let group_size = self.registry.connection_count(org_id).await;
        info!(
            org_id = %org_id,
            user_id = %user_id,
            connection_id = %handle.id(),
            group_size,
            "connection registered"
        );

        self.publish(org_id, EventPayload::UserJoined(PresenceData { user_id, org_id }), user_id)
            .await;

        (HubSession { handle, org_id, state: ConnectionState::Registered }, receiver)
    }

    /// `Closed`: unregister and tell the rest of the group. Safe to call more
    /// than once.
    pub async fn close(&self, session: &mut HubSession) {
        if session.state == ConnectionState::Closed {
            return;
        }
        session.state = ConnectionState::Closed;

        let user_id = session.actor().user_id;
        let org_id = session.org_id;
        self.registry.unregister(org_id, session.id()).await;
        metrics::record_connection_closed();
        let group_size = self.registry.connection_count(org_id).await;
        info!(
            org_id = %org_id,
            user_id = %user_id,
            connection_id = %session.id(),
            group_size,
            "connection closed"
        );

        self.publish(org_id, EventPayload::UserLeft(PresenceData { user_id, org_id }), user_id)
            .await;
    }

    /// Cut off every live connection `user_id` holds in `org_id` after the
    /// membership is removed. Each connection gets a final `error` envelope
    /// and is dropped from the group at once; its socket task then runs
    /// [`SynchronizationHub::close`]. Returns the number evicted.
    pub async fn evict_member(&self, org_id: Uuid, user_id: Uuid) -> usize {
        let code = ErrorCode::NotAMember;
        let notice = Arc::new(EventEnvelope::now(
            EventPayload::error(code.as_str(), "membership in this organization was removed"),
            user_id,
        ));

        let evicted = self
            .registry
            .for_each(org_id, |connection| {
                if connection.actor().user_id != user_id {
                    return Visit::Keep;
                }
                // Already closing when the receiver is gone.
                let _ = connection.deliver(Arc::clone(&notice));
                connection.revoke();
                Visit::Prune
            })
            .await;

        if evicted > 0 {
            info!(org_id = %org_id, user_id = %user_id, evicted, "evicted removed member");
        }
        evicted
    }

    /// Stamp and route an event produced by a committed mutation.
    pub async fn publish(&self, org_id: Uuid, payload: EventPayload, user_id: Uuid) -> RouteReport {
        let envelope = Arc::new(EventEnvelope::now(payload, user_id));
        self.router.route(org_id, envelope).await
    }

    /// `Active`: decode one client frame, stamp it with the session's actor
    /// and the current time, and route it to the session's tenant.
    pub async fn handle_client_frame(&self, session: &HubSession, raw: &str) -> FrameOutcome {
        if session.state != ConnectionState::Active {
            return FrameOutcome::Ignored;
        }

        let payload = match decode_client_message(raw) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(
                    org_id = %session.org_id,
                    user_id = %session.actor().user_id,
                    code = error.code(),
                    error = %error,
                    "dropping client frame"
                );
                return self.reject(session, error.code(), error.to_string());
            }
        };

        let event_type = payload.event_type();
        if !event_type.is_state_change() {
            debug!(org_id = %session.org_id, event_type = %event_type, "ignoring relay-only event from client");
            return FrameOutcome::Ignored;
        }

        // Creates, updates and deletes only ever originate from a committed
        // REST mutation. Clients may echo moves and nothing else.
        let Some(payload) = attribute_move(session, payload) else {
            warn!(
                org_id = %session.org_id,
                user_id = %session.actor().user_id,
                event_type = %event_type,
                "client may not publish this event type"
            );
            let code = ErrorCode::UnknownEventType;
            return self.reject(session, code.as_str(), format!("clients cannot send {event_type} events"));
        };

        if self.verify_client_echoes {
            if let Err(code) = self.verify_echo(session, &payload).await {
                return self.reject(session, code.as_str(), code.default_message().to_owned());
            }
        }

        let envelope = Arc::new(EventEnvelope::now(payload, session.actor().user_id));
        FrameOutcome::Routed(self.router.route(session.org_id, envelope).await)
    }

    async fn verify_echo(&self, session: &HubSession, payload: &EventPayload) -> Result<(), ErrorCode> {
        let resource = match payload {
            EventPayload::TaskMoved(data) => ResourceRef::Task(data.task_id),
            EventPayload::ProjectMoved(data) => ResourceRef::Project(data.project_id),
            _ => return Err(ErrorCode::UnknownEventType),
        };

        let user_id = session.actor().user_id;
        match self.cascade.authorize(user_id, session.org_id, Action::Move, Some(resource)).await {
            Ok(Decision::Allow) => Ok(()),
            Ok(Decision::Deny(reason)) => Err(reason.into()),
            Err(AuthzError::ResourceNotFound(_)) => Err(ErrorCode::NotFound),
            Err(AuthzError::Lookup(error)) => {
                warn!(error = ?error, user_id = %user_id, resource = %resource, "echo verification lookup failed");
                Err(ErrorCode::InternalError)
            }
        }
    }

    fn reject(&self, session: &HubSession, code: &'static str, message: String) -> FrameOutcome {
        metrics::record_client_message_rejected(code);
        let envelope = EventEnvelope::now(EventPayload::error(code, message), session.actor().user_id);
        // A closed receiver means the socket task is already shutting down.
        let _ = session.handle.deliver(Arc::new(envelope));
        FrameOutcome::Rejected(code)
    }
}

/// Rewrites the identity fields of a client move with the session's
/// actor and tenant. Any other payload yields `None`.
fn attribute_move(session: &HubSession, payload: EventPayload) -> Option<EventPayload> {
    let user_id = session.actor().user_id;
    match payload {
        EventPayload::TaskMoved(data) => Some(EventPayload::TaskMoved(TaskMovedData { user_id, ..data })),
        EventPayload::ProjectMoved(data) => Some(EventPayload::ProjectMoved(ProjectMovedData {
            user_id,
            org_id: session.org_id,
            ..data
        })),
        _ => None,
    }
}
