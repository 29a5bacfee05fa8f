use std::{collections::HashMap, sync::Arc};

use taskman_common::{protocol::ws::EventEnvelope, types::Actor};
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use uuid::Uuid;

pub type ConnectionId = Uuid;
pub type Outbound = mpsc::UnboundedSender<Arc<EventEnvelope>>;

/// The registry's view of one live connection: who it is and where its
/// envelopes go. The socket writer owns the receiving half.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    actor: Actor,
    outbound: Outbound,
    revoked: Arc<Notify>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection {0} is no longer accepting envelopes")]
pub struct ConnectionGone(pub ConnectionId);

impl ConnectionHandle {
    pub fn new(id: ConnectionId, actor: Actor, outbound: Outbound) -> Self {
        Self { id, actor, outbound, revoked: Arc::new(Notify::new()) }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Queue an envelope on this connection's outbound FIFO.
    pub fn deliver(&self, envelope: Arc<EventEnvelope>) -> Result<(), ConnectionGone> {
        self.outbound.send(envelope).map_err(|_| ConnectionGone(self.id))
    }

    /// Ask the socket task to shut this connection down. A revocation raised
    /// before the task starts waiting is kept until it does.
    pub fn revoke(&self) {
        self.revoked.notify_one();
    }

    /// Resolves once [`ConnectionHandle::revoke`] has been called on any
    /// clone of this handle.
    pub async fn revoked(&self) {
        self.revoked.notified().await;
    }
}

/// Verdict of a [`ConnectionRegistry::for_each`] callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Keep,
    Prune,
}

#[derive(Default)]
struct GroupState {
    members: HashMap<ConnectionId, ConnectionHandle>,
    // Set once the group has emptied and is being removed from the map.
    retired: bool,
}

#[derive(Default)]
struct TenantGroup {
    state: Mutex<GroupState>,
}

/// Tenant-scoped groups of live connections.
///
/// Lock order is always map then group. The map lock is held only long
/// enough to find, insert or remove a group, so a busy tenant never blocks
/// registration in another one.
#[derive(Default)]
pub struct ConnectionRegistry {
    tenants: RwLock<HashMap<Uuid, Arc<TenantGroup>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection` to `tenant`'s group, creating the group if needed.
    /// Registering an id that is already present replaces the entry.
    pub async fn register(&self, tenant: Uuid, connection: ConnectionHandle) {
        loop {
            let group = self.group_or_insert(tenant).await;
            let mut state = group.state.lock().await;
            if !state.retired {
                state.members.insert(connection.id, connection);
                return;
            }

            drop(state);
            self.evict_retired(tenant, &group).await;
        }
    }

    /// Remove a connection. Returns whether it was registered. The tenant
    /// group is dropped once its last connection leaves.
    pub async fn unregister(&self, tenant: Uuid, connection_id: ConnectionId) -> bool {
        let Some(group) = self.group(tenant).await else {
            return false;
        };

        let (removed, emptied) = {
            let mut state = group.state.lock().await;
            let removed = state.members.remove(&connection_id).is_some();
            let emptied = state.members.is_empty() && !state.retired;
            if emptied {
                state.retired = true;
            }
            (removed, emptied)
        };

        if emptied {
            self.evict_retired(tenant, &group).await;
        }

        removed
    }

    /// Apply `visit` to a snapshot of `tenant`'s connections. Connections the
    /// callback marks [`Visit::Prune`] are unregistered after the walk.
    /// Returns the number pruned.
    pub async fn for_each<F>(&self, tenant: Uuid, mut visit: F) -> usize
    where
        F: FnMut(&ConnectionHandle) -> Visit,
    {
        let snapshot = self.snapshot(tenant).await;

        let dead = snapshot
            .iter()
            .filter(|connection| visit(*connection) == Visit::Prune)
            .map(ConnectionHandle::id)
            .collect::<Vec<_>>();

        let mut pruned = 0;
        for connection_id in dead {
            if self.unregister(tenant, connection_id).await {
                pruned += 1;
            }
        }
        pruned
    }

    pub async fn snapshot(&self, tenant: Uuid) -> Vec<ConnectionHandle> {
        let Some(group) = self.group(tenant).await else {
            return Vec::new();
        };
        let state = group.state.lock().await;
        state.members.values().cloned().collect()
    }

    pub async fn connection_count(&self, tenant: Uuid) -> usize {
        match self.group(tenant).await {
            Some(group) => group.state.lock().await.members.len(),
            None => 0,
        }
    }

    pub async fn tenant_count(&self) -> usize {
        self.tenants.read().await.len()
    }

    async fn group(&self, tenant: Uuid) -> Option<Arc<TenantGroup>> {
        self.tenants.read().await.get(&tenant).cloned()
    }

    async fn group_or_insert(&self, tenant: Uuid) -> Arc<TenantGroup> {
        if let Some(group) = self.group(tenant).await {
            return group;
        }
        Arc::clone(self.tenants.write().await.entry(tenant).or_default())
    }

    async fn evict_retired(&self, tenant: Uuid, retired: &Arc<TenantGroup>) {
        let mut tenants = self.tenants.write().await;
        if tenants.get(&tenant).is_some_and(|current| Arc::ptr_eq(current, retired)) {
            tenants.remove(&tenant);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use taskman_common::{
        protocol::ws::{EventEnvelope, EventPayload, PresenceData},
        types::Actor,
    };
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;

    fn connection() -> (ConnectionHandle, mpsc::UnboundedReceiver<Arc<EventEnvelope>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let actor = Actor::new(Uuid::new_v4(), "member@example.com");
        (ConnectionHandle::new(Uuid::new_v4(), actor, sender), receiver)
    }

    fn envelope() -> Arc<EventEnvelope> {
        let user_id = Uuid::new_v4();
        Arc::new(EventEnvelope::now(
            EventPayload::UserJoined(PresenceData { user_id, org_id: Uuid::new_v4() }),
            user_id,
        ))
    }

    #[tokio::test]
    async fn registered_connection_is_visited_exactly_once() {
        let registry = ConnectionRegistry::new();
        let tenant = Uuid::new_v4();
        let (first, _first_rx) = connection();
        let (second, _second_rx) = connection();
        registry.register(tenant, first.clone()).await;
        registry.register(tenant, second.clone()).await;

        for _ in 0..3 {
            let mut seen = Vec::new();
            registry
                .for_each(tenant, |handle| {
                    seen.push(handle.id());
                    Visit::Keep
                })
                .await;
            seen.sort();
            let mut expected = vec![first.id(), second.id()];
            expected.sort();
            assert_eq!(seen, expected);
        }
    }

    #[tokio::test]
    async fn duplicate_registration_replaces_the_entry() {
        let registry = ConnectionRegistry::new();
        let tenant = Uuid::new_v4();
        let (handle, _rx) = connection();
        registry.register(tenant, handle.clone()).await;
        registry.register(tenant, handle.clone()).await;

        assert_eq!(registry.connection_count(tenant).await, 1);
    }

    #[tokio::test]
    async fn group_is_removed_once_empty() {
        let registry = ConnectionRegistry::new();
        let tenant = Uuid::new_v4();
        let (first, _first_rx) = connection();
        let (second, _second_rx) = connection();
        registry.register(tenant, first.clone()).await;
        registry.register(tenant, second.clone()).await;
        assert_eq!(registry.tenant_count().await, 1);

        assert!(registry.unregister(tenant, first.id()).await);
        assert_eq!(registry.tenant_count().await, 1);
        assert!(registry.unregister(tenant, second.id()).await);
        assert_eq!(registry.tenant_count().await, 0);
        assert!(!registry.unregister(tenant, second.id()).await);
    }

    #[tokio::test]
    async fn registration_after_emptying_creates_a_fresh_group() {
        let registry = ConnectionRegistry::new();
        let tenant = Uuid::new_v4();
        let (first, _first_rx) = connection();
        registry.register(tenant, first.clone()).await;
        registry.unregister(tenant, first.id()).await;

        let (second, _second_rx) = connection();
        registry.register(tenant, second.clone()).await;
        assert_eq!(registry.connection_count(tenant).await, 1);
        assert_eq!(registry.snapshot(tenant).await[0].id(), second.id());
    }

    #[tokio::test]
    async fn pruning_inside_for_each_keeps_other_connections() {
        let registry = ConnectionRegistry::new();
        let tenant = Uuid::new_v4();
        let (alive, mut alive_rx) = connection();
        let (dead, dead_rx) = connection();
        registry.register(tenant, alive.clone()).await;
        registry.register(tenant, dead.clone()).await;
        drop(dead_rx);

        let message = envelope();
        let pruned = registry
            .for_each(tenant, |handle| match handle.deliver(Arc::clone(&message)) {
                Ok(()) => Visit::Keep,
                Err(_) => Visit::Prune,
            })
            .await;

        assert_eq!(pruned, 1);
        assert_eq!(registry.connection_count(tenant).await, 1);
        assert!(alive_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let registry = ConnectionRegistry::new();
        let (left, _left_rx) = connection();
        let (right, _right_rx) = connection();
        let left_tenant = Uuid::new_v4();
        let right_tenant = Uuid::new_v4();
        registry.register(left_tenant, left.clone()).await;
        registry.register(right_tenant, right.clone()).await;

        let mut visited = 0;
        registry
            .for_each(left_tenant, |handle| {
                assert_eq!(handle.id(), left.id());
                visited += 1;
                Visit::Keep
            })
            .await;
        assert_eq!(visited, 1);
        assert!(!registry.unregister(left_tenant, right.id()).await);
    }

    #[tokio::test]
    async fn concurrent_register_and_unregister_leave_no_stale_groups() {
        let registry = Arc::new(ConnectionRegistry::new());
        let tenant = Uuid::new_v4();

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let (handle, _rx) = connection();
                let id = handle.id();
                registry.register(tenant, handle).await;
                tokio::task::yield_now().await;
                assert!(registry.unregister(tenant, id).await);
            }));
        }
        for task in tasks {
            task.await.expect("registry task should not panic");
        }

        assert_eq!(registry.connection_count(tenant).await, 0);
        assert_eq!(registry.tenant_count().await, 0);
    }

    #[tokio::test]
    async fn revoking_any_clone_wakes_the_owner() {
        let (handle, _rx) = connection();
        let registered = handle.clone();
        registered.revoke();

        tokio::time::timeout(std::time::Duration::from_secs(1), handle.revoked())
            .await
            .expect("revocation raised before waiting should still be observed");
    }
}
