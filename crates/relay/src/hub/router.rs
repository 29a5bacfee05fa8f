use std::sync::Arc;

use taskman_common::protocol::ws::EventEnvelope;
use tracing::debug;
use uuid::Uuid;

use super::registry::{ConnectionRegistry, Visit};
use crate::metrics;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteReport {
    pub delivered: usize,
    pub pruned: usize,
}

/// Fans an envelope out to every connection of one tenant.
#[derive(Clone)]
pub struct BroadcastRouter {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// A failed delivery never stops the walk; the failed connection is
    /// unregistered once the walk is done.
    pub async fn route(&self, tenant: Uuid, envelope: Arc<EventEnvelope>) -> RouteReport {
        let mut delivered = 0;
        let pruned = self
            .registry
            .for_each(tenant, |connection| match connection.deliver(Arc::clone(&envelope)) {
                Ok(()) => {
                    delivered += 1;
                    Visit::Keep
                }
                Err(gone) => {
                    debug!(org_id = %tenant, connection_id = %gone.0, "pruning closed connection");
                    Visit::Prune
                }
            })
            .await;

        let event_type = envelope.event_type();
        metrics::record_route(event_type.as_str(), delivered, pruned);
        debug!(
            org_id = %tenant,
            event_type = %event_type,
            delivered,
            pruned,
            "routed envelope"
        );

        RouteReport { delivered, pruned }
    }
}
