//! Broadcast Relay
//!
//! Fans a message out to every open connection in a registry snapshot.
//! Delivery is best-effort and non-blocking: each recipient gets one
//! attempt, and a failure for one recipient never affects the others.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::network::connection::{ConnectionId, DeliveryError};
use crate::network::protocol::{BroadcastMessage, DEFAULT_BROADCAST_PREFIX};
use crate::network::registry::ConnectionRegistry;

/// Relay behavior knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPolicy {
    /// Deliver back to the originating connection too.
    pub include_origin: bool,
    /// Marker prepended to each payload. `None` sends the payload as is.
    pub prefix: Option<String>,
    /// Deregister recipients whose transport is found closed at send time
    /// instead of waiting for their close notification.
    pub evict_on_failure: bool,
}

impl Default for RelayPolicy {
    fn default() -> Self {
        Self {
            include_origin: true,
            prefix: Some(DEFAULT_BROADCAST_PREFIX.to_string()),
            evict_on_failure: true,
        }
    }
}

/// Outcome of one relay call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Recipients a delivery was attempted to.
    pub recipients: usize,
    /// Successful deliveries.
    pub delivered: usize,
    /// Recipients whose delivery failed.
    pub failed: Vec<ConnectionId>,
    /// Registered connections skipped because they reported closed.
    pub skipped_closed: usize,
    /// Connections deregistered during this relay.
    pub evicted: Vec<ConnectionId>,
}

/// All-to-all relay over a shared registry.
#[derive(Debug, Clone)]
pub struct BroadcastRelay {
    registry: Arc<ConnectionRegistry>,
    policy: RelayPolicy,
}

impl BroadcastRelay {
    pub fn new(registry: Arc<ConnectionRegistry>, policy: RelayPolicy) -> Self {
        Self { registry, policy }
    }

    /// Deliver `message` to every open connection registered right now.
    pub fn relay(&self, message: &BroadcastMessage) -> RelayReport {
        let frame = message.render(self.policy.prefix.as_deref());
        let mut report = RelayReport::default();

        for conn in self.registry.snapshot() {
            if !self.policy.include_origin && conn.id() == message.origin {
                continue;
            }

            if !conn.is_open() {
                report.skipped_closed += 1;
                if self.policy.evict_on_failure && self.registry.remove(&conn.id()).is_some() {
                    debug!("Evicted closed connection {}", conn.id());
                    report.evicted.push(conn.id());
                }
                continue;
            }

            report.recipients += 1;
            match conn.deliver(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Full) => {
                    warn!("Dropping broadcast to {}: outbound buffer full", conn.label());
                    report.failed.push(conn.id());
                }
                Err(DeliveryError::Closed) => {
                    debug!("Broadcast to {} failed: connection closed", conn.id());
                    report.failed.push(conn.id());
                    if self.policy.evict_on_failure && self.registry.remove(&conn.id()).is_some() {
                        report.evicted.push(conn.id());
                    }
                }
            }
        }

        debug!(
            "Relayed message from {} to {}/{} recipients",
            message.origin, report.delivered, report.recipients
        );
        report
    }
}

// =============================================================================
// TESTS
// =============================================================================
