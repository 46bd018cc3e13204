//! Connection Lifecycle
//!
//! Binds established connections into the registry and removes them when
//! the transport reports closure. Open -> closed is the only transition.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::network::connection::Connection;
use crate::network::registry::ConnectionRegistry;

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent a close frame.
    ClientClosed,
    /// Stream ended without a close frame.
    StreamEnded,
    /// Transport or protocol error.
    TransportError(String),
    /// Hub is shutting down.
    ServerShutdown,
    /// Client sent a frame type the hub does not accept.
    Unsupported,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientClosed => write!(f, "closed by client"),
            CloseReason::StreamEnded => write!(f, "stream ended"),
            CloseReason::TransportError(e) => write!(f, "transport error: {}", e),
            CloseReason::ServerShutdown => write!(f, "server shutdown"),
            CloseReason::Unsupported => write!(f, "unsupported frame"),
        }
    }
}

/// Registers and deregisters connections.
#[derive(Debug, Clone)]
pub struct LifecycleManager {
    registry: Arc<ConnectionRegistry>,
}

impl LifecycleManager {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Called once the handshake has completed.
    pub fn on_established(&self, connection: Arc<Connection>) {
        let id = connection.id();
        info!("Connection {} established", connection.label());
        self.registry.put(id, connection);
    }

    /// Called when the transport reports closure. Safe to call repeatedly.
    ///
    /// Returns true if this call removed the registry entry.
    pub fn on_closed(&self, connection: &Connection, reason: CloseReason) -> bool {
        connection.mark_closed();

        match self.registry.remove(&connection.id()) {
            Some(_) => {
                info!(
                    "Connection {} closed after {}s: {}",
                    connection.label(),
                    connection.age_secs(),
                    reason
                );
                true
            }
            None => {
                debug!("Connection {} already deregistered ({})", connection.id(), reason);
                false
            }
        }
    }
}
