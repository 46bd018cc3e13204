//! # Session Hub
//!
//! Real-time session hub: clients hold a WebSocket open, every connection
//! is admitted with a bearer JWT at the upgrade, and each inbound text
//! message is relayed to all connected clients.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SESSION HUB                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  network/          - Hub core                                │
//! │  ├── auth.rs       - JWT verification -> Identity            │
//! │  ├── gate.rs       - Bearer extraction, 401 at upgrade       │
//! │  ├── connection.rs - Connection handle + outbound queue      │
//! │  ├── registry.rs   - Concurrent id -> connection map         │
//! │  ├── lifecycle.rs  - Register on open, deregister on close   │
//! │  ├── relay.rs      - All-to-all fan-out                      │
//! │  ├── protocol.rs   - Text framing                            │
//! │  ├── player.rs     - Optional player metadata                │
//! │  └── server.rs     - Accept loop, per-connection tasks       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Flow
//!
//! handshake -> [`AdmissionGate`] -> [`TokenVerifier`] -> connection
//! created -> [`LifecycleManager::on_established`] -> text frames ->
//! [`BroadcastRelay::relay`] -> close -> [`LifecycleManager::on_closed`].
//!
//! The registry is passed explicitly to the relay and lifecycle manager;
//! there is no process-wide connection map.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod network;

// Re-export commonly used types
pub use network::{
    AdmissionGate, AuthConfig, BroadcastMessage, BroadcastRelay, Connection, ConnectionId,
    ConnectionRegistry, HubConfig, HubError, HubServer, Identity, JwtVerifier, LifecycleManager,
    RelayPolicy, TokenVerifier,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
