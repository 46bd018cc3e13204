//! Network Layer
//!
//! WebSocket hub: handshake admission, the live connection registry and
//! the all-to-all relay.

pub mod auth;
pub mod connection;
pub mod gate;
pub mod lifecycle;
pub mod player;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;

pub use auth::{AuthConfig, AuthError, Identity, JwtVerifier, TokenClaims, TokenVerifier};
pub use connection::{Connection, ConnectionId, DeliveryError};
pub use gate::{AdmissionError, AdmissionGate};
pub use lifecycle::{CloseReason, LifecycleManager};
pub use player::{Player, PlayerDirectory, SpawnPlayers};
pub use protocol::BroadcastMessage;
pub use registry::ConnectionRegistry;
pub use relay::{BroadcastRelay, RelayPolicy, RelayReport};
pub use server::{HubConfig, HubError, HubServer};
