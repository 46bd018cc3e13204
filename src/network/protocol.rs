//! Protocol Messages
//!
//! Frames on the wire are plain text. An inbound payload is opaque to the
//! hub; the outbound copy is the payload behind an optional marker.

use serde::{Deserialize, Serialize};

use crate::network::connection::ConnectionId;

/// Marker prepended to relayed payloads unless configured otherwise.
pub const DEFAULT_BROADCAST_PREFIX: &str = "Broadcast: ";

/// A message received from one connection, to be fanned out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    /// Connection the payload arrived on.
    pub origin: ConnectionId,
    /// Uninterpreted text payload.
    pub payload: String,
}

impl BroadcastMessage {
    pub fn new(origin: ConnectionId, payload: impl Into<String>) -> Self {
        Self {
            origin,
            payload: payload.into(),
        }
    }

    /// Outbound text frame for this message.
    pub fn render(&self, prefix: Option<&str>) -> String {
        match prefix {
            Some(prefix) if !prefix.is_empty() => {
                let mut out = String::with_capacity(prefix.len() + self.payload.len());
                out.push_str(prefix);
                out.push_str(&self.payload);
                out
            }
            _ => self.payload.clone(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_with_default_prefix() {
        let msg = BroadcastMessage::new(ConnectionId::next(), "hello");
        assert_eq!(msg.render(Some(DEFAULT_BROADCAST_PREFIX)), "Broadcast: hello");
    }

    #[test]
    fn test_render_without_prefix() {
        let msg = BroadcastMessage::new(ConnectionId::next(), "{\"x\":1}");
        assert_eq!(msg.render(None), "{\"x\":1}");
        assert_eq!(msg.render(Some("")), "{\"x\":1}");
    }
}
