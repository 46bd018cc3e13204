//! Live Connections
//!
//! A [`Connection`] is the hub-side handle of one established WebSocket.
//! Outbound frames go through a bounded channel that a per-connection
//! writer task drains into the socket, so delivering to a connection never
//! blocks the caller.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::network::auth::Identity;
use crate::network::player::Player;

/// Sending half of a connection's outbound frame queue.
pub type Outbound = mpsc::Sender<Message>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identifier.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a single delivery did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Outbound buffer is full; the peer is not draining.
    #[error("outbound buffer full")]
    Full,
    /// Writer side is gone; the transport is dead.
    #[error("connection closed")]
    Closed,
}

/// An established, admitted connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    identity: Option<Identity>,
    player: Option<Player>,
    peer_addr: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
    open: AtomicBool,
    outbound: Outbound,
}

impl Connection {
    /// Create a connection around its outbound queue.
    pub fn new(id: ConnectionId, outbound: Outbound) -> Self {
        Self {
            id,
            identity: None,
            player: None,
            peer_addr: None,
            connected_at: Utc::now(),
            open: AtomicBool::new(true),
            outbound,
        }
    }

    /// Attach the identity admitted at handshake.
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Attach player metadata.
    pub fn with_player(mut self, player: Option<Player>) -> Self {
        self.player = player;
        self
    }

    /// Record the remote address.
    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn player(&self) -> Option<&Player> {
        self.player.as_ref()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Open from the hub's point of view: not marked closed and the writer
    /// task still holds its receiver.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    /// Mark closed. Returns true only for the call that performed the
    /// transition.
    pub fn mark_closed(&self) -> bool {
        self.open.swap(false, Ordering::AcqRel)
    }

    /// Queue a text frame without waiting.
    pub fn deliver(&self, text: String) -> Result<(), DeliveryError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(DeliveryError::Closed);
        }
        self.outbound.try_send(Message::Text(text)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Server-initiated close: queue a close frame and mark closed.
    ///
    /// Returns true if a close frame was queued by this call.
    pub fn close(&self, code: CloseCode, reason: &str) -> bool {
        if !self.mark_closed() {
            return false;
        }

        let frame = CloseFrame {
            code,
            reason: reason.to_owned().into(),
        };
        match self.outbound.try_send(Message::Close(Some(frame))) {
            Ok(()) => true,
            Err(e) => {
                let cause = match e {
                    mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
                    mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
                };
                debug!("Close frame ({}) for {} not queued: {}", code, self.id, cause);
                false
            }
        }
    }

    /// Seconds since the connection was established.
    pub fn age_secs(&self) -> i64 {
        (Utc::now() - self.connected_at).num_seconds()
    }

    /// Short label for log lines.
    pub fn label(&self) -> String {
        let peer = self
            .peer_addr
            .map(|addr| format!(" @ {}", addr))
            .unwrap_or_default();
        match &self.identity {
            Some(identity) => format!(
                "{} ({}#{}){}",
                self.id,
                identity.subject,
                identity.fingerprint(),
                peer
            ),
            None => format!("{}{}", self.id, peer),
        }
    }
}
