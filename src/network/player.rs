//! Player Metadata
//!
//! Optional payload attached to a connection next to its identity.
//! The hub carries it for downstream consumers and never interprets it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::network::auth::Identity;

/// Starting health for a freshly created player.
pub const STARTING_HEALTH: i32 = 100;

/// Player state as supplied by the player collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Entity identifier (matches [`Identity::entity_id`]).
    pub id: String,
    /// Display name.
    pub username: String,
    /// Map position X.
    pub x: i32,
    /// Map position Y.
    pub y: i32,
    /// Current health.
    pub health: i32,
    /// Team membership, if any.
    pub team_id: Option<String>,
    /// Whether the player is online.
    pub online: bool,
    /// Last time the player was seen.
    pub last_seen: DateTime<Utc>,
}

impl Player {
    /// A new player at the origin with full health.
    pub fn spawn(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            x: 0,
            y: 0,
            health: STARTING_HEALTH,
            team_id: None,
            online: true,
            last_seen: Utc::now(),
        }
    }
}

/// Source of player metadata for admitted identities.
pub trait PlayerDirectory: Send + Sync {
    /// Player to attach for `identity`, if any.
    fn lookup(&self, identity: &Identity) -> Option<Player>;
}

/// Directory that spawns a fresh player for every identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpawnPlayers;

impl PlayerDirectory for SpawnPlayers {
    fn lookup(&self, identity: &Identity) -> Option<Player> {
        Some(Player::spawn(identity.entity_id.clone(), identity.subject.clone()))
    }
}
