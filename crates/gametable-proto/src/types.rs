//! Identifiers and game-state value types.
//!
//! `PlayerId` and `RoomId` are externally issued strings: the auth collaborator
//! mints player ids, and a room id equals the identifier of the game document
//! it mirrors. `ConnectionId` is server-internal and ephemeral - a player who
//! reconnects gets a fresh one while keeping the same `PlayerId`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable player identity, issued by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    /// Create a player id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Room identifier, equal to the backing game document's identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    /// Create a room id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Ephemeral connection identifier, assigned by the runtime per transport
/// connection. Changes across reconnects; never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity record handed to the coordinator at connection time.
///
/// Produced by the authentication collaborator; the coordinator never checks
/// credentials, it only binds the identity to the live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerIdentity {
    /// Stable player id.
    pub player_id: PlayerId,
    /// Name shown to other players.
    pub display_name: String,
    /// Avatar image reference. Falls back to a server default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

/// A room membership entry. Ordered by join time within a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// Stable player id. Membership removal is keyed by this, not the
    /// display name - two players may share a name.
    pub player_id: PlayerId,
    /// Name shown to other players.
    pub display_name: String,
    /// Avatar image reference.
    pub avatar_ref: String,
}

/// One entry in a room's game log (a chat message or dice-roll result).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Display name of the author.
    pub username: String,
    /// Rendered message text.
    pub message: String,
}

impl LogEntry {
    /// Create a log entry.
    pub fn new(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self { username: username.into(), message: message.into() }
    }
}

/// A token placed on the shared board.
///
/// Opaque to the coordinator: the token sequence is stored and replaced
/// wholesale, never inspected or merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPlacement {
    /// Client-assigned token id.
    pub id: String,
    /// Image reference for the token art.
    pub image: String,
    /// Horizontal board position.
    pub x: f64,
    /// Vertical board position.
    pub y: f64,
}

/// The durable mirror of a room's mutable state.
///
/// Seeds the in-memory game state on first join and receives the final state
/// on flush when the room drains.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameDocument {
    /// Game log, oldest first.
    #[serde(default)]
    pub log: Vec<LogEntry>,
    /// Current token layout.
    #[serde(default)]
    pub tokens: Vec<TokenPlacement>,
}

/// Full room state sent to every subscriber when membership changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    /// Game log, oldest first.
    #[serde(rename = "logs")]
    pub log: Vec<LogEntry>,
    /// Current token layout.
    pub tokens: Vec<TokenPlacement>,
    /// Present players in join order.
    #[serde(rename = "players")]
    pub members: Vec<Member>,
}
