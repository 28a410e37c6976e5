//! CBOR-encoded coordinator events.
//!
//! Events are adjacently tagged (`event` + `data` keys) so an adapter in any
//! language can dispatch on the event name without trial-decoding payloads.
//!
//! # Invariants
//!
//! Round-trip encoding must produce identical values; malformed bytes decode
//! to an error, never to a partially-filled event.

use serde::{Deserialize, Serialize};

use crate::{
    ProtocolError,
    types::{GameDocument, LogEntry, Member, PlayerIdentity, RoomId, RoomSnapshot, TokenPlacement},
};

/// Events a connection sends into the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Bind a player identity to this connection. Reconnection path when the
    /// player is already known.
    PlayerConnect(PlayerIdentity),

    /// Explicitly end the session. Leaves the current room (if any) and
    /// removes the registry entry.
    Logout,

    /// Join a game room, creating it when unknown.
    #[serde(rename_all = "camelCase")]
    JoinGame {
        /// Room to join; equals the game document id.
        room_id: RoomId,
        /// Seed state for a room that isn't open yet. When absent the
        /// coordinator falls back to durable storage, then to an empty
        /// document.
        #[serde(
            rename = "initialGameDocument",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        initial_document: Option<GameDocument>,
    },

    /// Leave the current room.
    LeaveGame,

    /// Append a dice-roll result to the room log.
    DiceRoll(LogEntry),

    /// Append a chat message to the room log.
    SendMessage(LogEntry),

    /// Replace the room's token layout.
    UpdateTokens(Vec<TokenPlacement>),

    /// Replace the room's token layout after a deletion. Carries the full
    /// remaining sequence, same as [`ClientEvent::UpdateTokens`].
    DeleteToken(Vec<TokenPlacement>),
}

/// Events the coordinator sends out to connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Acknowledges `playerConnect` with a status string.
    NewPlayer(String),

    /// Full room snapshot, sent to the room on every join.
    GameStatusUpdated(RoomSnapshot),

    /// Updated member list, sent to the room when a player leaves.
    PlayerLeft(Vec<Member>),

    /// Full log sequence, sent to the room after a log mutation.
    UpdateLog(Vec<LogEntry>),

    /// Token sequence, sent to the room after a token mutation.
    UpdateToken(Vec<TokenPlacement>),

    /// An event was refused without any state change (for example a join
    /// while already in a game). Carries a human-readable reason.
    Rejected(String),
}

impl ClientEvent {
    /// Encode to CBOR, appending to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        ciborium::into_writer(self, &mut *buf).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decode from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

impl ServerEvent {
    /// Encode to CBOR, appending to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        ciborium::into_writer(self, &mut *buf).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decode from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}
