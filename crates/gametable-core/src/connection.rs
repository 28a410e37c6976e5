//! Per-connection lifecycle state machine.
//!
//! Every connection walks the same path: it arrives anonymous, identifies a
//! player, optionally enters a room, and terminates. The machine is pure;
//! the runtime consults it before touching the registry or a room, so an
//! out-of-order event is rejected here instead of corrupting shared state.

use gametable_proto::{PlayerId, RoomId};

/// Lifecycle state of one client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected, no player identified yet. Only `playerConnect` is valid.
    Anonymous,
    /// Player identified, not in any room.
    Lobby {
        /// The identified player.
        player: PlayerId,
    },
    /// Player identified and joined to a room.
    InRoom {
        /// The identified player.
        player: PlayerId,
        /// The joined room.
        room: RoomId,
    },
    /// Connection closed or logged out. No further transitions.
    Terminated,
}

/// An event arrived that the connection's current state does not permit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// The event requires an identified player.
    #[error("no player identified on this connection")]
    NotIdentified,
    /// The event requires room membership.
    #[error("connection is not in a room")]
    NotInRoom,
    /// The connection is already in a room and must leave first.
    #[error("connection is already in room {0}")]
    AlreadyInRoom(RoomId),
    /// The connection has terminated.
    #[error("connection is terminated")]
    Terminated,
}

impl ConnectionState {
    /// Identify a player on this connection.
    ///
    /// Valid from any live state. Re-identifying replaces the player and,
    /// from `InRoom`, drops back to the lobby; the caller handles the room
    /// side of that.
    pub fn identify(&mut self, player: PlayerId) -> Result<(), StateError> {
        if matches!(self, Self::Terminated) {
            return Err(StateError::Terminated);
        }
        *self = Self::Lobby { player };
        Ok(())
    }

    /// Enter a room.
    pub fn enter_room(&mut self, room: RoomId) -> Result<(), StateError> {
        match self {
            Self::Anonymous => Err(StateError::NotIdentified),
            Self::Lobby { player } => {
                *self = Self::InRoom { player: player.clone(), room };
                Ok(())
            },
            Self::InRoom { room, .. } => Err(StateError::AlreadyInRoom(room.clone())),
            Self::Terminated => Err(StateError::Terminated),
        }
    }

    /// Leave the current room, returning to the lobby.
    ///
    /// Returns the room that was left.
    pub fn leave_room(&mut self) -> Result<RoomId, StateError> {
        match self {
            Self::Anonymous => Err(StateError::NotIdentified),
            Self::Lobby { .. } => Err(StateError::NotInRoom),
            Self::InRoom { player, room } => {
                let left = room.clone();
                *self = Self::Lobby { player: player.clone() };
                Ok(left)
            },
            Self::Terminated => Err(StateError::Terminated),
        }
    }

    /// Terminate the connection. Idempotent.
    ///
    /// Returns the room the connection was in, if any, so the caller can
    /// run the implicit leave.
    pub fn terminate(&mut self) -> Option<RoomId> {
        let room = match self {
            Self::InRoom { room, .. } => Some(room.clone()),
            _ => None,
        };
        *self = Self::Terminated;
        room
    }

    /// The identified player, if any.
    pub fn player(&self) -> Option<&PlayerId> {
        match self {
            Self::Lobby { player } | Self::InRoom { player, .. } => Some(player),
            Self::Anonymous | Self::Terminated => None,
        }
    }

    /// The joined room, if any.
    pub fn room(&self) -> Option<&RoomId> {
        match self {
            Self::InRoom { room, .. } => Some(room),
            _ => None,
        }
    }
}
