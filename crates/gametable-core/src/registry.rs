//! Connection registry: durable player identity to live connection binding.
//!
//! The registry maintains one session per `PlayerId`. A reconnect overwrites
//! the stored `ConnectionId` in place instead of creating a duplicate, which
//! is what lets a player resume a room after a dropped transport. It also
//! tracks room subscriptions per connection (room -> connections for
//! broadcast, connection -> room for cleanup on disconnect).
//!
//! Sessions are not destroyed on disconnect. They are stamped with a
//! disconnect time and evicted by a periodic sweep once a grace period has
//! passed, so brief reconnects keep their state.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use gametable_proto::{ConnectionId, PlayerId, PlayerIdentity, RoomId};

/// A registered player session.
///
/// Generic over `I` (instant type) to support virtual time in tests.
#[derive(Debug, Clone)]
pub struct PlayerSession<I> {
    /// Stable player id (registry key).
    pub player_id: PlayerId,
    /// Current live connection. Overwritten on reconnect.
    pub connection_id: ConnectionId,
    /// Name shown to other players.
    pub display_name: String,
    /// Resolved avatar reference.
    pub avatar_ref: String,
    /// Room the player currently occupies, if any.
    pub room_id: Option<RoomId>,
    /// Whether the player is in a game. Gates `joinGame`.
    pub in_game: bool,
    /// When the player's transport last dropped. `None` while connected.
    pub disconnected_at: Option<I>,
}

/// Result of binding an identity to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// First time this player connected.
    New,
    /// Known player on a fresh connection. Carries the room the session was
    /// in so the caller can re-establish the transport subscription - a new
    /// connection does not inherit the old one's subscription implicitly.
    Reconnected {
        /// Room preserved from the previous connection, if any.
        room_id: Option<RoomId>,
    },
}

/// Registry for player sessions and room subscriptions.
///
/// Owned data behind whatever lock the runtime chooses; nothing here is
/// global or shared. Generic over `I` (instant type) for virtual time.
#[derive(Debug)]
pub struct SessionRegistry<I = std::time::Instant> {
    /// Player id -> session.
    sessions: HashMap<PlayerId, PlayerSession<I>>,
    /// Connection id -> player id (reverse index).
    connections: HashMap<ConnectionId, PlayerId>,
    /// Room id -> subscribed connections (for broadcast).
    room_subscriptions: HashMap<RoomId, HashSet<ConnectionId>>,
    /// Connection id -> subscribed room (a connection occupies at most one).
    connection_room: HashMap<ConnectionId, RoomId>,
}

impl<I> Default for SessionRegistry<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I> SessionRegistry<I> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            connections: HashMap::new(),
            room_subscriptions: HashMap::new(),
            connection_room: HashMap::new(),
        }
    }

    /// Bind an identity to a connection, upserting the session.
    ///
    /// Unknown player: creates a fresh session with no room. Known player:
    /// overwrites the stored connection id, clears the disconnect stamp, and
    /// preserves `room_id`/`in_game` - the reconnection path.
    pub fn bind(
        &mut self,
        connection_id: ConnectionId,
        identity: PlayerIdentity,
        fallback_avatar: &str,
    ) -> BindOutcome {
        if let Some(session) = self.sessions.get_mut(&identity.player_id) {
            self.connections.remove(&session.connection_id);
            session.connection_id = connection_id;
            session.disconnected_at = None;
            self.connections.insert(connection_id, identity.player_id);
            return BindOutcome::Reconnected { room_id: session.room_id.clone() };
        }

        let avatar_ref =
            identity.avatar_ref.unwrap_or_else(|| fallback_avatar.to_string());
        let session = PlayerSession {
            player_id: identity.player_id.clone(),
            connection_id,
            display_name: identity.display_name,
            avatar_ref,
            room_id: None,
            in_game: false,
            disconnected_at: None,
        };
        self.connections.insert(connection_id, identity.player_id.clone());
        self.sessions.insert(identity.player_id, session);
        BindOutcome::New
    }

    /// Session for a player. `None` if unknown.
    pub fn session(&self, player_id: &PlayerId) -> Option<&PlayerSession<I>> {
        self.sessions.get(player_id)
    }

    /// Player currently bound to a connection. `None` if the connection never
    /// identified or its player was evicted.
    pub fn player_for_connection(&self, connection_id: ConnectionId) -> Option<&PlayerId> {
        self.connections.get(&connection_id)
    }

    /// Set or clear the player's room, keeping `in_game` in sync.
    ///
    /// Returns `false` if the player is unknown.
    pub fn set_room(&mut self, player_id: &PlayerId, room_id: Option<RoomId>) -> bool {
        match self.sessions.get_mut(player_id) {
            Some(session) => {
                session.in_game = room_id.is_some();
                session.room_id = room_id;
                true
            },
            None => false,
        }
    }

    /// Remove a session entirely, along with its connection index entry and
    /// room subscription. Returns the removed session if it existed.
    pub fn unbind(&mut self, player_id: &PlayerId) -> Option<PlayerSession<I>> {
        let session = self.sessions.remove(player_id)?;
        if self.connections.get(&session.connection_id) == Some(player_id) {
            self.connections.remove(&session.connection_id);
            self.unsubscribe_connection(session.connection_id);
        }
        Some(session)
    }

    /// Subscribe a connection to a room's broadcast channel.
    ///
    /// A connection subscribes to at most one room; a second subscribe moves
    /// it. Returns `false` if the connection has no bound player.
    pub fn subscribe(&mut self, connection_id: ConnectionId, room_id: RoomId) -> bool {
        if !self.connections.contains_key(&connection_id) {
            return false;
        }
        self.unsubscribe_connection(connection_id);
        self.room_subscriptions.entry(room_id.clone()).or_default().insert(connection_id);
        self.connection_room.insert(connection_id, room_id);
        true
    }

    /// Unsubscribe a connection from whatever room it is in.
    ///
    /// Returns the room it was subscribed to, if any. Empty subscription sets
    /// are removed.
    pub fn unsubscribe_connection(&mut self, connection_id: ConnectionId) -> Option<RoomId> {
        let room_id = self.connection_room.remove(&connection_id)?;
        if let Some(subscribers) = self.room_subscriptions.get_mut(&room_id) {
            subscribers.remove(&connection_id);
            if subscribers.is_empty() {
                self.room_subscriptions.remove(&room_id);
            }
        }
        Some(room_id)
    }

    /// All connections subscribed to a room.
    pub fn connections_in_room(&self, room_id: &RoomId) -> impl Iterator<Item = ConnectionId> + '_ {
        self.room_subscriptions.get(room_id).into_iter().flat_map(|s| s.iter().copied())
    }

    /// Stamp a player's session as disconnected at `now`.
    ///
    /// No-op for unknown players. The session stays resident until
    /// [`SessionRegistry::evict_expired`] sweeps it.
    pub fn mark_disconnected(&mut self, player_id: &PlayerId, now: I) {
        if let Some(session) = self.sessions.get_mut(player_id) {
            session.disconnected_at = Some(now);
        }
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl<I> SessionRegistry<I>
where
    I: Copy + std::ops::Sub<Output = Duration>,
{
    /// Remove sessions that have been disconnected for at least `grace`.
    ///
    /// Returns the evicted player ids. Sessions that reconnected since their
    /// disconnect stamp was set are untouched (`bind` clears the stamp).
    pub fn evict_expired(&mut self, now: I, grace: Duration) -> Vec<PlayerId> {
        let expired: Vec<PlayerId> = self
            .sessions
            .values()
            .filter(|s| s.disconnected_at.is_some_and(|t| now - t >= grace))
            .map(|s| s.player_id.clone())
            .collect();

        for player_id in &expired {
            self.unbind(player_id);
        }
        expired
    }
}
