//! Session coordinator: routes client events through the pure state machines
//! and fans results out to subscribed connections.
//!
//! One coordinator instance owns all shared state behind its own locks; there
//! are no globals. Rooms are locked individually, so traffic in one room
//! never blocks another. All mutations and broadcasts for a room happen under
//! that room's lock, which is what makes concurrent dice rolls serialize into
//! one consistent log.
//!
//! # Lock ordering
//!
//! connection state -> rooms map -> room -> registry -> outbound senders.
//! The rooms map guard is never held across a room lock acquisition, with
//! one deliberate exception: the final leaver removes the map entry while
//! still holding the room lock, and marks the room closed. A join that raced
//! the teardown observes the closed flag and retries against a fresh entry.
//! The pending-flush map is a leaf lock: always taken last and released
//! before any other lock is acquired.

use std::{collections::HashMap, sync::Arc, time::Duration};

use gametable_core::{
    BindOutcome, ConnectionState, Environment, LeaveOutcome, Room, SessionRegistry, StateOp,
};
use gametable_proto::{
    ClientEvent, ConnectionId, GameDocument, LogEntry, Member, PlayerId, PlayerIdentity, RoomId,
    RoomSnapshot, ServerEvent, TokenPlacement,
};
use tokio::sync::{Mutex, RwLock, mpsc::UnboundedSender};

use crate::{error::ServerError, storage::DocumentStore};

/// Avatar used when a client identifies without one.
pub const DEFAULT_AVATAR: &str = "https://i.imgur.com/XUsbw4H.png";

/// Acknowledgement for a first-time player.
pub const ACK_NEW_PLAYER: &str = "New Player Established";

/// Acknowledgement for a returning player.
pub const ACK_EXISTING_PLAYER: &str = "Existing Player Updated";

/// Coordinator tuning knobs.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Avatar reference assigned when the client sends none.
    pub default_avatar: String,
    /// How long a disconnected session survives before eviction.
    pub disconnect_grace: Duration,
    /// How many times a failed flush is retried before the document is
    /// dropped.
    pub flush_retries: usize,
    /// Delay between flush retries.
    pub flush_backoff: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_avatar: DEFAULT_AVATAR.to_string(),
            disconnect_grace: Duration::from_secs(60),
            flush_retries: 3,
            flush_backoff: Duration::from_millis(250),
        }
    }
}

/// Per-connection state held by the coordinator.
///
/// The lifecycle state is behind its own mutex; a connection's events are
/// already serialized by its reader task, so this lock is uncontended in
/// practice and exists to make the coordinator safe against misuse.
struct ConnectionEntry {
    state: Mutex<ConnectionState>,
    sender: UnboundedSender<ServerEvent>,
}

/// A drained room's final document, parked until its flush lands.
///
/// The entry exists exactly while one flusher task runs for the room. The
/// generation lets the flusher tell whether a newer drain superseded the
/// document it just wrote; a superseded write is followed by another pass
/// rather than being the last word.
struct PendingFlush {
    document: GameDocument,
    generation: u64,
}

/// The session coordinator.
///
/// Generic over the environment (time, randomness) and the document store so
/// tests can substitute both. Designed to sit behind an `Arc` shared by all
/// connection tasks.
pub struct Coordinator<E: Environment, S: DocumentStore> {
    env: E,
    store: S,
    config: CoordinatorConfig,
    registry: RwLock<SessionRegistry<E::Instant>>,
    rooms: RwLock<HashMap<RoomId, Arc<Mutex<Room>>>>,
    connections: RwLock<HashMap<ConnectionId, Arc<ConnectionEntry>>>,
    pending_flushes: Arc<Mutex<HashMap<RoomId, PendingFlush>>>,
}

impl<E: Environment, S: DocumentStore> Coordinator<E, S> {
    /// Create a coordinator over the given environment and store.
    pub fn new(env: E, store: S, config: CoordinatorConfig) -> Self {
        Self {
            env,
            store,
            config,
            registry: RwLock::new(SessionRegistry::new()),
            rooms: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            pending_flushes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The document store backing this coordinator.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Register a new transport connection.
    ///
    /// `sender` is the connection's outbound channel; everything the
    /// coordinator wants delivered to this client goes through it. Returns
    /// the assigned connection id.
    pub async fn register_connection(
        &self,
        sender: UnboundedSender<ServerEvent>,
    ) -> ConnectionId {
        let connection_id = ConnectionId(self.env.random_u64());
        let entry =
            Arc::new(ConnectionEntry { state: Mutex::new(ConnectionState::Anonymous), sender });

        self.connections.write().await.insert(connection_id, entry);
        tracing::debug!(%connection_id, "connection registered");
        connection_id
    }

    /// Handle one client event.
    ///
    /// Events the connection's state does not permit are answered with a
    /// [`ServerEvent::Rejected`] rather than dropped; the connection stays
    /// open. `Err` is reserved for events on connections the coordinator
    /// does not know.
    pub async fn handle_event(
        &self,
        connection_id: ConnectionId,
        event: ClientEvent,
    ) -> Result<(), ServerError> {
        let connection = self.entry(connection_id).await?;
        let mut state = connection.state.lock().await;

        match event {
            ClientEvent::PlayerConnect(identity) => {
                self.player_connect(connection_id, &mut state, identity).await;
            },
            ClientEvent::Logout => {
                self.logout(connection_id, &mut state).await;
            },
            ClientEvent::JoinGame { room_id, initial_document } => {
                self.join_game(connection_id, &mut state, room_id, initial_document).await;
            },
            ClientEvent::LeaveGame => match state.leave_room() {
                Ok(room_id) => {
                    self.leave_room_side(connection_id, room_id, true).await;
                },
                Err(err) => self.reject(connection_id, &err.to_string()).await,
            },
            ClientEvent::DiceRoll(entry) | ClientEvent::SendMessage(entry) => {
                self.append_log(connection_id, &state, entry).await;
            },
            ClientEvent::UpdateTokens(tokens) | ClientEvent::DeleteToken(tokens) => {
                self.replace_tokens(connection_id, &state, tokens).await;
            },
        }

        Ok(())
    }

    /// Tear down a connection whose transport dropped.
    ///
    /// Removes the player from their room (others see `playerLeft`) but
    /// keeps the registry session alive with a disconnect stamp, so a
    /// reconnect within the grace period resumes the room. The room-side
    /// cleanup is skipped if the player already rebound to a newer
    /// connection.
    pub async fn connection_closed(&self, connection_id: ConnectionId) {
        let Some(entry) = self.connections.write().await.remove(&connection_id) else {
            return;
        };
        let room_id = entry.state.lock().await.terminate();

        let player = {
            let mut registry = self.registry.write().await;
            registry.unsubscribe_connection(connection_id);
            match registry.player_for_connection(connection_id).cloned() {
                Some(player) => {
                    registry.mark_disconnected(&player, self.env.now());
                    Some(player)
                },
                // Stale close: the player rebound, or never identified. The
                // room side stays untouched.
                None => None,
            }
        };

        tracing::debug!(%connection_id, "connection closed");

        if let (Some(player), Some(room_id)) = (player, room_id) {
            self.remove_from_room(&player, &room_id).await;
        }
    }

    /// Sweep sessions whose disconnect grace period has expired.
    ///
    /// Intended to be called periodically by the runtime.
    pub async fn tick(&self) {
        let evicted = self
            .registry
            .write()
            .await
            .evict_expired(self.env.now(), self.config.disconnect_grace);

        for player_id in &evicted {
            tracing::info!(%player_id, "session evicted after disconnect grace period");
        }
    }

    /// Snapshot of a live room. `None` if the room is not open.
    pub async fn room_snapshot(&self, room_id: &RoomId) -> Option<RoomSnapshot> {
        let room = {
            let rooms = self.rooms.read().await;
            Arc::clone(rooms.get(room_id)?)
        };
        let room = room.lock().await;
        Some(room.snapshot())
    }

    /// Number of registered player sessions.
    pub async fn session_count(&self) -> usize {
        self.registry.read().await.session_count()
    }

    async fn player_connect(
        &self,
        connection_id: ConnectionId,
        state: &mut ConnectionState,
        identity: PlayerIdentity,
    ) {
        // Identifying while in a room is treated as leaving it first.
        if let Ok(room_id) = state.leave_room() {
            self.leave_room_side(connection_id, room_id, true).await;
        }

        if let Err(err) = state.identify(identity.player_id.clone()) {
            self.reject(connection_id, &err.to_string()).await;
            return;
        }

        let outcome = self
            .registry
            .write()
            .await
            .bind(connection_id, identity, &self.config.default_avatar);

        match outcome {
            BindOutcome::New => {
                self.send_to(connection_id, ServerEvent::NewPlayer(ACK_NEW_PLAYER.to_string()))
                    .await;
            },
            BindOutcome::Reconnected { room_id } => {
                self.send_to(
                    connection_id,
                    ServerEvent::NewPlayer(ACK_EXISTING_PLAYER.to_string()),
                )
                .await;

                // Resume the interrupted room, if any. The room membership
                // was dropped when the old transport died, so this is a
                // fresh join (and may reopen the room from storage).
                if let Some(room_id) = room_id {
                    self.join_game(connection_id, state, room_id, None).await;
                }
            },
        }
    }

    async fn logout(&self, connection_id: ConnectionId, state: &mut ConnectionState) {
        if let Ok(room_id) = state.leave_room() {
            self.leave_room_side(connection_id, room_id, true).await;
        }

        if let Some(player) = state.player().cloned() {
            self.registry.write().await.unbind(&player);
            tracing::info!(%player, "player logged out");
        }

        // The connection survives a logout; the next playerConnect starts
        // over.
        *state = ConnectionState::Anonymous;
    }

    async fn join_game(
        &self,
        connection_id: ConnectionId,
        state: &mut ConnectionState,
        room_id: RoomId,
        initial_document: Option<GameDocument>,
    ) {
        let Some(player) = state.player().cloned() else {
            self.reject(connection_id, "no player identified on this connection").await;
            return;
        };
        if let Some(room) = state.room() {
            self.reject(connection_id, &format!("already in room {room}")).await;
            return;
        }

        let member = {
            let registry = self.registry.read().await;
            match registry.session(&player) {
                Some(session) => Member {
                    player_id: session.player_id.clone(),
                    display_name: session.display_name.clone(),
                    avatar_ref: session.avatar_ref.clone(),
                },
                None => {
                    self.reject(connection_id, "player session expired").await;
                    return;
                },
            }
        };

        // Retry loop: a handle pulled from the map may belong to a room
        // that closed between the lookup and the lock.
        loop {
            let room = match self.room_handle(&room_id, initial_document.clone()).await {
                Ok(room) => room,
                Err(err) => {
                    tracing::error!(%room_id, error = %err, "failed to open room");
                    self.reject(connection_id, &format!("room unavailable: {err}")).await;
                    return;
                },
            };

            let mut room = room.lock().await;
            if room.is_closed() {
                continue;
            }

            // A rebind can land while the previous connection's membership
            // is still in place; keep the existing entry instead of
            // stacking a duplicate.
            let snapshot = if room.members().iter().any(|m| m.player_id == member.player_id) {
                room.snapshot()
            } else {
                room.join(member.clone())
            };
            {
                let mut registry = self.registry.write().await;
                registry.set_room(&player, Some(room_id.clone()));
                registry.subscribe(connection_id, room_id.clone());
            }
            if let Err(err) = state.enter_room(room_id.clone()) {
                // Unreachable given the lobby check above; kept to honor the
                // machine rather than assume around it.
                self.reject(connection_id, &err.to_string()).await;
                return;
            }

            tracing::info!(player = %member.player_id, %room_id, "player joined room");
            self.broadcast(&room_id, ServerEvent::GameStatusUpdated(snapshot)).await;
            return;
        }
    }

    /// Room-side half of a leave: membership, subscription, broadcast, and
    /// the drain flush. `clear_registry_room` distinguishes an explicit
    /// leave (the session forgets the room) from a transport drop (the
    /// session keeps it for reconnection).
    async fn leave_room_side(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
        clear_registry_room: bool,
    ) {
        let player = {
            let mut registry = self.registry.write().await;
            let player = registry.player_for_connection(connection_id).cloned();
            if let Some(player) = &player {
                if clear_registry_room {
                    registry.set_room(player, None);
                }
            }
            registry.unsubscribe_connection(connection_id);
            player
        };

        if let Some(player) = player {
            self.remove_from_room(&player, &room_id).await;
        }
    }

    /// Remove a player from a room's membership, broadcasting the result.
    /// The final leaver closes the room and triggers the flush.
    async fn remove_from_room(&self, player: &PlayerId, room_id: &RoomId) {
        let room = {
            let rooms = self.rooms.read().await;
            match rooms.get(room_id) {
                Some(room) => Arc::clone(room),
                None => return,
            }
        };

        let mut room = room.lock().await;
        match room.leave(player) {
            LeaveOutcome::Remaining(members) => {
                tracing::info!(%player, %room_id, "player left room");
                self.broadcast(room_id, ServerEvent::PlayerLeft(members)).await;
            },
            LeaveOutcome::Closed(document) => {
                // Park the document in the pending-flush map before the
                // room leaves the rooms map, so a rejoin always finds the
                // state somewhere: the map, a pending flush, or the store.
                self.schedule_flush(room_id.clone(), document).await;
                // Remove the map entry while still holding the room lock so
                // no join lands on the dying entry. The closed flag covers
                // handles already cloned out of the map.
                self.rooms.write().await.remove(room_id);
                tracing::info!(%player, %room_id, "last player left, flushing room");
            },
        }
    }

    async fn append_log(
        &self,
        connection_id: ConnectionId,
        state: &ConnectionState,
        entry: LogEntry,
    ) {
        let Some(room_id) = state.room().cloned() else {
            self.reject(connection_id, "connection is not in a room").await;
            return;
        };

        let room = {
            let rooms = self.rooms.read().await;
            match rooms.get(&room_id) {
                Some(room) => Arc::clone(room),
                None => {
                    self.reject(connection_id, "room is no longer open").await;
                    return;
                },
            }
        };

        let mut room = room.lock().await;
        room.apply(StateOp::AppendLog(entry));
        // Broadcast under the room lock: every subscriber observes log
        // updates in the same order.
        self.broadcast(&room_id, ServerEvent::UpdateLog(room.log())).await;
    }

    async fn replace_tokens(
        &self,
        connection_id: ConnectionId,
        state: &ConnectionState,
        tokens: Vec<TokenPlacement>,
    ) {
        let Some(room_id) = state.room().cloned() else {
            self.reject(connection_id, "connection is not in a room").await;
            return;
        };

        let room = {
            let rooms = self.rooms.read().await;
            match rooms.get(&room_id) {
                Some(room) => Arc::clone(room),
                None => {
                    self.reject(connection_id, "room is no longer open").await;
                    return;
                },
            }
        };

        let mut room = room.lock().await;
        room.apply(StateOp::ReplaceTokens(tokens.clone()));
        self.broadcast(&room_id, ServerEvent::UpdateToken(tokens)).await;
    }

    /// Fetch or open a room handle.
    ///
    /// Seed precedence, newest first: a document still waiting on its flush,
    /// then the store, then the client-provided seed. The client seed only
    /// matters for rooms never flushed before.
    async fn room_handle(
        &self,
        room_id: &RoomId,
        seed: Option<GameDocument>,
    ) -> Result<Arc<Mutex<Room>>, ServerError> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(room_id) {
                return Ok(Arc::clone(room));
            }
        }

        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(room_id) {
            // Lost the open race; the first opener's seed wins.
            return Ok(Arc::clone(room));
        }

        // The pending copy, when present, is newer than anything the store
        // has. With the map write lock held no drain of this room can start,
        // so an absent pending entry means the store is authoritative.
        let pending = self
            .pending_flushes
            .lock()
            .await
            .get(room_id)
            .map(|flush| flush.document.clone());
        let stored = match pending {
            Some(document) => Some(document),
            None => self.store.load(room_id)?,
        };

        let document = stored.or(seed).unwrap_or_default();
        let room = Arc::new(Mutex::new(Room::new(room_id.clone(), document)));
        rooms.insert(room_id.clone(), Arc::clone(&room));
        tracing::debug!(%room_id, "room opened");
        Ok(room)
    }

    /// Hand a drained room's document to the flusher.
    ///
    /// The document stays reachable through the pending-flush map until the
    /// save succeeds, so a rejoin during the retry window reopens the room
    /// with its state intact. A second drain while a flush is in flight
    /// replaces the parked document; the running flusher picks it up.
    async fn schedule_flush(&self, room_id: RoomId, document: GameDocument) {
        let mut pending = self.pending_flushes.lock().await;
        if let Some(entry) = pending.get_mut(&room_id) {
            entry.document = document;
            entry.generation += 1;
        } else {
            pending.insert(room_id.clone(), PendingFlush { document, generation: 0 });
            self.spawn_flusher(room_id);
        }
    }

    /// Persist a room's parked document on a background task, retrying
    /// transient failures with a fixed backoff. After the retry budget is
    /// spent the document is dropped and the loss logged. Loops while newer
    /// drains keep superseding the parked document.
    fn spawn_flusher(&self, room_id: RoomId) {
        let pending_flushes = Arc::clone(&self.pending_flushes);
        let store = self.store.clone();
        let env = self.env.clone();
        let retries = self.config.flush_retries;
        let backoff = self.config.flush_backoff;

        tokio::spawn(async move {
            loop {
                let (document, generation) = {
                    let pending = pending_flushes.lock().await;
                    match pending.get(&room_id) {
                        Some(flush) => (flush.document.clone(), flush.generation),
                        None => return,
                    }
                };

                let saved =
                    save_with_retry(&store, &env, &room_id, &document, retries, backoff).await;

                let mut pending = pending_flushes.lock().await;
                match pending.get(&room_id) {
                    Some(flush) if flush.generation == generation => {
                        if !saved {
                            tracing::error!(%room_id, "flush failed, document lost");
                        }
                        pending.remove(&room_id);
                        return;
                    },
                    // The room reopened and drained again mid-save; go
                    // around for the newer document.
                    Some(_) => {},
                    None => return,
                }
            }
        });
    }

    async fn broadcast(&self, room_id: &RoomId, event: ServerEvent) {
        let subscribers: Vec<ConnectionId> = {
            let registry = self.registry.read().await;
            registry.connections_in_room(room_id).collect()
        };

        let connections = self.connections.read().await;
        for connection_id in subscribers {
            if let Some(entry) = connections.get(&connection_id) {
                // Send failures mean the receiver task is gone; the close
                // path cleans the subscription up.
                let _ = entry.sender.send(event.clone());
            }
        }
    }

    async fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) {
        let connections = self.connections.read().await;
        if let Some(entry) = connections.get(&connection_id) {
            let _ = entry.sender.send(event);
        }
    }

    async fn reject(&self, connection_id: ConnectionId, reason: &str) {
        tracing::debug!(%connection_id, reason, "event rejected");
        self.send_to(connection_id, ServerEvent::Rejected(reason.to_string())).await;
    }

    async fn entry(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Arc<ConnectionEntry>, ServerError> {
        self.connections
            .read()
            .await
            .get(&connection_id)
            .cloned()
            .ok_or(ServerError::ConnectionNotFound(connection_id))
    }
}

/// One save with bounded retries. Returns whether the document landed.
async fn save_with_retry<E: Environment, S: DocumentStore>(
    store: &S,
    env: &E,
    room_id: &RoomId,
    document: &GameDocument,
    retries: usize,
    backoff: Duration,
) -> bool {
    let mut attempt = 0;
    loop {
        match store.save(room_id, document) {
            Ok(()) => {
                tracing::debug!(%room_id, "room document flushed");
                return true;
            },
            Err(err) if attempt < retries => {
                attempt += 1;
                tracing::warn!(%room_id, error = %err, attempt, "flush failed, retrying");
                env.sleep(backoff).await;
            },
            Err(err) => {
                tracing::error!(%room_id, error = %err, "flush failed, retry budget spent");
                return false;
            },
        }
    }
}
