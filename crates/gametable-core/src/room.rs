//! Room state: ordered membership and the cached game document.
//!
//! A room exists only while at least one member is present. Its `GameState`
//! is an in-memory mirror of the durable game document, seeded on first join
//! and converted back to a document when the room drains so the runtime can
//! flush it.
//!
//! Membership removal is keyed by `PlayerId`, never by display name. Display
//! names are free-form and may collide between players.

use std::collections::VecDeque;

use gametable_proto::{GameDocument, LogEntry, Member, PlayerId, RoomId, RoomSnapshot, TokenPlacement};

/// Maximum number of log entries a room retains. Appends beyond this evict
/// the oldest entry first (strict FIFO).
pub const LOG_CAPACITY: usize = 70;

/// Mutations applicable to a room's game state.
#[derive(Debug, Clone, PartialEq)]
pub enum StateOp {
    /// Append one entry to the log, evicting the oldest past capacity.
    AppendLog(LogEntry),
    /// Replace the token layout wholesale.
    ReplaceTokens(Vec<TokenPlacement>),
}

/// Result of removing a member from a room.
#[derive(Debug, Clone, PartialEq)]
pub enum LeaveOutcome {
    /// Members remain; carries the updated list for broadcast.
    Remaining(Vec<Member>),
    /// The last member left. Carries the final document to flush; the room
    /// must be discarded by the caller.
    Closed(GameDocument),
}

/// In-memory mutable game state for one room.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameState {
    log: VecDeque<LogEntry>,
    tokens: Vec<TokenPlacement>,
}

impl GameState {
    /// Seed state from a durable document.
    ///
    /// A document longer than [`LOG_CAPACITY`] keeps only its newest entries,
    /// so the capacity invariant holds from the first mutation.
    pub fn from_document(document: GameDocument) -> Self {
        let mut log: VecDeque<LogEntry> = document.log.into();
        while log.len() > LOG_CAPACITY {
            log.pop_front();
        }
        Self { log, tokens: document.tokens }
    }

    /// Apply one mutation.
    pub fn apply(&mut self, op: StateOp) {
        match op {
            StateOp::AppendLog(entry) => {
                self.log.push_back(entry);
                if self.log.len() > LOG_CAPACITY {
                    self.log.pop_front();
                }
            },
            StateOp::ReplaceTokens(tokens) => {
                self.tokens = tokens;
            },
        }
    }

    /// Current log, oldest first.
    pub fn log(&self) -> Vec<LogEntry> {
        self.log.iter().cloned().collect()
    }

    /// Current token layout.
    pub fn tokens(&self) -> &[TokenPlacement] {
        &self.tokens
    }

    /// Convert back to a durable document (for flush).
    pub fn to_document(&self) -> GameDocument {
        GameDocument { log: self.log(), tokens: self.tokens.clone() }
    }
}

/// A live room: ordered membership plus game state.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    members: Vec<Member>,
    state: GameState,
    closed: bool,
}

impl Room {
    /// Open a room, seeding its state from `document`.
    pub fn new(id: RoomId, document: GameDocument) -> Self {
        Self { id, members: Vec::new(), state: GameState::from_document(document), closed: false }
    }

    /// Room identifier.
    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Append a member and return the snapshot to broadcast.
    ///
    /// Appends unconditionally: the `in_game` precondition lives with the
    /// caller, and a member appearing twice stays listed twice. Tests pin
    /// this so a change to dedup is a conscious one.
    pub fn join(&mut self, member: Member) -> RoomSnapshot {
        self.members.push(member);
        self.snapshot()
    }

    /// Remove the first member entry matching `player_id`.
    ///
    /// Removing an id that isn't listed changes nothing and reports the
    /// current membership. When the last member leaves the room closes and
    /// yields its final document.
    pub fn leave(&mut self, player_id: &PlayerId) -> LeaveOutcome {
        if let Some(index) = self.members.iter().position(|m| m.player_id == *player_id) {
            self.members.remove(index);
        }

        if self.members.is_empty() {
            self.closed = true;
            LeaveOutcome::Closed(self.state.to_document())
        } else {
            LeaveOutcome::Remaining(self.members.clone())
        }
    }

    /// Apply a game-state mutation.
    pub fn apply(&mut self, op: StateOp) {
        self.state.apply(op);
    }

    /// Current log, oldest first.
    pub fn log(&self) -> Vec<LogEntry> {
        self.state.log()
    }

    /// Current token layout.
    pub fn tokens(&self) -> Vec<TokenPlacement> {
        self.state.tokens().to_vec()
    }

    /// Full snapshot for broadcast.
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            log: self.state.log(),
            tokens: self.state.tokens().to_vec(),
            members: self.members.clone(),
        }
    }

    /// Current membership in join order.
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Whether the last member has left.
    ///
    /// A closed room is being torn down by its final leaver; a concurrent
    /// join that raced the teardown must retry against a fresh entry.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
