use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use gametable_proto::{GameDocument, RoomId};

use super::{DocumentStore, StoreError};

/// In-memory document store. The default backend when no database path is
/// configured, and the store most tests run against.
///
/// All state is wrapped in Arc<Mutex<>> to allow Clone and concurrent
/// access. The lock is held only for short map operations that do not
/// panic, so the `lock().expect()` poisoning path is unreachable in
/// practice. Tracks a save counter per room so tests can assert how often
/// a room was flushed.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

struct MemoryStoreInner {
    /// Room id -> last flushed document.
    documents: HashMap<RoomId, GameDocument>,

    /// Room id -> number of successful saves.
    save_counts: HashMap<RoomId, usize>,
}

impl MemoryStore {
    /// Create a new empty `MemoryStore`.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryStoreInner {
                documents: HashMap::new(),
                save_counts: HashMap::new(),
            })),
        }
    }

    /// Number of successful saves for a room.
    ///
    /// Useful for debugging and testing.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned (a thread panicked while
    /// holding the lock). No store operation panics while holding it.
    #[allow(clippy::expect_used)]
    pub fn save_count(&self, room_id: &RoomId) -> usize {
        self.inner.lock().expect("Mutex poisoned").save_counts.get(room_id).copied().unwrap_or(0)
    }

    /// Number of rooms with a stored document.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. No store operation panics
    /// while holding the lock.
    #[allow(clippy::expect_used)]
    pub fn room_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").documents.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. No store operation panics
    /// while holding the lock.
    #[allow(clippy::expect_used)]
    fn load(&self, room_id: &RoomId) -> Result<Option<GameDocument>, StoreError> {
        Ok(self.inner.lock().expect("Mutex poisoned").documents.get(room_id).cloned())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. No store operation panics
    /// while holding the lock.
    #[allow(clippy::expect_used)]
    fn save(&self, room_id: &RoomId, document: &GameDocument) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.documents.insert(room_id.clone(), document.clone());
        *inner.save_counts.entry(room_id.clone()).or_insert(0) += 1;
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. No store operation panics
    /// while holding the lock.
    #[allow(clippy::expect_used)]
    fn list_rooms(&self) -> Result<Vec<RoomId>, StoreError> {
        Ok(self.inner.lock().expect("Mutex poisoned").documents.keys().cloned().collect())
    }
}
