//! Fault-injecting document store for testing flush retries.
//!
//! Wraps another store and fails a configured number of saves before
//! letting writes through. Deterministic, unlike a probabilistic fault
//! injector, so tests can assert exact retry counts.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use gametable_proto::{GameDocument, RoomId};

use super::{DocumentStore, StoreError};

/// Document store that fails the first `failures` saves.
///
/// Loads and listing always pass through. Clones share the failure budget,
/// so concurrent savers drain it together.
#[derive(Clone)]
pub struct FlakyStore<S> {
    inner: S,
    remaining_failures: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl<S: DocumentStore> FlakyStore<S> {
    /// Wrap `inner`, failing the first `failures` save calls.
    pub fn new(inner: S, failures: usize) -> Self {
        Self {
            inner,
            remaining_failures: Arc::new(AtomicUsize::new(failures)),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Total save attempts observed, including failed ones.
    pub fn save_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: DocumentStore> DocumentStore for FlakyStore<S> {
    fn load(&self, room_id: &RoomId) -> Result<Option<GameDocument>, StoreError> {
        self.inner.load(room_id)
    }

    fn save(&self, room_id: &RoomId, document: &GameDocument) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let mut remaining = self.remaining_failures.load(Ordering::SeqCst);
        while remaining > 0 {
            match self.remaining_failures.compare_exchange(
                remaining,
                remaining - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Err(StoreError::Unavailable("injected save failure".to_string()));
                },
                Err(current) => remaining = current,
            }
        }

        self.inner.save(room_id, document)
    }

    fn list_rooms(&self) -> Result<Vec<RoomId>, StoreError> {
        self.inner.list_rooms()
    }
}
