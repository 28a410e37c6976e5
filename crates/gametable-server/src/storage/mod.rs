//! Storage abstraction for game documents.
//!
//! Trait-based abstraction for persisting room documents. The trait is
//! synchronous (no async) to maintain a clean synchronous API design; the
//! coordinator moves flushes off the hot path itself.

mod flaky;
mod memory;
mod redb;

pub use flaky::FlakyStore;
use gametable_proto::{GameDocument, RoomId};
pub use memory::MemoryStore;

pub use self::redb::RedbStore;

/// Errors from document storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// I/O failure in the backend. Usually transient; the coordinator
    /// retries flushes that hit this.
    #[error("storage i/o error: {0}")]
    Io(String),

    /// Document failed to encode or decode. Not retryable.
    #[error("storage serialization error: {0}")]
    Serialization(String),

    /// Injected fault from a test backend.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Storage abstraction for room game documents.
///
/// Must be Clone (shared across connection tasks), Send + Sync, and
/// synchronous. Implementations share internal state via Arc, so clones
/// access the same underlying storage.
pub trait DocumentStore: Clone + Send + Sync + 'static {
    /// Load the document for a room. `None` if the room was never flushed.
    fn load(&self, room_id: &RoomId) -> Result<Option<GameDocument>, StoreError>;

    /// Persist the document for a room, overwriting any previous version.
    fn save(&self, room_id: &RoomId, document: &GameDocument) -> Result<(), StoreError>;

    /// List all rooms with a stored document. Order is not guaranteed.
    fn list_rooms(&self) -> Result<Vec<RoomId>, StoreError>;
}
