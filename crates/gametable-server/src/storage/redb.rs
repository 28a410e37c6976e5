//! Redb-backed durable document store.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. A
//! flushed document survives server restarts and is what seeds a room when
//! it is next opened.

use std::{path::Path, sync::Arc};

use gametable_proto::{GameDocument, RoomId};
use redb::{Database, ReadableTable, TableDefinition};

use super::{DocumentStore, StoreError};

/// Table: documents
/// Key: room id (UTF-8 string)
/// Value: CBOR-encoded `GameDocument`
const DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");

/// Durable document store backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates the DOCUMENTS table if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(|e| StoreError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(DOCUMENTS).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl DocumentStore for RedbStore {
    fn load(&self, room_id: &RoomId) -> Result<Option<GameDocument>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(DOCUMENTS).map_err(|e| StoreError::Io(e.to_string()))?;

        match table.get(room_id.as_str()).map_err(|e| StoreError::Io(e.to_string()))? {
            Some(value) => {
                let document: GameDocument = ciborium::from_reader(value.value())
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(document))
            },
            None => Ok(None),
        }
    }

    fn save(&self, room_id: &RoomId, document: &GameDocument) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;

        {
            let mut table =
                txn.open_table(DOCUMENTS).map_err(|e| StoreError::Io(e.to_string()))?;

            let mut bytes = Vec::new();
            ciborium::into_writer(document, &mut bytes)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

            table
                .insert(room_id.as_str(), bytes.as_slice())
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }

        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(())
    }

    fn list_rooms(&self) -> Result<Vec<RoomId>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(DOCUMENTS).map_err(|e| StoreError::Io(e.to_string()))?;

        let mut rooms = Vec::new();
        for result in table.iter().map_err(|e| StoreError::Io(e.to_string()))? {
            let (key, _) = result.map_err(|e| StoreError::Io(e.to_string()))?;
            rooms.push(RoomId::from(key.value()));
        }

        Ok(rooms)
    }
}
