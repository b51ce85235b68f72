use std::path::Path;
use std::sync::Arc;

use redb::{Database as RedbDatabase, ReadTransaction, ReadableTable, WriteTransaction};
use thiserror::Error;

use super::tables::*;

#[derive(Debug, Error)]
pub enum StorageError {
    // ------------------------------------------------------------------
    // Infrastructure
    // ------------------------------------------------------------------
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
    /// Transient contention; callers retry with exponential back-off.
    #[error("Store busy")]
    Busy,

    // ------------------------------------------------------------------
    // Domain outcomes
    // ------------------------------------------------------------------
    #[error("User already registered")]
    UserExists,
    #[error("User not found")]
    UserNotFound,
    #[error("Device already exists")]
    VehicleExists,
    #[error("Vehicle not found")]
    VehicleNotFound,
    #[error("No available seats: {available} left, {requested} requested")]
    NoSeats { available: u32, requested: u32 },
    #[error("Group already exists")]
    GroupExists,
    #[error("Group not found")]
    GroupNotFound,
    #[error("User already in group")]
    AlreadyInGroup,
    #[error("User not in group")]
    NotInGroup,
    #[error("Cannot remove the group leader")]
    CannotRemoveLeader,
    #[error("Invalid capacity/available_seats")]
    InvalidCapacity,
    #[error("Nothing to update")]
    NothingToUpdate,
}

impl StorageError {
    /// True for transient contention worth retrying.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

/// Handle to the backing store. Cheap to clone; every clone shares the same
/// database, and each write operation is one ACID transaction.
#[derive(Clone)]
pub struct Store {
    db: Arc<RedbDatabase>,
}

impl Store {
    /// Open or create the store under the given data directory.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("coordinator.redb");
        let db = RedbDatabase::create(db_path)?;

        // Create tables up front so read transactions never race table creation
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(GROUPS)?;
            let _ = write_txn.open_table(GROUP_NAMES)?;
            let _ = write_txn.open_table(GROUP_MEMBERS)?;
            let _ = write_txn.open_table(VEHICLES)?;
            let _ = write_txn.open_table(TICKETS)?;
            let _ = write_txn.open_table(PAYMENTS)?;
            let _ = write_txn.open_table(PRICE_LIST)?;
            let _ = write_txn.open_table(ACTIVE_CONNECTIONS)?;
            let _ = write_txn.open_table(COUNTERS)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Begin a read transaction
    pub fn begin_read(&self) -> Result<ReadTransaction, StorageError> {
        Ok(self.db.begin_read()?)
    }

    /// Begin a write transaction. Writers are serialized by the store, which
    /// is what makes a read-then-write transaction the unit of isolation.
    pub fn begin_write(&self) -> Result<WriteTransaction, StorageError> {
        Ok(self.db.begin_write()?)
    }

    /// Bump and return the next value of a named monotonic counter within an
    /// open write transaction.
    pub(crate) fn next_counter(
        txn: &WriteTransaction,
        name: &str,
    ) -> Result<u64, StorageError> {
        let mut table = txn.open_table(COUNTERS)?;
        let next = table.get(name)?.map(|v| v.value()).unwrap_or(0) + 1;
        table.insert(name, next)?;
        Ok(next)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_creates_all_tables() {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path()).unwrap();

        let read = store.begin_read().unwrap();
        assert!(read.open_table(USERS).is_ok());
        assert!(read.open_table(VEHICLES).is_ok());
        assert!(read.open_table(GROUP_MEMBERS).is_ok());
        assert!(read.open_table(ACTIVE_CONNECTIONS).is_ok());
    }

    #[test]
    fn counters_are_monotonic_across_transactions() {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path()).unwrap();

        for expected in 1..=3u64 {
            let txn = store.begin_write().unwrap();
            let value = Store::next_counter(&txn, "ticket_id").unwrap();
            txn.commit().unwrap();
            assert_eq!(value, expected);
        }

        // Independent counters do not interfere
        let txn = store.begin_write().unwrap();
        assert_eq!(Store::next_counter(&txn, "transaction_id").unwrap(), 1);
        txn.commit().unwrap();
    }
}
