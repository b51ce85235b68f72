use redb::ReadableTable;

use super::models::ConnectionRecord;
use super::store::{Store, StorageError};
use super::tables::ACTIVE_CONNECTIONS;

impl Store {
    /// Record an authenticated connection.
    pub fn record_connection(&self, record: &ConnectionRecord) -> Result<(), StorageError> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(ACTIVE_CONNECTIONS)?;
            let data = rmp_serde::to_vec(record)?;
            table.insert(record.connection_id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Drop a connection row. Returns false when it was already gone.
    pub fn remove_connection(&self, connection_id: &str) -> Result<bool, StorageError> {
        let write_txn = self.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(ACTIVE_CONNECTIONS)?;
            let existed = table.remove(connection_id)?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    pub fn active_connections(&self) -> Result<Vec<ConnectionRecord>, StorageError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(ACTIVE_CONNECTIONS)?;

        let mut out = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            out.push(rmp_serde::from_slice(value.value())?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::setup_store;
    use chrono::Utc;

    fn sample_record(id: &str) -> ConnectionRecord {
        let now = Utc::now();
        ConnectionRecord {
            authenticated: true,
            client_address: "127.0.0.1".to_string(),
            client_port: 45000,
            connect_time: now,
            connection_id: id.to_string(),
            last_activity: now,
            user_urn: "1234567890123".to_string(),
        }
    }

    #[test]
    fn connection_rows_track_lifecycle() {
        let (store, _temp) = setup_store();

        store.record_connection(&sample_record("conn-1")).unwrap();
        store.record_connection(&sample_record("conn-2")).unwrap();
        assert_eq!(store.active_connections().unwrap().len(), 2);

        assert!(store.remove_connection("conn-1").unwrap());
        assert!(!store.remove_connection("conn-1").unwrap());
        assert_eq!(store.active_connections().unwrap().len(), 1);
    }
}
