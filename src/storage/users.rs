use redb::ReadableTable;

use super::models::User;
use super::store::{Store, StorageError};
use super::tables::*;

impl Store {
    /// Register a new user. Fails with [`StorageError::UserExists`] when the
    /// URN is already taken.
    pub fn register_user(&self, user: &User) -> Result<(), StorageError> {
        debug_assert!(!user.urn.is_empty(), "user urn must not be empty");

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(USERS)?;
            if table.get(user.urn.as_str())?.is_some() {
                return Err(StorageError::UserExists);
            }
            let data = rmp_serde::to_vec(user)?;
            table.insert(user.urn.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_user(&self, urn: &str) -> Result<Option<User>, StorageError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USERS)?;

        match table.get(urn)? {
            Some(data) => {
                let user: User = rmp_serde::from_slice(data.value())?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    pub fn user_exists(&self, urn: &str) -> Result<bool, StorageError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USERS)?;
        Ok(table.get(urn)?.is_some())
    }

    /// Delete a user row. Returns false when no such user existed.
    pub fn delete_user(&self, urn: &str) -> Result<bool, StorageError> {
        let write_txn = self.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(USERS)?;
            let existed = table.remove(urn)?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(deleted)
    }

    pub fn all_users(&self) -> Result<Vec<User>, StorageError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USERS)?;

        let mut users = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            users.push(rmp_serde::from_slice(value.value())?);
        }
        Ok(users)
    }
}
