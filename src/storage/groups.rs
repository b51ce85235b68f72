use chrono::{DateTime, Utc};
use redb::ReadableTable;

use super::models::{Group, GroupMember};
use super::store::{Store, StorageError};
use super::tables::*;

impl Store {
    /// Create a group and enroll the leader as its first active member, all
    /// in one transaction. The leader must reference an existing user.
    pub fn create_group(
        &self,
        group_name: &str,
        leader_urn: &str,
        now: DateTime<Utc>,
    ) -> Result<Group, StorageError> {
        debug_assert!(!group_name.is_empty(), "group name must not be empty");

        let write_txn = self.begin_write()?;
        let group = {
            {
                let users = write_txn.open_table(USERS)?;
                if users.get(leader_urn)?.is_none() {
                    return Err(StorageError::UserNotFound);
                }
            }
            {
                let names = write_txn.open_table(GROUP_NAMES)?;
                if names.get(group_name)?.is_some() {
                    return Err(StorageError::GroupExists);
                }
            }

            let group_id = Self::next_counter(&write_txn, "group_id")?;
            let group = Group {
                active: true,
                creation_date: now,
                group_id,
                group_name: group_name.to_string(),
                leader_urn: leader_urn.to_string(),
            };

            {
                let mut groups = write_txn.open_table(GROUPS)?;
                let data = rmp_serde::to_vec(&group)?;
                groups.insert(group_id, data.as_slice())?;
            }
            {
                let mut names = write_txn.open_table(GROUP_NAMES)?;
                names.insert(group_name, group_id)?;
            }
            {
                // The leader is always an active member of its group
                let member = GroupMember {
                    active: true,
                    group_id,
                    join_date: now,
                    member_urn: leader_urn.to_string(),
                };
                let mut members = write_txn.open_table(GROUP_MEMBERS)?;
                let data = rmp_serde::to_vec(&member)?;
                members.insert((group_id, leader_urn), data.as_slice())?;
            }
            group
        };
        write_txn.commit()?;
        Ok(group)
    }

    /// Resolve an active group's id by name.
    pub fn group_id_by_name(&self, group_name: &str) -> Result<Option<u64>, StorageError> {
        let read_txn = self.begin_read()?;
        let names = read_txn.open_table(GROUP_NAMES)?;
        let Some(id) = names.get(group_name)?.map(|v| v.value()) else {
            return Ok(None);
        };

        let groups = read_txn.open_table(GROUPS)?;
        match groups.get(id)? {
            Some(data) => {
                let group: Group = rmp_serde::from_slice(data.value())?;
                Ok(group.active.then_some(id))
            }
            None => Ok(None),
        }
    }

    /// Leader URN of an active group, or None when the group is absent.
    pub fn group_leader(&self, group_name: &str) -> Result<Option<String>, StorageError> {
        let read_txn = self.begin_read()?;
        let names = read_txn.open_table(GROUP_NAMES)?;
        let Some(id) = names.get(group_name)?.map(|v| v.value()) else {
            return Ok(None);
        };

        let groups = read_txn.open_table(GROUPS)?;
        match groups.get(id)? {
            Some(data) => {
                let group: Group = rmp_serde::from_slice(data.value())?;
                Ok(group.active.then_some(group.leader_urn))
            }
            None => Ok(None),
        }
    }

    /// Add a user to a group by name.
    ///
    /// An active membership row is a conflict; an inactive one is
    /// reactivated with a fresh join date; otherwise a new row is inserted.
    pub fn add_group_member(
        &self,
        group_name: &str,
        urn: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let group_id = self
            .group_id_by_name(group_name)?
            .ok_or(StorageError::GroupNotFound)?;
        if !self.user_exists(urn)? {
            return Err(StorageError::UserNotFound);
        }

        let write_txn = self.begin_write()?;
        {
            let mut members = write_txn.open_table(GROUP_MEMBERS)?;

            let existing: Option<GroupMember> = match members.get((group_id, urn))? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };

            match existing {
                Some(member) if member.active => return Err(StorageError::AlreadyInGroup),
                Some(mut member) => {
                    member.active = true;
                    member.join_date = now;
                    let data = rmp_serde::to_vec(&member)?;
                    members.insert((group_id, urn), data.as_slice())?;
                }
                None => {
                    let member = GroupMember {
                        active: true,
                        group_id,
                        join_date: now,
                        member_urn: urn.to_string(),
                    };
                    let data = rmp_serde::to_vec(&member)?;
                    members.insert((group_id, urn), data.as_slice())?;
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Remove a user's membership row. Fails with
    /// [`StorageError::NotInGroup`] when no row was deleted. The leader is
    /// always an active member of its group and cannot be removed.
    pub fn remove_group_member(&self, group_name: &str, urn: &str) -> Result<(), StorageError> {
        let group_id = self
            .group_id_by_name(group_name)?
            .ok_or(StorageError::GroupNotFound)?;
        if self.group_leader(group_name)?.as_deref() == Some(urn) {
            return Err(StorageError::CannotRemoveLeader);
        }

        let write_txn = self.begin_write()?;
        {
            let mut members = write_txn.open_table(GROUP_MEMBERS)?;
            if members.remove((group_id, urn))?.is_none() {
                return Err(StorageError::NotInGroup);
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// All membership rows of a group, active and inactive.
    pub fn group_members(&self, group_name: &str) -> Result<Vec<GroupMember>, StorageError> {
        let Some(group_id) = self.group_id_by_name(group_name)? else {
            return Err(StorageError::GroupNotFound);
        };

        let read_txn = self.begin_read()?;
        let members = read_txn.open_table(GROUP_MEMBERS)?;

        let mut out = Vec::new();
        for result in members.range((group_id, "")..(group_id + 1, ""))? {
            let (_, value) = result?;
            out.push(rmp_serde::from_slice(value.value())?);
        }
        Ok(out)
    }
}
