use chrono::{DateTime, Utc};
use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::models::LockRow;
use super::tables::*;

/// Result of a transactional lock upsert attempt.
#[derive(Debug)]
pub enum LockAttempt {
    /// The row was written; the caller now holds the lease.
    Acquired(LockRow),
    /// An unexpired row owned by someone else is in place.
    Held(LockRow),
}

impl Database {
    // ========================================================================
    // Lock operations
    // ========================================================================

    /// Check-and-set acquire: read the row for `resource_code` and upsert it
    /// when absent, expired, or already owned by this owner (lease
    /// extension). The read and the write commit in one transaction; redb
    /// serializes writers, so two concurrent attempts cannot both succeed.
    pub fn try_acquire_lock(
        &self,
        resource_code: &str,
        owner_code: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<LockAttempt, DatabaseError> {
        let write_txn = self.begin_write()?;

        let existing: Option<LockRow> = {
            let table = write_txn.open_table(LOCKS)?;
            let got = table.get(resource_code)?;
            match got {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            }
        };

        if let Some(row) = existing {
            if !row.is_expired(now) && row.owner_code != owner_code {
                // No commit needed; dropping the transaction aborts it.
                return Ok(LockAttempt::Held(row));
            }
        }

        let row = LockRow {
            resource_code: resource_code.to_string(),
            owner_code: owner_code.to_string(),
            expires_at,
        };
        {
            let mut table = write_txn.open_table(LOCKS)?;
            let data = rmp_serde::to_vec_named(&row)?;
            table.insert(resource_code, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(LockAttempt::Acquired(row))
    }

    /// Delete the row only while it is still owned by `owner_code`. A lock
    /// that expired and was re-acquired by someone else stays put.
    pub fn release_lock(&self, resource_code: &str, owner_code: &str) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;

        let owned = {
            let table = write_txn.open_table(LOCKS)?;
            let got = table.get(resource_code)?;
            match got {
                Some(data) => {
                    let row: LockRow = rmp_serde::from_slice(data.value())?;
                    row.owner_code == owner_code
                }
                None => false,
            }
        };

        if owned {
            let mut table = write_txn.open_table(LOCKS)?;
            table.remove(resource_code)?;
        }

        write_txn.commit()?;
        Ok(owned)
    }

    pub fn get_lock(&self, resource_code: &str) -> Result<Option<LockRow>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(LOCKS)?;
        match table.get(resource_code)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }
}
