use chrono::{DateTime, Utc};
use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::models::{SessionStatus, UploadPart, UploadSession};
use super::tables::*;

impl Database {
    // ========================================================================
    // Upload session operations
    // ========================================================================

    /// Insert a session, assigning its id, and register the uuid index.
    pub fn create_session(&self, session: &UploadSession) -> Result<UploadSession, DatabaseError> {
        debug_assert!(!session.uuid.is_empty(), "session uuid must not be empty");

        let write_txn = self.begin_write()?;
        let mut stored = session.clone();
        {
            stored.id = self.next_id(&write_txn, "upload_sessions")?;

            let mut table = write_txn.open_table(UPLOAD_SESSIONS)?;
            let data = rmp_serde::to_vec_named(&stored)?;
            table.insert(stored.id, data.as_slice())?;

            let mut uuid_table = write_txn.open_table(SESSION_UUIDS)?;
            uuid_table.insert(stored.uuid.as_str(), stored.id)?;
        }
        write_txn.commit()?;
        Ok(stored)
    }

    pub fn get_session(&self, id: u64) -> Result<Option<UploadSession>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(UPLOAD_SESSIONS)?;
        match table.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_session_by_uuid(&self, uuid: &str) -> Result<Option<UploadSession>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let uuid_table = read_txn.open_table(SESSION_UUIDS)?;

        let id = match uuid_table.get(uuid)? {
            Some(data) => data.value(),
            None => return Ok(None),
        };

        let table = read_txn.open_table(UPLOAD_SESSIONS)?;
        match table.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Move a session to a new status, stamping `transitioned_at`.
    pub fn transition_session(
        &self,
        id: u64,
        status: SessionStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;

        let existing: Option<UploadSession> = {
            let table = write_txn.open_table(UPLOAD_SESSIONS)?;
            let got = table.get(id)?;
            match got {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            }
        };

        let updated = match existing {
            Some(mut session) => {
                session.status = status;
                session.transitioned_at = now;
                let data = rmp_serde::to_vec_named(&session)?;
                let mut table = write_txn.open_table(UPLOAD_SESSIONS)?;
                table.insert(id, data.as_slice())?;
                true
            }
            None => false,
        };

        write_txn.commit()?;
        Ok(updated)
    }

    /// Upsert a part row, keyed by (session id, part number).
    pub fn put_part(&self, part: &UploadPart) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(UPLOAD_PARTS)?;
            let data = rmp_serde::to_vec_named(part)?;
            table.insert((part.session_id, part.part_number), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_part(
        &self,
        session_id: u64,
        part_number: u32,
    ) -> Result<Option<UploadPart>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(UPLOAD_PARTS)?;
        match table.get((session_id, part_number))? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// All parts of a session in part-number order.
    pub fn parts_for_session(&self, session_id: u64) -> Result<Vec<UploadPart>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(UPLOAD_PARTS)?;

        let mut parts = Vec::new();
        for result in table.range((session_id, 0)..=(session_id, u32::MAX))? {
            let (_, value) = result?;
            parts.push(rmp_serde::from_slice(value.value())?);
        }
        Ok(parts)
    }

    /// ACTIVE sessions whose `expires_at` has passed and whose scratch has
    /// not been purged yet. Expired rows stay ACTIVE for audit, so without
    /// the marker filter already-purged sessions would match forever and
    /// crowd newer ones out of the batch.
    pub fn sessions_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<UploadSession>, DatabaseError> {
        self.scan_sessions(limit, |s| {
            s.status == SessionStatus::Active && s.expires_at < now && !s.scratch_purged
        })
    }

    /// Flag a session's scratch content as removed.
    pub fn mark_session_scratch_purged(&self, id: u64) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;

        let existing: Option<UploadSession> = {
            let table = write_txn.open_table(UPLOAD_SESSIONS)?;
            let got = table.get(id)?;
            match got {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            }
        };

        let updated = match existing {
            Some(mut session) => {
                session.scratch_purged = true;
                let data = rmp_serde::to_vec_named(&session)?;
                let mut table = write_txn.open_table(UPLOAD_SESSIONS)?;
                table.insert(id, data.as_slice())?;
                true
            }
            None => false,
        };

        write_txn.commit()?;
        Ok(updated)
    }

    /// Terminal-state (or stuck FINALIZING) sessions whose last transition is
    /// older than the cutoff.
    pub fn sessions_stale_terminal(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<UploadSession>, DatabaseError> {
        self.scan_sessions(limit, |s| {
            s.status.is_purgeable() && s.transitioned_at < cutoff
        })
    }

    /// Remove a session row, its uuid index entry, and all its part rows.
    pub fn delete_session_rows(&self, id: u64) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;

        let uuid: Option<String> = {
            let table = write_txn.open_table(UPLOAD_SESSIONS)?;
            let got = table.get(id)?;
            match got {
                Some(data) => {
                    let session: UploadSession = rmp_serde::from_slice(data.value())?;
                    Some(session.uuid)
                }
                None => None,
            }
        };

        let deleted = match uuid {
            Some(uuid) => {
                {
                    let mut table = write_txn.open_table(UPLOAD_SESSIONS)?;
                    table.remove(id)?;
                }
                {
                    let mut uuid_table = write_txn.open_table(SESSION_UUIDS)?;
                    uuid_table.remove(uuid.as_str())?;
                }
                {
                    let mut parts_table = write_txn.open_table(UPLOAD_PARTS)?;
                    let keys: Vec<(u64, u32)> = parts_table
                        .range((id, 0)..=(id, u32::MAX))?
                        .map(|r| r.map(|(k, _)| k.value()))
                        .collect::<Result<Vec<_>, _>>()?;
                    for key in keys {
                        parts_table.remove(key)?;
                    }
                }
                true
            }
            None => false,
        };

        write_txn.commit()?;
        Ok(deleted)
    }

    fn scan_sessions<F>(
        &self,
        limit: usize,
        mut predicate: F,
    ) -> Result<Vec<UploadSession>, DatabaseError>
    where
        F: FnMut(&UploadSession) -> bool,
    {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(UPLOAD_SESSIONS)?;

        let mut sessions = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let session: UploadSession = rmp_serde::from_slice(value.value())?;
            if predicate(&session) {
                sessions.push(session);
                if sessions.len() >= limit {
                    break;
                }
            }
        }
        Ok(sessions)
    }
}
