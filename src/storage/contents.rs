use chrono::{DateTime, Utc};
use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::models::{ContentRecord, ContentStatus};
use super::tables::*;

/// Page of rows from a bounded scan, with a cursor for the next call.
/// `next_after` is the last id seen, or None when the scan is exhausted.
#[derive(Debug)]
pub struct ContentPage {
    pub rows: Vec<ContentRecord>,
    pub next_after: Option<u64>,
}

impl Database {
    // ========================================================================
    // Content operations
    // ========================================================================

    /// Insert a content record, assigning its id. Rejects a second ACTIVE
    /// record for the same node; the check and the insert commit together.
    pub fn create_content(&self, content: &ContentRecord) -> Result<ContentRecord, DatabaseError> {
        let write_txn = self.begin_write()?;
        let mut stored = content.clone();
        {
            if stored.status == ContentStatus::Active {
                let active_table = write_txn.open_table(NODE_ACTIVE_CONTENT)?;
                if active_table.get(stored.node_id)?.is_some() {
                    return Err(DatabaseError::Conflict(format!(
                        "node {} already has active content",
                        stored.node_id
                    )));
                }
            }

            stored.id = self.next_id(&write_txn, "contents")?;

            let mut table = write_txn.open_table(CONTENTS)?;
            let data = rmp_serde::to_vec_named(&stored)?;
            table.insert(stored.id, data.as_slice())?;

            if stored.status == ContentStatus::Active {
                let mut active_table = write_txn.open_table(NODE_ACTIVE_CONTENT)?;
                active_table.insert(stored.node_id, stored.id)?;
            }
        }
        write_txn.commit()?;
        Ok(stored)
    }

    pub fn get_content(&self, id: u64) -> Result<Option<ContentRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(CONTENTS)?;
        match table.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// The single ACTIVE content record attached to a node, if any.
    pub fn active_content_for_node(
        &self,
        node_id: u64,
    ) -> Result<Option<ContentRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let active_table = read_txn.open_table(NODE_ACTIVE_CONTENT)?;
        let content_id = match active_table.get(node_id)? {
            Some(data) => data.value(),
            None => return Ok(None),
        };
        let table = read_txn.open_table(CONTENTS)?;
        match table.get(content_id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Flip a record to DELETED, stamping `deleted_at` and clearing the
    /// active index. Returns false when already deleted or absent.
    pub fn mark_content_deleted(&self, id: u64, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;

        let existing: Option<ContentRecord> = {
            let table = write_txn.open_table(CONTENTS)?;
            let got = table.get(id)?;
            match got {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            }
        };

        let updated = match existing {
            Some(mut content) if content.status == ContentStatus::Active => {
                content.status = ContentStatus::Deleted;
                content.deleted_at = Some(now);

                let data = rmp_serde::to_vec_named(&content)?;
                let mut table = write_txn.open_table(CONTENTS)?;
                table.insert(id, data.as_slice())?;

                let mut active_table = write_txn.open_table(NODE_ACTIVE_CONTENT)?;
                if active_table.get(content.node_id)?.map(|v| v.value()) == Some(id) {
                    active_table.remove(content.node_id)?;
                }
                true
            }
            _ => false,
        };

        write_txn.commit()?;
        Ok(updated)
    }

    /// Rewrite a content row in place (migration advances `engine_version`
    /// and `location` through this). One write transaction per row.
    pub fn update_content(&self, content: &ContentRecord) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(CONTENTS)?;
            if table.get(content.id)?.is_none() {
                false
            } else {
                let data = rmp_serde::to_vec_named(content)?;
                table.insert(content.id, data.as_slice())?;
                true
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    /// Remove a content row entirely (second stage of the deletion sweep,
    /// after the physical payload is gone).
    pub fn delete_content_row(&self, id: u64) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let deleted = {
            let node_id = {
                let table = write_txn.open_table(CONTENTS)?;
                let got = table.get(id)?;
                match got {
                    Some(data) => {
                        let content: ContentRecord = rmp_serde::from_slice(data.value())?;
                        Some(content.node_id)
                    }
                    None => None,
                }
            };
            match node_id {
                Some(node_id) => {
                    let mut table = write_txn.open_table(CONTENTS)?;
                    table.remove(id)?;
                    let mut active_table = write_txn.open_table(NODE_ACTIVE_CONTENT)?;
                    if active_table.get(node_id)?.map(|v| v.value()) == Some(id) {
                        active_table.remove(node_id)?;
                    }
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(deleted)
    }

    /// DELETED rows of one backbone whose `deleted_at` is older than the
    /// cutoff, in `id ASC` order starting after the cursor.
    pub fn contents_queued_for_deletion(
        &self,
        backbone_id: u64,
        cutoff: DateTime<Utc>,
        after_id: u64,
        limit: usize,
    ) -> Result<ContentPage, DatabaseError> {
        self.scan_contents(after_id, limit, |c| {
            c.backbone_id == backbone_id
                && c.status == ContentStatus::Deleted
                && c.deleted_at.map(|d| d < cutoff).unwrap_or(false)
        })
    }

    /// Rows of one backbone whose engine version is behind `current`, in
    /// `id ASC` order starting after the cursor. Only ACTIVE rows migrate;
    /// deleted payloads are on their way out anyway.
    pub fn contents_behind_version(
        &self,
        backbone_id: u64,
        current: u32,
        after_id: u64,
        limit: usize,
    ) -> Result<ContentPage, DatabaseError> {
        self.scan_contents(after_id, limit, |c| {
            c.backbone_id == backbone_id
                && c.status == ContentStatus::Active
                && c.engine_version < current
        })
    }

    /// All content ids of one backbone (for remote-orphan diffing).
    pub fn content_remote_ids(&self, backbone_id: u64) -> Result<Vec<String>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(CONTENTS)?;
        let mut ids = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let content: ContentRecord = rmp_serde::from_slice(value.value())?;
            if content.backbone_id != backbone_id {
                continue;
            }
            if let super::models::ContentLocation::Onedrive { item_id, .. } = &content.location {
                ids.push(item_id.clone());
            }
        }
        Ok(ids)
    }

    fn scan_contents<F>(
        &self,
        after_id: u64,
        limit: usize,
        mut predicate: F,
    ) -> Result<ContentPage, DatabaseError>
    where
        F: FnMut(&ContentRecord) -> bool,
    {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(CONTENTS)?;

        let mut rows = Vec::new();
        let mut last_seen = None;
        for result in table.range(after_id + 1..)? {
            let (key, value) = result?;
            let content: ContentRecord = rmp_serde::from_slice(value.value())?;
            last_seen = Some(key.value());
            if predicate(&content) {
                rows.push(content);
                if rows.len() >= limit {
                    return Ok(ContentPage {
                        rows,
                        next_after: last_seen,
                    });
                }
            }
        }

        // Scan ran off the end of the table
        Ok(ContentPage {
            rows,
            next_after: None,
        })
    }
}
