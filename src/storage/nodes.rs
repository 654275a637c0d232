use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::models::{NodeStatus, StorageNode};
use super::tables::*;

impl Database {
    // ========================================================================
    // Node operations
    // ========================================================================

    /// Insert a node, assigning its id, and register it in the uuid and
    /// parent-child indexes.
    pub fn create_node(&self, node: &StorageNode) -> Result<StorageNode, DatabaseError> {
        debug_assert!(!node.uuid.is_empty(), "node uuid must not be empty");

        let write_txn = self.begin_write()?;
        let mut stored = node.clone();
        {
            stored.id = self.next_id(&write_txn, "nodes")?;

            let mut table = write_txn.open_table(NODES)?;
            let data = rmp_serde::to_vec_named(&stored)?;
            table.insert(stored.id, data.as_slice())?;

            let mut uuid_table = write_txn.open_table(NODE_UUIDS)?;
            uuid_table.insert(stored.uuid.as_str(), stored.id)?;

            // Maintain parent index
            if let Some(parent_id) = stored.parent_id {
                let mut child_table = write_txn.open_table(NODE_CHILDREN)?;
                let mut child_ids: Vec<u64> = child_table
                    .get(parent_id)?
                    .map(|v| rmp_serde::from_slice(v.value()).unwrap_or_default())
                    .unwrap_or_default();
                if !child_ids.contains(&stored.id) {
                    child_ids.push(stored.id);
                    let index_data = rmp_serde::to_vec_named(&child_ids)?;
                    child_table.insert(parent_id, index_data.as_slice())?;
                }
            }
        }
        write_txn.commit()?;
        Ok(stored)
    }

    pub fn get_node(&self, id: u64) -> Result<Option<StorageNode>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(NODES)?;

        match table.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Get a node by its UUID (resolves uuid -> id -> node)
    pub fn get_node_by_uuid(&self, uuid: &str) -> Result<Option<StorageNode>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let uuid_table = read_txn.open_table(NODE_UUIDS)?;

        let id = match uuid_table.get(uuid)? {
            Some(data) => data.value(),
            None => return Ok(None),
        };

        let nodes_table = read_txn.open_table(NODES)?;
        match nodes_table.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Children of a parent node, resolved through the parent index.
    pub fn children_of(&self, parent_id: u64) -> Result<Vec<StorageNode>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let child_table = read_txn.open_table(NODE_CHILDREN)?;
        let nodes_table = read_txn.open_table(NODES)?;

        let child_ids: Vec<u64> = match child_table.get(parent_id)? {
            Some(data) => rmp_serde::from_slice(data.value())?,
            None => return Ok(Vec::new()),
        };

        let mut nodes = Vec::new();
        for child_id in child_ids {
            if let Some(data) = nodes_table.get(child_id)? {
                nodes.push(rmp_serde::from_slice(data.value())?);
            }
        }
        Ok(nodes)
    }

    pub fn child_count(&self, parent_id: u64) -> Result<usize, DatabaseError> {
        let read_txn = self.begin_read()?;
        let child_table = read_txn.open_table(NODE_CHILDREN)?;
        let child_ids: Vec<u64> = match child_table.get(parent_id)? {
            Some(data) => rmp_serde::from_slice(data.value())?,
            None => return Ok(0),
        };
        Ok(child_ids.len())
    }

    /// Mark a node DELETED, bumping its version. Returns false when the node
    /// does not exist.
    pub fn mark_node_deleted(&self, id: u64) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;

        let existing: Option<StorageNode> = {
            let table = write_txn.open_table(NODES)?;
            let got = table.get(id)?;
            match got {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            }
        };

        let updated = match existing {
            Some(mut node) => {
                node.status = NodeStatus::Deleted;
                node.version += 1;
                node.updated_at = chrono::Utc::now();
                let data = rmp_serde::to_vec_named(&node)?;
                let mut table = write_txn.open_table(NODES)?;
                table.insert(id, data.as_slice())?;
                true
            }
            None => false,
        };

        write_txn.commit()?;
        Ok(updated)
    }
}
