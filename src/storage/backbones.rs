use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::models::BackboneRecord;
use super::tables::*;

impl Database {
    // ========================================================================
    // Backbone operations
    // ========================================================================

    /// Insert a backbone row, assigning its id.
    pub fn create_backbone(
        &self,
        backbone: &BackboneRecord,
    ) -> Result<BackboneRecord, DatabaseError> {
        let write_txn = self.begin_write()?;
        let mut stored = backbone.clone();
        {
            stored.id = self.next_id(&write_txn, "backbones")?;
            let mut table = write_txn.open_table(BACKBONES)?;
            let data = rmp_serde::to_vec_named(&stored)?;
            table.insert(stored.id, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(stored)
    }

    pub fn get_backbone(&self, id: u64) -> Result<Option<BackboneRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(BACKBONES)?;
        match table.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    pub fn all_backbones(&self) -> Result<Vec<BackboneRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(BACKBONES)?;

        let mut backbones = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            backbones.push(rmp_serde::from_slice(value.value())?);
        }
        Ok(backbones)
    }
}
