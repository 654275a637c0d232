use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::{ContentError, ContentManager, Migration, StoreMeta};
use crate::checksum;
use crate::storage::contents::ContentPage;
use crate::storage::models::{
    BackendKind, ContentLocation, ContentRecord, ContentStatus, StorageNode,
};
use crate::storage::Database;

const ENGINE_VERSION: u32 = 1;

/// In-memory content manager for tests. Payloads live in a process-local
/// map; the full lifecycle contract still applies.
pub struct MemoryContentManager {
    db: Database,
    backbone_id: u64,
    payloads: RwLock<HashMap<String, Bytes>>,
    migrations: Vec<Arc<dyn Migration>>,
}

impl MemoryContentManager {
    pub fn new(db: Database, backbone_id: u64) -> Self {
        Self {
            db,
            backbone_id,
            payloads: RwLock::new(HashMap::new()),
            migrations: Vec::new(),
        }
    }

    /// Number of payloads currently held (test assertions).
    pub async fn payload_count(&self) -> usize {
        self.payloads.read().await.len()
    }
}

#[async_trait]
impl ContentManager for MemoryContentManager {
    fn backend(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn backbone_id(&self) -> u64 {
        self.backbone_id
    }

    fn engine_version(&self) -> u32 {
        ENGINE_VERSION
    }

    fn compute_storage_path(
        &self,
        tenant_id: &str,
        node: &StorageNode,
        _existing: Option<&ContentRecord>,
    ) -> ContentLocation {
        ContentLocation::Memory {
            key: format!("{}/{}", tenant_id, node.uuid),
        }
    }

    async fn store(
        &self,
        node: &StorageNode,
        payload: Bytes,
        meta: &StoreMeta,
    ) -> Result<ContentRecord, ContentError> {
        let location = self.compute_storage_path(&node.tenant_id, node, None);
        let ContentLocation::Memory { key } = &location else {
            unreachable!("memory manager computes memory locations");
        };

        let digests = checksum::digest_all(&payload);
        let record = ContentRecord {
            id: 0,
            uuid: uuid::Uuid::new_v4().to_string(),
            node_id: node.id,
            backbone_id: self.backbone_id,
            backend: BackendKind::Memory,
            status: ContentStatus::Active,
            size: payload.len() as u64,
            md5: digests.md5,
            sha1: digests.sha1,
            sha256: digests.sha256,
            mime_type: meta.resolve_mime(),
            original_name: meta.original_name.clone(),
            engine_version: ENGINE_VERSION,
            location: location.clone(),
            created_at: chrono::Utc::now(),
            deleted_at: None,
        };
        let stored = self.db.create_content(&record)?;

        self.payloads.write().await.insert(key.clone(), payload);
        Ok(stored)
    }

    async fn fetch(&self, content: &ContentRecord) -> Result<Bytes, ContentError> {
        let ContentLocation::Memory { key } = &content.location else {
            return Err(ContentError::Backend(format!(
                "content {} has a non-memory location",
                content.id
            )));
        };
        self.payloads
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| ContentError::NotFound(key.clone()))
    }

    fn logical_delete(&self, content_id: u64) -> Result<bool, ContentError> {
        Ok(self.db.mark_content_deleted(content_id, chrono::Utc::now())?)
    }

    fn queued_for_deletion(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
        after_id: u64,
        limit: usize,
    ) -> Result<ContentPage, ContentError> {
        Ok(self
            .db
            .contents_queued_for_deletion(self.backbone_id, cutoff, after_id, limit)?)
    }

    async fn delete_physical(&self, content: &ContentRecord) -> Result<(), ContentError> {
        let ContentLocation::Memory { key } = &content.location else {
            return Err(ContentError::Backend(format!(
                "content {} has a non-memory location",
                content.id
            )));
        };
        // Absent key is success: delete is idempotent
        self.payloads.write().await.remove(key);
        Ok(())
    }

    fn migrations(&self) -> &[Arc<dyn Migration>] {
        &self.migrations
    }
}
