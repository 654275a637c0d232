use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::{ContentError, ContentManager, Migration, StoreMeta};
use crate::checksum;
use crate::storage::contents::ContentPage;
use crate::storage::models::{
    BackendKind, ContentLocation, ContentRecord, ContentStatus, StorageNode,
};
use crate::storage::Database;

/// Current filesystem layout scheme. v1 wrote `tenant/<node-uuid>` flat;
/// v2 shards by uuid prefix to bound directory fanout.
const ENGINE_VERSION: u32 = 2;

/// Local-filesystem content manager. Payloads live under the backbone's
/// root directory; the relative path is recorded on the content row.
pub struct FilesystemContentManager {
    db: Database,
    backbone_id: u64,
    root: PathBuf,
    migrations: Vec<Arc<dyn Migration>>,
}

impl FilesystemContentManager {
    pub fn new<P: AsRef<Path>>(
        db: Database,
        backbone_id: u64,
        root: P,
    ) -> Result<Self, std::io::Error> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        let migrations: Vec<Arc<dyn Migration>> =
            vec![Arc::new(ShardLayoutMigration { root: root.clone() })];
        Ok(Self {
            db,
            backbone_id,
            root,
            migrations,
        })
    }

    fn absolute(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }
}

fn sharded_path(tenant_id: &str, node_uuid: &str) -> String {
    // uuids are ascii hex + dashes, so byte slicing is safe
    format!(
        "{}/{}/{}/{}",
        tenant_id,
        &node_uuid[0..2],
        &node_uuid[2..4],
        node_uuid
    )
}

#[async_trait]
impl ContentManager for FilesystemContentManager {
    fn backend(&self) -> BackendKind {
        BackendKind::Filesystem
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
        ContentLocation::Filesystem {
            relative_path: sharded_path(tenant_id, &node.uuid),
        }
    }

    async fn store(
        &self,
        node: &StorageNode,
        payload: Bytes,
        meta: &StoreMeta,
    ) -> Result<ContentRecord, ContentError> {
        let location = self.compute_storage_path(&node.tenant_id, node, None);
        let ContentLocation::Filesystem { relative_path } = &location else {
            unreachable!("filesystem manager computes filesystem locations");
        };

        let path = self.absolute(relative_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &payload).await?;

        let digests = checksum::digest_all(&payload);
        let record = ContentRecord {
            id: 0,
            uuid: uuid::Uuid::new_v4().to_string(),
            node_id: node.id,
            backbone_id: self.backbone_id,
            backend: BackendKind::Filesystem,
            status: ContentStatus::Active,
            size: payload.len() as u64,
            md5: digests.md5,
            sha1: digests.sha1,
            sha256: digests.sha256,
            mime_type: meta.resolve_mime(),
            original_name: meta.original_name.clone(),
            engine_version: ENGINE_VERSION,
            location,
            created_at: chrono::Utc::now(),
            deleted_at: None,
        };
        Ok(self.db.create_content(&record)?)
    }

    async fn fetch(&self, content: &ContentRecord) -> Result<Bytes, ContentError> {
        let ContentLocation::Filesystem { relative_path } = &content.location else {
            return Err(ContentError::Backend(format!(
                "content {} has a non-filesystem location",
                content.id
            )));
        };
        let path = self.absolute(relative_path);
        if !path.exists() {
            return Err(ContentError::NotFound(relative_path.clone()));
        }
        Ok(Bytes::from(tokio::fs::read(&path).await?))
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
        let ContentLocation::Filesystem { relative_path } = &content.location else {
            return Err(ContentError::Backend(format!(
                "content {} has a non-filesystem location",
                content.id
            )));
        };
        let path = self.absolute(relative_path);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Already gone: a prior partial run removed it
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn migrations(&self) -> &[Arc<dyn Migration>] {
        &self.migrations
    }
}

/// v1 -> v2: move `tenant/<uuid>` payloads into the sharded layout.
struct ShardLayoutMigration {
    root: PathBuf,
}

#[async_trait]
impl Migration for ShardLayoutMigration {
    fn from_version(&self) -> u32 {
        1
    }

    fn to_version(&self) -> u32 {
        2
    }

    async fn migrate(&self, content: &ContentRecord) -> Result<ContentRecord, ContentError> {
        let ContentLocation::Filesystem { relative_path } = &content.location else {
            return Err(ContentError::Backend(format!(
                "content {} has a non-filesystem location",
                content.id
            )));
        };

        let (tenant_id, node_uuid) = relative_path.split_once('/').ok_or_else(|| {
            ContentError::Backend(format!("unexpected v1 path '{relative_path}'"))
        })?;
        if node_uuid.len() < 4 {
            return Err(ContentError::Backend(format!(
                "unexpected v1 path '{relative_path}'"
            )));
        }

        let new_relative = sharded_path(tenant_id, node_uuid);
        let source = self.root.join(relative_path);
        let target = self.root.join(&new_relative);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::rename(&source, &target).await {
            Ok(()) => {}
            // Source already moved by a prior interrupted run
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && target.exists() => {}
            Err(e) => return Err(e.into()),
        }

        let mut migrated = content.clone();
        migrated.location = ContentLocation::Filesystem {
            relative_path: new_relative,
        };
        Ok(migrated)
    }
}
