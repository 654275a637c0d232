mod dialect;
mod drive_cleanup;
mod filesystem;
mod memory;
mod onedrive;
mod s3;

pub use dialect::{DialectError, DialectRegistry, S3Dialect};
pub use drive_cleanup::{DriveCleanup, ReconcileStats};
pub use filesystem::FilesystemContentManager;
pub use memory::MemoryContentManager;
pub use onedrive::OnedriveContentManager;
pub use s3::S3ContentManager;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::storage::contents::ContentPage;
use crate::storage::models::{
    BackboneConfig, BackendKind, ContentLocation, ContentRecord, StorageNode,
};
use crate::storage::{Database, DatabaseError};

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Content not found: {0}")]
    NotFound(String),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("No migration path from version {from} to version {to}")]
    NoMigrationPath { from: u32, to: u32 },
}

/// Caller-supplied metadata for a store operation. Checksums are computed
/// over the payload here, never trusted from the caller.
#[derive(Debug, Clone)]
pub struct StoreMeta {
    pub original_name: String,
    pub mime_type: Option<String>,
}

impl StoreMeta {
    /// Declared mime type, or a guess from the original file name.
    pub fn resolve_mime(&self) -> String {
        match &self.mime_type {
            Some(mime) => mime.clone(),
            None => mime_guess::from_path(&self.original_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        }
    }
}

/// One registered storage-layout migration step.
#[async_trait]
pub trait Migration: Send + Sync {
    fn from_version(&self) -> u32;
    fn to_version(&self) -> u32;

    /// Move the physical payload to the target layout and return the row
    /// with its new location. The caller commits the row update.
    async fn migrate(&self, content: &ContentRecord) -> Result<ContentRecord, ContentError>;
}

/// Per-backend content lifecycle: storage-path computation, durable store,
/// soft delete, physical purge, and layout migration. One implementation per
/// backend variant, registered by backbone at startup.
#[async_trait]
pub trait ContentManager: Send + Sync {
    fn backend(&self) -> BackendKind;
    fn backbone_id(&self) -> u64;

    /// Layout scheme new payloads are written with. Bumped when
    /// `compute_storage_path` changes shape.
    fn engine_version(&self) -> u32;

    /// Deterministic backend-native address for a node's payload. Stable for
    /// a given engine version; `existing` carries the prior record during
    /// migration.
    fn compute_storage_path(
        &self,
        tenant_id: &str,
        node: &StorageNode,
        existing: Option<&ContentRecord>,
    ) -> ContentLocation;

    /// Persist a payload and create its ACTIVE content record at the current
    /// engine version.
    async fn store(
        &self,
        node: &StorageNode,
        payload: Bytes,
        meta: &StoreMeta,
    ) -> Result<ContentRecord, ContentError>;

    async fn fetch(&self, content: &ContentRecord) -> Result<Bytes, ContentError>;

    /// Mark the record DELETED without touching the payload. What a node
    /// delete triggers synchronously.
    fn logical_delete(&self, content_id: u64) -> Result<bool, ContentError>;

    /// DELETED rows past the grace cutoff, ordered `id ASC` for stable
    /// resumption.
    fn queued_for_deletion(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
        after_id: u64,
        limit: usize,
    ) -> Result<ContentPage, ContentError>;

    /// Remove the backend payload. Idempotent: a payload that is already
    /// gone counts as success, since a prior partial run may have removed it.
    async fn delete_physical(&self, content: &ContentRecord) -> Result<(), ContentError>;

    /// Remove a batch of payloads, returning a per-row outcome. The default
    /// deletes one by one; backends with batch deletion override it.
    async fn delete_physical_many(
        &self,
        contents: &[ContentRecord],
    ) -> Vec<(u64, Result<(), ContentError>)> {
        let mut outcomes = Vec::with_capacity(contents.len());
        for content in contents {
            outcomes.push((content.id, self.delete_physical(content).await));
        }
        outcomes
    }

    /// Registered single-step layout migrations for this backend.
    fn migrations(&self) -> &[Arc<dyn Migration>];
}

/// Outcome of migrating one content row toward the manager's current version.
#[derive(Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Row advanced to the current engine version.
    Migrated { from: u32, to: u32 },
    /// Already current; nothing to do.
    Current,
}

/// Advance one row to the manager's current engine version by applying
/// registered single-step migrations. For each step the candidate with the
/// highest reachable target is chosen, walking backwards from current. Each
/// applied step commits its row update independently, so a failure partway
/// leaves the row at a consistent intermediate version.
pub async fn migrate_row(
    manager: &dyn ContentManager,
    db: &Database,
    content: &ContentRecord,
) -> Result<MigrationOutcome, ContentError> {
    let current = manager.engine_version();
    let start = content.engine_version;
    if start >= current {
        return Ok(MigrationOutcome::Current);
    }

    let mut row = content.clone();
    while row.engine_version < current {
        let step = manager
            .migrations()
            .iter()
            .filter(|m| m.from_version() == row.engine_version && m.to_version() <= current)
            .max_by_key(|m| m.to_version())
            .cloned()
            .ok_or(ContentError::NoMigrationPath {
                from: row.engine_version,
                to: current,
            })?;

        let mut migrated = step.migrate(&row).await?;
        migrated.engine_version = step.to_version();
        db.update_content(&migrated)?;
        row = migrated;
    }

    Ok(MigrationOutcome::Migrated {
        from: start,
        to: current,
    })
}

/// Immutable-after-init map of backbone id to its content manager.
pub struct ContentManagers {
    by_backbone: HashMap<u64, Arc<dyn ContentManager>>,
}

/// Startup wiring output: the registry plus the concrete cloud-drive
/// managers, which the reconciliation job needs beyond the trait surface.
pub struct BuiltManagers {
    pub managers: ContentManagers,
    pub drives: Vec<(String, Arc<OnedriveContentManager>)>,
}

impl ContentManagers {
    /// Construct one manager per enabled backbone. Unknown dialects and
    /// malformed backbone configs are startup-fatal.
    pub fn build(
        db: &Database,
        backbones: &crate::backbone::BackboneRegistry,
        dialects: &DialectRegistry,
    ) -> Result<BuiltManagers, anyhow::Error> {
        let mut by_backbone: HashMap<u64, Arc<dyn ContentManager>> = HashMap::new();
        let mut drives = Vec::new();

        for backbone in backbones.iter() {
            let manager: Arc<dyn ContentManager> = match &backbone.config {
                BackboneConfig::Filesystem { root_dir } => Arc::new(
                    FilesystemContentManager::new(db.clone(), backbone.id, root_dir)?,
                ),
                BackboneConfig::S3 { dialect, .. } => {
                    let handler = dialects.get(dialect).ok_or_else(|| {
                        anyhow::anyhow!(
                            "backbone '{}' references unknown S3 dialect '{}'",
                            backbone.name,
                            dialect
                        )
                    })?;
                    Arc::new(S3ContentManager::new(db.clone(), backbone, handler)?)
                }
                BackboneConfig::Onedrive { .. } => {
                    let drive = Arc::new(OnedriveContentManager::new(db.clone(), backbone)?);
                    drives.push((backbone.name.clone(), Arc::clone(&drive)));
                    drive
                }
                BackboneConfig::Memory {} => {
                    Arc::new(MemoryContentManager::new(db.clone(), backbone.id))
                }
            };
            by_backbone.insert(backbone.id, manager);
        }

        Ok(BuiltManagers {
            managers: Self { by_backbone },
            drives,
        })
    }

    pub fn get(&self, backbone_id: u64) -> Option<Arc<dyn ContentManager>> {
        self.by_backbone.get(&backbone_id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u64, &Arc<dyn ContentManager>)> {
        self.by_backbone.iter()
    }

    /// Register a manager directly (startup wiring and test harnesses).
    pub fn insert(&mut self, manager: Arc<dyn ContentManager>) {
        self.by_backbone.insert(manager.backbone_id(), manager);
    }
}

impl Default for ContentManagers {
    fn default() -> Self {
        Self {
            by_backbone: HashMap::new(),
        }
    }
}
