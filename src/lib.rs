//! storage-gateway - Multi-tenant storage core with pluggable content backends
//!
//! This crate provides the storage plane behind a file-management product:
//! - Content lifecycle engines over filesystem, S3-compatible, cloud-drive,
//!   and in-memory backends, selected per backbone
//! - Chunked multipart uploads staged on scratch disk with checksum
//!   verification per part
//! - Leased advisory resource locks backed by redb (ACID, MVCC, crash-safe)
//! - Scheduled maintenance jobs that run lock-guarded and leave an
//!   auditable execution trail

pub mod backbone;
pub mod checksum;
pub mod config;
pub mod content;
pub mod jobs;
pub mod lock;
pub mod storage;
pub mod upload;

use std::sync::Arc;

use backbone::BackboneRegistry;
use config::Config;
use content::ContentManagers;
use lock::LockService;
use storage::Database;
use upload::MultipartUploadService;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub backbones: Arc<BackboneRegistry>,
    pub managers: Arc<ContentManagers>,
    pub locks: LockService,
    pub uploads: Arc<MultipartUploadService>,
}
