use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Physical backend family a backbone (and its content) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Filesystem,
    S3,
    Onedrive,
    Memory,
}

impl BackendKind {
    /// Stable type code used as registry key and in configuration files.
    pub fn code(&self) -> &'static str {
        match self {
            BackendKind::Filesystem => "filesystem",
            BackendKind::S3 => "s3",
            BackendKind::Onedrive => "onedrive",
            BackendKind::Memory => "memory",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "filesystem" => Some(BackendKind::Filesystem),
            "s3" => Some(BackendKind::S3),
            "onedrive" => Some(BackendKind::Onedrive),
            "memory" => Some(BackendKind::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Deleted,
}

/// A logical file or folder. Parent/child navigation goes through the store
/// by id only; rows never hold references to each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageNode {
    pub id: u64,
    pub uuid: String,
    pub tenant_id: String,
    pub parent_id: Option<u64>,
    pub kind: NodeKind,
    pub status: NodeStatus,
    pub name: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Active,
    Deleted,
}

/// Backend-native address of a stored payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "backend")]
pub enum ContentLocation {
    Filesystem {
        /// Path relative to the backbone's root directory.
        relative_path: String,
    },
    S3 {
        key: String,
        /// Upload id or version id returned by the remote, when any.
        remote_id: Option<String>,
    },
    Onedrive {
        item_id: String,
        item_path: String,
    },
    Memory {
        key: String,
    },
}

/// Database row describing a stored payload: address, checksums, lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: u64,
    pub uuid: String,
    pub node_id: u64,
    pub backbone_id: u64,
    pub backend: BackendKind,
    pub status: ContentStatus,
    pub size: u64,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub mime_type: String,
    pub original_name: String,
    /// Storage-path/layout scheme this payload was written with. Never decreases.
    pub engine_version: u32,
    pub location: ContentLocation,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Finalizing,
    Finalized,
    Cleared,
    Deleted,
}

impl SessionStatus {
    /// Terminal states plus stuck FINALIZING are eligible for record purge.
    pub fn is_purgeable(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

/// A chunked upload in progress (or finished, pending cleanup).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: u64,
    pub uuid: String,
    pub node_id: u64,
    pub backbone_id: u64,
    pub content_size: u64,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub encoding: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Timestamp of the last status change.
    pub transitioned_at: DateTime<Utc>,
    /// Set once the cleanup sweep removed this session's scratch content;
    /// the expired-session scan skips marked rows.
    #[serde(default)]
    pub scratch_purged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartStatus {
    Pending,
    Uploaded,
    Cleared,
}

/// One independently verified chunk of an upload session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadPart {
    pub session_id: u64,
    pub part_number: u32,
    pub status: PartStatus,
    pub size: u64,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    /// Where the staged chunk lives under the scratch directory.
    pub scratch_path: String,
    pub transitioned_at: DateTime<Utc>,
}

/// A leased lock row. The resource is free iff no row exists or the row's
/// lease has passed; expiry is the only timeout mechanism.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRow {
    pub resource_code: String,
    pub owner_code: String,
    pub expires_at: DateTime<Utc>,
}

impl LockRow {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Finished,
    Failed,
}

/// One run of a scheduled job, finalized exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: u64,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

/// Leveled message attached to a job execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMessage {
    pub execution_id: u64,
    pub seq: u32,
    pub level: MessageLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub extra: Option<HashMap<String, serde_json::Value>>,
}

/// Per-tenant backend configuration: which physical backend a tenant's
/// content lives in, and the credentials/location to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackboneRecord {
    pub id: u64,
    pub name: String,
    pub kind: BackendKind,
    pub enabled: bool,
    pub config: BackboneConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum BackboneConfig {
    Filesystem {
        root_dir: String,
    },
    S3 {
        endpoint: String,
        region: String,
        bucket: String,
        access_key: String,
        secret_key: String,
        /// Provider dialect code, resolved through the dialect registry.
        dialect: String,
    },
    Onedrive {
        api_base: String,
        drive_id: String,
        root_path: String,
        access_token: String,
    },
    Memory {},
}
