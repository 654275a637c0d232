//! Chunked/multipart upload engine: accepts large files in independently
//! verified parts under day-bucketed scratch storage, then assembles them
//! exactly once into the target backend.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::checksum;
use crate::config::UploadConfig;
use crate::content::{ContentError, ContentManagers, StoreMeta};
use crate::storage::models::{
    ContentRecord, PartStatus, SessionStatus, StorageNode, UploadPart, UploadSession,
};
use crate::storage::{Database, DatabaseError};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Content error: {0}")]
    Content(#[from] ContentError),
    #[error("Upload session not found: {0}")]
    SessionNotFound(String),
    #[error("Node {0} not found")]
    NodeNotFound(u64),
    #[error("No content manager registered for backbone {0}")]
    NoManager(u64),
    #[error("Session {uuid} is {status:?}, operation requires ACTIVE")]
    InvalidState {
        uuid: String,
        status: SessionStatus,
    },
    #[error("Session {0} expired")]
    Expired(String),
    #[error("Part number must start at 1")]
    InvalidPartNumber,
    #[error("Part {part_number} exceeds the maximum part size")]
    PartTooLarge { part_number: u32 },
    #[error("Declared {algorithm} checksum does not match part {part_number}")]
    ChecksumMismatch {
        part_number: u32,
        algorithm: &'static str,
    },
    #[error("Parts are not contiguous from 1; missing part {missing}")]
    MissingParts { missing: u32 },
    #[error("Assembled size {actual} does not match declared content size {declared}")]
    SizeMismatch { declared: u64, actual: u64 },
}

/// Client-declared checksums for one part. Any provided value must match
/// the digest computed over the received bytes.
#[derive(Debug, Default, Clone)]
pub struct DeclaredChecksums {
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub sha256: Option<String>,
}

/// Sessions picked up by the cleanup sweep, split by what happens to them.
#[derive(Debug, Default)]
pub struct PurgeCandidates {
    /// ACTIVE sessions past expiry: scratch content goes, the row stays.
    pub expired: Vec<UploadSession>,
    /// Terminal-state sessions past retention: scratch and rows both go.
    pub stale: Vec<UploadSession>,
}

pub struct MultipartUploadService {
    db: Database,
    managers: Arc<ContentManagers>,
    scratch_dir: PathBuf,
    config: UploadConfig,
    batch_size: usize,
}

impl MultipartUploadService {
    pub fn new(
        db: Database,
        managers: Arc<ContentManagers>,
        scratch_dir: impl Into<PathBuf>,
        config: UploadConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            db,
            managers,
            scratch_dir: scratch_dir.into(),
            config,
            batch_size,
        }
    }

    /// Open a session for a node. The declared size is verified at finalize.
    pub fn create_session(
        &self,
        node: &StorageNode,
        backbone_id: u64,
        content_size: u64,
        file_name: &str,
        mime_type: Option<&str>,
        encoding: Option<&str>,
    ) -> Result<UploadSession, UploadError> {
        let now = Utc::now();
        let session = UploadSession {
            id: 0,
            uuid: uuid::Uuid::new_v4().to_string(),
            node_id: node.id,
            backbone_id,
            content_size,
            file_name: file_name.to_string(),
            mime_type: mime_type.map(|s| s.to_string()),
            encoding: encoding.map(|s| s.to_string()),
            status: SessionStatus::Active,
            created_at: now,
            expires_at: now + self.config.session_ttl,
            transitioned_at: now,
            scratch_purged: false,
        };
        let stored = self.db.create_session(&session)?;
        tracing::info!(
            session = %stored.uuid,
            node = node.id,
            size = content_size,
            "upload session created"
        );
        Ok(stored)
    }

    /// Verify and stage one part. Parts may arrive concurrently and in any
    /// order; re-uploading a part replaces the staged chunk.
    pub async fn upload_part(
        &self,
        session_uuid: &str,
        part_number: u32,
        bytes: Bytes,
        declared: &DeclaredChecksums,
    ) -> Result<UploadPart, UploadError> {
        if part_number == 0 {
            return Err(UploadError::InvalidPartNumber);
        }
        if bytes.len() as u64 > self.config.max_part_size {
            return Err(UploadError::PartTooLarge { part_number });
        }

        let session = self.active_session(session_uuid)?;

        let digests = checksum::digest_all(&bytes);
        verify_declared(part_number, declared, &digests)?;

        let dir = self.session_scratch_dir(&session);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{part_number}.part"));
        tokio::fs::write(&path, &bytes).await?;

        let part = UploadPart {
            session_id: session.id,
            part_number,
            status: PartStatus::Uploaded,
            size: bytes.len() as u64,
            md5: digests.md5,
            sha1: digests.sha1,
            sha256: digests.sha256,
            scratch_path: path.to_string_lossy().to_string(),
            transitioned_at: Utc::now(),
        };
        self.db.put_part(&part)?;
        Ok(part)
    }

    /// Assemble parts 1..N in numeric order and hand the payload to the
    /// target backend. Validation failures before FINALIZING leave the
    /// session untouched; failures after leave it FINALIZING for the sweep.
    pub async fn finalize(&self, session_uuid: &str) -> Result<ContentRecord, UploadError> {
        let session = self.active_session(session_uuid)?;

        let parts: Vec<UploadPart> = self
            .db
            .parts_for_session(session.id)?
            .into_iter()
            .filter(|p| p.status == PartStatus::Uploaded)
            .collect();

        // Logical contiguity from 1, regardless of arrival order
        for (index, part) in parts.iter().enumerate() {
            let expected = index as u32 + 1;
            if part.part_number != expected {
                return Err(UploadError::MissingParts { missing: expected });
            }
        }
        if parts.is_empty() {
            return Err(UploadError::MissingParts { missing: 1 });
        }

        // Both validations precede the FINALIZING transition, so a rejected
        // finalize leaves the session resumable.
        let staged: u64 = parts.iter().map(|p| p.size).sum();
        if staged != session.content_size {
            return Err(UploadError::SizeMismatch {
                declared: session.content_size,
                actual: staged,
            });
        }

        self.db
            .transition_session(session.id, SessionStatus::Finalizing, Utc::now())?;

        let mut payload = Vec::with_capacity(session.content_size as usize);
        for part in &parts {
            let chunk = tokio::fs::read(&part.scratch_path).await?;
            payload.extend_from_slice(&chunk);
        }

        if payload.len() as u64 != session.content_size {
            // Scratch content disagrees with the part rows; leave the
            // session FINALIZING for the cleanup sweep.
            return Err(UploadError::SizeMismatch {
                declared: session.content_size,
                actual: payload.len() as u64,
            });
        }

        let node = self
            .db
            .get_node(session.node_id)?
            .ok_or(UploadError::NodeNotFound(session.node_id))?;
        let manager = self
            .managers
            .get(session.backbone_id)
            .ok_or(UploadError::NoManager(session.backbone_id))?;

        let meta = StoreMeta {
            original_name: session.file_name.clone(),
            mime_type: session.mime_type.clone(),
        };
        let record = manager.store(&node, Bytes::from(payload), &meta).await?;

        self.db
            .transition_session(session.id, SessionStatus::Finalized, Utc::now())?;
        tracing::info!(
            session = %session.uuid,
            content = record.id,
            "upload session finalized"
        );
        Ok(record)
    }

    /// Abandon an in-flight session.
    pub fn abandon(&self, session_uuid: &str) -> Result<(), UploadError> {
        let session = self.active_session(session_uuid)?;
        self.db
            .transition_session(session.id, SessionStatus::Cleared, Utc::now())?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Cleanup sweep support
    // ------------------------------------------------------------------------

    /// Sessions the cleanup sweep should act on right now.
    pub fn purge_candidates(&self, now: DateTime<Utc>) -> Result<PurgeCandidates, UploadError> {
        let expired = self.db.sessions_expired(now, self.batch_size)?;
        let stale = self
            .db
            .sessions_stale_terminal(now - self.config.terminal_retention, self.batch_size)?;
        Ok(PurgeCandidates { expired, stale })
    }

    /// Remove an expired ACTIVE session's scratch content. The row is kept
    /// for audit; without staged chunks the session can no longer resume.
    /// Marking the row keeps it out of later sweep batches.
    pub async fn purge_expired_session(&self, session: &UploadSession) -> Result<(), UploadError> {
        self.remove_scratch(session).await?;
        self.db.mark_session_scratch_purged(session.id)?;
        tracing::info!(session = %session.uuid, "expired session scratch removed");
        Ok(())
    }

    /// Remove a terminal-state session's residual scratch content and its
    /// database rows.
    pub async fn purge_cleared_records(&self, session: &UploadSession) -> Result<(), UploadError> {
        self.remove_scratch(session).await?;
        self.db.delete_session_rows(session.id)?;
        tracing::info!(session = %session.uuid, status = ?session.status, "stale session purged");
        Ok(())
    }

    /// Scratch directory of one session: `<scratch>/<YYYY-MM-DD>/<uuid>`.
    /// Day bucketing bounds directory size and keys age-based cleanup.
    pub fn session_scratch_dir(&self, session: &UploadSession) -> PathBuf {
        self.scratch_dir
            .join(session.created_at.format("%Y-%m-%d").to_string())
            .join(&session.uuid)
    }

    async fn remove_scratch(&self, session: &UploadSession) -> Result<(), UploadError> {
        let dir = self.session_scratch_dir(session);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn active_session(&self, session_uuid: &str) -> Result<UploadSession, UploadError> {
        let session = self
            .db
            .get_session_by_uuid(session_uuid)?
            .ok_or_else(|| UploadError::SessionNotFound(session_uuid.to_string()))?;
        if session.status != SessionStatus::Active {
            return Err(UploadError::InvalidState {
                uuid: session.uuid,
                status: session.status,
            });
        }
        if session.expires_at <= Utc::now() {
            return Err(UploadError::Expired(session.uuid));
        }
        Ok(session)
    }
}

fn verify_declared(
    part_number: u32,
    declared: &DeclaredChecksums,
    computed: &checksum::DigestSet,
) -> Result<(), UploadError> {
    let checks: [(&'static str, &Option<String>, &str); 3] = [
        ("md5", &declared.md5, &computed.md5),
        ("sha1", &declared.sha1, &computed.sha1),
        ("sha256", &declared.sha256, &computed.sha256),
    ];
    for (algorithm, declared, computed) in checks {
        if let Some(value) = declared {
            if !value.eq_ignore_ascii_case(computed) {
                return Err(UploadError::ChecksumMismatch {
                    part_number,
                    algorithm,
                });
            }
        }
    }
    Ok(())
}
