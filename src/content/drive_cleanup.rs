//! Cloud-drive reconciliation: reclaim remote files that no local content
//! record references, left behind by interrupted or partially-failed runs.
//! Destructive, so gated behind an enable flag and a preview mode.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use super::onedrive::OnedriveContentManager;
use super::{ContentError, ContentManager};
use crate::storage::Database;

/// Remote file ids are diffed against local records in chunks of this size.
const DIFF_CHUNK_SIZE: usize = 200;

#[derive(Debug, Default, Clone)]
pub struct ReconcileStats {
    pub folders_walked: u64,
    pub files_seen: u64,
    pub orphans_found: u64,
    pub orphans_deleted: u64,
    pub folders_removed: u64,
    /// Remote deletes or listings that failed; the next run picks them up.
    pub delete_failures: u64,
}

pub struct DriveCleanup<'a> {
    manager: &'a OnedriveContentManager,
    db: Database,
    /// Walk and count without deleting anything.
    preview: bool,
}

impl<'a> DriveCleanup<'a> {
    pub fn new(manager: &'a OnedriveContentManager, db: Database, preview: bool) -> Self {
        Self {
            manager,
            db,
            preview,
        }
    }

    /// Depth-first walk from the backbone's root folder.
    pub async fn run(&self) -> Result<ReconcileStats, ContentError> {
        let root = match self.manager.client().find_by_path(self.manager.root_path()).await? {
            Some(item) => item,
            None => {
                tracing::info!(
                    root = self.manager.root_path(),
                    "drive root does not exist, nothing to reconcile"
                );
                return Ok(ReconcileStats::default());
            }
        };

        let known: HashSet<String> = self
            .db
            .content_remote_ids(self.manager.backbone_id())?
            .into_iter()
            .collect();

        let mut stats = ReconcileStats::default();
        self.walk_folder(root.id.clone(), &known, true, &mut stats)
            .await?;
        Ok(stats)
    }

    /// Process one folder: diff its files against local records, recurse
    /// into subfolders, then remove the folder itself if it ended up empty.
    fn walk_folder<'s>(
        &'s self,
        folder_id: String,
        known: &'s HashSet<String>,
        is_root: bool,
        stats: &'s mut ReconcileStats,
    ) -> Pin<Box<dyn Future<Output = Result<(), ContentError>> + Send + 's>> {
        Box::pin(async move {
            stats.folders_walked += 1;
            let children = self.manager.client().list_children(&folder_id).await?;

            let (folders, files): (Vec<_>, Vec<_>) =
                children.into_iter().partition(|c| c.is_folder());

            for chunk in files.chunks(DIFF_CHUNK_SIZE) {
                stats.files_seen += chunk.len() as u64;
                for file in chunk {
                    if known.contains(&file.id) {
                        continue;
                    }
                    stats.orphans_found += 1;
                    if self.preview {
                        tracing::info!(
                            item = %file.id,
                            name = %file.name,
                            "orphaned remote file (preview, not deleted)"
                        );
                        continue;
                    }
                    tracing::info!(item = %file.id, name = %file.name, "deleting orphaned remote file");
                    // One failed delete must not abort the whole walk
                    match self.manager.client().delete_item(&file.id).await {
                        Ok(()) => stats.orphans_deleted += 1,
                        Err(e) => {
                            stats.delete_failures += 1;
                            tracing::warn!(
                                item = %file.id,
                                error = %e,
                                "failed to delete orphaned remote file"
                            );
                        }
                    }
                }
            }

            for folder in folders {
                let folder_id = folder.id;
                if let Err(e) = self.walk_folder(folder_id.clone(), known, false, stats).await {
                    stats.delete_failures += 1;
                    tracing::warn!(
                        item = %folder_id,
                        error = %e,
                        "failed to reconcile remote folder"
                    );
                }
            }

            // Re-list after the recursion; deletions below may have emptied us
            if !is_root && !self.preview {
                match self.manager.client().list_children(&folder_id).await {
                    Ok(remaining) if remaining.is_empty() => {
                        tracing::info!(item = %folder_id, "removing empty remote folder");
                        match self.manager.client().delete_item(&folder_id).await {
                            Ok(()) => stats.folders_removed += 1,
                            Err(e) => {
                                stats.delete_failures += 1;
                                tracing::warn!(
                                    item = %folder_id,
                                    error = %e,
                                    "failed to remove empty remote folder"
                                );
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        stats.delete_failures += 1;
                        tracing::warn!(
                            item = %folder_id,
                            error = %e,
                            "failed to re-list remote folder"
                        );
                    }
                }
            }

            Ok(())
        })
    }
}
