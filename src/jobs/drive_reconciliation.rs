use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{CronJob, JobContext};
use crate::content::{DriveCleanup, OnedriveContentManager};
use crate::storage::Database;

/// Per-backbone cloud-drive reconciliation: walks the remote tree and
/// removes files no local record references. Destructive, so disabled by
/// default and runnable in preview mode.
pub struct DriveReconciliationJob {
    db: Database,
    manager: Arc<OnedriveContentManager>,
    name: String,
    interval: Duration,
    enabled: bool,
    preview: bool,
}

impl DriveReconciliationJob {
    pub fn new(
        db: Database,
        manager: Arc<OnedriveContentManager>,
        backbone_name: &str,
        interval: Duration,
        enabled: bool,
        preview: bool,
    ) -> Self {
        Self {
            db,
            manager,
            name: format!("drive-reconciliation.{backbone_name}"),
            interval,
            enabled,
            preview,
        }
    }
}

#[async_trait]
impl CronJob for DriveReconciliationJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn execute(&self, ctx: &JobContext) -> anyhow::Result<()> {
        let cleanup = DriveCleanup::new(self.manager.as_ref(), self.db.clone(), self.preview);
        let stats = cleanup.run().await?;

        if self.preview {
            ctx.report_info(format!(
                "preview: walked {} folder(s), {} file(s); {} orphan(s) would be deleted",
                stats.folders_walked, stats.files_seen, stats.orphans_found
            ));
        } else {
            ctx.report_info(format!(
                "walked {} folder(s), {} file(s); deleted {} orphan(s) and {} empty folder(s)",
                stats.folders_walked, stats.files_seen, stats.orphans_deleted, stats.folders_removed
            ));
            if stats.delete_failures > 0 {
                ctx.report_warning(format!(
                    "{} remote deletion(s) or listing(s) failed",
                    stats.delete_failures
                ));
            }
        }
        Ok(())
    }
}
