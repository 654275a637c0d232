use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{CronJob, JobContext};
use crate::content::ContentManager;
use crate::storage::Database;

/// Per-backbone physical-deletion sweep: DELETED content past the grace
/// window loses its backend payload, then its database row. One failing row
/// never aborts the batch.
pub struct DeletionSweepJob {
    db: Database,
    manager: Arc<dyn ContentManager>,
    name: String,
    interval: Duration,
    grace: chrono::Duration,
    batch_size: usize,
}

impl DeletionSweepJob {
    pub fn new(
        db: Database,
        manager: Arc<dyn ContentManager>,
        backbone_name: &str,
        interval: Duration,
        grace: chrono::Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            db,
            manager,
            name: format!("content-deletion-sweep.{backbone_name}"),
            interval,
            grace,
            batch_size,
        }
    }
}

#[async_trait]
impl CronJob for DeletionSweepJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self, ctx: &JobContext) -> anyhow::Result<()> {
        let cutoff = Utc::now() - self.grace;
        let mut after_id = 0u64;
        let mut purged = 0u64;
        let mut failed = 0u64;

        loop {
            let page = self
                .manager
                .queued_for_deletion(cutoff, after_id, self.batch_size)?;

            if !page.rows.is_empty() {
                for (content_id, outcome) in self.manager.delete_physical_many(&page.rows).await {
                    match outcome {
                        Ok(()) => match self.db.delete_content_row(content_id) {
                            Ok(_) => purged += 1,
                            Err(e) => {
                                failed += 1;
                                ctx.report_error(format!(
                                    "payload of content {content_id} deleted but row purge failed: {e}"
                                ));
                            }
                        },
                        Err(e) => {
                            failed += 1;
                            ctx.report_error(format!(
                                "physical delete of content {content_id} failed: {e}"
                            ));
                        }
                    }
                }
            }

            match page.next_after {
                Some(next) => after_id = next,
                None => break,
            }
        }

        ctx.report_info(format!(
            "purged {purged} content row(s), {failed} failure(s)"
        ));
        Ok(())
    }
}
