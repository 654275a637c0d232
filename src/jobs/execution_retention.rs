use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{CronJob, JobContext};
use crate::storage::Database;

/// Purges finished execution records (and their messages) older than the
/// retention window.
pub struct ExecutionRetentionJob {
    db: Database,
    interval: Duration,
    retention: chrono::Duration,
    batch_size: usize,
}

impl ExecutionRetentionJob {
    pub fn new(
        db: Database,
        interval: Duration,
        retention: chrono::Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            db,
            interval,
            retention,
            batch_size,
        }
    }
}

#[async_trait]
impl CronJob for ExecutionRetentionJob {
    fn name(&self) -> &str {
        "execution-log-retention"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self, ctx: &JobContext) -> anyhow::Result<()> {
        let cutoff = Utc::now() - self.retention;
        let mut purged = 0u64;

        loop {
            let batch = self.db.executions_finished_before(cutoff, self.batch_size)?;
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();
            let mut removed_in_batch = 0usize;
            for execution in batch {
                // One bad row must not abort the rest of the batch
                match self.db.delete_execution(execution.id) {
                    Ok(true) => {
                        purged += 1;
                        removed_in_batch += 1;
                    }
                    Ok(false) => removed_in_batch += 1,
                    Err(e) => ctx.report_warning(format!(
                        "failed to delete execution {}: {e}",
                        execution.id
                    )),
                }
            }
            // Rows that failed to delete re-match the scan; stop once a full
            // batch made no progress instead of spinning on them.
            if batch_len < self.batch_size || removed_in_batch == 0 {
                break;
            }
        }

        ctx.report_info(format!("purged {purged} execution record(s)"));
        Ok(())
    }
}
