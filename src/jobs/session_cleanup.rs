use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{CronJob, JobContext};
use crate::upload::MultipartUploadService;

/// Purges upload sessions: expired ACTIVE sessions lose their scratch
/// content (rows kept for audit); stale terminal sessions lose scratch and
/// rows both.
pub struct SessionCleanupJob {
    uploads: Arc<MultipartUploadService>,
    interval: Duration,
}

impl SessionCleanupJob {
    pub fn new(uploads: Arc<MultipartUploadService>, interval: Duration) -> Self {
        Self { uploads, interval }
    }
}

#[async_trait]
impl CronJob for SessionCleanupJob {
    fn name(&self) -> &str {
        "upload-session-cleanup"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self, ctx: &JobContext) -> anyhow::Result<()> {
        let candidates = self.uploads.purge_candidates(Utc::now())?;

        let mut expired_purged = 0u64;
        for session in &candidates.expired {
            match self.uploads.purge_expired_session(session).await {
                Ok(()) => expired_purged += 1,
                Err(e) => ctx.report_error(format!(
                    "failed to purge expired session {}: {e}",
                    session.uuid
                )),
            }
        }

        let mut stale_purged = 0u64;
        for session in &candidates.stale {
            match self.uploads.purge_cleared_records(session).await {
                Ok(()) => stale_purged += 1,
                Err(e) => ctx.report_error(format!(
                    "failed to purge stale session {}: {e}",
                    session.uuid
                )),
            }
        }

        ctx.report_info(format!(
            "purged scratch of {expired_purged} expired session(s), removed {stale_purged} stale session record(s)"
        ));
        Ok(())
    }
}
