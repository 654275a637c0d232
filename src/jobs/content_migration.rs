use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{CronJob, JobContext};
use crate::content::{migrate_row, ContentError, ContentManager, MigrationOutcome};
use crate::storage::Database;

/// Per-backbone engine-version migrator: walks content rows behind the
/// manager's current version in `id ASC` order and advances each through the
/// registered single-step migrations, one transaction per row. Rows without
/// a migration path are reported and left, never silently skipped.
pub struct ContentMigrationJob {
    db: Database,
    manager: Arc<dyn ContentManager>,
    name: String,
    interval: Duration,
    batch_size: usize,
}

impl ContentMigrationJob {
    pub fn new(
        db: Database,
        manager: Arc<dyn ContentManager>,
        backbone_name: &str,
        interval: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            db,
            manager,
            name: format!("content-engine-migration.{backbone_name}"),
            interval,
            batch_size,
        }
    }
}

#[async_trait]
impl CronJob for ContentMigrationJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self, ctx: &JobContext) -> anyhow::Result<()> {
        let current = self.manager.engine_version();
        let mut after_id = 0u64;
        let mut migrated = 0u64;
        let mut stuck = 0u64;

        loop {
            let page = self.db.contents_behind_version(
                self.manager.backbone_id(),
                current,
                after_id,
                self.batch_size,
            )?;

            for content in &page.rows {
                match migrate_row(self.manager.as_ref(), &self.db, content).await {
                    Ok(MigrationOutcome::Migrated { from, to }) => {
                        migrated += 1;
                        tracing::debug!(
                            content = content.id,
                            from,
                            to,
                            "content row migrated"
                        );
                    }
                    Ok(MigrationOutcome::Current) => {}
                    Err(ContentError::NoMigrationPath { from, to }) => {
                        stuck += 1;
                        ctx.report_warning(format!(
                            "content {} has no migration path from version {from} to {to}",
                            content.id
                        ));
                    }
                    Err(e) => {
                        stuck += 1;
                        ctx.report_error(format!(
                            "migration of content {} failed: {e}",
                            content.id
                        ));
                    }
                }
            }

            match page.next_after {
                Some(next) => after_id = next,
                None => break,
            }
        }

        ctx.report_info(format!(
            "migrated {migrated} content row(s) to version {current}, {stuck} left behind"
        ));
        Ok(())
    }
}
