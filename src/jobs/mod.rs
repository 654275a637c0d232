//! Scheduled-job machinery: recurring jobs run lock-guarded, crash-isolated,
//! and auditable. Every run is recorded as an execution with leveled
//! messages; failures are reported, never propagated into the scheduler.

mod content_migration;
mod deletion_sweep;
mod drive_reconciliation;
mod execution_retention;
mod session_cleanup;

pub use content_migration::ContentMigrationJob;
pub use deletion_sweep::DeletionSweepJob;
pub use drive_reconciliation::DriveReconciliationJob;
pub use execution_retention::ExecutionRetentionJob;
pub use session_cleanup::SessionCleanupJob;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::lock::{AcquireOutcome, LockService, ResourceLock};
use crate::storage::models::{ExecutionMessage, ExecutionStatus, MessageLevel};
use crate::storage::Database;

/// A recurring task. Implementations do the work; the wrapper owns locking,
/// execution records, and reporting.
#[async_trait]
pub trait CronJob: Send + Sync {
    fn name(&self) -> &str;

    fn interval(&self) -> Duration;

    /// Disabled jobs are skipped silently on every tick.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Whether a tick may start while a previous local invocation still runs.
    fn allow_overlap(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &JobContext) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
struct PendingMessage {
    level: MessageLevel,
    message: String,
    timestamp: chrono::DateTime<Utc>,
    extra: Option<HashMap<String, serde_json::Value>>,
}

/// Accumulates leveled messages during one execution. Messages are persisted
/// individually afterwards, and WARNING/ERROR levels are aggregated into one
/// external report each to avoid flooding the alerting channel.
#[derive(Default)]
pub struct JobContext {
    messages: Mutex<Vec<PendingMessage>>,
}

impl JobContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report_info(&self, message: impl Into<String>) {
        self.push(MessageLevel::Info, message.into(), None);
    }

    pub fn report_warning(&self, message: impl Into<String>) {
        self.push(MessageLevel::Warning, message.into(), None);
    }

    pub fn report_error(&self, message: impl Into<String>) {
        self.push(MessageLevel::Error, message.into(), None);
    }

    /// Report with structured extra fields.
    pub fn report_with(
        &self,
        level: MessageLevel,
        message: impl Into<String>,
        extra: HashMap<String, serde_json::Value>,
    ) {
        self.push(level, message.into(), Some(extra));
    }

    fn push(
        &self,
        level: MessageLevel,
        message: String,
        extra: Option<HashMap<String, serde_json::Value>>,
    ) {
        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        messages.push(PendingMessage {
            level,
            message,
            timestamp: Utc::now(),
            extra,
        });
    }

    fn drain(&self) -> Vec<PendingMessage> {
        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *messages)
    }
}

/// External alerting channel. One call per level per run, not per message.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, job_name: &str, level: MessageLevel, summary: &str);
}

/// Default reporter: structured log records.
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, job_name: &str, level: MessageLevel, summary: &str) {
        match level {
            MessageLevel::Error => tracing::error!(job = job_name, "{summary}"),
            MessageLevel::Warning => tracing::warn!(job = job_name, "{summary}"),
            MessageLevel::Info => tracing::info!(job = job_name, "{summary}"),
        }
    }
}

/// Wraps a job with the Idle -> Locking -> Running -> Completed/Failed
/// lifecycle: in-process overlap guard, cross-process resource lock,
/// execution record, message persistence, guaranteed lock release.
pub struct CronJobWrapper {
    job: Arc<dyn CronJob>,
    db: Database,
    locks: LockService,
    reporter: Arc<dyn ErrorReporter>,
    owner_code: String,
    lock_lease: chrono::Duration,
    running: AtomicBool,
}

impl CronJobWrapper {
    pub fn new(
        job: Arc<dyn CronJob>,
        db: Database,
        locks: LockService,
        reporter: Arc<dyn ErrorReporter>,
        owner_code: String,
        lock_lease: chrono::Duration,
    ) -> Self {
        Self {
            job,
            db,
            locks,
            reporter,
            owner_code,
            lock_lease,
            running: AtomicBool::new(false),
        }
    }

    pub fn job_name(&self) -> &str {
        self.job.name()
    }

    pub fn interval(&self) -> Duration {
        self.job.interval()
    }

    /// One scheduled tick.
    pub async fn run_once(&self) {
        self.tick().await;
    }

    /// Manual/administrative trigger, outside the schedule.
    pub async fn force_execution(&self) {
        self.tick().await;
    }

    async fn tick(&self) {
        let name = self.job.name().to_string();

        if !self.job.is_enabled() {
            return;
        }

        // Local overlap guard, supplementary to the cross-process lock
        let guard_held = if self.job.allow_overlap() {
            false
        } else {
            if self.running.swap(true, Ordering::SeqCst) {
                tracing::warn!(job = %name, "previous invocation still running, skipping tick");
                return;
            }
            true
        };

        let resource = format!("cronjob.{name}.execution");
        let lock = match self.locks.acquire(&resource, &self.owner_code, self.lock_lease) {
            Ok(AcquireOutcome::Acquired(lock)) => lock,
            Ok(AcquireOutcome::Busy { reason }) => {
                tracing::warn!(job = %name, %reason, "execution lock busy, skipping tick");
                self.clear_guard(guard_held);
                return;
            }
            Err(e) => {
                tracing::error!(job = %name, error = %e, "failed to acquire execution lock");
                self.clear_guard(guard_held);
                return;
            }
        };

        self.execute_locked(&name).await;

        // Guaranteed release, success or failure
        if let Err(e) = self.locks.release(&lock) {
            tracing::error!(job = %name, error = %e, "failed to release execution lock");
        }
        self.clear_guard(guard_held);
    }

    fn clear_guard(&self, guard_held: bool) {
        if guard_held {
            self.running.store(false, Ordering::SeqCst);
        }
    }

    async fn execute_locked(&self, name: &str) {
        let execution = match self.db.create_execution(name, Utc::now()) {
            Ok(execution) => execution,
            Err(e) => {
                tracing::error!(job = %name, error = %e, "failed to create execution record");
                return;
            }
        };

        tracing::info!(job = %name, execution = execution.id, "job starting");
        let ctx = Arc::new(JobContext::new());

        // The job runs on its own task: a panic inside `execute` surfaces
        // here as a failed run instead of unwinding past the lock release.
        let run = {
            let job = Arc::clone(&self.job);
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { job.execute(&ctx).await })
        };
        let result: anyhow::Result<()> = match run.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                let payload = e.into_panic();
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "opaque panic payload".to_string());
                Err(anyhow::anyhow!("job panicked: {detail}"))
            }
            Err(e) => Err(anyhow::anyhow!("job task aborted: {e}")),
        };

        let status = match &result {
            Ok(()) => ExecutionStatus::Finished,
            Err(e) => {
                ctx.report_error(format!("job failed: {e:#}"));
                ExecutionStatus::Failed
            }
        };

        if let Err(e) = self
            .db
            .finalize_execution(execution.id, status, Utc::now())
        {
            tracing::error!(job = %name, error = %e, "failed to finalize execution record");
        }

        let pending = ctx.drain();
        let rows: Vec<ExecutionMessage> = pending
            .iter()
            .enumerate()
            .map(|(index, m)| ExecutionMessage {
                execution_id: execution.id,
                seq: index as u32 + 1,
                level: m.level,
                message: m.message.clone(),
                timestamp: m.timestamp,
                extra: m.extra.clone(),
            })
            .collect();
        if let Err(e) = self.db.append_messages(&rows) {
            tracing::error!(job = %name, error = %e, "failed to persist execution messages");
        }

        // One aggregated report per level keeps the alerting channel quiet
        for level in [MessageLevel::Error, MessageLevel::Warning] {
            let of_level: Vec<&str> = pending
                .iter()
                .filter(|m| m.level == level)
                .map(|m| m.message.as_str())
                .collect();
            if !of_level.is_empty() {
                let summary = format!(
                    "{} {:?} message(s): {}",
                    of_level.len(),
                    level,
                    of_level.join("; ")
                );
                self.reporter.report(name, level, &summary);
            }
        }

        tracing::info!(job = %name, execution = execution.id, status = ?status, "job finished");
    }

    /// Expose the lock a tick would take (used by operational tooling).
    pub fn lock_resource(&self) -> String {
        format!("cronjob.{}.execution", self.job.name())
    }

    /// The lock currently guarding this job, if any.
    pub fn current_lock(&self) -> Result<Option<ResourceLock>, crate::storage::DatabaseError> {
        Ok(self.locks.inspect(&self.lock_resource())?.map(|row| {
            ResourceLock {
                resource_code: row.resource_code,
                owner_code: row.owner_code,
                expires_at: row.expires_at,
            }
        }))
    }
}

/// Spawns one interval loop per wrapped job; shuts down via a watch channel.
pub struct Scheduler {
    wrappers: Vec<Arc<CronJobWrapper>>,
    shutdown_tx: watch::Sender<()>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(());
        Self {
            wrappers: Vec::new(),
            shutdown_tx,
        }
    }

    pub fn add(&mut self, wrapper: CronJobWrapper) {
        self.wrappers.push(Arc::new(wrapper));
    }

    pub fn wrappers(&self) -> &[Arc<CronJobWrapper>] {
        &self.wrappers
    }

    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for wrapper in &self.wrappers {
            let wrapper = Arc::clone(wrapper);
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(wrapper.interval());
                // The immediate first tick only arms the timer
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            wrapper.run_once().await;
                        }
                        _ = shutdown_rx.changed() => {
                            tracing::info!(job = wrapper.job_name(), "scheduler loop shutting down");
                            break;
                        }
                    }
                }
            }));
        }
        handles
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
