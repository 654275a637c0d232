use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;

use storage_gateway::content::{ContentManager, MemoryContentManager, StoreMeta};
use storage_gateway::jobs::{
    CronJob, CronJobWrapper, DeletionSweepJob, ErrorReporter, ExecutionRetentionJob, JobContext,
};
use storage_gateway::lock::LockService;
use storage_gateway::storage::models::{
    ExecutionStatus, MessageLevel, NodeKind, NodeStatus, StorageNode,
};
use storage_gateway::storage::Database;

fn test_db() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data")).unwrap();
    (dir, db)
}

/// Reporter that records every aggregated call for assertions.
#[derive(Default)]
struct CapturingReporter {
    calls: Mutex<Vec<(String, MessageLevel, String)>>,
}

impl ErrorReporter for CapturingReporter {
    fn report(&self, job_name: &str, level: MessageLevel, summary: &str) {
        self.calls.lock().unwrap().push((
            job_name.to_string(),
            level,
            summary.to_string(),
        ));
    }
}

struct ScriptedJob {
    name: &'static str,
    enabled: bool,
    fail: bool,
    runs: AtomicUsize,
}

impl ScriptedJob {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            enabled: true,
            fail: false,
            runs: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CronJob for ScriptedJob {
    fn name(&self) -> &str {
        self.name
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(3600)
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn execute(&self, ctx: &JobContext) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        ctx.report_info("did the work");
        if self.fail {
            ctx.report_warning("something looked off");
            anyhow::bail!("scripted failure");
        }
        Ok(())
    }
}

struct PanickingJob;

#[async_trait]
impl CronJob for PanickingJob {
    fn name(&self) -> &str {
        "brittle"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(3600)
    }

    async fn execute(&self, _ctx: &JobContext) -> anyhow::Result<()> {
        panic!("index out of bounds in batch handling");
    }
}

fn wrapper_for(
    job: Arc<dyn CronJob>,
    db: &Database,
    reporter: Arc<dyn ErrorReporter>,
) -> CronJobWrapper {
    CronJobWrapper::new(
        job,
        db.clone(),
        LockService::new(db.clone()),
        reporter,
        "instance.test".to_string(),
        chrono::Duration::minutes(10),
    )
}

#[tokio::test]
async fn test_successful_run_records_finished_execution() {
    let (_dir, db) = test_db();
    let job = Arc::new(ScriptedJob::new("scripted"));
    let wrapper = wrapper_for(job.clone(), &db, Arc::new(CapturingReporter::default()));

    wrapper.run_once().await;

    assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    let execution = db.get_execution(1).unwrap().expect("execution recorded");
    assert_eq!(execution.job_name, "scripted");
    assert_eq!(execution.status, ExecutionStatus::Finished);
    assert!(execution.finished_at.is_some());

    let messages = db.messages_for_execution(execution.id).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].seq, 1);
    assert_eq!(messages[0].level, MessageLevel::Info);
    assert_eq!(messages[0].message, "did the work");

    // The execution lock is released afterwards
    let locks = LockService::new(db.clone());
    assert!(locks
        .inspect("cronjob.scripted.execution")
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_failed_run_records_failed_execution_and_reports() {
    let (_dir, db) = test_db();
    let mut job = ScriptedJob::new("flaky");
    job.fail = true;
    let reporter = Arc::new(CapturingReporter::default());
    let wrapper = wrapper_for(Arc::new(job), &db, reporter.clone());

    wrapper.run_once().await;

    let execution = db.get_execution(1).unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);

    let messages = db.messages_for_execution(execution.id).unwrap();
    let levels: Vec<MessageLevel> = messages.iter().map(|m| m.level).collect();
    assert_eq!(
        levels,
        vec![MessageLevel::Info, MessageLevel::Warning, MessageLevel::Error]
    );
    assert!(messages[2].message.contains("scripted failure"));

    // One aggregated report per level with content
    let calls = reporter.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].1, MessageLevel::Error);
    assert!(calls[0].2.contains("scripted failure"));
    assert_eq!(calls[1].1, MessageLevel::Warning);
    assert!(calls[1].2.contains("something looked off"));

    // Failure still releases the lock
    let locks = LockService::new(db.clone());
    assert!(locks.inspect("cronjob.flaky.execution").unwrap().is_none());
}

#[tokio::test]
async fn test_panicking_job_records_failure_and_releases_lock() {
    let (_dir, db) = test_db();
    let reporter = Arc::new(CapturingReporter::default());
    let wrapper = wrapper_for(Arc::new(PanickingJob), &db, reporter.clone());

    wrapper.run_once().await;

    let execution = db.get_execution(1).unwrap().expect("execution recorded");
    assert_eq!(execution.status, ExecutionStatus::Failed);
    let messages = db.messages_for_execution(execution.id).unwrap();
    assert!(messages
        .iter()
        .any(|m| m.level == MessageLevel::Error && m.message.contains("index out of bounds")));

    // The lock is released despite the panic
    let locks = LockService::new(db.clone());
    assert!(locks.inspect("cronjob.brittle.execution").unwrap().is_none());

    // The wrapper stays usable for the next tick
    wrapper.run_once().await;
    let again = db.get_execution(2).unwrap().expect("second run recorded");
    assert_eq!(again.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_busy_lock_skips_the_tick() {
    let (_dir, db) = test_db();
    let job = Arc::new(ScriptedJob::new("guarded"));
    let wrapper = wrapper_for(job.clone(), &db, Arc::new(CapturingReporter::default()));

    // Another process holds the execution lock
    let locks = LockService::new(db.clone());
    assert!(locks
        .acquire(
            "cronjob.guarded.execution",
            "instance.other",
            chrono::Duration::minutes(10),
        )
        .unwrap()
        .is_acquired());

    wrapper.run_once().await;

    assert_eq!(job.runs.load(Ordering::SeqCst), 0);
    assert!(db.get_execution(1).unwrap().is_none());

    // The foreign lock is left alone
    let row = locks.inspect("cronjob.guarded.execution").unwrap().unwrap();
    assert_eq!(row.owner_code, "instance.other");
}

#[tokio::test]
async fn test_disabled_job_never_runs() {
    let (_dir, db) = test_db();
    let mut job = ScriptedJob::new("dormant");
    job.enabled = false;
    let job = Arc::new(job);
    let wrapper = wrapper_for(job.clone(), &db, Arc::new(CapturingReporter::default()));

    wrapper.run_once().await;
    wrapper.force_execution().await;

    assert_eq!(job.runs.load(Ordering::SeqCst), 0);
    assert!(db.get_execution(1).unwrap().is_none());
}

#[tokio::test]
async fn test_deletion_sweep_purges_payload_and_row() {
    let (_dir, db) = test_db();
    let manager = Arc::new(MemoryContentManager::new(db.clone(), 1));

    let now = Utc::now();
    let node = db
        .create_node(&StorageNode {
            id: 0,
            uuid: uuid::Uuid::new_v4().to_string(),
            tenant_id: "acme".to_string(),
            parent_id: None,
            kind: NodeKind::File,
            status: NodeStatus::Active,
            name: "old.bin".to_string(),
            version: 1,
            created_at: now,
            updated_at: now,
        })
        .unwrap();
    let record = manager
        .store(
            &node,
            Bytes::from_static(b"doomed"),
            &StoreMeta {
                original_name: "old.bin".to_string(),
                mime_type: None,
            },
        )
        .await
        .unwrap();

    // Deleted well past the grace window
    db.mark_content_deleted(record.id, now - chrono::Duration::days(30))
        .unwrap();

    let sweep = DeletionSweepJob::new(
        db.clone(),
        manager.clone(),
        "memory-test",
        Duration::from_secs(3600),
        chrono::Duration::days(14),
        10,
    );
    let ctx = JobContext::new();
    sweep.execute(&ctx).await.unwrap();

    assert_eq!(manager.payload_count().await, 0);
    assert!(db.get_content(record.id).unwrap().is_none());
}

#[tokio::test]
async fn test_deletion_sweep_spares_rows_inside_grace() {
    let (_dir, db) = test_db();
    let manager = Arc::new(MemoryContentManager::new(db.clone(), 1));

    let now = Utc::now();
    let node = db
        .create_node(&StorageNode {
            id: 0,
            uuid: uuid::Uuid::new_v4().to_string(),
            tenant_id: "acme".to_string(),
            parent_id: None,
            kind: NodeKind::File,
            status: NodeStatus::Active,
            name: "recent.bin".to_string(),
            version: 1,
            created_at: now,
            updated_at: now,
        })
        .unwrap();
    let record = manager
        .store(
            &node,
            Bytes::from_static(b"spared"),
            &StoreMeta {
                original_name: "recent.bin".to_string(),
                mime_type: None,
            },
        )
        .await
        .unwrap();
    db.mark_content_deleted(record.id, now).unwrap();

    let sweep = DeletionSweepJob::new(
        db.clone(),
        manager.clone(),
        "memory-test",
        Duration::from_secs(3600),
        chrono::Duration::days(14),
        10,
    );
    sweep.execute(&JobContext::new()).await.unwrap();

    assert_eq!(manager.payload_count().await, 1);
    assert!(db.get_content(record.id).unwrap().is_some());
}

#[tokio::test]
async fn test_execution_retention_purges_old_runs() {
    let (_dir, db) = test_db();
    let now = Utc::now();

    let old = db
        .create_execution("ancient-job", now - chrono::Duration::days(90))
        .unwrap();
    db.finalize_execution(
        old.id,
        ExecutionStatus::Finished,
        now - chrono::Duration::days(90),
    )
    .unwrap();
    let recent = db.create_execution("recent-job", now).unwrap();
    db.finalize_execution(recent.id, ExecutionStatus::Finished, now)
        .unwrap();

    let retention = ExecutionRetentionJob::new(
        db.clone(),
        Duration::from_secs(3600),
        chrono::Duration::days(30),
        10,
    );
    retention.execute(&JobContext::new()).await.unwrap();

    assert!(db.get_execution(old.id).unwrap().is_none());
    assert!(db.get_execution(recent.id).unwrap().is_some());
}

#[tokio::test]
async fn test_execution_retention_drains_backlog_in_batches() {
    let (_dir, db) = test_db();
    let now = Utc::now();

    let mut old_ids = Vec::new();
    for _ in 0..3 {
        let execution = db
            .create_execution("ancient-job", now - chrono::Duration::days(90))
            .unwrap();
        db.finalize_execution(
            execution.id,
            ExecutionStatus::Finished,
            now - chrono::Duration::days(90),
        )
        .unwrap();
        old_ids.push(execution.id);
    }
    let recent = db.create_execution("recent-job", now).unwrap();
    db.finalize_execution(recent.id, ExecutionStatus::Finished, now)
        .unwrap();

    // Batch size 1 forces multiple scan rounds within one run
    let retention = ExecutionRetentionJob::new(
        db.clone(),
        Duration::from_secs(3600),
        chrono::Duration::days(30),
        1,
    );
    retention.execute(&JobContext::new()).await.unwrap();

    for id in old_ids {
        assert!(db.get_execution(id).unwrap().is_none());
    }
    assert!(db.get_execution(recent.id).unwrap().is_some());
}
