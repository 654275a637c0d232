use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storage_gateway::{
    backbone::{self, BackboneRegistry},
    config::Config,
    content::{ContentManagers, DialectRegistry},
    jobs::{
        ContentMigrationJob, CronJob, CronJobWrapper, DeletionSweepJob, DriveReconciliationJob,
        ExecutionRetentionJob, Scheduler, SessionCleanupJob, TracingReporter,
    },
    lock::LockService,
    storage::Database,
    upload::MultipartUploadService,
    AppState,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "storage-gateway starting"
    );

    // Load configuration
    let config = Config::load()?;
    info!("Loaded configuration for instance: {}", config.instance.id);

    // Initialize database
    let db = Database::open(&config.instance.data_dir)?;
    info!("Database opened at: {}", config.instance.data_dir);

    // Seed backbones on first boot, then load the enabled ones
    if let Some(seed_file) = &config.instance.backbone_seed_file {
        let created = backbone::seed_backbones(&db, seed_file)?;
        if created > 0 {
            info!(count = created, "backbone table seeded");
        }
    }
    let backbones = Arc::new(BackboneRegistry::load(&db)?);
    info!(count = backbones.len(), "backbones loaded");

    // One content manager per enabled backbone
    let dialects = DialectRegistry::with_defaults();
    let built = ContentManagers::build(&db, &backbones, &dialects)?;
    let managers = Arc::new(built.managers);
    let drives = built.drives;

    let locks = LockService::new(db.clone());
    let uploads = Arc::new(MultipartUploadService::new(
        db.clone(),
        Arc::clone(&managers),
        &config.instance.scratch_dir,
        config.upload.clone(),
        config.sweep.batch_size,
    ));

    let state = Arc::new(AppState {
        config: config.clone(),
        db: db.clone(),
        backbones: Arc::clone(&backbones),
        managers: Arc::clone(&managers),
        locks: locks.clone(),
        uploads: Arc::clone(&uploads),
    });

    // Wire the maintenance jobs. Lock owner codes derive from the instance
    // id, so two processes on the same database exclude each other.
    let reporter: Arc<dyn storage_gateway::jobs::ErrorReporter> = Arc::new(TracingReporter);
    let owner_code = format!("instance.{}", state.config.instance.id);
    let jobs_config = &state.config.jobs;

    let mut scheduler = Scheduler::new();
    let mut add_job = |job: Arc<dyn CronJob>| {
        scheduler.add(CronJobWrapper::new(
            job,
            db.clone(),
            locks.clone(),
            Arc::clone(&reporter),
            owner_code.clone(),
            jobs_config.lock_lease,
        ));
    };

    add_job(Arc::new(SessionCleanupJob::new(
        Arc::clone(&uploads),
        Duration::from_secs(jobs_config.session_cleanup_interval_secs),
    )));

    for (backbone_id, manager) in managers.iter() {
        let name = backbones
            .get(*backbone_id)
            .map(|b| b.name.clone())
            .unwrap_or_else(|| backbone_id.to_string());

        add_job(Arc::new(DeletionSweepJob::new(
            db.clone(),
            Arc::clone(manager),
            &name,
            Duration::from_secs(jobs_config.deletion_sweep_interval_secs),
            state.config.sweep.deletion_grace,
            state.config.sweep.batch_size,
        )));
        add_job(Arc::new(ContentMigrationJob::new(
            db.clone(),
            Arc::clone(manager),
            &name,
            Duration::from_secs(jobs_config.migration_interval_secs),
            state.config.sweep.batch_size,
        )));
    }

    add_job(Arc::new(ExecutionRetentionJob::new(
        db.clone(),
        Duration::from_secs(jobs_config.retention_interval_secs),
        jobs_config.execution_retention,
        state.config.sweep.batch_size,
    )));

    for (backbone_name, drive) in &drives {
        add_job(Arc::new(DriveReconciliationJob::new(
            db.clone(),
            Arc::clone(drive),
            backbone_name,
            Duration::from_secs(jobs_config.deletion_sweep_interval_secs),
            jobs_config.drive_reconciliation_enabled,
            jobs_config.drive_reconciliation_preview,
        )));
    }

    let job_handles = scheduler.start();
    info!(count = scheduler.wrappers().len(), "scheduler started");

    shutdown_signal().await;

    // Cleanup: stop the scheduler loops
    info!("Shutting down background tasks");
    scheduler.shutdown();
    for handle in job_handles {
        handle.abort();
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining background work");
}
