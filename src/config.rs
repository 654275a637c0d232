use chrono::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub instance: InstanceConfig,
    pub upload: UploadConfig,
    pub sweep: SweepConfig,
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone)]
pub struct InstanceConfig {
    /// Opaque identity of this process; lock owner codes derive from it.
    pub id: String,
    pub data_dir: String,
    /// Staging area for uploaded chunks, bucketed by day.
    pub scratch_dir: String,
    /// JSON file seeding the backbone table when it is empty.
    pub backbone_seed_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// How long a fresh session stays resumable.
    pub session_ttl: Duration,
    /// How long terminal-state sessions (FINALIZED, CLEARED, DELETED, stuck
    /// FINALIZING) keep their rows and residual scratch content.
    pub terminal_retention: Duration,
    pub max_part_size: u64,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// DELETED content older than this is eligible for physical purge.
    pub deletion_grace: Duration,
    /// Rows handled per sweep batch.
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct JobsConfig {
    /// Cross-process lock lease per execution. Must exceed the worst-case
    /// job runtime; expiry is the only timeout.
    pub lock_lease: Duration,
    pub session_cleanup_interval_secs: u64,
    pub deletion_sweep_interval_secs: u64,
    pub migration_interval_secs: u64,
    pub retention_interval_secs: u64,
    /// How long finished execution records are retained.
    pub execution_retention: Duration,
    /// Destructive remote-orphan reconciliation is off unless enabled.
    pub drive_reconciliation_enabled: bool,
    /// Walk and count, but never delete.
    pub drive_reconciliation_preview: bool,
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let instance_id =
            std::env::var("INSTANCE_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());
        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());
        let scratch_dir = std::env::var("SCRATCH_DIR").unwrap_or_else(|_| "./scratch".to_string());
        let backbone_seed_file = std::env::var("BACKBONE_SEED_FILE").ok();

        let config = Config {
            instance: InstanceConfig {
                id: instance_id,
                data_dir,
                scratch_dir,
                backbone_seed_file,
            },
            upload: UploadConfig {
                session_ttl: Duration::seconds(env_u64("UPLOAD_SESSION_TTL_SECS", 86_400) as i64),
                terminal_retention: Duration::seconds(env_u64(
                    "UPLOAD_TERMINAL_RETENTION_SECS",
                    7 * 86_400,
                ) as i64),
                max_part_size: env_u64("UPLOAD_MAX_PART_SIZE", 64 * 1024 * 1024),
            },
            sweep: SweepConfig {
                deletion_grace: Duration::seconds(
                    env_u64("DELETION_GRACE_SECS", 14 * 86_400) as i64
                ),
                batch_size: env_u64("SWEEP_BATCH_SIZE", 100) as usize,
            },
            jobs: JobsConfig {
                lock_lease: Duration::seconds(env_u64("JOB_LOCK_LEASE_SECS", 3_600) as i64),
                session_cleanup_interval_secs: env_u64("SESSION_CLEANUP_INTERVAL_SECS", 900),
                deletion_sweep_interval_secs: env_u64("DELETION_SWEEP_INTERVAL_SECS", 3_600),
                migration_interval_secs: env_u64("MIGRATION_INTERVAL_SECS", 3_600),
                retention_interval_secs: env_u64("EXECUTION_RETENTION_INTERVAL_SECS", 21_600),
                execution_retention: Duration::seconds(env_u64(
                    "EXECUTION_RETENTION_SECS",
                    30 * 86_400,
                ) as i64),
                drive_reconciliation_enabled: env_bool("DRIVE_RECONCILIATION_ENABLED"),
                drive_reconciliation_preview: env_bool("DRIVE_RECONCILIATION_PREVIEW"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.instance.id.is_empty() {
            return Err(ConfigError::ValidationError(
                "INSTANCE_ID cannot be empty".to_string(),
            ));
        }
        if self.sweep.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "SWEEP_BATCH_SIZE must be at least 1".to_string(),
            ));
        }
        if self.jobs.lock_lease <= Duration::zero() {
            return Err(ConfigError::ValidationError(
                "JOB_LOCK_LEASE_SECS must be positive".to_string(),
            ));
        }
        if self.upload.session_ttl <= Duration::zero() {
            return Err(ConfigError::ValidationError(
                "UPLOAD_SESSION_TTL_SECS must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
