//! Named, leased mutual exclusion backed by the database. Serializes
//! cross-process critical sections; contention is an expected outcome, not
//! an error.

use chrono::{Duration, Utc};

use crate::storage::locks::LockAttempt;
use crate::storage::models::LockRow;
use crate::storage::{Database, DatabaseError};

/// A held lease. Holding it past `expires_at` gives no exclusivity; size
/// the duration above the worst-case critical-section runtime.
#[derive(Debug, Clone)]
pub struct ResourceLock {
    pub resource_code: String,
    pub owner_code: String,
    pub expires_at: chrono::DateTime<Utc>,
}

/// Outcome of an acquire attempt.
#[derive(Debug)]
pub enum AcquireOutcome {
    Acquired(ResourceLock),
    /// Someone else holds an unexpired lease.
    Busy { reason: String },
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired(_))
    }
}

#[derive(Clone)]
pub struct LockService {
    db: Database,
}

impl LockService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Take the lease for `resource_code` when it is free (absent or
    /// expired) or already ours (extension). A live lease held by a
    /// different owner yields `Busy` with a human-readable reason.
    pub fn acquire(
        &self,
        resource_code: &str,
        owner_code: &str,
        duration: Duration,
    ) -> Result<AcquireOutcome, DatabaseError> {
        let now = Utc::now();
        let attempt =
            self.db
                .try_acquire_lock(resource_code, owner_code, now, now + duration)?;

        match attempt {
            LockAttempt::Acquired(row) => {
                tracing::debug!(
                    resource = resource_code,
                    owner = owner_code,
                    expires_at = %row.expires_at,
                    "lock acquired"
                );
                Ok(AcquireOutcome::Acquired(ResourceLock {
                    resource_code: row.resource_code,
                    owner_code: row.owner_code,
                    expires_at: row.expires_at,
                }))
            }
            LockAttempt::Held(row) => Ok(AcquireOutcome::Busy {
                reason: format!(
                    "resource '{}' is held by '{}' until {}",
                    resource_code, row.owner_code, row.expires_at
                ),
            }),
        }
    }

    /// Release the lease. A no-op when the row is gone or was re-acquired by
    /// another owner after our lease expired.
    pub fn release(&self, lock: &ResourceLock) -> Result<(), DatabaseError> {
        let released = self
            .db
            .release_lock(&lock.resource_code, &lock.owner_code)?;
        if !released {
            tracing::warn!(
                resource = %lock.resource_code,
                owner = %lock.owner_code,
                "release was a no-op; lease expired or re-acquired elsewhere"
            );
        }
        Ok(())
    }

    /// The current row for a resource, expired or not.
    pub fn inspect(&self, resource_code: &str) -> Result<Option<LockRow>, DatabaseError> {
        self.db.get_lock(resource_code)
    }
}
