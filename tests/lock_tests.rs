use chrono::{Duration, Utc};

use storage_gateway::lock::{AcquireOutcome, LockService};
use storage_gateway::storage::Database;

fn test_locks() -> (tempfile::TempDir, LockService) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data")).unwrap();
    (dir, LockService::new(db))
}

#[test]
fn test_acquire_free_resource() {
    let (_dir, locks) = test_locks();

    let outcome = locks
        .acquire("migration.tenant-1", "instance.a", Duration::minutes(10))
        .unwrap();
    let lock = match outcome {
        AcquireOutcome::Acquired(lock) => lock,
        AcquireOutcome::Busy { reason } => panic!("unexpected busy: {reason}"),
    };
    assert_eq!(lock.resource_code, "migration.tenant-1");
    assert_eq!(lock.owner_code, "instance.a");
    assert!(lock.expires_at > Utc::now());
}

#[test]
fn test_contended_resource_is_busy_with_reason() {
    let (_dir, locks) = test_locks();

    locks
        .acquire("migration.tenant-1", "instance.a", Duration::minutes(10))
        .unwrap();
    let outcome = locks
        .acquire("migration.tenant-1", "instance.b", Duration::minutes(10))
        .unwrap();

    match outcome {
        AcquireOutcome::Busy { reason } => {
            assert!(reason.contains("migration.tenant-1"));
            assert!(reason.contains("instance.a"));
        }
        AcquireOutcome::Acquired(_) => panic!("second owner should not acquire"),
    }

    // A different resource is unaffected
    assert!(locks
        .acquire("migration.tenant-2", "instance.b", Duration::minutes(10))
        .unwrap()
        .is_acquired());
}

#[test]
fn test_same_owner_reacquire_extends_lease() {
    let (_dir, locks) = test_locks();

    let first = match locks
        .acquire("sweep", "instance.a", Duration::minutes(1))
        .unwrap()
    {
        AcquireOutcome::Acquired(lock) => lock,
        AcquireOutcome::Busy { .. } => panic!("resource should be free"),
    };

    let second = match locks
        .acquire("sweep", "instance.a", Duration::minutes(30))
        .unwrap()
    {
        AcquireOutcome::Acquired(lock) => lock,
        AcquireOutcome::Busy { .. } => panic!("holder should re-acquire"),
    };
    assert!(second.expires_at > first.expires_at);
}

#[test]
fn test_expired_lease_can_be_taken() {
    let (_dir, locks) = test_locks();

    // A negative duration produces an already-expired lease
    locks
        .acquire("stale", "instance.a", Duration::seconds(-5))
        .unwrap();

    let outcome = locks
        .acquire("stale", "instance.b", Duration::minutes(10))
        .unwrap();
    match outcome {
        AcquireOutcome::Acquired(lock) => assert_eq!(lock.owner_code, "instance.b"),
        AcquireOutcome::Busy { reason } => panic!("expired lease should be free: {reason}"),
    }
}

#[test]
fn test_release_frees_the_resource() {
    let (_dir, locks) = test_locks();

    let lock = match locks
        .acquire("sweep", "instance.a", Duration::minutes(10))
        .unwrap()
    {
        AcquireOutcome::Acquired(lock) => lock,
        AcquireOutcome::Busy { .. } => panic!("resource should be free"),
    };

    locks.release(&lock).unwrap();
    assert!(locks.inspect("sweep").unwrap().is_none());
    assert!(locks
        .acquire("sweep", "instance.b", Duration::minutes(10))
        .unwrap()
        .is_acquired());
}

#[test]
fn test_release_by_stale_owner_is_a_noop() {
    let (_dir, locks) = test_locks();

    // instance.a's lease expires, instance.b takes over
    let stale = match locks
        .acquire("sweep", "instance.a", Duration::seconds(-5))
        .unwrap()
    {
        AcquireOutcome::Acquired(lock) => lock,
        AcquireOutcome::Busy { .. } => panic!("resource should be free"),
    };
    locks
        .acquire("sweep", "instance.b", Duration::minutes(10))
        .unwrap();

    // The stale holder's release must not evict the new owner
    locks.release(&stale).unwrap();
    let row = locks.inspect("sweep").unwrap().expect("lock should remain");
    assert_eq!(row.owner_code, "instance.b");
}

#[test]
fn test_concurrent_acquires_have_one_winner() {
    let (_dir, locks) = test_locks();

    let mut handles = Vec::new();
    for i in 0..8 {
        let locks = locks.clone();
        handles.push(std::thread::spawn(move || {
            locks
                .acquire("contended", &format!("instance.{i}"), Duration::minutes(10))
                .unwrap()
                .is_acquired()
        }));
    }

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|acquired| *acquired)
        .count();
    assert_eq!(winners, 1);
}
