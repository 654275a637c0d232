use bytes::Bytes;
use chrono::{Duration, Utc};

use storage_gateway::content::{
    migrate_row, ContentError, ContentManager, FilesystemContentManager, MemoryContentManager,
    MigrationOutcome, StoreMeta,
};
use storage_gateway::storage::models::{
    BackendKind, ContentLocation, ContentRecord, ContentStatus, NodeKind, NodeStatus, StorageNode,
};
use storage_gateway::storage::{Database, DatabaseError};

const BACKBONE_ID: u64 = 1;

fn test_db() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data")).unwrap();
    (dir, db)
}

fn sample_node(db: &Database, tenant: &str) -> StorageNode {
    let now = Utc::now();
    db.create_node(&StorageNode {
        id: 0,
        uuid: uuid::Uuid::new_v4().to_string(),
        tenant_id: tenant.to_string(),
        parent_id: None,
        kind: NodeKind::File,
        status: NodeStatus::Active,
        name: "notes.txt".to_string(),
        version: 1,
        created_at: now,
        updated_at: now,
    })
    .unwrap()
}

fn meta(name: &str) -> StoreMeta {
    StoreMeta {
        original_name: name.to_string(),
        mime_type: None,
    }
}

#[tokio::test]
async fn test_filesystem_store_and_fetch() {
    let (dir, db) = test_db();
    let root = dir.path().join("blobs");
    let manager = FilesystemContentManager::new(db.clone(), BACKBONE_ID, &root).unwrap();
    let node = sample_node(&db, "acme");

    let record = manager
        .store(&node, Bytes::from_static(b"hello world"), &meta("notes.txt"))
        .await
        .unwrap();
    assert_eq!(record.size, 11);
    assert_eq!(record.backend, BackendKind::Filesystem);
    assert_eq!(record.status, ContentStatus::Active);
    assert_eq!(record.mime_type, "text/plain");
    assert_eq!(record.md5, "5eb63bbbe01eeed093cb22bb8f5acdc3");

    // Payload lands under the sharded layout
    let ContentLocation::Filesystem { relative_path } = &record.location else {
        panic!("filesystem record should carry a filesystem location");
    };
    let expected = format!(
        "acme/{}/{}/{}",
        &node.uuid[0..2],
        &node.uuid[2..4],
        node.uuid
    );
    assert_eq!(relative_path, &expected);
    assert!(root.join(relative_path).exists());

    let fetched = manager.fetch(&record).await.unwrap();
    assert_eq!(&fetched[..], b"hello world");
}

#[tokio::test]
async fn test_second_active_store_for_node_is_rejected() {
    let (dir, db) = test_db();
    let manager =
        FilesystemContentManager::new(db.clone(), BACKBONE_ID, dir.path().join("blobs")).unwrap();
    let node = sample_node(&db, "acme");

    manager
        .store(&node, Bytes::from_static(b"v1"), &meta("notes.txt"))
        .await
        .unwrap();
    let err = manager
        .store(&node, Bytes::from_static(b"v2"), &meta("notes.txt"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ContentError::Database(DatabaseError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_logical_then_physical_delete() {
    let (dir, db) = test_db();
    let root = dir.path().join("blobs");
    let manager = FilesystemContentManager::new(db.clone(), BACKBONE_ID, &root).unwrap();
    let node = sample_node(&db, "acme");

    let record = manager
        .store(&node, Bytes::from_static(b"payload"), &meta("notes.txt"))
        .await
        .unwrap();

    assert!(manager.logical_delete(record.id).unwrap());
    let row = db.get_content(record.id).unwrap().unwrap();
    assert_eq!(row.status, ContentStatus::Deleted);

    // The payload is untouched until the sweep comes around
    let ContentLocation::Filesystem { relative_path } = &record.location else {
        panic!("filesystem record should carry a filesystem location");
    };
    assert!(root.join(relative_path).exists());

    // Inside the grace window nothing is queued
    let page = manager
        .queued_for_deletion(Utc::now() - Duration::days(14), 0, 10)
        .unwrap();
    assert!(page.rows.is_empty());

    // Past the grace window the row shows up and the payload goes
    let page = manager
        .queued_for_deletion(Utc::now() + Duration::seconds(1), 0, 10)
        .unwrap();
    assert_eq!(page.rows.len(), 1);

    manager.delete_physical(&page.rows[0]).await.unwrap();
    assert!(!root.join(relative_path).exists());

    // Physical delete is idempotent
    manager.delete_physical(&page.rows[0]).await.unwrap();
}

#[tokio::test]
async fn test_memory_manager_roundtrip_and_idempotent_delete() {
    let (_dir, db) = test_db();
    let manager = MemoryContentManager::new(db.clone(), BACKBONE_ID);
    let node = sample_node(&db, "acme");

    let record = manager
        .store(&node, Bytes::from_static(b"in-memory"), &meta("notes.txt"))
        .await
        .unwrap();
    assert_eq!(manager.payload_count().await, 1);
    assert_eq!(&manager.fetch(&record).await.unwrap()[..], b"in-memory");

    manager.delete_physical(&record).await.unwrap();
    assert_eq!(manager.payload_count().await, 0);
    manager.delete_physical(&record).await.unwrap();

    let err = manager.fetch(&record).await.unwrap_err();
    assert!(matches!(err, ContentError::NotFound(_)));
}

/// Seed a row the way the flat v1 layout wrote it: `tenant/<node-uuid>`,
/// engine version 1.
fn seed_v1_content(
    db: &Database,
    root: &std::path::Path,
    node: &StorageNode,
    payload: &[u8],
) -> ContentRecord {
    let relative = format!("{}/{}", node.tenant_id, node.uuid);
    let path = root.join(&relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, payload).unwrap();

    db.create_content(&ContentRecord {
        id: 0,
        uuid: uuid::Uuid::new_v4().to_string(),
        node_id: node.id,
        backbone_id: BACKBONE_ID,
        backend: BackendKind::Filesystem,
        status: ContentStatus::Active,
        size: payload.len() as u64,
        md5: format!("{:x}", md5::compute(payload)),
        sha1: String::new(),
        sha256: String::new(),
        mime_type: "application/octet-stream".to_string(),
        original_name: "legacy.bin".to_string(),
        engine_version: 1,
        location: ContentLocation::Filesystem {
            relative_path: relative,
        },
        created_at: Utc::now(),
        deleted_at: None,
    })
    .unwrap()
}

#[tokio::test]
async fn test_flat_layout_migrates_to_sharded() {
    let (dir, db) = test_db();
    let root = dir.path().join("blobs");
    let manager = FilesystemContentManager::new(db.clone(), BACKBONE_ID, &root).unwrap();
    let node = sample_node(&db, "acme");
    let record = seed_v1_content(&db, &root, &node, b"legacy payload");

    let page = db.contents_behind_version(BACKBONE_ID, 2, 0, 10).unwrap();
    assert_eq!(page.rows.len(), 1);

    let outcome = migrate_row(&manager, &db, &record).await.unwrap();
    assert_eq!(outcome, MigrationOutcome::Migrated { from: 1, to: 2 });

    let migrated = db.get_content(record.id).unwrap().unwrap();
    assert_eq!(migrated.engine_version, 2);
    let ContentLocation::Filesystem { relative_path } = &migrated.location else {
        panic!("filesystem record should carry a filesystem location");
    };
    let expected = format!(
        "acme/{}/{}/{}",
        &node.uuid[0..2],
        &node.uuid[2..4],
        node.uuid
    );
    assert_eq!(relative_path, &expected);

    // Old flat path is gone, the payload survives at the new one
    assert!(!root.join(format!("acme/{}", node.uuid)).exists());
    assert_eq!(&manager.fetch(&migrated).await.unwrap()[..], b"legacy payload");

    // Nothing is left behind the current version
    let page = db.contents_behind_version(BACKBONE_ID, 2, 0, 10).unwrap();
    assert!(page.rows.is_empty());
}

#[tokio::test]
async fn test_migrate_current_row_is_a_noop() {
    let (dir, db) = test_db();
    let manager =
        FilesystemContentManager::new(db.clone(), BACKBONE_ID, dir.path().join("blobs")).unwrap();
    let node = sample_node(&db, "acme");

    let record = manager
        .store(&node, Bytes::from_static(b"fresh"), &meta("notes.txt"))
        .await
        .unwrap();
    let outcome = migrate_row(&manager, &db, &record).await.unwrap();
    assert_eq!(outcome, MigrationOutcome::Current);
}

#[tokio::test]
async fn test_row_without_migration_path_is_reported() {
    let (dir, db) = test_db();
    let root = dir.path().join("blobs");
    let manager = FilesystemContentManager::new(db.clone(), BACKBONE_ID, &root).unwrap();
    let node = sample_node(&db, "acme");

    // Version 0 predates every registered migration
    let mut record = seed_v1_content(&db, &root, &node, b"ancient");
    record.engine_version = 0;
    db.update_content(&record).unwrap();

    let err = migrate_row(&manager, &db, &record).await.unwrap_err();
    assert!(matches!(
        err,
        ContentError::NoMigrationPath { from: 0, to: 2 }
    ));

    // The row is untouched
    let row = db.get_content(record.id).unwrap().unwrap();
    assert_eq!(row.engine_version, 0);
}
