use storage_gateway::backbone::{seed_backbones, BackboneRegistry};
use storage_gateway::storage::models::{BackboneConfig, BackendKind};
use storage_gateway::storage::Database;

fn test_db() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data")).unwrap();
    (dir, db)
}

fn write_seed(dir: &std::path::Path) -> String {
    let path = dir.join("backbones.json");
    std::fs::write(
        &path,
        r#"[
            {
                "name": "primary-disk",
                "config": { "kind": "filesystem", "root_dir": "/var/lib/blobs" }
            },
            {
                "name": "archive-s3",
                "enabled": false,
                "config": {
                    "kind": "s3",
                    "endpoint": "https://s3.example.com",
                    "region": "eu-central-1",
                    "bucket": "archive",
                    "access_key": "AK",
                    "secret_key": "SK",
                    "dialect": "minio"
                }
            },
            {
                "name": "scratch-memory",
                "config": { "kind": "memory" }
            }
        ]"#,
    )
    .unwrap();
    path.to_string_lossy().to_string()
}

#[test]
fn test_seed_and_load_registry() {
    let (dir, db) = test_db();
    let seed = write_seed(dir.path());

    let created = seed_backbones(&db, &seed).unwrap();
    assert_eq!(created, 3);

    // Disabled backbones are invisible to the registry
    let registry = BackboneRegistry::load(&db).unwrap();
    assert_eq!(registry.len(), 2);
    assert!(registry.of_kind(BackendKind::S3).is_empty());

    let disks = registry.of_kind(BackendKind::Filesystem);
    assert_eq!(disks.len(), 1);
    assert_eq!(disks[0].name, "primary-disk");
    assert!(matches!(
        &disks[0].config,
        BackboneConfig::Filesystem { root_dir } if root_dir == "/var/lib/blobs"
    ));

    // The disabled row still exists in the store
    let all = db.all_backbones().unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().any(|b| b.name == "archive-s3" && !b.enabled));
}

#[test]
fn test_seed_is_first_boot_only() {
    let (dir, db) = test_db();
    let seed = write_seed(dir.path());

    assert_eq!(seed_backbones(&db, &seed).unwrap(), 3);
    // A populated table is never re-seeded
    assert_eq!(seed_backbones(&db, &seed).unwrap(), 0);
    assert_eq!(db.all_backbones().unwrap().len(), 3);
}

#[test]
fn test_registry_lookup_by_id() {
    let (dir, db) = test_db();
    let seed = write_seed(dir.path());
    seed_backbones(&db, &seed).unwrap();

    let registry = BackboneRegistry::load(&db).unwrap();
    let memory = registry
        .of_kind(BackendKind::Memory)
        .into_iter()
        .next()
        .expect("memory backbone loaded");
    let by_id = registry.get(memory.id).expect("id lookup resolves");
    assert_eq!(by_id.name, "scratch-memory");
    assert!(registry.get(9999).is_none());
}
