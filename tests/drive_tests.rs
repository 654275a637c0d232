use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use storage_gateway::content::{DriveCleanup, OnedriveContentManager};
use storage_gateway::storage::models::{
    BackboneConfig, BackboneRecord, BackendKind, ContentLocation, ContentRecord, ContentStatus,
};
use storage_gateway::storage::Database;

const BACKBONE_ID: u64 = 7;

/// Minimal scripted HTTP server: one canned response per (method, path),
/// unknown routes answer 404. Each connection serves one request.
async fn scripted_server(routes: HashMap<(String, String), (u16, String)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes = Arc::new(routes);

    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let routes = Arc::clone(&routes);
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    let n = match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    head.extend_from_slice(&buf[..n]);
                    if head.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let request = String::from_utf8_lossy(&head);
                let mut line = request.split_whitespace();
                let method = line.next().unwrap_or_default().to_string();
                let path = line.next().unwrap_or_default().to_string();

                let (status, body) = match routes.get(&(method, path)) {
                    Some((status, body)) => (*status, body.clone()),
                    None => (404, String::new()),
                };
                let reason = match status {
                    200 => "OK",
                    204 => "No Content",
                    404 => "Not Found",
                    _ => "Internal Server Error",
                };
                let response = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{addr}")
}

fn route(method: &str, path: &str, status: u16, body: &str) -> ((String, String), (u16, String)) {
    (
        (method.to_string(), path.to_string()),
        (status, body.to_string()),
    )
}

fn referenced_content(db: &Database, item_id: &str) -> ContentRecord {
    db.create_content(&ContentRecord {
        id: 0,
        uuid: uuid::Uuid::new_v4().to_string(),
        node_id: 1,
        backbone_id: BACKBONE_ID,
        backend: BackendKind::Onedrive,
        status: ContentStatus::Active,
        size: 5,
        md5: String::new(),
        sha1: String::new(),
        sha256: String::new(),
        mime_type: "application/octet-stream".to_string(),
        original_name: "kept.bin".to_string(),
        engine_version: 1,
        location: ContentLocation::Onedrive {
            item_id: item_id.to_string(),
            item_path: "files/acme/kept.bin".to_string(),
        },
        created_at: Utc::now(),
        deleted_at: None,
    })
    .unwrap()
}

fn drive_manager(db: &Database, api_base: &str) -> OnedriveContentManager {
    let backbone = BackboneRecord {
        id: BACKBONE_ID,
        name: "test-drive".to_string(),
        kind: BackendKind::Onedrive,
        enabled: true,
        config: BackboneConfig::Onedrive {
            api_base: api_base.to_string(),
            drive_id: "d".to_string(),
            root_path: "files".to_string(),
            access_token: "token".to_string(),
        },
    };
    OnedriveContentManager::new(db.clone(), &backbone).unwrap()
}

#[tokio::test]
async fn test_reconciliation_continues_past_failed_deletes() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data")).unwrap();
    referenced_content(&db, "keep1");

    // Three remote files: one referenced locally, two orphans. The first
    // orphan's delete fails server-side; the second must still be removed.
    let routes: HashMap<_, _> = [
        route(
            "GET",
            "/drives/d/root:/files:",
            200,
            r#"{"id":"root1","name":"files","folder":{}}"#,
        ),
        route(
            "GET",
            "/drives/d/items/root1/children",
            200,
            r#"{"value":[
                {"id":"keep1","name":"kept.bin"},
                {"id":"orphan1","name":"left-behind.bin"},
                {"id":"orphan2","name":"also-left.bin"}
            ]}"#,
        ),
        route("DELETE", "/drives/d/items/orphan1", 500, r#"{"error":"busy"}"#),
        route("DELETE", "/drives/d/items/orphan2", 204, ""),
    ]
    .into_iter()
    .collect();
    let base = scripted_server(routes).await;

    let manager = drive_manager(&db, &base);
    let cleanup = DriveCleanup::new(&manager, db.clone(), false);
    let stats = cleanup.run().await.unwrap();

    assert_eq!(stats.folders_walked, 1);
    assert_eq!(stats.files_seen, 3);
    assert_eq!(stats.orphans_found, 2);
    assert_eq!(stats.orphans_deleted, 1);
    assert_eq!(stats.delete_failures, 1);
}

#[tokio::test]
async fn test_reconciliation_preview_deletes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data")).unwrap();

    // No DELETE routes are scripted; preview must not attempt any
    let routes: HashMap<_, _> = [
        route(
            "GET",
            "/drives/d/root:/files:",
            200,
            r#"{"id":"root1","name":"files","folder":{}}"#,
        ),
        route(
            "GET",
            "/drives/d/items/root1/children",
            200,
            r#"{"value":[{"id":"orphan1","name":"left-behind.bin"}]}"#,
        ),
    ]
    .into_iter()
    .collect();
    let base = scripted_server(routes).await;

    let manager = drive_manager(&db, &base);
    let cleanup = DriveCleanup::new(&manager, db.clone(), true);
    let stats = cleanup.run().await.unwrap();

    assert_eq!(stats.orphans_found, 1);
    assert_eq!(stats.orphans_deleted, 0);
    assert_eq!(stats.delete_failures, 0);
}
