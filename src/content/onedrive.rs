use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;

use super::{ContentError, ContentManager, Migration, StoreMeta};
use crate::checksum;
use crate::storage::contents::ContentPage;
use crate::storage::models::{
    BackboneConfig, BackboneRecord, BackendKind, ContentLocation, ContentRecord, ContentStatus,
    StorageNode,
};
use crate::storage::Database;

const ENGINE_VERSION: u32 = 1;

/// Graph's simple-upload ceiling; larger payloads go through an upload session.
const SIMPLE_UPLOAD_LIMIT: usize = 4 * 1024 * 1024;

/// Chunk size for upload sessions, a multiple of 320 KiB as the API requires.
const SESSION_CHUNK_SIZE: usize = 10 * 320 * 1024;

/// Cloud-drive content manager over a Graph-style drive API.
pub struct OnedriveContentManager {
    db: Database,
    backbone_id: u64,
    client: DriveClient,
    root_path: String,
    migrations: Vec<Arc<dyn Migration>>,
}

impl OnedriveContentManager {
    pub fn new(db: Database, backbone: &BackboneRecord) -> Result<Self, anyhow::Error> {
        let BackboneConfig::Onedrive {
            api_base,
            drive_id,
            root_path,
            access_token,
        } = &backbone.config
        else {
            anyhow::bail!("backbone '{}' is not a cloud-drive backbone", backbone.name);
        };

        Ok(Self {
            db,
            backbone_id: backbone.id,
            client: DriveClient::new(api_base, drive_id, access_token)?,
            root_path: root_path.trim_matches('/').to_string(),
            migrations: Vec::new(),
        })
    }

    pub(crate) fn client(&self) -> &DriveClient {
        &self.client
    }

    pub(crate) fn root_path(&self) -> &str {
        &self.root_path
    }
}

#[async_trait]
impl ContentManager for OnedriveContentManager {
    fn backend(&self) -> BackendKind {
        BackendKind::Onedrive
    }

    fn backbone_id(&self) -> u64 {
        self.backbone_id
    }

    fn engine_version(&self) -> u32 {
        ENGINE_VERSION
    }

    fn compute_storage_path(
        &self,
        tenant_id: &str,
        node: &StorageNode,
        _existing: Option<&ContentRecord>,
    ) -> ContentLocation {
        ContentLocation::Onedrive {
            item_id: String::new(),
            item_path: format!("{}/{}/{}", self.root_path, tenant_id, node.uuid),
        }
    }

    async fn store(
        &self,
        node: &StorageNode,
        payload: Bytes,
        meta: &StoreMeta,
    ) -> Result<ContentRecord, ContentError> {
        let mut location = self.compute_storage_path(&node.tenant_id, node, None);
        let ContentLocation::Onedrive { item_path, .. } = &location else {
            unreachable!("cloud-drive manager computes cloud-drive locations");
        };
        let item_path = item_path.clone();

        let item = if payload.len() <= SIMPLE_UPLOAD_LIMIT {
            self.client.upload_small(&item_path, payload.clone()).await?
        } else {
            self.client.upload_large(&item_path, &payload).await?
        };
        if let ContentLocation::Onedrive { item_id, .. } = &mut location {
            *item_id = item.id;
        }

        let digests = checksum::digest_all(&payload);
        let record = ContentRecord {
            id: 0,
            uuid: uuid::Uuid::new_v4().to_string(),
            node_id: node.id,
            backbone_id: self.backbone_id,
            backend: BackendKind::Onedrive,
            status: ContentStatus::Active,
            size: payload.len() as u64,
            md5: digests.md5,
            sha1: digests.sha1,
            sha256: digests.sha256,
            mime_type: meta.resolve_mime(),
            original_name: meta.original_name.clone(),
            engine_version: ENGINE_VERSION,
            location,
            created_at: Utc::now(),
            deleted_at: None,
        };
        Ok(self.db.create_content(&record)?)
    }

    async fn fetch(&self, content: &ContentRecord) -> Result<Bytes, ContentError> {
        let ContentLocation::Onedrive { item_id, .. } = &content.location else {
            return Err(ContentError::Backend(format!(
                "content {} has a non-cloud-drive location",
                content.id
            )));
        };
        self.client.download(item_id).await
    }

    fn logical_delete(&self, content_id: u64) -> Result<bool, ContentError> {
        Ok(self.db.mark_content_deleted(content_id, Utc::now())?)
    }

    fn queued_for_deletion(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
        after_id: u64,
        limit: usize,
    ) -> Result<ContentPage, ContentError> {
        Ok(self
            .db
            .contents_queued_for_deletion(self.backbone_id, cutoff, after_id, limit)?)
    }

    async fn delete_physical(&self, content: &ContentRecord) -> Result<(), ContentError> {
        let ContentLocation::Onedrive { item_id, .. } = &content.location else {
            return Err(ContentError::Backend(format!(
                "content {} has a non-cloud-drive location",
                content.id
            )));
        };
        self.client.delete_item(item_id).await
    }

    fn migrations(&self) -> &[Arc<dyn Migration>] {
        &self.migrations
    }
}

// ============================================================================
// Drive API client
// ============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct DriveItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub folder: Option<serde_json::Value>,
}

impl DriveItem {
    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct ChildrenResponse {
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadSessionResponse {
    #[serde(rename = "uploadUrl")]
    upload_url: String,
}

pub(crate) struct DriveClient {
    http: Client,
    api_base: String,
    drive_id: String,
    access_token: String,
}

impl DriveClient {
    fn new(api_base: &str, drive_id: &str, access_token: &str) -> Result<Self, anyhow::Error> {
        Ok(Self {
            http: Client::builder().build()?,
            api_base: api_base.trim_end_matches('/').to_string(),
            drive_id: drive_id.to_string(),
            access_token: access_token.to_string(),
        })
    }

    fn path_url(&self, item_path: &str, suffix: &str) -> String {
        format!(
            "{}/drives/{}/root:/{}:{}",
            self.api_base, self.drive_id, item_path, suffix
        )
    }

    fn item_url(&self, item_id: &str, suffix: &str) -> String {
        format!(
            "{}/drives/{}/items/{}{}",
            self.api_base, self.drive_id, item_id, suffix
        )
    }

    async fn upload_small(&self, item_path: &str, body: Bytes) -> Result<DriveItem, ContentError> {
        let resp = self
            .http
            .put(self.path_url(item_path, "/content"))
            .bearer_auth(&self.access_token)
            .header("Content-Type", "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| ContentError::Backend(e.to_string()))?;
        let resp = expect_success(resp, "upload").await?;
        resp.json()
            .await
            .map_err(|e| ContentError::Backend(e.to_string()))
    }

    async fn upload_large(&self, item_path: &str, payload: &Bytes) -> Result<DriveItem, ContentError> {
        let resp = self
            .http
            .post(self.path_url(item_path, "/createUploadSession"))
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({
                "item": { "@microsoft.graph.conflictBehavior": "replace" }
            }))
            .send()
            .await
            .map_err(|e| ContentError::Backend(e.to_string()))?;
        let resp = expect_success(resp, "create upload session").await?;
        let session: UploadSessionResponse = resp
            .json()
            .await
            .map_err(|e| ContentError::Backend(e.to_string()))?;

        let total = payload.len();
        let mut item: Option<DriveItem> = None;
        for (index, chunk) in payload.chunks(SESSION_CHUNK_SIZE).enumerate() {
            let start = index * SESSION_CHUNK_SIZE;
            let end = start + chunk.len() - 1;
            let resp = self
                .http
                .put(&session.upload_url)
                .header("Content-Range", format!("bytes {start}-{end}/{total}"))
                .body(payload.slice_ref(chunk))
                .send()
                .await
                .map_err(|e| ContentError::Backend(e.to_string()))?;
            let resp = expect_success(resp, "upload chunk").await?;
            // The final chunk's response carries the created item
            if end + 1 == total {
                item = Some(
                    resp.json()
                        .await
                        .map_err(|e| ContentError::Backend(e.to_string()))?,
                );
            }
        }

        item.ok_or_else(|| ContentError::Backend("upload session produced no item".to_string()))
    }

    async fn download(&self, item_id: &str) -> Result<Bytes, ContentError> {
        let resp = self
            .http
            .get(self.item_url(item_id, "/content"))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ContentError::Backend(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ContentError::NotFound(item_id.to_string()));
        }
        let resp = expect_success(resp, "download").await?;
        resp.bytes()
            .await
            .map_err(|e| ContentError::Backend(e.to_string()))
    }

    pub(crate) async fn delete_item(&self, item_id: &str) -> Result<(), ContentError> {
        let resp = self
            .http
            .delete(self.item_url(item_id, ""))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ContentError::Backend(e.to_string()))?;
        // 404 is fine -- item already gone
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        expect_success(resp, "delete").await?;
        Ok(())
    }

    /// Resolve a folder path to its item, or None when it does not exist.
    pub(crate) async fn find_by_path(
        &self,
        item_path: &str,
    ) -> Result<Option<DriveItem>, ContentError> {
        let resp = self
            .http
            .get(self.path_url(item_path, ""))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ContentError::Backend(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = expect_success(resp, "resolve path").await?;
        Ok(Some(resp.json().await.map_err(|e| {
            ContentError::Backend(e.to_string())
        })?))
    }

    /// All children of a folder, following `@odata.nextLink` pagination.
    pub(crate) async fn list_children(&self, item_id: &str) -> Result<Vec<DriveItem>, ContentError> {
        let mut url = self.item_url(item_id, "/children");
        let mut children = Vec::new();
        loop {
            let resp = self
                .http
                .get(&url)
                .bearer_auth(&self.access_token)
                .send()
                .await
                .map_err(|e| ContentError::Backend(e.to_string()))?;
            let resp = expect_success(resp, "list children").await?;
            let page: ChildrenResponse = resp
                .json()
                .await
                .map_err(|e| ContentError::Backend(e.to_string()))?;
            children.extend(page.value);
            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }
        Ok(children)
    }
}

async fn expect_success(
    resp: reqwest::Response,
    operation: &str,
) -> Result<reqwest::Response, ContentError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(ContentError::Backend(format!(
        "drive {operation} failed ({status}): {body}"
    )))
}
