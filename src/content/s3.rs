use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use chrono::Utc;
use reqwest::Client;
use ring::{digest, hmac};

use super::{ContentError, ContentManager, Migration, S3Dialect, StoreMeta};
use crate::checksum;
use crate::storage::contents::ContentPage;
use crate::storage::models::{
    BackboneConfig, BackboneRecord, BackendKind, ContentLocation, ContentRecord, ContentStatus,
    StorageNode,
};
use crate::storage::Database;

const ENGINE_VERSION: u32 = 1;

/// Object-storage content manager. Upload strategy (buffered PUT vs. S3
/// multipart) and delete strategy (batched vs. per-object) come from the
/// backbone's dialect, not from conditionals here.
pub struct S3ContentManager {
    db: Database,
    backbone_id: u64,
    client: S3Client,
    dialect: Arc<dyn S3Dialect>,
    migrations: Vec<Arc<dyn Migration>>,
}

impl S3ContentManager {
    pub fn new(
        db: Database,
        backbone: &BackboneRecord,
        dialect: Arc<dyn S3Dialect>,
    ) -> Result<Self, anyhow::Error> {
        let BackboneConfig::S3 {
            endpoint,
            region,
            bucket,
            access_key,
            secret_key,
            ..
        } = &backbone.config
        else {
            anyhow::bail!("backbone '{}' is not an S3 backbone", backbone.name);
        };

        let client = S3Client::new(
            endpoint,
            region,
            bucket,
            access_key,
            secret_key,
            Arc::clone(&dialect),
        )?;

        Ok(Self {
            db,
            backbone_id: backbone.id,
            client,
            dialect,
            migrations: Vec::new(),
        })
    }

    fn object_key<'a>(&self, content: &'a ContentRecord) -> Result<&'a str, ContentError> {
        match &content.location {
            ContentLocation::S3 { key, .. } => Ok(key),
            _ => Err(ContentError::Backend(format!(
                "content {} has a non-S3 location",
                content.id
            ))),
        }
    }
}

#[async_trait]
impl ContentManager for S3ContentManager {
    fn backend(&self) -> BackendKind {
        BackendKind::S3
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
        ContentLocation::S3 {
            key: format!("{}/{}", tenant_id, node.uuid),
            remote_id: None,
        }
    }

    async fn store(
        &self,
        node: &StorageNode,
        payload: Bytes,
        meta: &StoreMeta,
    ) -> Result<ContentRecord, ContentError> {
        let mut location = self.compute_storage_path(&node.tenant_id, node, None);
        let key = match &location {
            ContentLocation::S3 { key, .. } => key.clone(),
            _ => unreachable!("s3 manager computes s3 locations"),
        };

        let remote_id = if (payload.len() as u64) < self.dialect.multipart_threshold() {
            self.client.put_object(&key, payload.clone()).await?;
            None
        } else {
            Some(self.client.multipart_upload(&key, &payload).await?)
        };
        if let ContentLocation::S3 {
            remote_id: slot, ..
        } = &mut location
        {
            *slot = remote_id;
        }

        let digests = checksum::digest_all(&payload);
        let record = ContentRecord {
            id: 0,
            uuid: uuid::Uuid::new_v4().to_string(),
            node_id: node.id,
            backbone_id: self.backbone_id,
            backend: BackendKind::S3,
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
        let key = self.object_key(content)?;
        self.client.get_object(key).await
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
        let key = self.object_key(content)?;
        self.client.delete_object(key).await
    }

    async fn delete_physical_many(
        &self,
        contents: &[ContentRecord],
    ) -> Vec<(u64, Result<(), ContentError>)> {
        if !self.dialect.supports_batch_delete() {
            let mut outcomes = Vec::with_capacity(contents.len());
            for content in contents {
                outcomes.push((content.id, self.delete_physical(content).await));
            }
            return outcomes;
        }

        let mut keyed = Vec::with_capacity(contents.len());
        for content in contents {
            match self.object_key(content) {
                Ok(key) => keyed.push((content.id, key.to_string())),
                Err(e) => return vec![(content.id, Err(e))],
            }
        }

        let keys: Vec<&str> = keyed.iter().map(|(_, k)| k.as_str()).collect();
        match self.client.batch_delete(&keys).await {
            Ok(()) => keyed.into_iter().map(|(id, _)| (id, Ok(()))).collect(),
            Err(e) => {
                // One error result per row so the sweep can report each
                let message = e.to_string();
                keyed
                    .into_iter()
                    .map(|(id, _)| (id, Err(ContentError::Backend(message.clone()))))
                    .collect()
            }
        }
    }

    fn migrations(&self) -> &[Arc<dyn Migration>] {
        &self.migrations
    }
}

// ============================================================================
// Minimal SigV4 S3 client
// ============================================================================

struct S3Client {
    http: Client,
    scheme: String,
    host: String,
    region: String,
    bucket: String,
    access_key: String,
    secret_key: String,
    dialect: Arc<dyn S3Dialect>,
}

impl S3Client {
    fn new(
        endpoint: &str,
        region: &str,
        bucket: &str,
        access_key: &str,
        secret_key: &str,
        dialect: Arc<dyn S3Dialect>,
    ) -> Result<Self, anyhow::Error> {
        let (scheme, host) = match endpoint.split_once("://") {
            Some((scheme, host)) => (scheme.to_string(), host.to_string()),
            None => ("https".to_string(), endpoint.to_string()),
        };

        Ok(Self {
            http: Client::builder().build()?,
            scheme,
            host,
            region: region.to_string(),
            bucket: bucket.to_string(),
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            dialect,
        })
    }

    /// Request host and URI path for a key, per the dialect's addressing style.
    fn address(&self, key: &str) -> (String, String) {
        if self.dialect.use_path_style() {
            (
                self.host.clone(),
                format!("/{}/{}", self.bucket, uri_encode(key, false)),
            )
        } else {
            (
                format!("{}.{}", self.bucket, self.host),
                format!("/{}", uri_encode(key, false)),
            )
        }
    }

    async fn put_object(&self, key: &str, body: Bytes) -> Result<(), ContentError> {
        let resp = self.send("PUT", key, "", body).await?;
        expect_success(resp, "put").await?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, ContentError> {
        let resp = self.send("GET", key, "", Bytes::new()).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ContentError::NotFound(key.to_string()));
        }
        let resp = expect_success(resp, "get").await?;
        resp.bytes()
            .await
            .map_err(|e| ContentError::Backend(e.to_string()))
    }

    async fn delete_object(&self, key: &str) -> Result<(), ContentError> {
        let resp = self.send("DELETE", key, "", Bytes::new()).await?;
        // 404 is fine -- object already gone
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        expect_success(resp, "delete").await?;
        Ok(())
    }

    /// `POST /?delete` with quiet mode; the whole batch succeeds or fails.
    async fn batch_delete(&self, keys: &[&str]) -> Result<(), ContentError> {
        let mut body = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Delete><Quiet>true</Quiet>"#);
        for key in keys {
            body.push_str("<Object><Key>");
            body.push_str(&xml_escape(key));
            body.push_str("</Key></Object>");
        }
        body.push_str("</Delete>");

        let content_md5 =
            base64::engine::general_purpose::STANDARD.encode(md5::compute(body.as_bytes()).0);
        let resp = self
            .send_with_headers(
                "POST",
                "",
                "delete=",
                Bytes::from(body),
                &[("content-md5", content_md5.as_str())],
            )
            .await?;
        expect_success(resp, "batch delete").await?;
        Ok(())
    }

    async fn multipart_upload(&self, key: &str, payload: &Bytes) -> Result<String, ContentError> {
        let resp = self
            .send("POST", key, "uploads=", Bytes::new())
            .await?;
        let resp = expect_success(resp, "initiate multipart").await?;
        let body = resp
            .text()
            .await
            .map_err(|e| ContentError::Backend(e.to_string()))?;
        let upload_id = extract_xml_tag(&body, "UploadId").ok_or_else(|| {
            ContentError::Backend("initiate multipart response had no UploadId".to_string())
        })?;

        let part_size = self.dialect.multipart_part_size() as usize;
        let mut etags = Vec::new();
        for (index, chunk) in payload.chunks(part_size).enumerate() {
            let part_number = index + 1;
            let query = format!("partNumber={part_number}&uploadId={}", uri_encode(&upload_id, true));
            let resp = self
                .send("PUT", key, &query, payload.slice_ref(chunk))
                .await?;
            let resp = expect_success(resp, "upload part").await?;
            let etag = resp
                .headers()
                .get("etag")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
                .ok_or_else(|| ContentError::Backend("upload part response had no ETag".to_string()))?;
            etags.push((part_number, etag));
        }

        let mut complete = String::from("<CompleteMultipartUpload>");
        for (part_number, etag) in &etags {
            complete.push_str(&format!(
                "<Part><PartNumber>{part_number}</PartNumber><ETag>{}</ETag></Part>",
                xml_escape(etag)
            ));
        }
        complete.push_str("</CompleteMultipartUpload>");

        let query = format!("uploadId={}", uri_encode(&upload_id, true));
        let resp = self
            .send("POST", key, &query, Bytes::from(complete))
            .await?;
        expect_success(resp, "complete multipart").await?;
        Ok(upload_id)
    }

    async fn send(
        &self,
        method: &str,
        key: &str,
        query: &str,
        body: Bytes,
    ) -> Result<reqwest::Response, ContentError> {
        self.send_with_headers(method, key, query, body, &[]).await
    }

    async fn send_with_headers(
        &self,
        method: &str,
        key: &str,
        query: &str,
        body: Bytes,
        extra_headers: &[(&str, &str)],
    ) -> Result<reqwest::Response, ContentError> {
        let (host, uri) = self.address(key);
        let now = Utc::now() + self.dialect.clock_skew();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let payload_hash = hex::encode(digest::digest(&digest::SHA256, &body));

        let mut headers: Vec<(String, String)> = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        for (name, value) in extra_headers {
            headers.push((name.to_string(), value.to_string()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let authorization = self.sign(method, &uri, query, &headers, &payload_hash, &date);

        let url = if query.is_empty() {
            format!("{}://{}{}", self.scheme, host, uri)
        } else {
            format!("{}://{}{}?{}", self.scheme, host, uri, query)
        };

        let mut request = self
            .http
            .request(
                method.parse().map_err(|_| {
                    ContentError::Backend(format!("invalid HTTP method '{method}'"))
                })?,
                &url,
            )
            .header("authorization", authorization)
            .body(body);
        for (name, value) in &headers {
            if name != "host" {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        request
            .send()
            .await
            .map_err(|e| ContentError::Backend(e.to_string()))
    }

    /// AWS Signature V4: canonical request, string to sign, derived signing
    /// key, final Authorization header.
    fn sign(
        &self,
        method: &str,
        uri: &str,
        query: &str,
        headers: &[(String, String)],
        payload_hash: &str,
        date: &str,
    ) -> String {
        let canonical_query = canonical_query_string(query);
        let mut canonical_headers = String::new();
        let mut signed_header_names = Vec::new();
        for (name, value) in headers {
            canonical_headers.push_str(name);
            canonical_headers.push(':');
            canonical_headers.push_str(value.trim());
            canonical_headers.push('\n');
            signed_header_names.push(name.as_str());
        }
        let signed_headers = signed_header_names.join(";");

        let canonical_request = format!(
            "{method}\n{uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
        );

        let amz_date = headers
            .iter()
            .find(|(name, _)| name == "x-amz-date")
            .map(|(_, value)| value.as_str())
            .unwrap_or_default();
        let scope = format!("{date}/{}/s3/aws4_request", self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex::encode(digest::digest(&digest::SHA256, canonical_request.as_bytes()))
        );

        let k_date = hmac_sha256(format!("AWS4{}", self.secret_key).as_bytes(), date.as_bytes());
        let k_region = hmac_sha256(k_date.as_ref(), self.region.as_bytes());
        let k_service = hmac_sha256(k_region.as_ref(), b"s3");
        let k_signing = hmac_sha256(k_service.as_ref(), b"aws4_request");
        let signature = hex::encode(hmac_sha256(k_signing.as_ref(), string_to_sign.as_bytes()));

        format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.access_key
        )
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> hmac::Tag {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data)
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
        "S3 {operation} failed ({status}): {body}"
    )))
}

/// Sort query parameters by name, then value, keeping them encoded.
fn canonical_query_string(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }
    let mut pairs: Vec<(&str, &str)> = query
        .split('&')
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encode per SigV4 rules: unreserved characters stay, everything
/// else becomes %XX. Slashes survive in object paths only.
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn extract_xml_tag(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_query_sorts_pairs() {
        assert_eq!(
            canonical_query_string("uploadId=abc&partNumber=2"),
            "partNumber=2&uploadId=abc"
        );
        assert_eq!(canonical_query_string("uploads="), "uploads=");
        assert_eq!(canonical_query_string(""), "");
    }

    #[test]
    fn uri_encode_preserves_object_paths() {
        assert_eq!(uri_encode("tenant-a/file name", false), "tenant-a/file%20name");
        assert_eq!(uri_encode("a/b", true), "a%2Fb");
    }

    #[test]
    fn extracts_upload_id() {
        let body = "<InitiateMultipartUploadResult><UploadId>xyz-123</UploadId></InitiateMultipartUploadResult>";
        assert_eq!(extract_xml_tag(body, "UploadId").as_deref(), Some("xyz-123"));
        assert_eq!(extract_xml_tag(body, "Missing"), None);
    }
}
