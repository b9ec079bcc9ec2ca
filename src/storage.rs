use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::SupabaseSettings;

const ALLOWED_MIME_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "image/gif"];
const FILE_SIZE_LIMIT_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("invalid image payload: {0}")]
    InvalidPayload(String),
}

/// Bucket-and-path object storage with public URLs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Creates `bucket` unless it already exists.
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    /// Writes the image behind `data_url` to `bucket/path`, replacing any
    /// existing object, and returns its public URL.
    async fn upload(
        &self,
        data_url: &str,
        path: &str,
        bucket: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<String, StorageError>;
}

/// Splits a `data:<mime>;base64,<payload>` URL into content type and bytes.
/// Bare base64 is accepted and treated as PNG.
pub fn decode_data_url(data_url: &str) -> Result<(String, Vec<u8>), StorageError> {
    let (content_type, payload) = match data_url.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| StorageError::InvalidPayload("data URL has no payload".into()))?;
            let mime = header.split(';').next().filter(|m| !m.is_empty()).unwrap_or("image/png");
            (mime.to_string(), payload)
        }
        None => ("image/png".to_string(), data_url),
    };
    if payload.trim().is_empty() {
        return Err(StorageError::InvalidPayload("empty image payload".into()));
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| StorageError::InvalidPayload(e.to_string()))?;
    Ok((content_type, bytes))
}

/// Supabase Storage client authenticated with the service role key.
pub struct StorageClient {
    client: Client,
    base_url: String,
    service_key: String,
    known_buckets: Mutex<HashSet<String>>,
}

#[derive(Debug, Deserialize)]
struct BucketInfo {
    name: String,
}

impl StorageClient {
    pub fn new(settings: &SupabaseSettings) -> Self {
        Self {
            client: Client::new(),
            base_url: settings.url.clone(),
            service_key: settings.service_role_key.clone(),
            known_buckets: Mutex::default(),
        }
    }

    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.service_key).header("apikey", &self.service_key)
    }

    async fn list_buckets(&self) -> Result<Vec<String>, StorageError> {
        let response = self
            .authed(self.client.get(format!("{}/storage/v1/bucket", self.base_url)))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            error!("❌ Error listing buckets: {}", message);
            return Err(StorageError::Api { status: status.as_u16(), message });
        }
        let buckets: Vec<BucketInfo> = response.json().await?;
        Ok(buckets.into_iter().map(|b| b.name).collect())
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let body = json!({
            "id": bucket,
            "name": bucket,
            "public": true,
            "file_size_limit": FILE_SIZE_LIMIT_BYTES,
            "allowed_mime_types": ALLOWED_MIME_TYPES,
        });
        let response = self
            .authed(self.client.post(format!("{}/storage/v1/bucket", self.base_url)))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            info!("🪣 Created bucket '{}'", bucket);
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        if status.as_u16() == 409 || message.contains("already exists") || message.contains("Duplicate") {
            debug!("Bucket '{}' was created concurrently", bucket);
            return Ok(());
        }
        Err(StorageError::Api { status: status.as_u16(), message })
    }
}

#[async_trait]
impl ObjectStore for StorageClient {
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        if self.known_buckets.lock().contains(bucket) {
            return Ok(());
        }
        if self.list_buckets().await?.iter().any(|name| name == bucket) {
            debug!("Bucket '{}' already exists.", bucket);
        } else {
            self.create_bucket(bucket).await?;
        }
        self.known_buckets.lock().insert(bucket.to_string());
        Ok(())
    }

    async fn upload(
        &self,
        data_url: &str,
        path: &str,
        bucket: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<String, StorageError> {
        self.ensure_bucket(bucket).await?;
        let (content_type, bytes) = decode_data_url(data_url)?;
        let size = bytes.len();

        let mut request = self
            .authed(self.client.post(format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path)))
            .header("x-upsert", "true")
            .header("cache-control", "max-age=3600")
            .header(reqwest::header::CONTENT_TYPE, content_type);
        if !metadata.is_empty() {
            let encoded = serde_json::to_vec(metadata)
                .map_err(|e| StorageError::InvalidPayload(e.to_string()))?;
            request = request.header("x-metadata", base64::engine::general_purpose::STANDARD.encode(encoded));
        }

        let response = request.body(Bytes::from(bytes)).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            error!("❌ Error uploading {}/{}: {}", bucket, path, message);
            return Err(StorageError::Api { status: status.as_u16(), message });
        }

        let url = self.public_url(bucket, path);
        info!("☁️ Uploaded {} bytes to {}", size, url);
        Ok(url)
    }
}
