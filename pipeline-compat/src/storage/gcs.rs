//! Google Cloud Storage blob store over the JSON API.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::blob::{blob_name, BlobStore};
use super::BucketResolver;
use crate::auth::AccessTokenProvider;
use crate::config::StorageConfig;
use crate::errors::{ConfigurationError, Result, StorageError};

/// Object names are a single path segment in the JSON API.
const OBJECT_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~');

/// Blob store backed by the default bucket.
pub struct GcsBlobStore {
    config: StorageConfig,
    bucket: Arc<BucketResolver>,
    tokens: Arc<dyn AccessTokenProvider>,
    client: reqwest::Client,
}

impl fmt::Debug for GcsBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcsBlobStore")
            .field("config", &self.config)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl GcsBlobStore {
    /// Creates a store writing into the bucket `bucket` resolves to.
    ///
    /// # Errors
    ///
    /// `CompatError::Configuration` if the HTTP client cannot be built.
    pub fn new(
        config: StorageConfig,
        bucket: Arc<BucketResolver>,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().build().map_err(|e| {
            ConfigurationError::invalid("http_client", format!("failed to build: {e}"))
        })?;

        Ok(Self {
            config,
            bucket,
            tokens,
            client,
        })
    }

    fn endpoint(&self) -> &str {
        self.config.api_endpoint.trim_end_matches('/')
    }

    async fn upload_once(&self, bucket: &str, name: &str, encoded: &str) -> Result<(), StorageError> {
        let token = self.tokens.access_token().await?;
        let url = format!("{}/upload/storage/v1/b/{bucket}/o", self.endpoint());

        let response = self
            .client
            .post(&url)
            .query(&[("uploadType", "media"), ("name", name)])
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(encoded.to_string())
            .send()
            .await
            .map_err(|e| StorageError::Request {
                status: 0,
                message: format!("upload failed: {e}"),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(StorageError::Request {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    async fn write_json(&self, encoded: &str, pipeline_id: Option<&str>) -> Result<String> {
        let bucket = self.bucket.default_bucket()?.clone();
        let name = blob_name(pipeline_id);
        let attempts = self.config.max_upload_attempts.max(1);

        let mut attempt = 0;
        loop {
            match self.upload_once(bucket.as_str(), &name, encoded).await {
                Ok(()) => break,
                Err(StorageError::Request { status: 429, .. }) if attempt + 1 < attempts => {
                    let delay = self.config.retry_delay(attempt);
                    warn!(
                        blob = %name,
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Blob upload throttled, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }

        debug!(blob = %name, bucket = %bucket, "Created blob");
        Ok(name)
    }

    async fn read_blob(&self, name: &str) -> Result<Vec<u8>> {
        let bucket = self.bucket.default_bucket()?;
        let token = self.tokens.access_token().await.map_err(StorageError::from)?;
        let url = format!(
            "{}/storage/v1/b/{bucket}/o/{}",
            self.endpoint(),
            utf8_percent_encode(name, OBJECT_SEGMENT)
        );

        let response = self
            .client
            .get(&url)
            .query(&[("alt", "media")])
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| StorageError::Request {
                status: 0,
                message: format!("download failed: {e}"),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                name: name.to_string(),
            }
            .into());
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StorageError::Request {
                status: status.as_u16(),
                message,
            }
            .into());
        }

        let bytes = response.bytes().await.map_err(|e| StorageError::Request {
            status: 0,
            message: format!("download failed: {e}"),
        })?;
        Ok(bytes.to_vec())
    }
}
