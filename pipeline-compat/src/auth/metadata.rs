//! Tokens from the instance metadata server.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::{AccessTokenProvider, TokenError};

/// Metadata server base URL on Google infrastructure.
pub const DEFAULT_METADATA_ENDPOINT: &str = "http://metadata.google.internal";

const TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN_SECONDS: i64 = 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    refresh_after: DateTime<Utc>,
}

/// Reads the default service account's token from the metadata server.
///
/// The token is cached until shortly before it expires; concurrent callers
/// wait on a single refresh.
#[derive(Debug)]
pub struct MetadataServerTokenProvider {
    endpoint: String,
    client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl MetadataServerTokenProvider {
    /// Creates a provider against the default metadata server.
    pub fn new() -> Result<Self, TokenError> {
        Self::with_endpoint(DEFAULT_METADATA_ENDPOINT)
    }

    /// Creates a provider against `endpoint` (tests, emulators).
    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, TokenError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| TokenError::new(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
            cached: Mutex::new(None),
        })
    }

    async fn fetch(&self) -> Result<CachedToken, TokenError> {
        let url = format!("{}{TOKEN_PATH}", self.endpoint);
        let response = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| TokenError::new(format!("metadata server request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TokenError::new(format!(
                "metadata server returned {status}"
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| TokenError::new(format!("malformed token response: {e}")))?;

        let lifetime = (body.expires_in - EXPIRY_MARGIN_SECONDS).max(0);
        debug!(expires_in = body.expires_in, "Fetched access token from metadata server");

        Ok(CachedToken {
            token: body.access_token,
            refresh_after: Utc::now() + ChronoDuration::seconds(lifetime),
        })
    }
}

#[async_trait]
impl AccessTokenProvider for MetadataServerTokenProvider {
    async fn access_token(&self) -> Result<String, TokenError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Utc::now() < token.refresh_after {
                return Ok(token.token.clone());
            }
        }

        let fresh = self.fetch().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_is_cached() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", TOKEN_PATH)
            .match_header("Metadata-Flavor", "Google")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"tok-1","expires_in":3599,"token_type":"Bearer"}"#)
            .expect(1)
            .create_async()
            .await;

        let provider = MetadataServerTokenProvider::with_endpoint(server.url()).unwrap();
        assert_eq!(provider.access_token().await.unwrap(), "tok-1");
        assert_eq!(provider.access_token().await.unwrap(), "tok-1");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_short_lived_token_is_refetched() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", TOKEN_PATH)
            .with_status(200)
            .with_body(r#"{"access_token":"tok","expires_in":30}"#)
            .expect(2)
            .create_async()
            .await;

        let provider = MetadataServerTokenProvider::with_endpoint(server.url()).unwrap();
        provider.access_token().await.unwrap();
        provider.access_token().await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", TOKEN_PATH)
            .with_status(404)
            .create_async()
            .await;

        let provider = MetadataServerTokenProvider::with_endpoint(server.url()).unwrap();
        let err = provider.access_token().await.unwrap_err();

        assert!(err.message.contains("404"));
    }
}
