//! Bearer tokens for outbound Google API calls.
//!
//! Backends take an `Arc<dyn AccessTokenProvider>` so that tests and
//! emulators can supply a fixed token while deployments read one from the
//! metadata server.

#[cfg(feature = "gcp")]
mod metadata;

use async_trait::async_trait;
use thiserror::Error;

use crate::errors::{CompatError, DispatchError, StorageError};

#[cfg(feature = "gcp")]
pub use metadata::{MetadataServerTokenProvider, DEFAULT_METADATA_ENDPOINT};

/// A token could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to obtain access token: {message}")]
pub struct TokenError {
    /// Failure description.
    pub message: String,
}

impl TokenError {
    /// Creates a token error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<TokenError> for DispatchError {
    fn from(err: TokenError) -> Self {
        Self::unavailable(err.to_string())
    }
}

impl From<TokenError> for StorageError {
    fn from(err: TokenError) -> Self {
        Self::Request {
            status: 0,
            message: err.to_string(),
        }
    }
}

impl From<TokenError> for CompatError {
    fn from(err: TokenError) -> Self {
        Self::Dispatch(err.into())
    }
}

/// Source of OAuth2 bearer tokens.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// Returns a token valid for at least the next request.
    async fn access_token(&self) -> Result<String, TokenError>;
}

/// Returns the same token forever.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Creates a provider for `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, TokenError> {
        if self.token.is_empty() {
            return Err(TokenError::new("static token is empty"));
        }
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_provider() {
        let provider = StaticTokenProvider::new("abc");
        let token = tokio_test::assert_ok!(tokio_test::block_on(provider.access_token()));
        assert_eq!(token, "abc");

        let empty = StaticTokenProvider::new("");
        tokio_test::assert_err!(tokio_test::block_on(empty.access_token()));
    }

    #[test]
    fn test_token_error_is_retryable() {
        let err: CompatError = TokenError::new("metadata server unreachable").into();
        assert!(err.is_retryable());

        let storage: StorageError = TokenError::new("x").into();
        assert!(storage.is_retryable());
    }
}
