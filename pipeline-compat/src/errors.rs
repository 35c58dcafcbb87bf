//! Error types for the compatibility shims.
//!
//! The taxonomy mirrors how callers are expected to react:
//!
//! - [`ValidationError`]: malformed input, never retryable, raised before any
//!   remote effect.
//! - [`DispatchError`]: the task backend failed; carries a `retryable` flag.
//! - [`ConfigurationError`]: a required environment value is missing; fatal.
//! - [`IdentityError`]: identity headers were present but unparseable.
//!   A request with no identity headers is *not* an error.
//! - [`StorageError`]: blob store failures.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = CompatError> = std::result::Result<T, E>;

/// The main error type for shim operations.
#[derive(Debug, Clone, Error)]
pub enum CompatError {
    /// Input was rejected before any remote call.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// The task backend failed.
    #[error("{0}")]
    Dispatch(#[from] DispatchError),

    /// Required configuration is missing.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// Identity headers could not be parsed.
    #[error("{0}")]
    Identity(#[from] IdentityError),

    /// Blob storage failed.
    #[error("{0}")]
    Storage(#[from] StorageError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CompatError {
    /// Returns true if the caller may retry the operation unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Dispatch(err) => err.retryable,
            Self::Storage(err) => err.is_retryable(),
            Self::Validation(_)
            | Self::Configuration(_)
            | Self::Identity(_)
            | Self::Serialization(_) => false,
        }
    }

    /// Returns a stable kind string for logs and bindings.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Dispatch(_) => "DispatchError",
            Self::Configuration(_) => "ConfigurationError",
            Self::Identity(_) => "IdentityError",
            Self::Storage(_) => "StorageError",
            Self::Serialization(_) => "SerializationError",
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map.insert("retryable".to_string(), serde_json::json!(self.is_retryable()));
        if let Self::Validation(err) = self {
            map.insert("field".to_string(), serde_json::json!(err.field));
        }
        if let Self::Dispatch(DispatchError {
            status: Some(status),
            ..
        }) = self
        {
            map.insert("status".to_string(), serde_json::json!(status));
        }
        map
    }
}

impl From<serde_json::Error> for CompatError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// A task descriptor or queue name failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Invalid {field}: {message}")]
pub struct ValidationError {
    /// The offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an error for a required field that was not supplied.
    #[must_use]
    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, "value is required")
    }
}

/// The remote task service failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Task dispatch failed: {message}")]
pub struct DispatchError {
    /// Description of the failure.
    pub message: String,
    /// HTTP status returned by the backend, if one was received.
    pub status: Option<u16>,
    /// Whether resubmitting the same task may succeed.
    pub retryable: bool,
}

impl DispatchError {
    /// Creates a retryable dispatch error (transport failure, 5xx, throttling).
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            retryable: true,
        }
    }

    /// Creates a dispatch error that resubmitting will not fix.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            retryable: false,
        }
    }

    /// Classifies an HTTP error status from the backend.
    ///
    /// 408, 429 and 5xx are retryable; every other status is not.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
            retryable: status == 408 || status == 429 || status >= 500,
        }
    }
}

/// A required configuration value is missing or invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// None of the listed environment variables is set.
    #[error("Missing configuration: set one of {}", variables.join(", "))]
    Missing {
        /// The variables that would satisfy the requirement.
        variables: Vec<String>,
    },

    /// A value is present but unusable.
    #[error("Invalid configuration for {key}: {message}")]
    Invalid {
        /// The configuration key.
        key: String,
        /// What is wrong with it.
        message: String,
    },
}

impl ConfigurationError {
    /// Creates a missing-variable error.
    #[must_use]
    pub fn missing<I, S>(variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Missing {
            variables: variables.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates an invalid-value error.
    #[must_use]
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Identity headers were present but could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// A header value is not valid UTF-8 / visible ASCII.
    #[error("Header '{header}' is not valid text")]
    InvalidHeaderValue {
        /// The header name.
        header: String,
    },

    /// The admin flag header carries an unknown value.
    #[error("Header '{header}' has unrecognised admin flag '{value}'")]
    MalformedAdminFlag {
        /// The header name.
        header: String,
        /// The raw value.
        value: String,
    },
}

/// Blob store failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The named blob does not exist.
    #[error("Blob not found: {bucket}/{name}")]
    NotFound {
        /// Bucket name.
        bucket: String,
        /// Blob name.
        name: String,
    },

    /// The storage service rejected or failed the request.
    #[error("Storage request failed ({status}): {message}")]
    Request {
        /// HTTP status, 0 for transport failures.
        status: u16,
        /// Failure description.
        message: String,
    },
}

impl StorageError {
    /// Returns true for throttling, server errors and transport failures.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotFound { .. } => false,
            Self::Request { status, .. } => *status == 0 || *status == 429 || *status >= 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_is_not_retryable() {
        let err: CompatError = ValidationError::missing("url").into();
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "ValidationError");
        assert_eq!(err.to_string(), "Invalid url: value is required");
    }

    #[test]
    fn test_dispatch_status_classification() {
        assert!(DispatchError::from_status(503, "unavailable").retryable);
        assert!(DispatchError::from_status(429, "slow down").retryable);
        assert!(!DispatchError::from_status(404, "queue not found").retryable);
        assert!(!DispatchError::from_status(400, "bad request").retryable);
        assert!(DispatchError::unavailable("connection reset").retryable);
    }

    #[test]
    fn test_configuration_error_lists_variables() {
        let err = ConfigurationError::missing(["GCS_BUCKET", "GAE_APPLICATION"]);
        assert_eq!(
            err.to_string(),
            "Missing configuration: set one of GCS_BUCKET, GAE_APPLICATION"
        );
        assert!(!CompatError::from(err).is_retryable());
    }

    #[test]
    fn test_compat_error_to_dict() {
        let err: CompatError = DispatchError::from_status(500, "boom").into();
        let dict = err.to_dict();

        assert_eq!(dict.get("type").unwrap(), "DispatchError");
        assert_eq!(dict.get("retryable").unwrap(), true);
        assert_eq!(dict.get("status").unwrap(), 500);
    }

    #[test]
    fn test_storage_error_retryability() {
        let throttled = StorageError::Request {
            status: 429,
            message: "rate limited".to_string(),
        };
        let missing = StorageError::NotFound {
            bucket: "b".to_string(),
            name: "n".to_string(),
        };
        assert!(throttled.is_retryable());
        assert!(!missing.is_retryable());
    }
}
