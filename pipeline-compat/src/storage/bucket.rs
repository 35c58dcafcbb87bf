//! Default bucket resolution.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use tracing::{error, info};

use crate::config::{StorageConfig, ENV_GAE_APPLICATION, ENV_GCS_BUCKET, ENV_GOOGLE_CLOUD_PROJECT};
use crate::errors::ConfigurationError;

/// A storage bucket name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketName(String);

impl BucketName {
    /// Wraps a bucket name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BucketName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Computes the default bucket from configuration.
///
/// An explicit override wins verbatim. Otherwise the application id (or
/// the project id) loses any partition prefix up to the last `~` and gains
/// `.appspot.com`.
pub fn derive_bucket(config: &StorageConfig) -> Result<BucketName, ConfigurationError> {
    if let Some(bucket) = config.bucket_override.as_deref().filter(|b| !b.is_empty()) {
        return Ok(BucketName::new(bucket));
    }

    let app_id = config
        .application_id
        .as_deref()
        .or(config.project_id.as_deref())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            ConfigurationError::missing([ENV_GCS_BUCKET, ENV_GAE_APPLICATION, ENV_GOOGLE_CLOUD_PROJECT])
        })?;

    let app_id = app_id.rsplit('~').next().unwrap_or(app_id);
    if app_id.is_empty() {
        return Err(ConfigurationError::invalid(
            ENV_GAE_APPLICATION,
            "application id is empty after removing its partition prefix",
        ));
    }
    Ok(BucketName::new(format!("{app_id}.appspot.com")))
}

type BucketSource = Box<dyn Fn() -> Result<BucketName, ConfigurationError> + Send + Sync>;

/// Resolves the default bucket at most once.
///
/// The first call runs the resolution; concurrent first callers wait for it
/// and see the same value. A failure is cached too, so a misconfigured
/// process keeps failing the same way.
pub struct BucketResolver {
    source: BucketSource,
    resolved: OnceLock<Result<BucketName, ConfigurationError>>,
}

impl fmt::Debug for BucketResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketResolver")
            .field("resolved", &self.resolved.get())
            .finish_non_exhaustive()
    }
}

impl BucketResolver {
    /// Creates a resolver over a storage configuration.
    #[must_use]
    pub fn new(config: &StorageConfig) -> Self {
        let config = config.clone();
        Self::with_source(move || derive_bucket(&config))
    }

    /// Creates a resolver over an arbitrary source.
    #[must_use]
    pub fn with_source<F>(source: F) -> Self
    where
        F: Fn() -> Result<BucketName, ConfigurationError> + Send + Sync + 'static,
    {
        Self {
            source: Box::new(source),
            resolved: OnceLock::new(),
        }
    }

    /// Returns the default bucket, resolving it on first use.
    ///
    /// # Errors
    ///
    /// The cached [`ConfigurationError`] when no bucket can be determined.
    pub fn default_bucket(&self) -> Result<&BucketName, ConfigurationError> {
        self.resolved
            .get_or_init(|| {
                let resolved = (self.source)();
                match &resolved {
                    Ok(bucket) => info!(bucket = %bucket, "Resolved default bucket"),
                    Err(err) => error!(error = %err, "No default bucket configured"),
                }
                resolved
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Returns true once resolution has run.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_override_is_verbatim() {
        let config = StorageConfig::default()
            .with_bucket_override("my-custom-bucket")
            .with_application_id("s~other");
        assert_eq!(derive_bucket(&config).unwrap().as_str(), "my-custom-bucket");
    }

    #[test]
    fn test_partition_prefix_is_stripped() {
        let config = StorageConfig::default().with_application_id("s~myproj");
        assert_eq!(derive_bucket(&config).unwrap().as_str(), "myproj.appspot.com");

        let config = StorageConfig::default().with_application_id("e~dev~myproj");
        assert_eq!(derive_bucket(&config).unwrap().as_str(), "myproj.appspot.com");
    }

    #[test]
    fn test_project_fallback() {
        let config = StorageConfig::default().with_project_id("plain-project");
        assert_eq!(
            derive_bucket(&config).unwrap().as_str(),
            "plain-project.appspot.com"
        );
    }

    #[test]
    fn test_application_id_wins_over_project() {
        let config = StorageConfig::default()
            .with_application_id("s~app")
            .with_project_id("proj");
        assert_eq!(derive_bucket(&config).unwrap().as_str(), "app.appspot.com");
    }

    #[test]
    fn test_missing_configuration() {
        let err = derive_bucket(&StorageConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigurationError::Missing { ref variables } if variables.len() == 3));

        let err = derive_bucket(&StorageConfig::default().with_application_id("s~")).unwrap_err();
        assert!(matches!(err, ConfigurationError::Invalid { .. }));
    }

    #[test]
    fn test_failure_is_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let resolver = BucketResolver::with_source(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ConfigurationError::missing([ENV_GCS_BUCKET]))
        });

        assert!(resolver.default_bucket().is_err());
        assert!(resolver.default_bucket().is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(resolver.is_resolved());
    }

    #[test]
    fn test_concurrent_first_use_resolves_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let resolver = Arc::new(BucketResolver::with_source(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(BucketName::new("shared.appspot.com"))
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resolver = resolver.clone();
                std::thread::spawn(move || resolver.default_bucket().unwrap().clone())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().as_str(), "shared.appspot.com");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lazy_until_first_use() {
        let resolver = BucketResolver::new(&StorageConfig::default().with_application_id("s~x"));
        assert!(!resolver.is_resolved());
        assert_eq!(resolver.default_bucket().unwrap().as_str(), "x.appspot.com");
        assert!(resolver.is_resolved());
    }
}
