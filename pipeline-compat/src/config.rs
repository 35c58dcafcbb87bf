//! Configuration for the shims, sourced from the process environment.
//!
//! Every shim reads its settings from here rather than calling
//! `std::env::var` at the call site, so a test can build a config from an
//! explicit variable map and get deterministic results.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::ConfigurationError;
use crate::identity::IdentityHeaders;
use crate::observability::LoggingConfig;

/// Explicit default bucket override.
pub const ENV_GCS_BUCKET: &str = "GCS_BUCKET";
/// Platform application identifier, e.g. `s~my-app`.
pub const ENV_GAE_APPLICATION: &str = "GAE_APPLICATION";
/// Cloud project identifier.
pub const ENV_GOOGLE_CLOUD_PROJECT: &str = "GOOGLE_CLOUD_PROJECT";
/// Cloud Tasks location.
pub const ENV_CLOUD_TASKS_LOCATION: &str = "CLOUD_TASKS_LOCATION";
/// Service that task handlers are served from.
pub const ENV_GAE_SERVICE: &str = "GAE_SERVICE";
/// Overrides the host that task URLs are resolved against.
pub const ENV_CLOUD_TASKS_TARGET_BASE_URL: &str = "CLOUD_TASKS_TARGET_BASE_URL";
/// Service account used to mint OIDC tokens on task requests.
pub const ENV_CLOUD_TASKS_SERVICE_ACCOUNT: &str = "CLOUD_TASKS_SERVICE_ACCOUNT";
/// Overrides the Cloud Tasks API endpoint (emulators).
pub const ENV_CLOUD_TASKS_API_ENDPOINT: &str = "CLOUD_TASKS_API_ENDPOINT";

/// A snapshot of environment variables.
pub type EnvVars = HashMap<String, String>;

/// Looks up a variable, treating empty values as unset.
fn lookup(vars: &EnvVars, key: &str) -> Option<String> {
    vars.get(key).filter(|v| !v.is_empty()).cloned()
}

/// Top-level configuration for all shims.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompatConfig {
    /// Task dispatch settings.
    #[serde(default)]
    pub cloud_tasks: CloudTasksConfig,
    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Identity header names.
    #[serde(default)]
    pub identity: IdentityHeaders,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CompatConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Reads configuration from an explicit set of variables.
    #[must_use]
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: EnvVars = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        Self {
            cloud_tasks: CloudTasksConfig::from_vars(&vars),
            storage: StorageConfig::from_vars(&vars),
            identity: IdentityHeaders::default(),
            logging: LoggingConfig::from_vars(&vars),
        }
    }

    /// Sets the Cloud Tasks configuration.
    #[must_use]
    pub fn with_cloud_tasks(mut self, config: CloudTasksConfig) -> Self {
        self.cloud_tasks = config;
        self
    }

    /// Sets the storage configuration.
    #[must_use]
    pub fn with_storage(mut self, config: StorageConfig) -> Self {
        self.storage = config;
        self
    }

    /// Sets the identity header names.
    #[must_use]
    pub fn with_identity_headers(mut self, headers: IdentityHeaders) -> Self {
        self.identity = headers;
        self
    }
}

/// Configuration for the Cloud Tasks backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudTasksConfig {
    /// Cloud project ID. Required for live dispatch.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Cloud Tasks location.
    #[serde(default = "default_location")]
    pub location: String,
    /// Service serving the task handlers.
    #[serde(default = "default_service")]
    pub service: String,
    /// Explicit base URL for task handlers, overriding the derived host.
    #[serde(default)]
    pub target_base_url: Option<String>,
    /// Service account email for OIDC-authenticated task requests.
    #[serde(default)]
    pub service_account_email: Option<String>,
    /// Cloud Tasks API endpoint.
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,
    /// Timeout for each API request in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: f64,
}

fn default_location() -> String {
    "us-central1".to_string()
}

fn default_service() -> String {
    "default".to_string()
}

fn default_api_endpoint() -> String {
    "https://cloudtasks.googleapis.com".to_string()
}

fn default_request_timeout() -> f64 {
    30.0
}

impl Default for CloudTasksConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            location: default_location(),
            service: default_service(),
            target_base_url: None,
            service_account_email: None,
            api_endpoint: default_api_endpoint(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl CloudTasksConfig {
    /// Creates a configuration for a project with defaults elsewhere.
    #[must_use]
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Self::default()
        }
    }

    fn from_vars(vars: &EnvVars) -> Self {
        let defaults = Self::default();
        Self {
            project_id: lookup(vars, ENV_GOOGLE_CLOUD_PROJECT),
            location: lookup(vars, ENV_CLOUD_TASKS_LOCATION).unwrap_or(defaults.location),
            service: lookup(vars, ENV_GAE_SERVICE).unwrap_or(defaults.service),
            target_base_url: lookup(vars, ENV_CLOUD_TASKS_TARGET_BASE_URL),
            service_account_email: lookup(vars, ENV_CLOUD_TASKS_SERVICE_ACCOUNT),
            api_endpoint: lookup(vars, ENV_CLOUD_TASKS_API_ENDPOINT)
                .unwrap_or(defaults.api_endpoint),
            request_timeout_seconds: defaults.request_timeout_seconds,
        }
    }

    /// Sets the location.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Sets the service.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Sets the base URL task paths are resolved against.
    #[must_use]
    pub fn with_target_base_url(mut self, url: impl Into<String>) -> Self {
        self.target_base_url = Some(url.into());
        self
    }

    /// Sets the service account for OIDC authentication.
    #[must_use]
    pub fn with_service_account(mut self, email: impl Into<String>) -> Self {
        self.service_account_email = Some(email.into());
        self
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.api_endpoint = endpoint.into();
        self
    }

    /// Gets the request timeout as a Duration.
    ///
    /// Negative, NaN and overflowing values are configuration errors.
    pub fn request_timeout(&self) -> Result<Duration, ConfigurationError> {
        Duration::try_from_secs_f64(self.request_timeout_seconds).map_err(|e| {
            ConfigurationError::invalid(
                "request_timeout_seconds",
                format!("{}: {e}", self.request_timeout_seconds),
            )
        })
    }

    /// Returns the full queue resource path.
    ///
    /// `projects/{project}/locations/{location}/queues/{queue}`
    pub fn queue_path(&self, queue_name: &str) -> Result<String, ConfigurationError> {
        let project = self
            .project_id
            .as_deref()
            .ok_or_else(|| ConfigurationError::missing([ENV_GOOGLE_CLOUD_PROJECT]))?;
        Ok(format!(
            "projects/{project}/locations/{}/queues/{queue_name}",
            self.location
        ))
    }

    /// Resolves a relative task path to the absolute URL the task will hit.
    #[must_use]
    pub fn target_url(&self, relative_url: &str) -> String {
        if let Some(base) = &self.target_base_url {
            return format!("{}{relative_url}", base.trim_end_matches('/'));
        }
        match self.project_id.as_deref() {
            Some(project) if self.service == "default" => {
                format!("https://{project}.appspot.com{relative_url}")
            }
            Some(project) => {
                format!("https://{}-dot-{project}.appspot.com{relative_url}", self.service)
            }
            None => format!("http://localhost:8080{relative_url}"),
        }
    }
}

/// Configuration for the default bucket and blob store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Explicit bucket, used verbatim.
    #[serde(default)]
    pub bucket_override: Option<String>,
    /// Platform application identifier (`s~my-app`).
    #[serde(default)]
    pub application_id: Option<String>,
    /// Cloud project identifier, used when no application id is set.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Storage JSON API endpoint.
    #[serde(default = "default_storage_endpoint")]
    pub api_endpoint: String,
    /// Upload attempts when the service throttles.
    #[serde(default = "default_max_upload_attempts")]
    pub max_upload_attempts: u32,
    /// First backoff delay in milliseconds; doubles on each throttled attempt.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_storage_endpoint() -> String {
    "https://storage.googleapis.com".to_string()
}

fn default_max_upload_attempts() -> u32 {
    10
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket_override: None,
            application_id: None,
            project_id: None,
            api_endpoint: default_storage_endpoint(),
            max_upload_attempts: default_max_upload_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl StorageConfig {
    fn from_vars(vars: &EnvVars) -> Self {
        Self {
            bucket_override: lookup(vars, ENV_GCS_BUCKET),
            application_id: lookup(vars, ENV_GAE_APPLICATION),
            project_id: lookup(vars, ENV_GOOGLE_CLOUD_PROJECT),
            ..Self::default()
        }
    }

    /// Sets the explicit bucket override.
    #[must_use]
    pub fn with_bucket_override(mut self, bucket: impl Into<String>) -> Self {
        self.bucket_override = Some(bucket.into());
        self
    }

    /// Sets the platform application identifier.
    #[must_use]
    pub fn with_application_id(mut self, app_id: impl Into<String>) -> Self {
        self.application_id = Some(app_id.into());
        self
    }

    /// Sets the project identifier.
    #[must_use]
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Sets the storage API endpoint.
    #[must_use]
    pub fn with_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.api_endpoint = endpoint.into();
        self
    }

    /// Sets the number of upload attempts.
    #[must_use]
    pub const fn with_max_upload_attempts(mut self, attempts: u32) -> Self {
        self.max_upload_attempts = attempts;
        self
    }

    /// Sets the first backoff delay.
    #[must_use]
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Backoff before retry number `attempt` (zero-based).
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(1 << attempt.min(20)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_vars_reads_task_settings() {
        let config = CompatConfig::from_vars([
            ("GOOGLE_CLOUD_PROJECT", "my-project"),
            ("CLOUD_TASKS_LOCATION", "europe-west1"),
            ("GAE_SERVICE", "worker"),
        ]);

        assert_eq!(config.cloud_tasks.project_id.as_deref(), Some("my-project"));
        assert_eq!(config.cloud_tasks.location, "europe-west1");
        assert_eq!(config.cloud_tasks.service, "worker");
        assert_eq!(config.storage.project_id.as_deref(), Some("my-project"));
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = CompatConfig::from_vars(Vec::<(String, String)>::new());

        assert_eq!(config.cloud_tasks.project_id, None);
        assert_eq!(config.cloud_tasks.location, "us-central1");
        assert_eq!(config.cloud_tasks.service, "default");
        assert_eq!(config.storage.max_upload_attempts, 10);
    }

    #[test]
    fn test_request_timeout_rejects_bad_values() {
        let mut config = CloudTasksConfig::default();
        assert_eq!(config.request_timeout().unwrap(), Duration::from_secs(30));

        for bad in [-1.0, f64::NAN, f64::INFINITY] {
            config.request_timeout_seconds = bad;
            let err = config.request_timeout().unwrap_err();
            assert!(matches!(err, ConfigurationError::Invalid { ref key, .. } if key == "request_timeout_seconds"));
        }
    }

    #[test]
    fn test_retry_base_delay_saturates() {
        let config = StorageConfig::default().with_retry_base_delay(Duration::MAX);
        assert_eq!(config.retry_base_delay_ms, u64::MAX);
        assert_eq!(config.retry_delay(2), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_retry_delay_doubles() {
        let config = StorageConfig::default();
        assert_eq!(config.retry_delay(0), Duration::from_secs(1));
        assert_eq!(config.retry_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = CompatConfig::from_vars([("GCS_BUCKET", ""), ("CLOUD_TASKS_LOCATION", "")]);

        assert_eq!(config.storage.bucket_override, None);
        assert_eq!(config.cloud_tasks.location, "us-central1");
    }

    #[test]
    fn test_queue_path() {
        let config = CloudTasksConfig::new("my-project");
        assert_eq!(
            config.queue_path("default").unwrap(),
            "projects/my-project/locations/us-central1/queues/default"
        );
    }

    #[test]
    fn test_queue_path_requires_project() {
        let err = CloudTasksConfig::default().queue_path("default").unwrap_err();
        assert!(matches!(err, ConfigurationError::Missing { .. }));
    }

    #[test]
    fn test_target_url_default_service() {
        let config = CloudTasksConfig::new("my-project");
        assert_eq!(
            config.target_url("/_ah/pipeline/run"),
            "https://my-project.appspot.com/_ah/pipeline/run"
        );
    }

    #[test]
    fn test_target_url_named_service() {
        let config = CloudTasksConfig::new("my-project").with_service("worker");
        assert_eq!(
            config.target_url("/_ah/pipeline/run"),
            "https://worker-dot-my-project.appspot.com/_ah/pipeline/run"
        );
    }

    #[test]
    fn test_target_url_without_project_falls_back_to_localhost() {
        let config = CloudTasksConfig::default();
        assert_eq!(
            config.target_url("/_ah/pipeline/run"),
            "http://localhost:8080/_ah/pipeline/run"
        );
    }

    #[test]
    fn test_target_url_override() {
        let config = CloudTasksConfig::new("p").with_target_base_url("https://svc.run.app/");
        assert_eq!(
            config.target_url("/_ah/pipeline/run"),
            "https://svc.run.app/_ah/pipeline/run"
        );
    }
}
