//! Subscriber setup for the `tracing` ecosystem.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing_subscriber::EnvFilter;

/// Variable holding the log filter directive.
pub const ENV_LOG_FILTER: &str = "PIPELINE_COMPAT_LOG";
/// Variable selecting the output format (`pretty` or `json`).
pub const ENV_LOG_FORMAT: &str = "PIPELINE_COMPAT_LOG_FORMAT";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name, falling back to [`LogFormat::Pretty`].
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `pipeline_compat=debug`.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Reads the logging settings from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(&std::env::vars().collect())
    }

    pub(crate) fn from_vars(vars: &HashMap<String, String>) -> Self {
        Self {
            filter: vars
                .get(ENV_LOG_FILTER)
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(default_filter),
            format: vars
                .get(ENV_LOG_FORMAT)
                .map_or(LogFormat::Pretty, |v| LogFormat::parse(v)),
        }
    }

    /// Sets the filter directive.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Sets the output format.
    #[must_use]
    pub const fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new(default_filter()))
    }
}

/// Installs a global subscriber.
///
/// Returns `false` if a subscriber was already installed (by the host
/// application or a previous call); the existing one is left in place.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_target(true);

    let result = match config.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.is_ok()
}
