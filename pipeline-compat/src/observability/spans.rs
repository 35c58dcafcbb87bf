//! Structured attributes and timing for task submissions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// Attributes describing a single task submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionAttributes {
    /// Destination queue.
    pub queue: String,
    /// Relative target URL.
    pub url: Option<String>,
    /// Dedup name, if the caller supplied one.
    pub task_name: Option<String>,
    /// HTTP method.
    pub method: Option<String>,
    /// Whether the caller asked for transactional submission.
    pub transactional: bool,
    /// Outcome (`enqueued`, `already_exists`, `tombstoned`, `error`).
    pub outcome: Option<String>,
    /// Duration in milliseconds.
    pub duration_ms: Option<f64>,
}

impl SubmissionAttributes {
    /// Creates attributes for a submission to `queue`.
    #[must_use]
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            ..Default::default()
        }
    }

    /// Sets the target URL.
    #[must_use]
    pub fn with_url(mut self, url: Option<&str>) -> Self {
        self.url = url.map(str::to_string);
        self
    }

    /// Sets the task name.
    #[must_use]
    pub fn with_task_name(mut self, name: Option<&str>) -> Self {
        self.task_name = name.map(str::to_string);
        self
    }

    /// Sets the HTTP method.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Marks the submission as transactional.
    #[must_use]
    pub const fn with_transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    /// Sets the outcome.
    #[must_use]
    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    /// Sets the duration.
    #[must_use]
    pub const fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Converts to OpenTelemetry-style attributes.
    #[must_use]
    pub fn to_otel_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();

        attrs.insert("task.queue".to_string(), self.queue.clone());
        if let Some(ref v) = self.url {
            attrs.insert("task.url".to_string(), v.clone());
        }
        if let Some(ref v) = self.task_name {
            attrs.insert("task.name".to_string(), v.clone());
        }
        if let Some(ref v) = self.method {
            attrs.insert("task.method".to_string(), v.clone());
        }
        if self.transactional {
            attrs.insert("task.transactional".to_string(), "true".to_string());
        }
        if let Some(ref v) = self.outcome {
            attrs.insert("task.outcome".to_string(), v.clone());
        }
        if let Some(v) = self.duration_ms {
            attrs.insert("task.duration_ms".to_string(), v.to_string());
        }

        attrs
    }
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
}

impl SpanTimer {
    /// Starts a new timer.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_attributes() {
        let attrs = SubmissionAttributes::new("default")
            .with_url(Some("/_ah/pipeline/run"))
            .with_task_name(Some("ae-pipeline-1"))
            .with_method("POST")
            .with_outcome("enqueued")
            .with_duration_ms(12.5);

        let otel = attrs.to_otel_attributes();
        assert_eq!(otel.get("task.queue"), Some(&"default".to_string()));
        assert_eq!(otel.get("task.name"), Some(&"ae-pipeline-1".to_string()));
        assert_eq!(otel.get("task.outcome"), Some(&"enqueued".to_string()));
        assert_eq!(otel.get("task.duration_ms"), Some(&"12.5".to_string()));
        assert!(!otel.contains_key("task.transactional"));
    }

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5.0);
    }
}
