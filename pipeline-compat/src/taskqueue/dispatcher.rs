//! The legacy `add` call surface over a [`TaskBackend`].

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::task::validate_queue_name;
use super::{SubmissionResult, Task, TaskBackend};
use crate::errors::Result;
use crate::observability::{SpanTimer, SubmissionAttributes};

/// Queue used when the caller does not name one.
pub const DEFAULT_QUEUE: &str = "default";

/// Options for a single submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Request submission only if the enclosing operation commits.
    ///
    /// Not supported by the backend: the task is submitted immediately and a
    /// warning is logged.
    pub transactional: bool,
}

impl SubmitOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transactional flag.
    #[must_use]
    pub const fn with_transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }
}

/// Validates tasks and submits them to the configured backend.
///
/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct TaskDispatcher {
    backend: Arc<dyn TaskBackend>,
}

impl fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDispatcher")
            .field("backend", &self.backend.backend_name())
            .finish()
    }
}

impl TaskDispatcher {
    /// Creates a dispatcher over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn TaskBackend>) -> Self {
        Self { backend }
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn TaskBackend> {
        &self.backend
    }

    /// Returns a handle bound to `name`.
    #[must_use]
    pub fn queue(&self, name: impl Into<String>) -> Queue {
        Queue {
            name: name.into(),
            dispatcher: self.clone(),
        }
    }

    /// Submits `task` to `queue_name`.
    ///
    /// # Errors
    ///
    /// - `CompatError::Validation` if the task or queue name is malformed;
    ///   no backend call is made.
    /// - `CompatError::Dispatch` if the backend fails.
    pub async fn submit(&self, task: &Task, queue_name: &str) -> Result<SubmissionResult> {
        self.submit_with(task, queue_name, SubmitOptions::default())
            .await
    }

    /// Submits `task` with explicit options.
    pub async fn submit_with(
        &self,
        task: &Task,
        queue_name: &str,
        options: SubmitOptions,
    ) -> Result<SubmissionResult> {
        validate_queue_name(queue_name)?;
        task.validate()?;
        self.submit_validated(task, queue_name, options).await
    }

    /// Submits several tasks to one queue.
    ///
    /// Every task is validated before the first submission, so a malformed
    /// task rejects the whole batch without side effects. Submissions then
    /// run in order and stop at the first backend error; tasks submitted
    /// before it stay submitted.
    pub async fn submit_batch(
        &self,
        tasks: &[Task],
        queue_name: &str,
    ) -> Result<Vec<SubmissionResult>> {
        validate_queue_name(queue_name)?;
        for task in tasks {
            task.validate()?;
        }

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            results.push(
                self.submit_validated(task, queue_name, SubmitOptions::default())
                    .await?,
            );
        }
        Ok(results)
    }

    async fn submit_validated(
        &self,
        task: &Task,
        queue_name: &str,
        options: SubmitOptions,
    ) -> Result<SubmissionResult> {
        let attrs = SubmissionAttributes::new(queue_name)
            .with_url(task.url.as_deref())
            .with_task_name(task.name.as_deref())
            .with_method(task.method.as_str())
            .with_transactional(options.transactional);

        if options.transactional {
            warn!(
                queue = %queue_name,
                url = ?task.url,
                "Transactional task submission is not supported; submitting \
                 non-transactionally. Task handlers must be idempotent."
            );
        }

        let timer = SpanTimer::start();
        let result = self.backend.create_task(queue_name, task).await;

        match &result {
            Ok(outcome) => {
                let attrs = attrs
                    .with_outcome(outcome.outcome())
                    .with_duration_ms(timer.elapsed_ms());
                debug!(
                    backend = self.backend.backend_name(),
                    task_name = %outcome.task_name(),
                    attributes = ?attrs.to_otel_attributes(),
                    "Task submitted"
                );
            }
            Err(err) => {
                let attrs = attrs
                    .with_outcome("error")
                    .with_duration_ms(timer.elapsed_ms());
                warn!(
                    backend = self.backend.backend_name(),
                    error = %err,
                    retryable = err.is_retryable(),
                    attributes = ?attrs.to_otel_attributes(),
                    "Task submission failed"
                );
            }
        }

        result
    }
}

/// A dispatcher bound to one queue, matching the legacy `Queue(name).add(...)`.
#[derive(Debug, Clone)]
pub struct Queue {
    name: String,
    dispatcher: TaskDispatcher,
}

impl Queue {
    /// Returns the queue name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds one task.
    pub async fn add(&self, task: &Task) -> Result<SubmissionResult> {
        self.dispatcher.submit(task, &self.name).await
    }

    /// Adds one task with options.
    pub async fn add_with(&self, task: &Task, options: SubmitOptions) -> Result<SubmissionResult> {
        self.dispatcher.submit_with(task, &self.name, options).await
    }

    /// Adds several tasks.
    pub async fn add_all(&self, tasks: &[Task]) -> Result<Vec<SubmissionResult>> {
        self.dispatcher.submit_batch(tasks, &self.name).await
    }
}
