//! Task dispatch shim.
//!
//! This module provides:
//!
//! - [`Task`]: the legacy task descriptor (target URL, params, dedup name)
//! - [`TaskBackend`]: the narrow interface a task service implements
//! - [`TaskDispatcher`] / [`Queue`]: the legacy `add` call surface
//! - [`InMemoryTaskBackend`]: recording double for tests
//! - `CloudTasksBackend`: Google Cloud Tasks (feature `gcp`)
//!
//! ## Semantics
//!
//! - **Idempotent by name**: a named task resubmitted to the same queue
//!   yields [`SubmissionResult::AlreadyExists`] or
//!   [`SubmissionResult::Tombstoned`] instead of a second unit of work.
//! - **No transactions**: transactional submission degrades to a plain
//!   submission plus a warning. Handlers must be safe to re-run.
//! - **No ordering**: delivery order across submissions is unspecified.
//! - **No retries**: failures are returned to the caller, classified by
//!   [`CompatError::is_retryable`](crate::errors::CompatError::is_retryable).

#[cfg(feature = "gcp")]
pub mod cloud_tasks;
mod dispatcher;
pub mod memory;
mod task;

use async_trait::async_trait;

use crate::errors::Result;

pub use dispatcher::{Queue, SubmitOptions, TaskDispatcher, DEFAULT_QUEUE};
pub use memory::{InMemoryTaskBackend, RecordedTask};
pub use task::{eta_from_local, validate_queue_name, HttpMethod, Task, FORM_CONTENT_TYPE};

#[cfg(feature = "gcp")]
pub use cloud_tasks::CloudTasksBackend;

/// Outcome of a submission the backend accepted or deduplicated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionResult {
    /// A new unit of work was created.
    Enqueued {
        /// Backend-assigned task name.
        task_name: String,
    },
    /// A task with this name already exists in the queue.
    AlreadyExists {
        /// The conflicting task name.
        task_name: String,
    },
    /// The name was used by a task that recently ran or was deleted.
    Tombstoned {
        /// The tombstoned task name.
        task_name: String,
    },
}

impl SubmissionResult {
    /// Returns true if a new unit of work was created.
    #[must_use]
    pub const fn is_enqueued(&self) -> bool {
        matches!(self, Self::Enqueued { .. })
    }

    /// Returns true if the submission was suppressed as a duplicate.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        !self.is_enqueued()
    }

    /// Returns the task name.
    #[must_use]
    pub fn task_name(&self) -> &str {
        match self {
            Self::Enqueued { task_name }
            | Self::AlreadyExists { task_name }
            | Self::Tombstoned { task_name } => task_name,
        }
    }

    /// Short outcome label for logs.
    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::AlreadyExists { .. } => "already_exists",
            Self::Tombstoned { .. } => "tombstoned",
        }
    }
}

/// A task service the dispatcher can submit to.
///
/// Implementations receive tasks that already passed validation and make
/// exactly one backend call per invocation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Creates `task` in `queue_name`.
    async fn create_task(&self, queue_name: &str, task: &Task) -> Result<SubmissionResult>;

    /// Short backend identifier for logs.
    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_result_accessors() {
        let enqueued = SubmissionResult::Enqueued {
            task_name: "t1".to_string(),
        };
        let dup = SubmissionResult::AlreadyExists {
            task_name: "t1".to_string(),
        };
        let tomb = SubmissionResult::Tombstoned {
            task_name: "t2".to_string(),
        };

        assert!(enqueued.is_enqueued());
        assert!(dup.is_duplicate());
        assert!(tomb.is_duplicate());
        assert_eq!(dup.task_name(), "t1");
        assert_eq!(tomb.outcome(), "tombstoned");
    }
}
