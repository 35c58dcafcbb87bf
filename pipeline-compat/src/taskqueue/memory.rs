//! In-memory task backend for testing.
//!
//! [`InMemoryTaskBackend`] records every accepted submission per queue, in
//! submission order, and never leaves the process.
//!
//! ## Behavior
//!
//! - **Name dedup**: a name already present in the queue yields
//!   `AlreadyExists`; a name that was deleted or drained yields `Tombstoned`.
//! - **Unnamed tasks** get a generated name and never collide.
//! - **Outage simulation**: [`InMemoryTaskBackend::set_unavailable`] makes
//!   every call fail with a retryable dispatch error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::{HttpMethod, SubmissionResult, Task, TaskBackend, FORM_CONTENT_TYPE};
use crate::errors::{DispatchError, Result};

/// A task as the backend received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTask {
    /// Queue the task was submitted to.
    pub queue_name: String,
    /// Task name (caller-supplied or generated).
    pub name: String,
    /// Whether the caller supplied the name.
    pub named: bool,
    /// Delivered URL, including any query string.
    pub url: String,
    /// HTTP method.
    pub method: HttpMethod,
    /// Delivered headers.
    pub headers: Vec<(String, String)>,
    /// Delivered body.
    pub body: Vec<u8>,
    /// Earliest run time.
    pub eta: Option<DateTime<Utc>>,
}

impl RecordedTask {
    /// Decodes the task parameters from the form body or the query string.
    #[must_use]
    pub fn params(&self) -> Vec<(String, String)> {
        let form_body = self
            .headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case("content-type") && v == FORM_CONTENT_TYPE);

        if form_body {
            return url::form_urlencoded::parse(&self.body)
                .into_owned()
                .collect();
        }
        self.url
            .split_once('?')
            .map(|(_, query)| url::form_urlencoded::parse(query.as_bytes()).into_owned().collect())
            .unwrap_or_default()
    }

    /// Returns every value of parameter `key`, in order.
    #[must_use]
    pub fn param_values(&self, key: &str) -> Vec<String> {
        self.params()
            .into_iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v)
            .collect()
    }

    /// Returns the URL path without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        self.url.split_once('?').map_or(&self.url, |(path, _)| path)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    queues: HashMap<String, Vec<RecordedTask>>,
    tombstones: HashMap<String, HashSet<String>>,
    calls: usize,
    unavailable: bool,
}

/// In-memory task backend.
#[derive(Debug, Default)]
pub struct InMemoryTaskBackend {
    state: Mutex<MemoryState>,
}

impl InMemoryTaskBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tasks currently in `queue_name`, oldest first.
    #[must_use]
    pub fn tasks(&self, queue_name: &str) -> Vec<RecordedTask> {
        self.state
            .lock()
            .queues
            .get(queue_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the names of the tasks in `queue_name`, oldest first.
    #[must_use]
    pub fn task_names(&self, queue_name: &str) -> Vec<String> {
        self.tasks(queue_name).into_iter().map(|t| t.name).collect()
    }

    /// Returns the names of all queues that have received a task.
    #[must_use]
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of `create_task` calls that reached this backend.
    #[must_use]
    pub fn submission_count(&self) -> usize {
        self.state.lock().calls
    }

    /// Removes a task and tombstones its name.
    ///
    /// Returns true if the task was present.
    pub fn delete_task(&self, queue_name: &str, task_name: &str) -> bool {
        let mut state = self.state.lock();
        let removed = state.queues.get_mut(queue_name).is_some_and(|tasks| {
            let before = tasks.len();
            tasks.retain(|t| t.name != task_name);
            tasks.len() != before
        });
        state
            .tombstones
            .entry(queue_name.to_string())
            .or_default()
            .insert(task_name.to_string());
        removed
    }

    /// Removes and returns every task in the queue, tombstoning their names.
    pub fn drain_queue(&self, queue_name: &str) -> Vec<RecordedTask> {
        let mut state = self.state.lock();
        let drained = state
            .queues
            .get_mut(queue_name)
            .map(std::mem::take)
            .unwrap_or_default();
        let tombstones = state.tombstones.entry(queue_name.to_string()).or_default();
        tombstones.extend(drained.iter().map(|t| t.name.clone()));
        drained
    }

    /// Empties a queue, tombstoning the names of its tasks.
    pub fn clear_queue(&self, queue_name: &str) {
        let _ = self.drain_queue(queue_name);
    }

    /// Forgets all tasks, tombstones and call counts.
    pub fn clear_all(&self) {
        *self.state.lock() = MemoryState::default();
    }

    /// Makes every subsequent call fail as if the service were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }
}

#[async_trait]
impl TaskBackend for InMemoryTaskBackend {
    async fn create_task(&self, queue_name: &str, task: &Task) -> Result<SubmissionResult> {
        let mut state = self.state.lock();
        state.calls += 1;

        if state.unavailable {
            return Err(DispatchError::unavailable("in-memory task backend is unavailable").into());
        }

        if let Some(name) = &task.name {
            let tombstoned = state
                .tombstones
                .get(queue_name)
                .is_some_and(|names| names.contains(name));
            if tombstoned {
                return Ok(SubmissionResult::Tombstoned {
                    task_name: name.clone(),
                });
            }
            let exists = state
                .queues
                .get(queue_name)
                .is_some_and(|tasks| tasks.iter().any(|t| &t.name == name));
            if exists {
                return Ok(SubmissionResult::AlreadyExists {
                    task_name: name.clone(),
                });
            }
        }

        let name = task
            .name
            .clone()
            .unwrap_or_else(|| format!("task-{}", Uuid::new_v4().simple()));
        let (url, body) = task.payload();

        state
            .queues
            .entry(queue_name.to_string())
            .or_default()
            .push(RecordedTask {
                queue_name: queue_name.to_string(),
                name: name.clone(),
                named: task.name.is_some(),
                url,
                method: task.method,
                headers: task.delivery_headers(),
                body,
                eta: task.schedule_time(Utc::now()),
            });
        drop(state);

        Ok(SubmissionResult::Enqueued { task_name: name })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_records_in_submission_order() {
        let backend = InMemoryTaskBackend::new();
        backend.create_task("default", &Task::new("/a")).await.unwrap();
        backend.create_task("default", &Task::new("/b")).await.unwrap();
        backend.create_task("other", &Task::new("/c")).await.unwrap();

        let paths: Vec<String> = backend
            .tasks("default")
            .iter()
            .map(|t| t.path().to_string())
            .collect();
        assert_eq!(paths, vec!["/a", "/b"]);
        assert_eq!(backend.queue_names(), vec!["default", "other"]);
        assert_eq!(backend.submission_count(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_suppressed() {
        let backend = InMemoryTaskBackend::new();
        let task = Task::new("/run").with_name("abc");

        backend.create_task("default", &task).await.unwrap();
        let second = backend.create_task("default", &task).await.unwrap();

        assert!(matches!(second, SubmissionResult::AlreadyExists { .. }));
        assert_eq!(backend.tasks("default").len(), 1);
    }

    #[tokio::test]
    async fn test_deleted_name_is_tombstoned() {
        let backend = InMemoryTaskBackend::new();
        let task = Task::new("/run").with_name("abc");

        backend.create_task("default", &task).await.unwrap();
        assert!(backend.delete_task("default", "abc"));
        let again = backend.create_task("default", &task).await.unwrap();

        assert_eq!(
            again,
            SubmissionResult::Tombstoned {
                task_name: "abc".to_string()
            }
        );
        assert!(backend.tasks("default").is_empty());
    }

    #[tokio::test]
    async fn test_drain_tombstones_names() {
        let backend = InMemoryTaskBackend::new();
        backend
            .create_task("default", &Task::new("/run").with_name("x"))
            .await
            .unwrap();

        let drained = backend.drain_queue("default");
        assert_eq!(drained.len(), 1);
        assert!(backend.tasks("default").is_empty());

        let again = backend
            .create_task("default", &Task::new("/run").with_name("x"))
            .await
            .unwrap();
        assert!(matches!(again, SubmissionResult::Tombstoned { .. }));
    }

    #[tokio::test]
    async fn test_clear_all_forgets_tombstones() {
        let backend = InMemoryTaskBackend::new();
        let task = Task::new("/run").with_name("x");
        backend.create_task("default", &task).await.unwrap();
        backend.clear_queue("default");
        backend.clear_all();

        assert!(backend.create_task("default", &task).await.unwrap().is_enqueued());
        assert_eq!(backend.submission_count(), 1);
    }

    #[tokio::test]
    async fn test_params_are_decoded() {
        let backend = InMemoryTaskBackend::new();
        let task = Task::new("/_ah/pipeline/fanout")
            .with_param("parent_key", "p 1")
            .with_param_list("child_indexes", ["0", "2"]);
        backend.create_task("default", &task).await.unwrap();

        let recorded = &backend.tasks("default")[0];
        assert_eq!(recorded.param_values("parent_key"), vec!["p 1"]);
        assert_eq!(recorded.param_values("child_indexes"), vec!["0", "2"]);
        assert!(!recorded.named);
    }

    #[tokio::test]
    async fn test_get_params_are_decoded_from_query() {
        let backend = InMemoryTaskBackend::new();
        let task = Task::new("/status")
            .with_method(HttpMethod::Get)
            .with_param("root", "abc");
        backend.create_task("default", &task).await.unwrap();

        let recorded = &backend.tasks("default")[0];
        assert_eq!(recorded.path(), "/status");
        assert_eq!(recorded.param_values("root"), vec!["abc"]);
    }

    #[tokio::test]
    async fn test_unavailable_backend_records_nothing() {
        let backend = InMemoryTaskBackend::new();
        backend.set_unavailable(true);

        let err = backend.create_task("default", &Task::new("/run")).await.unwrap_err();

        assert!(err.is_retryable());
        assert!(backend.tasks("default").is_empty());
    }
}
