//! Test assertions for enqueued tasks.

use crate::taskqueue::{InMemoryTaskBackend, RecordedTask};

/// Asserts that a task targeting `path` was queued and returns the first
/// such task.
pub fn assert_task_queued(backend: &InMemoryTaskBackend, queue: &str, path: &str) -> RecordedTask {
    let tasks = backend.tasks(queue);
    tasks
        .iter()
        .find(|t| t.path() == path)
        .cloned()
        .unwrap_or_else(|| {
            panic!(
                "Expected a task for '{}' in queue '{}', found paths: {:?}",
                path,
                queue,
                tasks.iter().map(RecordedTask::path).collect::<Vec<_>>()
            )
        })
}

/// Asserts that the queue holds no tasks.
pub fn assert_queue_empty(backend: &InMemoryTaskBackend, queue: &str) {
    let names = backend.task_names(queue);
    assert!(
        names.is_empty(),
        "Expected queue '{}' to be empty, found: {:?}",
        queue,
        names
    );
}

/// Asserts the number of tasks in the queue.
pub fn assert_queue_len(backend: &InMemoryTaskBackend, queue: &str, expected: usize) {
    let actual = backend.tasks(queue).len();
    assert_eq!(
        actual, expected,
        "Expected {} task(s) in queue '{}', got {}",
        expected, queue, actual
    );
}

/// Asserts that a task carries `key=value` among its parameters.
pub fn assert_task_param(task: &RecordedTask, key: &str, value: &str) {
    let values = task.param_values(key);
    assert!(
        values.iter().any(|v| v == value),
        "Expected parameter {}={} on task '{}', got {:?}",
        key,
        value,
        task.name,
        values
    );
}
