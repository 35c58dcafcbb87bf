//! Test harness wiring the shims to in-memory doubles.

use http::HeaderMap;
use std::sync::Arc;

use crate::identity::{FixedClaimsProvider, IdentityClaim, RequestIdentity};
use crate::storage::{BucketName, BucketResolver, InMemoryBlobStore};
use crate::taskqueue::{InMemoryTaskBackend, Queue, RecordedTask, TaskDispatcher};

/// Everything a test needs to drive code that enqueues tasks, checks the
/// current user and writes blobs, without touching the network.
#[derive(Debug)]
pub struct CompatHarness {
    backend: Arc<InMemoryTaskBackend>,
    dispatcher: TaskDispatcher,
    claims: FixedClaimsProvider,
    bucket: Arc<BucketResolver>,
    blobs: Arc<InMemoryBlobStore>,
}

impl Default for CompatHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl CompatHarness {
    /// Creates a harness with no signed-in user and a `test-bucket` bucket.
    #[must_use]
    pub fn new() -> Self {
        let backend = Arc::new(InMemoryTaskBackend::new());
        let dispatcher = TaskDispatcher::new(backend.clone());
        Self {
            backend,
            dispatcher,
            claims: FixedClaimsProvider::anonymous(),
            bucket: Arc::new(fixed_bucket("test-bucket")),
            blobs: Arc::new(InMemoryBlobStore::new(BucketName::new("test-bucket"))),
        }
    }

    /// Signs `claim` in for every request.
    #[must_use]
    pub fn with_user(mut self, claim: IdentityClaim) -> Self {
        self.claims = FixedClaimsProvider::new(claim);
        self
    }

    /// Signs an administrator in for every request.
    #[must_use]
    pub fn with_admin(self, email: impl Into<String>) -> Self {
        self.with_user(IdentityClaim::new(email).with_admin(true))
    }

    /// Uses `bucket` as the default bucket.
    #[must_use]
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        self.blobs = Arc::new(InMemoryBlobStore::new(BucketName::new(bucket.clone())));
        self.bucket = Arc::new(fixed_bucket(bucket));
        self
    }

    /// The recording backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<InMemoryTaskBackend> {
        &self.backend
    }

    /// The dispatcher to hand to code under test.
    #[must_use]
    pub fn dispatcher(&self) -> &TaskDispatcher {
        &self.dispatcher
    }

    /// A queue handle on the recording backend.
    #[must_use]
    pub fn queue(&self, name: &str) -> Queue {
        self.dispatcher.queue(name)
    }

    /// Tasks recorded in `queue`.
    #[must_use]
    pub fn tasks(&self, queue: &str) -> Vec<RecordedTask> {
        self.backend.tasks(queue)
    }

    /// The identity every request sees.
    #[must_use]
    pub fn identity(&self) -> RequestIdentity {
        RequestIdentity::from_headers(&self.claims, &HeaderMap::new()).unwrap_or_default()
    }

    /// The claims provider.
    #[must_use]
    pub fn claims_provider(&self) -> &FixedClaimsProvider {
        &self.claims
    }

    /// The default bucket resolver.
    #[must_use]
    pub fn bucket(&self) -> &Arc<BucketResolver> {
        &self.bucket
    }

    /// The in-memory blob store.
    #[must_use]
    pub fn blobs(&self) -> &Arc<InMemoryBlobStore> {
        &self.blobs
    }

    /// Clears all queues, tombstones and blobs.
    pub fn reset(&self) {
        self.backend.clear_all();
        self.blobs.clear();
    }
}

fn fixed_bucket(name: impl Into<String>) -> BucketResolver {
    let bucket = BucketName::new(name);
    BucketResolver::with_source(move || Ok(bucket.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{require_admin, AdminAccess};
    use crate::storage::BlobStore;
    use crate::taskqueue::Task;
    use crate::testing::{assert_queue_empty, assert_queue_len, assert_task_param, assert_task_queued};

    #[tokio::test]
    async fn test_harness_records_tasks() {
        let harness = CompatHarness::new();

        harness
            .queue("default")
            .add(&Task::new("/_ah/pipeline/run").with_param("pipeline_key", "k1"))
            .await
            .unwrap();

        let task = assert_task_queued(harness.backend(), "default", "/_ah/pipeline/run");
        assert_task_param(&task, "pipeline_key", "k1");
        assert_queue_len(harness.backend(), "default", 1);
        assert_queue_empty(harness.backend(), "other");

        harness.reset();
        assert_queue_empty(harness.backend(), "default");
    }

    #[test]
    fn test_harness_identity() {
        let harness = CompatHarness::new();
        assert!(harness.identity().current_identity().is_none());

        let harness = CompatHarness::new().with_admin("root@example.com");
        assert!(harness.identity().is_admin());
        assert_eq!(require_admin(&harness.identity(), "/x"), AdminAccess::Allowed);
    }

    #[tokio::test]
    async fn test_harness_storage() {
        let harness = CompatHarness::new().with_bucket("custom");
        assert_eq!(harness.bucket().default_bucket().unwrap().as_str(), "custom");

        let name = harness.blobs().write_json("{}", None).await.unwrap();
        assert_eq!(harness.blobs().read_blob(&name).await.unwrap(), b"{}".to_vec());
    }

    #[tokio::test]
    #[should_panic(expected = "Expected a task for '/missing'")]
    async fn test_assert_task_queued_panics() {
        let harness = CompatHarness::new();
        harness.queue("default").add(&Task::new("/present")).await.unwrap();
        assert_task_queued(harness.backend(), "default", "/missing");
    }
}
