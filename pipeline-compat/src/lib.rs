//! # pipeline-compat
//!
//! Call-compatible replacements for the platform services the Pipeline API
//! was built on, so the engine can run without them.
//!
//! - **Task dispatch** ([`taskqueue`]): the legacy `Task` / `Queue.add`
//!   surface over Google Cloud Tasks or an in-memory double
//! - **Identity** ([`identity`]): current user and admin flag from
//!   proxy-injected request headers
//! - **Storage** ([`storage`]): the default bucket, resolved once, plus the
//!   pipeline blob store
//!
//! Every backend is chosen by construction and injected; the library keeps
//! no global state.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pipeline_compat::prelude::*;
//! use std::sync::Arc;
//!
//! let config = CompatConfig::from_env();
//! let backend = CloudTasksBackend::with_metadata_server(config.cloud_tasks.clone())?;
//! let dispatcher = TaskDispatcher::new(Arc::new(backend));
//!
//! let task = Task::new("/_ah/pipeline/run")
//!     .with_param("pipeline_key", key)
//!     .with_name(Task::dedup_name_for(&key));
//! match dispatcher.queue("default").add(&task).await? {
//!     SubmissionResult::Enqueued { .. } => {}
//!     SubmissionResult::AlreadyExists { .. } | SubmissionResult::Tombstoned { .. } => {
//!         // Someone else already scheduled this step.
//!     }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod auth;
pub mod config;
pub mod errors;
pub mod identity;
pub mod observability;
pub mod storage;
pub mod taskqueue;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::auth::{AccessTokenProvider, StaticTokenProvider};
    pub use crate::config::{CloudTasksConfig, CompatConfig, StorageConfig};
    pub use crate::errors::{
        CompatError, ConfigurationError, DispatchError, IdentityError, Result, StorageError,
        ValidationError,
    };
    pub use crate::identity::{
        create_login_url, create_logout_url, require_admin, AdminAccess, ClaimsProvider,
        FixedClaimsProvider, HeaderClaimsProvider, IdentityClaim, RequestIdentity,
    };
    pub use crate::observability::{init_logging, LogFormat, LoggingConfig};
    pub use crate::storage::{BlobStore, BucketName, BucketResolver, InMemoryBlobStore};
    pub use crate::taskqueue::{
        HttpMethod, InMemoryTaskBackend, Queue, SubmissionResult, SubmitOptions, Task,
        TaskBackend, TaskDispatcher,
    };

    #[cfg(feature = "gcp")]
    pub use crate::auth::MetadataServerTokenProvider;
    #[cfg(feature = "gcp")]
    pub use crate::storage::GcsBlobStore;
    #[cfg(feature = "gcp")]
    pub use crate::taskqueue::CloudTasksBackend;
}
