//! Storage location resolution and pipeline blobs.
//!
//! - [`BucketResolver`]: the default bucket, resolved once per process
//! - [`BlobStore`]: JSON blob write / raw read against that bucket
//! - `GcsBlobStore`: Cloud Storage JSON API (feature `gcp`)
//! - [`InMemoryBlobStore`]: test double
//!
//! Blob uploads that hit the service's rate limit are retried with
//! exponential backoff; nothing else in this crate retries on its own.

mod blob;
mod bucket;
#[cfg(feature = "gcp")]
mod gcs;

pub use blob::{blob_name, BlobStore, InMemoryBlobStore, BLOB_PREFIX};
pub use bucket::{derive_bucket, BucketName, BucketResolver};

#[cfg(feature = "gcp")]
pub use gcs::GcsBlobStore;
