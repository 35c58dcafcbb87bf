//! Testing utilities for code that calls the shims.
//!
//! This module provides:
//! - [`CompatHarness`]: dispatcher, identity and blob store wired to
//!   in-memory doubles
//! - Assertions over the tasks a test enqueued

mod assertions;
mod fixtures;

pub use assertions::{
    assert_queue_empty, assert_queue_len, assert_task_param, assert_task_queued,
};
pub use fixtures::CompatHarness;
