//! Observability utilities.
//!
//! - [`init_logging`]: installs a `tracing-subscriber` with an env filter
//! - [`SubmissionAttributes`]: structured fields attached to dispatch logs

mod logging;
mod spans;

pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use spans::{SpanTimer, SubmissionAttributes};
