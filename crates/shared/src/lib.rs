//! # batch-shim-shared
//!
//! Error envelope, request context, deadline races, and log redaction used
//! by every other batch-shim crate. No workspace dependencies.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod errors;
pub mod redaction;
pub mod request;
pub mod result;
pub mod timeout;

pub use errors::{ErrorClass, ErrorCode, ErrorEnvelope, ErrorKind, ErrorMetadata, retry_class_of};
pub use redaction::{REDACTED, is_secret_key, redact_if_secret};
pub use request::{CancellationToken, CorrelationId, RequestContext};
pub use result::Result;
pub use timeout::{DeadlineRace, effective_deadline, race_deadline};

/// Returns the shared crate version.
#[must_use]
pub const fn shared_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
