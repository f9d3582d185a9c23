//! Test fixtures for shared error codes and envelopes.

use batch_shim_shared::{ErrorClass, ErrorCode, ErrorEnvelope};
use std::error::Error;
use std::fmt;

/// Error codes the workspace surfaces at its boundaries.
pub fn common_error_codes() -> Vec<ErrorCode> {
    vec![
        ErrorCode::new("dispatch", "missing_deadline"),
        ErrorCode::new("telemetry", "closed"),
        ErrorCode::new("telemetry", "channel_full"),
        ErrorCode::new("config", "invalid_limit"),
        ErrorCode::invalid_input(),
        ErrorCode::internal(),
    ]
}

/// A retriable downstream failure, as an application would report throttling.
pub fn retriable_item_error() -> ErrorEnvelope {
    ErrorEnvelope::retriable(ErrorCode::new("downstream", "throttled"), "throttled")
}

/// A permanent item failure.
pub fn permanent_item_error() -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::new("downstream", "rejected"),
        "rejected",
        ErrorClass::NonRetriable,
    )
}

/// Application error wrapping another error as its source.
#[derive(Debug)]
pub struct WrappedError {
    context: &'static str,
    source: Box<dyn Error + Send + Sync + 'static>,
}

impl WrappedError {
    /// Wrap `source` with a context message.
    pub fn new(context: &'static str, source: impl Error + Send + Sync + 'static) -> Self {
        Self {
            context,
            source: Box::new(source),
        }
    }
}

impl fmt::Display for WrappedError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}: {}", self.context, self.source)
    }
}

impl Error for WrappedError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.source.as_ref())
    }
}
