//! Error envelope shared by every crate, plus retry classification.
//!
//! Processors may return any error type. The dispatcher only needs to know
//! whether a failure is transient, which [`retry_class_of`] answers by walking
//! the `source()` chain for an [`ErrorEnvelope`] or an [`io::Error`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::{fmt, io};

/// Diagnostic key/value pairs carried by an envelope.
pub type ErrorMetadata = BTreeMap<String, String>;

/// Whether a failure is part of normal operation or a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Bad input, missing configuration, cancellation.
    Expected,
    /// Downstream or I/O faults.
    Unexpected,
}

impl ErrorKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Expected => "expected",
            Self::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Retry classification.
///
/// Item processors use this to mark transient failures. The batch dispatcher
/// only uses it to pick a log severity; redelivery is decided by the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Transient; a redelivery may succeed.
    Retriable,
    /// Permanent for this input.
    NonRetriable,
}

impl ErrorClass {
    /// Returns true for [`ErrorClass::Retriable`].
    #[must_use]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Retriable)
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Retriable => "retriable",
            Self::NonRetriable => "non-retriable",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Stable `namespace:code` identifier, e.g. `dispatch:missing_deadline`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorCode {
    namespace: String,
    code: String,
}

const CORE_NAMESPACE: &str = "core";

impl ErrorCode {
    /// Build a code in `namespace`.
    pub fn new(namespace: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            code: code.into(),
        }
    }

    fn core(code: &str) -> Self {
        Self::new(CORE_NAMESPACE, code)
    }

    /// `core:cancelled`
    pub fn cancelled() -> Self {
        Self::core("cancelled")
    }

    /// `core:invalid_input`
    pub fn invalid_input() -> Self {
        Self::core("invalid_input")
    }

    /// `core:not_found`
    pub fn not_found() -> Self {
        Self::core("not_found")
    }

    /// `core:timeout`
    pub fn timeout() -> Self {
        Self::core("timeout")
    }

    /// `core:io`
    pub fn io() -> Self {
        Self::core("io")
    }

    /// `core:internal`
    pub fn internal() -> Self {
        Self::core("internal")
    }

    /// Namespace part.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Code part.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.namespace, self.code)
    }
}

/// Structured error returned across crate boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Origin category.
    pub kind: ErrorKind,
    /// Retry classification.
    pub class: ErrorClass,
    /// Stable error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Diagnostic metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: ErrorMetadata,
}

impl ErrorEnvelope {
    fn build(kind: ErrorKind, class: ErrorClass, code: ErrorCode, message: String) -> Self {
        Self {
            kind,
            class,
            code,
            message,
            metadata: ErrorMetadata::new(),
        }
    }

    /// Expected, non-retriable error.
    pub fn expected(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::expected_with_class(code, message, ErrorClass::NonRetriable)
    }

    /// Expected error with an explicit class (e.g. a full channel the caller
    /// may retry).
    pub fn expected_with_class(
        code: ErrorCode,
        message: impl Into<String>,
        class: ErrorClass,
    ) -> Self {
        Self::build(ErrorKind::Expected, class, code, message.into())
    }

    /// Unexpected error with an explicit class.
    pub fn unexpected(code: ErrorCode, message: impl Into<String>, class: ErrorClass) -> Self {
        Self::build(ErrorKind::Unexpected, class, code, message.into())
    }

    /// Unexpected, retriable error such as a throttled downstream call.
    pub fn retriable(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::unexpected(code, message, ErrorClass::Retriable)
    }

    /// `core:cancelled` error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::expected(ErrorCode::cancelled(), message)
    }

    /// Returns true for `core:cancelled`.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::cancelled()
    }

    /// Returns true if the class is retriable.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        self.class.is_retriable()
    }

    /// Add one metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{} {} {}: {}",
            self.kind, self.class, self.code, self.message
        )
    }
}

impl Error for ErrorEnvelope {}

impl From<io::Error> for ErrorEnvelope {
    fn from(error: io::Error) -> Self {
        let (code, class) = classify_io(error.kind());
        Self::unexpected(code, error.to_string(), class)
    }
}

/// Retry class of an arbitrary error.
///
/// The first [`ErrorEnvelope`] or [`io::Error`] found while walking
/// `source()` decides; anything else is non-retriable.
#[must_use]
pub fn retry_class_of(error: &(dyn Error + 'static)) -> ErrorClass {
    let mut current = Some(error);
    while let Some(candidate) = current {
        if let Some(envelope) = candidate.downcast_ref::<ErrorEnvelope>() {
            return envelope.class;
        }
        if let Some(io_error) = candidate.downcast_ref::<io::Error>() {
            return classify_io(io_error.kind()).1;
        }
        current = candidate.source();
    }
    ErrorClass::NonRetriable
}

fn classify_io(kind: io::ErrorKind) -> (ErrorCode, ErrorClass) {
    use io::ErrorKind as K;

    let code = match kind {
        K::NotFound => ErrorCode::not_found(),
        K::TimedOut => ErrorCode::timeout(),
        K::Interrupted => ErrorCode::cancelled(),
        _ => ErrorCode::io(),
    };
    let class = match kind {
        K::WouldBlock
        | K::TimedOut
        | K::Interrupted
        | K::ConnectionAborted
        | K::ConnectionReset
        | K::NotConnected
        | K::BrokenPipe => ErrorClass::Retriable,
        _ => ErrorClass::NonRetriable,
    };
    (code, class)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Context(&'static str, Box<dyn Error + Send + Sync>);

    impl fmt::Display for Context {
        fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(formatter, "{}: {}", self.0, self.1)
        }
    }

    impl Error for Context {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(self.1.as_ref())
        }
    }

    #[test]
    fn constructors_set_kind_and_class() {
        let expected = ErrorEnvelope::expected(ErrorCode::invalid_input(), "invalid");
        assert_eq!(expected.kind, ErrorKind::Expected);
        assert!(!expected.is_retriable());

        let throttled = ErrorEnvelope::retriable(ErrorCode::new("sqs", "throttled"), "later");
        assert_eq!(throttled.kind, ErrorKind::Unexpected);
        assert!(throttled.is_retriable());
        assert_eq!(
            throttled.to_string(),
            "unexpected retriable sqs:throttled: later"
        );
    }

    #[test]
    fn io_errors_convert_by_kind() {
        let envelope = ErrorEnvelope::from(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert_eq!(envelope.code, ErrorCode::timeout());
        assert!(envelope.is_retriable());

        let envelope = ErrorEnvelope::from(io::Error::other("plain"));
        assert_eq!(envelope.code, ErrorCode::io());
        assert!(!envelope.is_retriable());
    }

    #[test]
    fn envelope_class_is_found_through_source_chain() {
        let retriable = Context(
            "charging",
            Box::new(ErrorEnvelope::retriable(ErrorCode::timeout(), "later")),
        );
        assert_eq!(retry_class_of(&retriable), ErrorClass::Retriable);

        let permanent = Context(
            "charging",
            Box::new(ErrorEnvelope::expected(ErrorCode::invalid_input(), "bad")),
        );
        assert_eq!(retry_class_of(&permanent), ErrorClass::NonRetriable);

        let reset = Context("fetch", Box::new(io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(retry_class_of(&reset).is_retriable());
    }

    #[test]
    fn unknown_errors_are_not_retriable() {
        let error: Box<dyn Error + Send + Sync> = "bad payload".into();
        assert_eq!(retry_class_of(error.as_ref()), ErrorClass::NonRetriable);
    }

    #[test]
    fn cancellation_is_detected() {
        let cancelled = ErrorEnvelope::cancelled("stopped");
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.is_retriable());
    }
}
