//! Request-scoped state: correlation id, cancellation, deadline.
//!
//! Cancellation is cooperative. A cancelled token wakes its waiters but never
//! aborts a task; work that ignores it runs to completion.

use crate::{ErrorCode, ErrorEnvelope, Result};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;
use tokio::time::Instant;

/// Identifier tying log records to one invocation or batch item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Arc<str>);

static NEXT_INVOCATION: AtomicU64 = AtomicU64::new(1);

impl CorrelationId {
    /// Parse a trimmed, non-empty id.
    pub fn parse(value: impl AsRef<str>) -> Result<Self> {
        match value.as_ref().trim() {
            "" => Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                "correlation id must be non-empty",
            )),
            trimmed => Ok(Self(Arc::from(trimmed))),
        }
    }

    /// Process-local `inv_<n>` id for callers without a host request id.
    #[must_use]
    pub fn new_invocation_id() -> Self {
        let sequence = NEXT_INVOCATION.fetch_add(1, Ordering::Relaxed);
        Self(Arc::from(format!("inv_{sequence}")))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Clonable, awaitable cancellation flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    shared: Arc<TokenState>,
}

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    wake: Notify,
}

impl CancellationToken {
    /// A token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel and wake every waiter. Idempotent.
    pub fn cancel(&self) {
        if !self.shared.cancelled.swap(true, Ordering::SeqCst) {
            self.shared.wake.notify_waiters();
        }
    }

    /// Returns true once [`CancellationToken::cancel`] was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let woken = self.shared.wake.notified();
            // Re-check after registering so a cancel in between is not missed.
            if self.is_cancelled() {
                return;
            }
            woken.await;
        }
    }
}

/// Correlation, cancellation, and deadline for one unit of work.
#[derive(Debug, Clone)]
pub struct RequestContext {
    correlation_id: CorrelationId,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Context with a fresh token and no deadline.
    #[must_use]
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Context with a generated `inv_*` id.
    #[must_use]
    pub fn new_invocation() -> Self {
        Self::new(CorrelationId::new_invocation_id())
    }

    /// Set the absolute deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Child sharing cancellation and deadline under a new id.
    #[must_use]
    pub fn child(&self, correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            cancellation: self.cancellation.clone(),
            deadline: self.deadline,
        }
    }

    /// Correlation id.
    #[must_use]
    pub const fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Deadline, if set.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true if this request or an ancestor was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cancel this request and every context sharing its token.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Resolve once cancelled.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn blank_correlation_ids_are_rejected() {
        assert!(CorrelationId::parse("   ").is_err());
        assert!(matches!(CorrelationId::parse(" req-1 "), Ok(ref id) if id.as_str() == "req-1"));
    }

    #[test]
    fn generated_ids_are_unique() {
        let first = CorrelationId::new_invocation_id();
        let second = CorrelationId::new_invocation_id();
        assert_ne!(first, second);
        assert!(second.to_string().starts_with("inv_"));
    }

    #[tokio::test]
    async fn children_share_cancellation_and_deadline() -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let parent = RequestContext::new_invocation().with_deadline(deadline);
        let child = parent.child(CorrelationId::parse("inv_1-0")?);

        assert_eq!(child.deadline(), Some(deadline));
        assert_eq!(child.correlation_id().as_str(), "inv_1-0");
        assert!(!child.is_cancelled());

        let waiter = tokio::spawn({
            let child = child.clone();
            async move { child.cancelled().await }
        });
        parent.cancel();
        waiter.await.expect("waiter join");
        assert!(child.is_cancelled());
        Ok(())
    }

    #[test]
    fn fresh_context_has_no_deadline() {
        assert!(RequestContext::new_invocation().deadline().is_none());
    }
}
