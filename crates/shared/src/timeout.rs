//! Deadline helpers.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of racing a future against a deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadlineRace<T> {
    /// The future resolved strictly before the deadline was observed.
    Completed(T),
    /// The deadline fired first (or both were ready at the same poll).
    TimedOut,
}

impl<T> DeadlineRace<T> {
    /// Returns true when the deadline won the race.
    #[must_use]
    pub const fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// Subtract a safety margin from a deadline.
///
/// Saturates at "now" so an already-tight deadline yields an immediate timer
/// rather than an underflow.
#[must_use]
pub fn effective_deadline(deadline: Instant, margin: Duration) -> Instant {
    let now = Instant::now();
    deadline
        .checked_sub(margin)
        .map_or(now, |instant| instant.max(now))
}

/// Race a future against an absolute deadline.
///
/// The timer is polled first so a tie resolves to [`DeadlineRace::TimedOut`].
/// The losing future is dropped; callers that need the work to keep running
/// should race a handle to a spawned task instead of the work itself.
pub async fn race_deadline<T, F>(deadline: Instant, fut: F) -> DeadlineRace<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        () = tokio::time::sleep_until(deadline) => DeadlineRace::TimedOut,
        value = fut => DeadlineRace::Completed(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fast_future_completes() {
        let deadline = Instant::now() + Duration::from_millis(200);
        let race = race_deadline(deadline, async { 7u32 }).await;
        assert_eq!(race, DeadlineRace::Completed(7));
    }

    #[tokio::test]
    async fn slow_future_times_out() {
        let deadline = Instant::now() + Duration::from_millis(20);
        let race = race_deadline(deadline, async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            1u32
        })
        .await;
        assert!(race.is_timed_out());
    }

    #[tokio::test]
    async fn expired_deadline_wins_over_ready_future() {
        let deadline = Instant::now();
        tokio::time::sleep(Duration::from_millis(1)).await;
        let race = race_deadline(deadline, async { 1u32 }).await;
        assert!(race.is_timed_out());
    }

    #[tokio::test]
    async fn effective_deadline_subtracts_margin() {
        let deadline = Instant::now() + Duration::from_secs(3);
        let effective = effective_deadline(deadline, Duration::from_millis(500));
        assert_eq!(deadline - effective, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn effective_deadline_never_precedes_now() {
        let before = Instant::now();
        let deadline = before + Duration::from_millis(100);
        let effective = effective_deadline(deadline, Duration::from_secs(10));
        assert!(effective >= before);
    }
}
