//! Concurrent batch dispatcher.
//!
//! Every item runs on its own tokio task. A waiter per item races the task's
//! completion signal against the effective deadline (the invocation deadline
//! minus a safety margin). Items that miss it are reported as timed out and
//! their tasks are left to finish in the background; anything they log after
//! that point is discarded.

use crate::context::{ExecutionContext, StoryFinalizer};
use crate::processor::ItemProcessor;
use crate::runner::run_item;
use batch_shim_domain::{BatchItem, BatchResult, ItemId, ItemOutcome};
use batch_shim_shared::{
    CorrelationId, DeadlineRace, ErrorCode, ErrorEnvelope, RequestContext, Result,
    effective_deadline, race_deadline,
};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Default margin kept between the effective deadline and the invocation
/// deadline, leaving time to build and return the response.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_millis(500);

/// Dispatcher tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Subtracted from the invocation deadline.
    pub safety_margin: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }
}

/// Fan-out/fan-in orchestrator for one batch.
#[derive(Clone)]
pub struct BatchDispatcher {
    processor: Arc<dyn ItemProcessor>,
    options: DispatchOptions,
}

struct PendingItem {
    id: ItemId,
    context: ExecutionContext,
    finalizer: StoryFinalizer,
}

impl BatchDispatcher {
    /// Create a dispatcher for `processor`.
    #[must_use]
    pub fn new(processor: Arc<dyn ItemProcessor>) -> Self {
        Self {
            processor,
            options: DispatchOptions::default(),
        }
    }

    /// Override the dispatch options.
    #[must_use]
    pub const fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Options in effect.
    #[must_use]
    pub const fn options(&self) -> DispatchOptions {
        self.options
    }

    /// Process `items` concurrently and report the ones to redeliver.
    ///
    /// The context must carry a deadline; without one nothing is processed
    /// and `dispatch:missing_deadline` is returned. Item errors, panics, and
    /// timeouts never surface as `Err`.
    #[tracing::instrument(
        name = "batch.dispatch",
        skip_all,
        fields(
            correlation_id = %ctx.request().correlation_id(),
            items = items.len(),
        )
    )]
    pub async fn dispatch(
        &self,
        ctx: &ExecutionContext,
        items: Vec<BatchItem>,
    ) -> Result<BatchResult> {
        let Some(deadline) = ctx.deadline() else {
            return Err(ErrorEnvelope::expected(
                ErrorCode::new("dispatch", "missing_deadline"),
                "context must have a deadline set",
            ));
        };
        ctx.logger().disable();

        let effective = effective_deadline(deadline, self.options.safety_margin);
        let mut pending = Vec::with_capacity(items.len());
        let mut signals = Vec::with_capacity(items.len());

        for (index, item) in items.into_iter().enumerate() {
            let (context, finalizer) = ctx.split(child_request(ctx, index, effective)?);
            let (sender, receiver) = oneshot::channel();
            pending.push(PendingItem {
                id: item.id().clone(),
                context: context.clone(),
                finalizer,
            });
            signals.push(receiver);

            let processor = Arc::clone(&self.processor);
            tokio::spawn(async move {
                let outcome = run_item(&context, &item, processor.as_ref()).await;
                let _ = sender.send(outcome);
            });
        }

        let outcomes = join_all(
            signals
                .into_iter()
                .map(|signal| await_outcome(effective, signal)),
        )
        .await;

        let mut timed_out = 0_usize;
        for (item, outcome) in pending.iter().zip(&outcomes) {
            let logger = item.context.logger();
            tracing::debug!(item_id = item.id.as_str(), outcome = outcome.label(), "item settled");
            if matches!(outcome, ItemOutcome::TimedOut) {
                timed_out += 1;
                logger.info("Message processing timed out");
            }
            if !outcome.is_success() {
                logger.info("Message returned to queue for retry");
            }
        }

        let result = BatchResult::from_outcomes(
            pending
                .iter()
                .map(|item| &item.id)
                .zip(outcomes.iter()),
        );
        for item in pending {
            item.finalizer.finalize().await;
        }

        tracing::info!(
            failed = result.len(),
            timed_out,
            "batch dispatched"
        );
        Ok(result)
    }
}

fn child_request(
    ctx: &ExecutionContext,
    index: usize,
    deadline: Instant,
) -> Result<RequestContext> {
    let parent = ctx.request();
    let id = CorrelationId::parse(format!("{}-{index}", parent.correlation_id()))?;
    Ok(parent.child(id).with_deadline(deadline))
}

async fn await_outcome(deadline: Instant, signal: oneshot::Receiver<ItemOutcome>) -> ItemOutcome {
    match race_deadline(deadline, signal).await {
        DeadlineRace::Completed(Ok(outcome)) => outcome,
        DeadlineRace::Completed(Err(_)) => {
            ItemOutcome::failed("item task ended without reporting an outcome")
        },
        DeadlineRace::TimedOut => ItemOutcome::TimedOut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{ItemError, processor_fn};
    use batch_shim_ports::{LogEvent, LogFields, LoggerPort};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CaptureLogger {
        events: Mutex<Vec<LogEvent>>,
    }

    impl LoggerPort for CaptureLogger {
        fn log(&self, event: LogEvent) {
            self.events.lock().expect("capture lock").push(event);
        }

        fn child(&self, _fields: LogFields) -> Box<dyn LoggerPort> {
            Box::new(Self::default())
        }
    }

    fn item(id: &str, body: &str) -> BatchItem {
        BatchItem::new(ItemId::parse(id).expect("valid id"), body)
    }

    fn context(capture: &Arc<CaptureLogger>, budget: Duration) -> ExecutionContext {
        let request = RequestContext::new_invocation().with_deadline(Instant::now() + budget);
        ExecutionContext::new(request, capture.clone())
    }

    #[tokio::test]
    async fn missing_deadline_is_rejected_before_processing() {
        let capture = Arc::new(CaptureLogger::default());
        let ctx = ExecutionContext::new(RequestContext::new_invocation(), capture.clone());
        let dispatcher = BatchDispatcher::new(Arc::new(processor_fn(|_, _| async {
            Ok::<(), ItemError>(())
        })));

        let error = dispatcher.dispatch(&ctx, vec![item("rh-1", "a")]).await.err();

        assert_eq!(
            error.map(|error| error.code),
            Some(ErrorCode::new("dispatch", "missing_deadline"))
        );
        assert!(capture.events.lock().expect("capture lock").is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn success_and_error_report_only_the_error() -> Result<()> {
        let capture = Arc::new(CaptureLogger::default());
        let ctx = context(&capture, Duration::from_secs(5));
        let dispatcher = BatchDispatcher::new(Arc::new(processor_fn(
            |_, item: BatchItem| async move {
                if item.body() == "fail" {
                    return Err::<(), ItemError>("downstream rejected".into());
                }
                Ok(())
            },
        )));

        let result = dispatcher
            .dispatch(&ctx, vec![item("rh-1", "ok"), item("rh-2", "fail")])
            .await?;

        assert_eq!(result.failed_ids(), &[ItemId::parse("rh-2")?]);
        let events = capture.events.lock().expect("capture lock").clone();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].message.as_ref(),
            "Processing returned error: downstream rejected; Message returned to queue for retry"
        );
        assert_eq!(events[0].level, batch_shim_ports::LogLevel::Error);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn slow_item_times_out_without_blocking_batch() -> Result<()> {
        let capture = Arc::new(CaptureLogger::default());
        let ctx = context(&capture, Duration::from_millis(800));
        let dispatcher = BatchDispatcher::new(Arc::new(processor_fn(
            |_, item: BatchItem| async move {
                if item.body() == "slow" {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok::<(), ItemError>(())
            },
        )));

        let started = std::time::Instant::now();
        let result = dispatcher
            .dispatch(&ctx, vec![item("rh-1", "slow"), item("rh-2", "fast")])
            .await?;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(result.failed_ids(), &[ItemId::parse("rh-1")?]);

        let events = capture.events.lock().expect("capture lock").clone();
        let slow = events
            .iter()
            .find(|event| event.message.contains("timed out"))
            .expect("timed-out story");
        assert_eq!(
            slow.message.as_ref(),
            "Message processing timed out; Message returned to queue for retry"
        );
        Ok(())
    }
}
