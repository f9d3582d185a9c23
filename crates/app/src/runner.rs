//! Per-item task runner with panic containment.

use crate::context::ExecutionContext;
use crate::processor::ItemProcessor;
use batch_shim_domain::{BatchItem, ItemOutcome};
use batch_shim_shared::retry_class_of;
use futures_util::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::AssertUnwindSafe;
use std::sync::Once;

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static LAST_TRACE: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

/// Chain a panic hook that records a trace for panics raised while a
/// processor is being polled. Panics elsewhere are left to the previous hook
/// only.
fn install_trace_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                let mut lines = trace_lines(&info.to_string());
                lines.extend(trace_lines(&Backtrace::force_capture().to_string()));
                LAST_TRACE.with(|slot| *slot.borrow_mut() = Some(lines));
            }
            previous(info);
        }));
    });
}

struct CaptureGuard {
    previous: bool,
}

impl CaptureGuard {
    fn enter() -> Self {
        Self {
            previous: CAPTURING.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        CAPTURING.with(|flag| flag.set(self.previous));
    }
}

/// Split a rendered trace into trimmed, non-empty lines.
#[must_use]
pub fn trace_lines(trace: &str) -> Vec<String> {
    trace
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned())
}

/// Run `processor` for one item and classify the result.
///
/// Errors and panics are recorded on the item's story and turned into
/// [`ItemOutcome::Failed`]. Retriable errors log at info, others at error;
/// the outcome is the same either way.
pub async fn run_item(
    ctx: &ExecutionContext,
    item: &BatchItem,
    processor: &dyn ItemProcessor,
) -> ItemOutcome {
    install_trace_hook();
    let logger = ctx.logger();

    let mut work =
        std::pin::pin!(AssertUnwindSafe(async { processor.process(ctx, item).await }).catch_unwind());
    let result = futures_util::future::poll_fn(|cx| {
        let _guard = CaptureGuard::enter();
        work.poll_unpin(cx)
    })
    .await;

    match result {
        Ok(Ok(())) => ItemOutcome::Succeeded,
        Ok(Err(error)) => {
            logger.add_param("body", item.body());
            let message = format!("Processing returned error: {error}");
            if retry_class_of(error.as_ref()).is_retriable() {
                logger.info(&message);
            } else {
                logger.error(&message);
            }
            ItemOutcome::failed(error)
        },
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            let trace = LAST_TRACE.with(|slot| slot.borrow_mut().take());
            logger.add_param(
                "panicStack",
                Value::from(trace.unwrap_or_else(|| vec![message.clone()])),
            );
            logger.error(&format!("Task panicked: {message}"));
            tracing::warn!(item_id = item.id().as_str(), "item processor panicked");
            ItemOutcome::failed(format!("panic: {message}"))
        },
    }
}
