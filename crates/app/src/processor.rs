//! Item processor contract and adapters.

use crate::context::ExecutionContext;
use batch_shim_domain::{BatchItem, ItemAttributes};
use batch_shim_ports::{BoxFuture, LogFields};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::error::Error;
use std::future::Future;
use std::marker::PhantomData;

/// Error returned by a processor. Any error type converts via `?`; its
/// source chain is inspected for a retry classification.
pub type ItemError = Box<dyn Error + Send + Sync + 'static>;

/// Processing result for one item.
pub type ItemResult = Result<(), ItemError>;

/// Application callback invoked once per batch item.
pub trait ItemProcessor: Send + Sync {
    /// Process one item. Story stages and params go through `ctx.logger()`.
    fn process<'a>(&'a self, ctx: &'a ExecutionContext, item: &'a BatchItem)
    -> BoxFuture<'a, ItemResult>;
}

/// Processor wrapping a closure; see [`processor_fn`].
pub struct FnProcessor<F> {
    func: F,
}

/// Adapt a closure taking owned handles into an [`ItemProcessor`].
pub fn processor_fn<F, Fut>(func: F) -> FnProcessor<F>
where
    F: Fn(ExecutionContext, BatchItem) -> Fut + Send + Sync,
    Fut: Future<Output = ItemResult> + Send + 'static,
{
    FnProcessor { func }
}

impl<F, Fut> ItemProcessor for FnProcessor<F>
where
    F: Fn(ExecutionContext, BatchItem) -> Fut + Send + Sync,
    Fut: Future<Output = ItemResult> + Send + 'static,
{
    fn process<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        item: &'a BatchItem,
    ) -> BoxFuture<'a, ItemResult> {
        Box::pin((self.func)(ctx.clone(), item.clone()))
    }
}

/// Extra story params derived from a decoded message.
#[derive(Debug, Default)]
pub struct LoggerParams {
    params: LogFields,
}

impl LoggerParams {
    /// Add a param. Last write for a key wins.
    pub fn add(&mut self, key: &str, value: impl Into<Value>) {
        self.params.insert(key.into(), value.into());
    }

    /// Returns true when no params were added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Handler for messages whose body is JSON of type `T`.
pub trait TypedItemHandler<T>: Send + Sync {
    /// Handle a decoded message.
    fn handle<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        message: T,
        attributes: &'a ItemAttributes,
    ) -> BoxFuture<'a, ItemResult>;

    /// Contribute story params from the decoded message before handling.
    fn logger_params(&self, _message: &T, _params: &mut LoggerParams) {}
}

/// Processor that decodes the body as JSON before calling a typed handler.
pub struct JsonItemProcessor<T, H> {
    handler: H,
    log_input_event: bool,
    _message: PhantomData<fn() -> T>,
}

impl<T, H> JsonItemProcessor<T, H> {
    /// Wrap `handler`.
    pub const fn new(handler: H) -> Self {
        Self {
            handler,
            log_input_event: false,
            _message: PhantomData,
        }
    }

    /// Add the decoded body to the story as `inputEvent`.
    #[must_use]
    pub const fn with_log_input_event(mut self, enabled: bool) -> Self {
        self.log_input_event = enabled;
        self
    }
}

impl<T, H> ItemProcessor for JsonItemProcessor<T, H>
where
    T: DeserializeOwned + Send + 'static,
    H: TypedItemHandler<T>,
{
    fn process<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        item: &'a BatchItem,
    ) -> BoxFuture<'a, ItemResult> {
        Box::pin(async move {
            let logger = ctx.logger();
            let decoded = serde_json::from_str::<Value>(item.body())
                .and_then(|raw| T::deserialize(&raw).map(|message| (raw, message)));
            let (raw, message) = match decoded {
                Ok(decoded) => decoded,
                Err(error) => {
                    logger.with_line_params([("error", error.to_string())]);
                    logger.error("JSON unmarshal returned error");
                    return Err(error.into());
                },
            };

            if self.log_input_event {
                logger.add_param("inputEvent", raw);
            }

            let mut params = LoggerParams::default();
            self.handler.logger_params(&message, &mut params);
            logger.with(params.params);

            self.handler.handle(ctx, message, item.attributes()).await
        })
    }
}
