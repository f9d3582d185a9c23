use crate::observability::trace_id_from_header;
use batch_shim_adapters::{JsonLogger, LogMetricSink, LogSink, SqsEvent, SqsEventResponse, StdoutLogSink};
use batch_shim_app::{
    BatchDispatcher, DispatchOptions, ExecutionContext, ItemProcessor, JsonItemProcessor,
    TelemetryAggregator, TelemetryOptions,
};
use batch_shim_config::{ENV_TRACE_HEADER, EnvSource, ValidatedHandlerConfig};
use batch_shim_ports::{LogEvent, LogFields, LogLevel, LoggerPort, MetricSinkPort};
use batch_shim_shared::{
    CorrelationId, ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

/// Per-invocation inputs supplied by the host runtime.
#[derive(Debug, Clone)]
pub struct Invocation {
    deadline: Instant,
    request_id: Option<String>,
    trace_header: Option<String>,
}

impl Invocation {
    /// An invocation that must finish by `deadline`.
    #[must_use]
    pub const fn new(deadline: Instant) -> Self {
        Self {
            deadline,
            request_id: None,
            trace_header: None,
        }
    }

    /// Read the trace header from `source`.
    #[must_use]
    pub fn from_env(deadline: Instant, source: &EnvSource) -> Self {
        let invocation = Self::new(deadline);
        match source.get(ENV_TRACE_HEADER) {
            Some(header) => invocation.with_trace_header(header),
            None => invocation,
        }
    }

    /// Use the host's request id as the correlation id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Raw X-Ray trace header for this invocation.
    #[must_use]
    pub fn with_trace_header(mut self, header: impl Into<String>) -> Self {
        self.trace_header = Some(header.into());
        self
    }

    /// Invocation deadline.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    fn correlation_id(&self) -> Result<CorrelationId> {
        match self.request_id.as_deref() {
            Some(request_id) if !request_id.trim().is_empty() => CorrelationId::parse(request_id),
            _ => CorrelationId::parse(Uuid::new_v4().to_string()),
        }
    }

    fn trace_id(&self) -> Option<String> {
        self.trace_header.as_deref().and_then(trace_id_from_header)
    }
}

/// Build a typed JSON processor honoring `dispatch.logInputEvent`.
pub fn json_processor<T, H>(config: &ValidatedHandlerConfig, handler: H) -> JsonItemProcessor<T, H> {
    JsonItemProcessor::new(handler).with_log_input_event(config.as_ref().dispatch.log_input_event)
}

/// Long-lived handler state shared by every invocation of one process.
pub struct HandlerRuntime {
    dispatcher: BatchDispatcher,
    logger: Arc<dyn LoggerPort>,
    telemetry: TelemetryAggregator,
    namespace: Option<Box<str>>,
    suppress_item_logs: bool,
}

impl HandlerRuntime {
    /// Wire a runtime from validated config and explicit ports.
    ///
    /// Starts the telemetry aggregator, so this must run inside a tokio
    /// runtime.
    #[must_use]
    pub fn new(
        config: &ValidatedHandlerConfig,
        processor: Arc<dyn ItemProcessor>,
        logger: Arc<dyn LoggerPort>,
        metrics: Arc<dyn MetricSinkPort>,
    ) -> Self {
        let config = config.as_ref();
        let dispatcher = BatchDispatcher::new(processor).with_options(DispatchOptions {
            safety_margin: config.dispatch.safety_margin(),
        });
        let telemetry = TelemetryAggregator::start(
            metrics,
            Arc::clone(&logger),
            TelemetryOptions {
                flush_interval: config.telemetry.flush_interval(),
                channel_capacity: config.telemetry.channel_capacity(),
            },
        );
        tracing::info!(
            safety_margin_ms = config.dispatch.safety_margin_ms,
            suppress_item_logs = config.dispatch.suppress_item_logs,
            namespace = config.telemetry.namespace.as_deref().unwrap_or(""),
            "handler runtime started"
        );

        Self {
            dispatcher,
            logger,
            telemetry,
            namespace: config.telemetry.namespace.clone(),
            suppress_item_logs: config.dispatch.suppress_item_logs,
        }
    }

    /// Wire a runtime that writes story records and metric lines to stdout.
    #[must_use]
    pub fn with_stdout(config: &ValidatedHandlerConfig, processor: Arc<dyn ItemProcessor>) -> Self {
        let sink: Arc<dyn LogSink> = Arc::new(StdoutLogSink);
        let level = LogLevel::parse(&config.as_ref().logging.level).unwrap_or(LogLevel::Info);
        let logger = Arc::new(JsonLogger::new(Arc::clone(&sink)).with_min_level(level));
        let metrics = Arc::new(LogMetricSink::new(sink));
        Self::new(config, processor, logger, metrics)
    }

    /// Process one SQS batch and report the messages to redeliver.
    ///
    /// An `Err` means the whole invocation failed (malformed event, missing
    /// deadline); it is logged as "lambda execution failed" before returning.
    #[tracing::instrument(
        name = "handler.invocation",
        skip_all,
        fields(records = event.records.len())
    )]
    pub async fn handle_sqs_event(
        &self,
        event: &SqsEvent,
        invocation: Invocation,
    ) -> Result<SqsEventResponse> {
        let logger = self.invocation_logger(&invocation);
        let request =
            RequestContext::new(invocation.correlation_id()?).with_deadline(invocation.deadline);
        let mut ctx = ExecutionContext::new(request, Arc::clone(&logger))
            .with_telemetry(self.telemetry.handle())
            .with_suppressed_split_logs(self.suppress_item_logs);
        if let Some(namespace) = self.namespace.as_deref() {
            ctx = ctx.with_namespace(namespace);
        }

        let outcome = match event.to_batch_items() {
            Ok(items) => self.dispatcher.dispatch(&ctx, items).await,
            Err(error) => Err(error),
        };
        if let Err(error) = &outcome {
            logger.log(
                LogEvent::new("invocation.failed", LogLevel::Error, "lambda execution failed")
                    .with_error(Value::from(error.to_string())),
            );
        }
        ctx.finalize().await;

        outcome.map(SqsEventResponse::from)
    }

    /// Decode a raw SQS event, process it, and encode the response.
    pub async fn handle_json(&self, payload: &str, invocation: Invocation) -> Result<String> {
        let event = SqsEvent::from_json(payload)?;
        let response = self.handle_sqs_event(&event, invocation).await?;
        serde_json::to_string(&response).map_err(|error| {
            ErrorEnvelope::unexpected(
                ErrorCode::internal(),
                format!("failed to encode batch response: {error}"),
                ErrorClass::NonRetriable,
            )
        })
    }

    /// Drain and flush telemetry. Call once before the process exits.
    pub async fn shutdown(&self) -> usize {
        self.telemetry.shutdown().await
    }

    fn invocation_logger(&self, invocation: &Invocation) -> Arc<dyn LoggerPort> {
        match invocation.trace_id() {
            Some(trace_id) => {
                let mut fields = LogFields::new();
                fields.insert("trace_id".into(), Value::from(trace_id));
                Arc::from(self.logger.child(fields))
            },
            None => Arc::clone(&self.logger),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn correlation_id_prefers_request_id() -> Result<()> {
        let deadline = Instant::now();
        let explicit = Invocation::new(deadline).with_request_id("req-42");
        assert_eq!(explicit.correlation_id()?.as_str(), "req-42");

        let generated = Invocation::new(deadline).with_request_id("  ");
        let id = generated.correlation_id()?;
        assert!(Uuid::parse_str(id.as_str()).is_ok());
        Ok(())
    }

    #[test]
    fn invocation_reads_trace_header_from_env() {
        let mut env = BTreeMap::new();
        env.insert(
            ENV_TRACE_HEADER.to_string(),
            "Root=1-abc;Parent=2;Sampled=1".to_string(),
        );
        let invocation = Invocation::from_env(Instant::now(), &EnvSource::from_map(env));

        assert_eq!(invocation.trace_id().as_deref(), Some("1-abc"));
        let bare = Invocation::from_env(Instant::now(), &EnvSource::from_map(BTreeMap::new()));
        assert_eq!(bare.trace_id(), None);
    }
}
