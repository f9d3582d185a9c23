//! In-memory adapter implementations for port contracts.
//!
//! These implementations are intended for:
//! - Unit/integration tests of the dispatcher and aggregator
//! - Asserting on the exact records and metric batches produced
//! - Injecting sink failures deterministically

use batch_shim_ports::{
    BoxFuture, LogEvent, LogFields, LogLevel, LoggerPort, Measurement, MetricSinkPort,
};
use batch_shim_shared::{ErrorCode, ErrorEnvelope, Result};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// A no-op logger implementation.
#[derive(Debug, Default)]
pub struct NoopLogger;

impl LoggerPort for NoopLogger {
    fn log(&self, _event: LogEvent) {}

    fn child(&self, _fields: LogFields) -> Box<dyn LoggerPort> {
        Box::new(Self)
    }
}

/// Logger that keeps every event in memory. Children share the same store and
/// merge their base fields into each event's fields.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLogger {
    events: Arc<Mutex<Vec<LogEvent>>>,
    base_fields: LogFields,
}

impl InMemoryLogger {
    /// Create an empty logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().expect("logger lock").clone()
    }

    /// Recorded events with the given event name.
    #[must_use]
    pub fn events_named(&self, event: &str) -> Vec<LogEvent> {
        self.events()
            .into_iter()
            .filter(|recorded| recorded.event.as_ref() == event)
            .collect()
    }

    /// Messages of all recorded events, in order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|event| event.message.into_string())
            .collect()
    }

    /// Number of events recorded at `level`.
    #[must_use]
    pub fn count_at(&self, level: LogLevel) -> usize {
        self.events()
            .iter()
            .filter(|event| event.level == level)
            .count()
    }

    /// Drop all recorded events.
    pub fn clear(&self) {
        self.events.lock().expect("logger lock").clear();
    }
}

impl LoggerPort for InMemoryLogger {
    fn log(&self, mut event: LogEvent) {
        if !self.base_fields.is_empty() {
            let mut fields = self.base_fields.clone();
            fields.extend(event.fields.take().unwrap_or_default());
            event.fields = Some(fields);
        }
        self.events.lock().expect("logger lock").push(event);
    }

    fn child(&self, fields: LogFields) -> Box<dyn LoggerPort> {
        let mut base_fields = self.base_fields.clone();
        base_fields.extend(fields);
        Box::new(Self {
            events: Arc::clone(&self.events),
            base_fields,
        })
    }
}

#[derive(Debug, Default)]
struct SinkState {
    calls: Vec<(String, Vec<Measurement>)>,
    failing_namespaces: BTreeSet<String>,
    fail_next: usize,
}

/// Metric sink that records each call; failures can be injected per
/// namespace or for the next N calls.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMetricSink {
    state: Arc<Mutex<SinkState>>,
}

impl InMemoryMetricSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call for `namespace`.
    #[must_use]
    pub fn failing_namespace(self, namespace: &str) -> Self {
        self.state
            .lock()
            .expect("sink lock")
            .failing_namespaces
            .insert(namespace.to_owned());
        self
    }

    /// Fail the next `count` calls regardless of namespace.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().expect("sink lock").fail_next = count;
    }

    /// Successful calls as `(namespace, measurements)`, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, Vec<Measurement>)> {
        self.state.lock().expect("sink lock").calls.clone()
    }

    /// All measurements accepted so far, in call order.
    #[must_use]
    pub fn measurements(&self) -> Vec<Measurement> {
        self.calls()
            .into_iter()
            .flat_map(|(_, measurements)| measurements)
            .collect()
    }
}

impl MetricSinkPort for InMemoryMetricSink {
    fn put_measurements<'a>(
        &'a self,
        namespace: &'a str,
        measurements: Vec<Measurement>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().expect("sink lock");
            let injected = state.fail_next > 0;
            if injected || state.failing_namespaces.contains(namespace) {
                state.fail_next = state.fail_next.saturating_sub(1);
                return Err(ErrorEnvelope::retriable(
                    ErrorCode::new("telemetry", "sink_unavailable"),
                    "metric sink unavailable",
                )
                .with_metadata("namespace", namespace));
            }
            state.calls.push((namespace.to_owned(), measurements));
            Ok(())
        })
    }
}
