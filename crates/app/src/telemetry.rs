//! Background telemetry aggregator.
//!
//! Measurements are submitted through a bounded channel to a collector task
//! that groups them by namespace. A writer task flushes the buffer on a fixed
//! interval, and [`TelemetryAggregator::shutdown`] drains whatever is still
//! queued before a final flush.

use batch_shim_ports::{LogFields, LoggerPort, Measurement, MetricSinkPort};
use batch_shim_shared::{CancellationToken, ErrorClass, ErrorCode, ErrorEnvelope, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Default writer interval.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
/// Default inbound channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Measurements grouped by namespace, in submission order per namespace.
pub type TelemetryBuffer = BTreeMap<Box<str>, Vec<Measurement>>;

/// Aggregator tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryOptions {
    /// Interval between background flushes.
    pub flush_interval: Duration,
    /// Bounded channel capacity.
    pub channel_capacity: usize,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

enum Inbound {
    Measurement(Measurement),
    Barrier(oneshot::Sender<()>),
}

/// Cloneable submission handle.
#[derive(Clone)]
pub struct TelemetryHandle {
    sender: mpsc::Sender<Inbound>,
}

impl TelemetryHandle {
    /// Queue a measurement, waiting for channel capacity.
    pub async fn submit(&self, measurement: Measurement) -> Result<()> {
        self.sender
            .send(Inbound::Measurement(measurement))
            .await
            .map_err(|_| closed_error())
    }

    /// Queue a measurement without waiting.
    ///
    /// A full channel is reported as `telemetry:channel_full`; the measurement
    /// is not queued and the caller decides whether to drop or retry.
    pub fn try_submit(&self, measurement: Measurement) -> Result<()> {
        self.sender
            .try_send(Inbound::Measurement(measurement))
            .map_err(|error| match error {
                mpsc::error::TrySendError::Full(_) => ErrorEnvelope::expected_with_class(
                    ErrorCode::new("telemetry", "channel_full"),
                    "telemetry channel is full",
                    ErrorClass::Retriable,
                )
                .with_metadata("capacity", self.sender.max_capacity().to_string()),
                mpsc::error::TrySendError::Closed(_) => closed_error(),
            })
    }

    /// Returns true once the aggregator stopped accepting measurements.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

fn closed_error() -> ErrorEnvelope {
    ErrorEnvelope::expected(
        ErrorCode::new("telemetry", "closed"),
        "telemetry aggregator is shut down",
    )
}

struct FlushState {
    buffer: Mutex<TelemetryBuffer>,
    sink: Arc<dyn MetricSinkPort>,
    logger: Arc<dyn LoggerPort>,
}

impl FlushState {
    fn record(&self, measurement: Measurement) {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer
            .entry(measurement.namespace().into())
            .or_default()
            .push(measurement);
    }

    fn take(&self) -> TelemetryBuffer {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *buffer)
    }

    async fn flush(&self) -> usize {
        let batch = self.take();
        if batch.is_empty() {
            return 0;
        }

        let mut published = 0;
        for (namespace, measurements) in batch {
            let count = measurements.len();
            match self.sink.put_measurements(&namespace, measurements).await {
                Ok(()) => published += 1,
                Err(error) => {
                    let mut fields = LogFields::new();
                    fields.insert("namespace".into(), Value::from(namespace.as_ref()));
                    fields.insert("dropped".into(), Value::from(count));
                    fields.insert("err".into(), Value::from(error.to_string()));
                    self.logger.warn(
                        "telemetry.flush_failed",
                        "PutMetricData returned error",
                        Some(fields),
                    );
                },
            }
        }
        tracing::debug!(published, "telemetry flushed");
        published
    }
}

/// Long-lived aggregator owning the collector and writer tasks.
pub struct TelemetryAggregator {
    handle: TelemetryHandle,
    state: Arc<FlushState>,
    collector_stop: CancellationToken,
    writer_stop: CancellationToken,
    collector: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl TelemetryAggregator {
    /// Spawn the collector and writer tasks. Must be called inside a tokio runtime.
    #[must_use]
    pub fn start(
        sink: Arc<dyn MetricSinkPort>,
        logger: Arc<dyn LoggerPort>,
        options: TelemetryOptions,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(options.channel_capacity.max(1));
        let state = Arc::new(FlushState {
            buffer: Mutex::new(TelemetryBuffer::new()),
            sink,
            logger,
        });
        let collector_stop = CancellationToken::new();
        let writer_stop = CancellationToken::new();

        let collector = tokio::spawn(run_collector(
            receiver,
            Arc::clone(&state),
            collector_stop.clone(),
        ));
        let writer = tokio::spawn(run_writer(
            Arc::clone(&state),
            writer_stop.clone(),
            options.flush_interval,
        ));
        tracing::debug!(
            flush_interval_ms = u64::try_from(options.flush_interval.as_millis()).unwrap_or(u64::MAX),
            channel_capacity = options.channel_capacity,
            "telemetry aggregator started"
        );

        Self {
            handle: TelemetryHandle { sender },
            state,
            collector_stop,
            writer_stop,
            collector: Mutex::new(Some(collector)),
            writer: Mutex::new(Some(writer)),
            shut_down: AtomicBool::new(false),
        }
    }

    /// A handle for submitting measurements.
    #[must_use]
    pub fn handle(&self) -> TelemetryHandle {
        self.handle.clone()
    }

    /// Flush everything submitted before this call.
    ///
    /// Returns the number of namespaces published successfully.
    pub async fn flush(&self) -> usize {
        let (ack, acked) = oneshot::channel();
        if self.handle.sender.send(Inbound::Barrier(ack)).await.is_ok() {
            let _ = acked.await;
        }
        self.state.flush().await
    }

    /// Stop the writer, drain the channel, and flush once more.
    ///
    /// Later calls are no-ops returning 0.
    #[tracing::instrument(name = "telemetry.shutdown", skip_all)]
    pub async fn shutdown(&self) -> usize {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return 0;
        }

        self.writer_stop.cancel();
        let writer = take_handle(&self.writer);
        if let Some(writer) = writer {
            if let Err(error) = writer.await {
                tracing::warn!(%error, "telemetry writer ended abnormally");
            }
        }

        self.collector_stop.cancel();
        let collector = take_handle(&self.collector);
        if let Some(collector) = collector {
            if let Err(error) = collector.await {
                tracing::warn!(%error, "telemetry collector ended abnormally");
            }
        }

        let published = self.state.flush().await;
        tracing::debug!(published, "telemetry aggregator stopped");
        published
    }
}

fn take_handle(slot: &Mutex<Option<JoinHandle<()>>>) -> Option<JoinHandle<()>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

async fn run_collector(
    mut receiver: mpsc::Receiver<Inbound>,
    state: Arc<FlushState>,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            inbound = receiver.recv() => match inbound {
                Some(inbound) => apply(&state, inbound),
                None => return,
            },
        }
    }

    receiver.close();
    while let Some(inbound) = receiver.recv().await {
        apply(&state, inbound);
    }
}

fn apply(state: &FlushState, inbound: Inbound) {
    match inbound {
        Inbound::Measurement(measurement) => state.record(measurement),
        Inbound::Barrier(ack) => {
            let _ = ack.send(());
        },
    }
}

async fn run_writer(state: Arc<FlushState>, stop: CancellationToken, interval: Duration) {
    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            () = tokio::time::sleep(interval) => {
                state.flush().await;
            },
        }
    }
}
