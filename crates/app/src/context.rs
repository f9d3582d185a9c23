//! Per-invocation execution context.
//!
//! Carries the [`RequestContext`], a [`StoryLogger`], and the measurements
//! recorded during one unit of work. [`ExecutionContext::split`] derives an
//! independent child per batch item; the returned [`StoryFinalizer`] writes
//! the child's record and forwards its measurements once the item is done.

use crate::story::StoryLogger;
use crate::telemetry::TelemetryHandle;
use batch_shim_domain::{Dimensions, Measurement};
use batch_shim_ports::LoggerPort;
use batch_shim_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Context handed to processors. Clones share the story and pending
/// measurements.
#[derive(Clone)]
pub struct ExecutionContext {
    request: RequestContext,
    story: StoryLogger,
    namespace: Option<Arc<str>>,
    pending: Arc<Mutex<Vec<Measurement>>>,
    telemetry: Option<TelemetryHandle>,
    suppress_split_logs: bool,
}

impl ExecutionContext {
    /// Invocation-level context with a direct-mode story logger.
    #[must_use]
    pub fn new(request: RequestContext, logger: Arc<dyn LoggerPort>) -> Self {
        Self {
            request,
            story: StoryLogger::direct(logger),
            namespace: None,
            pending: Arc::new(Mutex::new(Vec::new())),
            telemetry: None,
            suppress_split_logs: false,
        }
    }

    /// Forward finalized measurements to this aggregator.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: TelemetryHandle) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Default namespace for [`ExecutionContext::metric`].
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl AsRef<str>) -> Self {
        let trimmed = namespace.as_ref().trim();
        self.namespace = (!trimmed.is_empty()).then(|| Arc::from(trimmed));
        self
    }

    /// Disable the story output of every context split from this one.
    #[must_use]
    pub const fn with_suppressed_split_logs(mut self, suppress: bool) -> Self {
        self.suppress_split_logs = suppress;
        self
    }

    /// The underlying request context.
    #[must_use]
    pub const fn request(&self) -> &RequestContext {
        &self.request
    }

    /// The story logger for this unit of work.
    #[must_use]
    pub const fn logger(&self) -> &StoryLogger {
        &self.story
    }

    /// Deadline of this unit of work, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.request.deadline()
    }

    /// Returns true if the invocation was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.request.is_cancelled()
    }

    /// Configured metric namespace.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Derive a child for one concurrent unit of work.
    ///
    /// The child gets its own combined-mode story on the same sink, its own
    /// measurement list, and `request` as its request context. Telemetry,
    /// namespace, and log suppression are inherited.
    #[must_use]
    pub fn split(&self, request: RequestContext) -> (Self, StoryFinalizer) {
        let story = self.story.split();
        if self.suppress_split_logs {
            story.disable();
        }
        let child = Self {
            request,
            story,
            namespace: self.namespace.clone(),
            pending: Arc::new(Mutex::new(Vec::new())),
            telemetry: self.telemetry.clone(),
            suppress_split_logs: self.suppress_split_logs,
        };
        let finalizer = StoryFinalizer {
            context: child.clone(),
        };
        (child, finalizer)
    }

    /// Start a measurement in the configured namespace.
    #[must_use]
    pub fn metric(&self, name: impl Into<Box<str>>) -> MetricBuilder<'_> {
        MetricBuilder {
            context: self,
            namespace: self.namespace.as_deref().map(Into::into),
            name: name.into(),
            unit: None,
            dimensions: Dimensions::new(),
        }
    }

    /// Snapshot of measurements recorded so far.
    #[must_use]
    pub fn pending_measurements(&self) -> Vec<Measurement> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, measurement: Measurement) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(measurement);
    }

    /// Add measurements to the story, write the record, and forward the
    /// measurements to telemetry.
    ///
    /// Measurements are taken out on the first call, so finalizing twice
    /// neither duplicates the record nor the measurements.
    pub async fn finalize(&self) {
        let measurements =
            std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));

        for measurement in &measurements {
            self.story
                .add_param(measurement.name(), measurement.value());
            for (key, value) in measurement.dimensions() {
                self.story.add_param(key, Value::from(value.as_ref()));
            }
        }
        self.story.log();

        let Some(telemetry) = self.telemetry.as_ref() else {
            return;
        };
        for measurement in measurements {
            if let Err(error) = telemetry.submit(measurement).await {
                tracing::warn!(
                    correlation_id = %self.request.correlation_id(),
                    code = %error.code,
                    "measurement dropped"
                );
            }
        }
    }
}

/// Finalizes a split context. Call [`StoryFinalizer::finalize`] once the unit
/// of work is complete; dropping it without finalizing discards the story.
pub struct StoryFinalizer {
    context: ExecutionContext,
}

impl StoryFinalizer {
    /// Write the child's record and forward its measurements.
    pub async fn finalize(self) {
        self.context.finalize().await;
    }

    /// The context being finalized.
    #[must_use]
    pub const fn context(&self) -> &ExecutionContext {
        &self.context
    }
}

/// Builder returned by [`ExecutionContext::metric`].
#[must_use = "a metric is only recorded by calling `value`"]
pub struct MetricBuilder<'a> {
    context: &'a ExecutionContext,
    namespace: Option<Box<str>>,
    name: Box<str>,
    unit: Option<Box<str>>,
    dimensions: Dimensions,
}

impl MetricBuilder<'_> {
    /// Override the namespace.
    pub fn namespace(mut self, namespace: impl Into<Box<str>>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Add a dimension.
    pub fn dimension(mut self, key: impl Into<Box<str>>, value: impl Into<Box<str>>) -> Self {
        self.dimensions.insert(key.into(), value.into());
        self
    }

    /// Set the unit.
    pub fn unit(mut self, unit: impl Into<Box<str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Record the measurement with `value`.
    pub fn value(self, value: f64) -> Result<()> {
        let Some(namespace) = self.namespace else {
            return Err(ErrorEnvelope::expected(
                ErrorCode::new("telemetry", "missing_namespace"),
                "metric namespace is not configured",
            )
            .with_metadata("metric", self.name.as_ref()));
        };
        let mut measurement = Measurement::new(namespace, &self.name, value, now_epoch_ms())?;
        if let Some(unit) = self.unit {
            measurement = measurement.with_unit(unit);
        }
        for (key, value) in self.dimensions {
            measurement = measurement.with_dimension(key, value);
        }
        self.context.record(measurement);
        Ok(())
    }
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|duration| u64::try_from(duration.as_millis()).ok())
        .unwrap_or_default()
}
