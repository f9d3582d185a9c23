//! Embedded-metric-format sink.
//!
//! Measurements are written as structured log lines carrying an `_aws` block,
//! which the platform's log pipeline turns into metrics without an API call.
//! One line is written per distinct dimension set; repeated metric names
//! within a set become a value array.

use crate::log_sink::LogSink;
use crate::logger::now_epoch_ms;
use batch_shim_domain::Dimensions;
use batch_shim_ports::{BoxFuture, Measurement, MetricSinkPort};
use batch_shim_shared::redaction::{REDACTED, is_secret_key};
use batch_shim_shared::{ErrorCode, ErrorEnvelope, Result};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Metric sink that writes EMF JSON lines through a [`LogSink`].
#[derive(Clone)]
pub struct LogMetricSink {
    sink: Arc<dyn LogSink>,
}

impl LogMetricSink {
    /// Create a metric sink backed by the provided log sink.
    #[must_use]
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    fn write_namespace(&self, namespace: &str, measurements: &[Measurement]) -> Result<usize> {
        let mut groups: BTreeMap<&Dimensions, Vec<&Measurement>> = BTreeMap::new();
        for measurement in measurements {
            groups
                .entry(measurement.dimensions())
                .or_default()
                .push(measurement);
        }

        let mut written = 0;
        for (dimensions, group) in groups {
            let line = emf_line(namespace, dimensions, &group)?;
            self.sink.write_line(&line);
            written += 1;
        }
        Ok(written)
    }
}

impl MetricSinkPort for LogMetricSink {
    fn put_measurements<'a>(
        &'a self,
        namespace: &'a str,
        measurements: Vec<Measurement>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if measurements.is_empty() {
                return Ok(());
            }
            let lines = self.write_namespace(namespace, &measurements)?;
            tracing::debug!(
                namespace,
                measurements = measurements.len(),
                lines,
                "metrics written"
            );
            Ok(())
        })
    }
}

fn emf_line(namespace: &str, dimensions: &Dimensions, group: &[&Measurement]) -> Result<String> {
    let timestamp = group
        .iter()
        .map(|measurement| measurement.timestamp_ms())
        .max()
        .filter(|timestamp| *timestamp > 0)
        .unwrap_or_else(now_epoch_ms);

    let mut values: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    let mut units: BTreeMap<&str, &str> = BTreeMap::new();
    for measurement in group {
        values
            .entry(measurement.name())
            .or_default()
            .push(measurement.value());
        if let Some(unit) = measurement.unit() {
            units.entry(measurement.name()).or_insert(unit);
        }
    }

    let metric_defs: Vec<Value> = values
        .keys()
        .map(|name| {
            units.get(name).map_or_else(
                || json!({ "Name": name }),
                |unit| json!({ "Name": name, "Unit": unit }),
            )
        })
        .collect();
    let dimension_keys: Vec<&str> = dimensions.keys().map(AsRef::as_ref).collect();

    let mut payload = Map::new();
    payload.insert(
        "_aws".to_string(),
        json!({
            "Timestamp": timestamp,
            "CloudWatchMetrics": [{
                "Namespace": namespace,
                "Dimensions": [dimension_keys],
                "Metrics": metric_defs,
            }],
        }),
    );
    for (key, value) in dimensions {
        let value = if is_secret_key(key) {
            REDACTED
        } else {
            value.as_ref()
        };
        payload.insert(key.to_string(), Value::String(value.to_string()));
    }
    for (name, samples) in values {
        let value = match samples.as_slice() {
            [single] => Value::from(*single),
            _ => Value::from(samples),
        };
        payload.insert(name.to_string(), value);
    }

    serde_json::to_string(&Value::Object(payload))
        .map(|mut encoded| {
            encoded.push('\n');
            encoded
        })
        .map_err(|error| {
            ErrorEnvelope::expected(
                ErrorCode::new("telemetry", "encode_failed"),
                format!("failed to encode metric line: {error}"),
            )
            .with_metadata("namespace", namespace)
        })
}
