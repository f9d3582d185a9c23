//! Measurements recorded during item processing.

use batch_shim_shared::{ErrorCode, ErrorEnvelope};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Dimension key/value pairs; keys are unique.
pub type Dimensions = BTreeMap<Box<str>, Box<str>>;

/// Validation failures for measurements.
#[derive(Debug, Clone, PartialEq)]
pub enum MeasurementError {
    /// Namespace is empty after trimming.
    EmptyNamespace,
    /// Metric name is empty after trimming.
    EmptyName,
    /// Value is NaN or infinite.
    NonFiniteValue {
        /// Metric name.
        name: String,
        /// Offending value.
        value: f64,
    },
}

impl fmt::Display for MeasurementError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyNamespace => formatter.write_str("metric namespace must be non-empty"),
            Self::EmptyName => formatter.write_str("metric name must be non-empty"),
            Self::NonFiniteValue { name, value } => {
                write!(formatter, "metric {name} has non-finite value {value}")
            },
        }
    }
}

impl std::error::Error for MeasurementError {}

impl From<MeasurementError> for ErrorEnvelope {
    fn from(error: MeasurementError) -> Self {
        Self::expected(
            ErrorCode::new("domain", "invalid_measurement"),
            error.to_string(),
        )
    }
}

/// A single numeric observation destined for a metric sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    namespace: Box<str>,
    name: Box<str>,
    value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unit: Option<Box<str>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    dimensions: Dimensions,
    timestamp_ms: u64,
}

impl Measurement {
    /// Create a validated measurement without unit or dimensions.
    pub fn new(
        namespace: impl AsRef<str>,
        name: impl AsRef<str>,
        value: f64,
        timestamp_ms: u64,
    ) -> Result<Self, MeasurementError> {
        let namespace = namespace.as_ref().trim();
        if namespace.is_empty() {
            return Err(MeasurementError::EmptyNamespace);
        }
        let name = name.as_ref().trim();
        if name.is_empty() {
            return Err(MeasurementError::EmptyName);
        }
        if !value.is_finite() {
            return Err(MeasurementError::NonFiniteValue {
                name: name.to_owned(),
                value,
            });
        }

        Ok(Self {
            namespace: namespace.into(),
            name: name.into(),
            value,
            unit: None,
            dimensions: Dimensions::new(),
            timestamp_ms,
        })
    }

    /// Set the unit (e.g. `Milliseconds`, `Count`).
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<Box<str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Add a dimension; a repeated key overwrites the earlier value.
    #[must_use]
    pub fn with_dimension(mut self, key: impl Into<Box<str>>, value: impl Into<Box<str>>) -> Self {
        self.dimensions.insert(key.into(), value.into());
        self
    }

    /// Metric namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Metric name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Observed value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Unit, if one was set.
    #[must_use]
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Dimension pairs.
    #[must_use]
    pub const fn dimensions(&self) -> &Dimensions {
        &self.dimensions
    }

    /// Observation time in epoch milliseconds.
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_measurements() {
        assert_eq!(
            Measurement::new(" ", "latency", 1.0, 0),
            Err(MeasurementError::EmptyNamespace)
        );
        assert_eq!(
            Measurement::new("orders", "", 1.0, 0),
            Err(MeasurementError::EmptyName)
        );
        assert!(matches!(
            Measurement::new("orders", "latency", f64::NAN, 0),
            Err(MeasurementError::NonFiniteValue { .. })
        ));
    }

    #[test]
    fn dimensions_overwrite_by_key() -> Result<(), MeasurementError> {
        let measurement = Measurement::new("orders", "processed", 2.0, 10)?
            .with_unit("Count")
            .with_dimension("queue", "a")
            .with_dimension("queue", "b");

        assert_eq!(measurement.unit(), Some("Count"));
        assert_eq!(measurement.dimensions().len(), 1);
        assert_eq!(
            measurement.dimensions().get("queue").map(AsRef::as_ref),
            Some("b")
        );
        Ok(())
    }
}
