//! Batch items, per-item outcomes, and the batch result.

use batch_shim_shared::{ErrorCode, ErrorEnvelope};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Validation failures for batch primitives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// `ItemId` is empty after trimming.
    InvalidItemId {
        /// Length of the raw input before trimming.
        input_length: usize,
    },
}

impl fmt::Display for BatchError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidItemId { .. } => formatter.write_str("ItemId must be non-empty"),
        }
    }
}

impl std::error::Error for BatchError {}

impl From<BatchError> for ErrorEnvelope {
    fn from(error: BatchError) -> Self {
        let message = error.to_string();
        match error {
            BatchError::InvalidItemId { input_length } => {
                Self::expected(ErrorCode::new("domain", "invalid_item_id"), message)
                    .with_metadata("input_length", input_length.to_string())
            },
        }
    }
}

/// Stable identifier used to report an item back to its transport
/// (for SQS, the receipt handle).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Box<str>);

impl ItemId {
    /// Parse an `ItemId`; blank input is rejected. Surrounding whitespace is kept
    /// because the transport matches identifiers byte for byte.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, BatchError> {
        let raw = input.as_ref();
        if raw.trim().is_empty() {
            return Err(BatchError::InvalidItemId {
                input_length: raw.len(),
            });
        }
        Ok(Self(raw.to_owned().into_boxed_str()))
    }

    /// Access the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the underlying string.
    #[must_use]
    pub fn into_inner(self) -> Box<str> {
        self.0
    }
}

impl AsRef<str> for ItemId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// String attributes carried alongside an item body.
pub type ItemAttributes = BTreeMap<Box<str>, Box<str>>;

/// One independent unit of work within a batch. Immutable once dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    id: ItemId,
    body: Arc<str>,
    attributes: ItemAttributes,
}

impl BatchItem {
    /// Create an item with an empty attribute set.
    pub fn new(id: ItemId, body: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            body: body.into(),
            attributes: ItemAttributes::new(),
        }
    }

    /// Attach a single attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<Box<str>>, value: impl Into<Box<str>>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Replace the attribute set.
    #[must_use]
    pub fn with_attributes(mut self, attributes: ItemAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Item identifier.
    #[must_use]
    pub const fn id(&self) -> &ItemId {
        &self.id
    }

    /// Raw payload.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Attributes attached by the transport.
    #[must_use]
    pub const fn attributes(&self) -> &ItemAttributes {
        &self.attributes
    }
}

/// Terminal classification of one item's processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The processor returned success before the effective deadline.
    Succeeded,
    /// The processor returned an error or faulted.
    Failed(Box<str>),
    /// The effective deadline fired before the processor finished.
    TimedOut,
}

impl ItemOutcome {
    /// Build a failed outcome from any displayable reason.
    pub fn failed(reason: impl fmt::Display) -> Self {
        Self::Failed(reason.to_string().into_boxed_str())
    }

    /// Returns true for [`ItemOutcome::Succeeded`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Short label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Identifiers of items whose outcome was not [`ItemOutcome::Succeeded`].
///
/// Identifiers are unique; order follows first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    failed: Vec<ItemId>,
}

impl BatchResult {
    /// Build a result from `(id, outcome)` pairs.
    pub fn from_outcomes<'a, I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = (&'a ItemId, &'a ItemOutcome)>,
    {
        let mut seen = HashSet::new();
        let failed = outcomes
            .into_iter()
            .filter(|(_, outcome)| !outcome.is_success())
            .filter(|(id, _)| seen.insert(*id))
            .map(|(id, _)| id.clone())
            .collect();
        Self { failed }
    }

    /// Failed and timed-out item identifiers.
    #[must_use]
    pub fn failed_ids(&self) -> &[ItemId] {
        &self.failed
    }

    /// Consume and return the failed identifiers.
    #[must_use]
    pub fn into_failed_ids(self) -> Vec<ItemId> {
        self.failed
    }

    /// Returns true when every item succeeded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of items to redeliver.
    #[must_use]
    pub fn len(&self) -> usize {
        self.failed.len()
    }

    /// Returns true if `id` is reported as failed.
    #[must_use]
    pub fn contains(&self, id: &ItemId) -> bool {
        self.failed.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> Result<ItemId, BatchError> {
        ItemId::parse(value)
    }

    #[test]
    fn item_id_rejects_blank_input() {
        assert_eq!(
            ItemId::parse("  "),
            Err(BatchError::InvalidItemId { input_length: 2 })
        );
    }

    #[test]
    fn result_contains_only_unsuccessful_items() -> Result<(), BatchError> {
        let ok = id("a")?;
        let failed = id("b")?;
        let timed_out = id("c")?;
        let outcomes = [
            (ok.clone(), ItemOutcome::Succeeded),
            (failed.clone(), ItemOutcome::failed("boom")),
            (timed_out.clone(), ItemOutcome::TimedOut),
        ];

        let result = BatchResult::from_outcomes(outcomes.iter().map(|(id, o)| (id, o)));

        assert_eq!(result.failed_ids(), &[failed, timed_out]);
        assert!(!result.contains(&ok));
        Ok(())
    }

    #[test]
    fn result_deduplicates_identifiers() -> Result<(), BatchError> {
        let dup = id("dup")?;
        let outcomes = [
            (dup.clone(), ItemOutcome::TimedOut),
            (dup.clone(), ItemOutcome::failed("again")),
        ];

        let result = BatchResult::from_outcomes(outcomes.iter().map(|(id, o)| (id, o)));

        assert_eq!(result.len(), 1);
        assert!(result.contains(&dup));
        Ok(())
    }

    #[test]
    fn batch_error_maps_into_envelope() {
        let envelope: ErrorEnvelope = BatchError::InvalidItemId { input_length: 0 }.into();
        assert_eq!(envelope.code.to_string(), "domain:invalid_item_id");
        assert_eq!(envelope.metadata.get("input_length"), Some(&"0".to_string()));
    }
}
