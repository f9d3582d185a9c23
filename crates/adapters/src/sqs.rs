//! SQS event wire types and conversions to and from the batch domain.

use batch_shim_domain::{BatchItem, BatchResult, ItemAttributes, ItemId};
use batch_shim_shared::{ErrorCode, ErrorEnvelope, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inbound SQS event delivered to the function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqsEvent {
    /// Messages in this batch.
    #[serde(rename = "Records", default)]
    pub records: Vec<SqsMessage>,
}

/// A single SQS message record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SqsMessage {
    /// Message id assigned by the queue.
    pub message_id: String,
    /// Receipt handle, used to report the message back for redelivery.
    pub receipt_handle: String,
    /// Raw message body.
    pub body: String,
    /// Body digest.
    pub md5_of_body: String,
    /// Message attribute digest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5_of_message_attributes: Option<String>,
    /// System attributes (`ApproximateReceiveCount`, `SentTimestamp`, ...).
    pub attributes: BTreeMap<String, String>,
    /// Producer-supplied message attributes.
    pub message_attributes: BTreeMap<String, SqsMessageAttribute>,
    /// Event source, always `aws:sqs`.
    pub event_source: String,
    /// Queue ARN.
    #[serde(rename = "eventSourceARN")]
    pub event_source_arn: String,
    /// Region of the queue.
    pub aws_region: String,
}

/// A producer-supplied message attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SqsMessageAttribute {
    /// String value for `String` and `Number` types.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    /// Base64 value for `Binary` types.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_value: Option<String>,
    /// Declared data type.
    pub data_type: String,
}

impl SqsMessage {
    /// Convert into a batch item keyed by receipt handle.
    ///
    /// Only attributes carrying a string value are kept.
    pub fn to_batch_item(&self) -> Result<BatchItem> {
        let id = ItemId::parse(&self.receipt_handle)?;
        let attributes: ItemAttributes = self
            .message_attributes
            .iter()
            .filter_map(|(key, attribute)| {
                attribute
                    .string_value
                    .as_deref()
                    .map(|value| (key.as_str().into(), value.into()))
            })
            .collect();
        Ok(BatchItem::new(id, self.body.as_str()).with_attributes(attributes))
    }
}

impl SqsEvent {
    /// Parse an event from its JSON payload.
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|error| {
            ErrorEnvelope::expected(
                ErrorCode::new("sqs", "invalid_event"),
                format!("invalid SQS event: {error}"),
            )
        })
    }

    /// Convert every record into a batch item, preserving order.
    pub fn to_batch_items(&self) -> Result<Vec<BatchItem>> {
        self.records.iter().map(SqsMessage::to_batch_item).collect()
    }
}

/// Partial batch response returned to the event source mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqsEventResponse {
    /// Messages to return to the queue.
    pub batch_item_failures: Vec<BatchItemFailure>,
}

/// One message to redeliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    /// Identifier of the failed message.
    pub item_identifier: String,
}

impl From<&BatchResult> for SqsEventResponse {
    fn from(result: &BatchResult) -> Self {
        Self {
            batch_item_failures: result
                .failed_ids()
                .iter()
                .map(|id| BatchItemFailure {
                    item_identifier: id.as_str().to_owned(),
                })
                .collect(),
        }
    }
}

impl From<BatchResult> for SqsEventResponse {
    fn from(result: BatchResult) -> Self {
        Self {
            batch_item_failures: result
                .into_failed_ids()
                .into_iter()
                .map(|id| BatchItemFailure {
                    item_identifier: id.as_str().to_owned(),
                })
                .collect(),
        }
    }
}
