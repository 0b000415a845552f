//! Queue message bodies
//!
//! A queue body is either a topic envelope
//! (`{"Message": "<json>", "Timestamp": "<rfc3339>"}`) wrapping the change
//! record batch, or the batch itself delivered straight to the queue.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DecodeError;

/// Outer notification envelope
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    /// Inner payload, itself a JSON document
    #[serde(rename = "Message", default)]
    pub message: Option<String>,

    /// Publish time of the notification
    #[serde(rename = "Timestamp", default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl NotificationEnvelope {
    /// Parse a queue body as an envelope
    ///
    /// Any JSON object parses; a body that carries the batch directly yields
    /// an envelope with neither field set.
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(body).map_err(DecodeError::Envelope)
    }

    /// Both message and timestamp are present
    pub fn is_valid(&self) -> bool {
        self.message.is_some() && self.timestamp.is_some()
    }

    /// Age of the notification
    pub fn delay(&self) -> Option<Duration> {
        self.timestamp.map(|ts| Utc::now() - ts)
    }

    /// The inner payload, or the raw body when this envelope is not valid
    pub fn payload<'a>(&'a self, body: &'a str) -> &'a str {
        match (&self.message, self.timestamp) {
            (Some(message), Some(_)) => message.as_str(),
            _ => body,
        }
    }
}

/// Ordered change records of one notification
///
/// Records stay undecoded until the processor reaches them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeRecordBatch {
    #[serde(rename = "Records", default)]
    records: Option<Vec<Value>>,
}

impl ChangeRecordBatch {
    /// Parse a notification payload
    pub fn parse(payload: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(payload).map_err(DecodeError::Batch)
    }

    pub fn len(&self) -> usize {
        self.records.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> impl Iterator<Item = &Value> {
        self.records.iter().flatten()
    }
}
