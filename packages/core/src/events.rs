//! Decoding of storage event notifications.
//!
//! The inbound queue receives S3 event notifications. A body is either a list
//! of `Records` (one per object event) or the `s3:TestEvent` the service
//! publishes when a notification target is first configured.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const TEST_EVENT: &str = "s3:TestEvent";

/// Outcome of decoding one notification body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Heartbeat sent when a bucket notification is configured. Carries no jobs.
    Test,
    /// Decoded object events, possibly empty.
    Records(Vec<EventRecord>),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid notification json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("notification has neither Records nor a test event")]
    UnrecognizedShape,
}

/// A single object event from a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    #[serde(default)]
    pub event_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_region: Option<String>,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Bucket {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Object {
    /// Object key as sent by the service (URL-encoded).
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
}

impl EventRecord {
    pub fn bucket_name(&self) -> &str {
        &self.s3.bucket.name
    }

    /// The object key with URL encoding removed (`+` is a space).
    ///
    /// Falls back to the raw key if it does not decode to valid UTF-8.
    pub fn object_key(&self) -> String {
        let raw = &self.s3.object.key;
        let spaced = raw.replace('+', " ");
        match urlencoding::decode(&spaced) {
            Ok(key) => key.into_owned(),
            Err(_) => raw.clone(),
        }
    }
}

#[derive(Deserialize)]
struct RecordsEnvelope {
    #[serde(rename = "Records")]
    records: Vec<EventRecord>,
}

/// Decode a notification body.
pub fn decode(body: &str) -> Result<Notification, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(body)?;

    if value.get("Event").and_then(|e| e.as_str()) == Some(TEST_EVENT) {
        return Ok(Notification::Test);
    }
    if value.get("Records").is_none() {
        return Err(DecodeError::UnrecognizedShape);
    }

    let envelope: RecordsEnvelope = serde_json::from_value(value)?;
    Ok(Notification::Records(envelope.records))
}
