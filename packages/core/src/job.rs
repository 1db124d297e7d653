//! Job domain types carried from the parser to the runner.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::events::EventRecord;
use crate::words::Words;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Envelope of one inbound queue message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobMessage {
    /// Message ID assigned by the queue service.
    pub id: String,
    /// Handle needed to delete the message.
    pub receipt_handle: String,
    /// URL of the queue the message was received from.
    pub queue_url: String,
}

impl JobMessage {
    pub fn new(
        id: impl Into<String>,
        receipt_handle: impl Into<String>,
        queue_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            receipt_handle: receipt_handle.into(),
            queue_url: queue_url.into(),
        }
    }
}

/// A single object to count words in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub bucket: String,
    pub key: String,
    pub id: JobId,
    pub started_at: DateTime<Utc>,
}

impl Job {
    /// Create a job for an object, stamped with a fresh id and the current time.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            id: JobId::new(),
            started_at: Utc::now(),
        }
    }

    /// Time elapsed since the job was created.
    pub fn elapsed(&self) -> Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or_default()
    }
}

impl From<&EventRecord> for Job {
    fn from(record: &EventRecord) -> Self {
        Job::new(record.bucket_name(), record.object_key())
    }
}

/// All jobs decoded from one inbound message.
///
/// A batch always holds at least one job; the message is retired once every
/// job has produced a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobBatch {
    pub message: JobMessage,
    pub jobs: Vec<Job>,
}

impl JobBatch {
    /// Build a batch from decoded records. Returns `None` when there are no records.
    pub fn from_records(message: JobMessage, records: &[EventRecord]) -> Option<Self> {
        if records.is_empty() {
            return None;
        }
        Some(Self {
            message,
            jobs: records.iter().map(Job::from).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Failure,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result reported to the outbound queue for every job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub file_key: String,
    pub job_id: JobId,
    pub status: JobStatus,
    pub status_message: String,
    /// Top words, only present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Words>,
    pub duration_ms: u64,
}

impl JobResult {
    pub fn success(job: &Job, words: Words) -> Self {
        Self {
            file_key: job.key.clone(),
            job_id: job.id,
            status: JobStatus::Success,
            status_message: "ok".to_string(),
            words: Some(words),
            duration_ms: millis(job.elapsed()),
        }
    }

    pub fn failure(job: &Job, message: impl Into<String>) -> Self {
        Self {
            file_key: job.key.clone(),
            job_id: job.id,
            status: JobStatus::Failure,
            status_message: message.into(),
            words: None,
            duration_ms: millis(job.elapsed()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
