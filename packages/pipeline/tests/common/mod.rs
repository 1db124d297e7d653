#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::Bytes;
use pipeline::{InboundMessage, InboundQueue, ObjectSource, PollRequest, QueueError, ResultSink};
use serde_json::json;
use storage::{ObjectReader, Storage, StorageConfig, StorageError};
use tokio::io::{AsyncRead, BufReader, ReadBuf};
use wordfreq_core::{JobMessage, JobResult};

pub const INBOUND_URL: &str = "https://sqs.test/inbound";
pub const BUCKET: &str = "uploads";

/// Side effect observed on one of the fake backends, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Sent(String),
    Removed(String),
    Deleted(String),
}

#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Event>>>);

impl Journal {
    fn record(&self, event: Event) {
        if let Ok(mut events) = self.0.lock() {
            events.push(event);
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Deleted(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

/// What a [`ScriptedQueue`] returns once its script runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhenExhausted {
    Fail,
    Empty,
}

pub type PollResult = Result<Vec<InboundMessage>, String>;

/// Inbound queue that replays a fixed sequence of poll results.
pub struct ScriptedQueue {
    script: Mutex<VecDeque<PollResult>>,
    exhausted: WhenExhausted,
    polls: Mutex<Vec<PollRequest>>,
    journal: Journal,
}

impl ScriptedQueue {
    pub fn new(script: Vec<PollResult>, exhausted: WhenExhausted, journal: Journal) -> Self {
        Self {
            script: Mutex::new(script.into()),
            exhausted,
            polls: Mutex::new(Vec::new()),
            journal,
        }
    }

    pub fn poll_count(&self) -> usize {
        self.polls.lock().map(|p| p.len()).unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<PollRequest> {
        self.polls.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl InboundQueue for ScriptedQueue {
    async fn poll(&self, request: &PollRequest) -> Result<Vec<InboundMessage>, QueueError> {
        if let Ok(mut polls) = self.polls.lock() {
            polls.push(*request);
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        let next = match (next, self.exhausted) {
            (Some(next), _) => next,
            (None, WhenExhausted::Empty) => Ok(Vec::new()),
            (None, WhenExhausted::Fail) => Err("script exhausted".to_string()),
        };
        next.map_err(|reason| QueueError::Receive {
            queue_url: INBOUND_URL.to_string(),
            reason,
        })
    }

    async fn delete(&self, message: &JobMessage) -> Result<(), QueueError> {
        self.journal.record(Event::Deleted(message.id.clone()));
        Ok(())
    }
}

/// Result sink that keeps every result it is given.
pub struct RecordingSink {
    results: Mutex<Vec<JobResult>>,
    fail: bool,
    journal: Journal,
}

impl RecordingSink {
    pub fn new(journal: Journal) -> Self {
        Self {
            results: Mutex::new(Vec::new()),
            fail: false,
            journal,
        }
    }

    pub fn failing(journal: Journal) -> Self {
        Self {
            fail: true,
            ..Self::new(journal)
        }
    }

    pub fn results(&self) -> Vec<JobResult> {
        self.results.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl ResultSink for RecordingSink {
    async fn send(&self, result: &JobResult) -> Result<(), QueueError> {
        if self.fail {
            return Err(QueueError::Send {
                queue_url: "https://sqs.test/outbound".to_string(),
                reason: "unavailable".to_string(),
            });
        }
        self.journal.record(Event::Sent(result.file_key.clone()));
        if let Ok(mut results) = self.results.lock() {
            results.push(result.clone());
        }
        Ok(())
    }
}

/// Result sink that panics on the first result, taking the runner down.
pub struct PanickingSink;

impl ResultSink for PanickingSink {
    async fn send(&self, result: &JobResult) -> Result<(), QueueError> {
        panic!("result sink crashed on {}", result.file_key);
    }
}

/// Reader whose connection drops on the first read.
struct BrokenReader;

impl AsyncRead for BrokenReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
    }
}

/// In-memory storage that journals removals.
pub struct JournaledStore {
    storage: Storage,
    fail_removes: bool,
    unreadable: HashSet<String>,
    journal: Journal,
}

impl JournaledStore {
    pub fn new(journal: Journal) -> Result<Self, StorageError> {
        Ok(Self {
            storage: Storage::new(StorageConfig::memory())?,
            fail_removes: false,
            unreadable: HashSet::new(),
            journal,
        })
    }

    /// Opening `key` succeeds but reading it fails.
    pub fn with_unreadable(mut self, key: &str) -> Self {
        self.unreadable.insert(key.to_string());
        self
    }

    pub fn with_failing_removes(mut self) -> Self {
        self.fail_removes = true;
        self
    }

    pub async fn put(&self, key: &str, content: impl Into<Bytes>) -> Result<(), StorageError> {
        self.storage.put_bytes(BUCKET, key, content.into()).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.storage.exists(BUCKET, key).await
    }
}

impl ObjectSource for JournaledStore {
    type Reader = ObjectReader;
    type Error = StorageError;

    async fn fetch(&self, bucket: &str, key: &str) -> Result<ObjectReader, StorageError> {
        if self.unreadable.contains(key) {
            return Ok(Box::new(BufReader::new(BrokenReader)));
        }
        self.storage.fetch(bucket, key).await
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.journal.record(Event::Removed(key.to_string()));
        if self.fail_removes {
            return Err(StorageError::InvalidConfig("removal refused".to_string()));
        }
        self.storage.remove(bucket, key).await
    }
}

pub fn message(id: &str) -> JobMessage {
    JobMessage::new(id, format!("receipt-{id}"), INBOUND_URL)
}

pub fn inbound(id: &str, body: impl Into<String>) -> InboundMessage {
    InboundMessage {
        message: message(id),
        body: body.into(),
    }
}

/// Notification body with one `ObjectCreated:Put` record per key.
pub fn records_body(keys: &[&str]) -> String {
    let records: Vec<_> = keys
        .iter()
        .map(|key| {
            json!({
                "eventVersion": "2.1",
                "eventSource": "aws:s3",
                "awsRegion": "us-east-1",
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": { "name": BUCKET, "arn": format!("arn:aws:s3:::{BUCKET}") },
                    "object": { "key": key, "size": 1 }
                }
            })
        })
        .collect();
    json!({ "Records": records }).to_string()
}

pub fn test_event_body() -> String {
    json!({
        "Service": "Amazon S3",
        "Event": "s3:TestEvent",
        "Time": "2024-03-01T12:00:00.000Z",
        "Bucket": BUCKET
    })
    .to_string()
}
