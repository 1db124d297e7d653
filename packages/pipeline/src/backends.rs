//! External services the pipeline talks to.
//!
//! Implement these traits to plug the parser and runner into a message queue,
//! an object store and a result queue. Production implementations live in
//! [`crate::sqs`] and the `storage` crate.

use std::future::Future;
use std::time::Duration;

use storage::{ObjectReader, Storage, StorageError};
use tokio::io::AsyncBufRead;
use wordfreq_core::{JobMessage, JobResult};

/// Parameters of one long-poll receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollRequest {
    pub max_messages: u32,
    pub wait_time: Duration,
    pub visibility_timeout: Duration,
}

/// A message received from the inbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub message: JobMessage,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("receive from {queue_url} failed: {reason}")]
    Receive { queue_url: String, reason: String },

    #[error("delete of message {message_id} failed: {reason}")]
    Delete { message_id: String, reason: String },

    #[error("send to {queue_url} failed: {reason}")]
    Send { queue_url: String, reason: String },

    #[error("failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Queue the parser receives storage notifications from.
pub trait InboundQueue: Send + Sync + 'static {
    /// Long-poll for messages. An empty vector means nothing arrived in time.
    fn poll(
        &self,
        request: &PollRequest,
    ) -> impl Future<Output = Result<Vec<InboundMessage>, QueueError>> + Send;

    /// Acknowledge a message so it is not delivered again.
    fn delete(&self, message: &JobMessage) -> impl Future<Output = Result<(), QueueError>> + Send;
}

/// Storage holding the objects jobs refer to.
pub trait ObjectSource: Send + Sync + 'static {
    type Reader: AsyncBufRead + Unpin + Send;
    type Error: std::error::Error + Send + Sync + 'static;

    fn fetch(
        &self,
        bucket: &str,
        key: &str,
    ) -> impl Future<Output = Result<Self::Reader, Self::Error>> + Send;

    fn remove(&self, bucket: &str, key: &str)
    -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Destination for job results.
pub trait ResultSink: Send + Sync + 'static {
    fn send(&self, result: &JobResult) -> impl Future<Output = Result<(), QueueError>> + Send;
}

impl ObjectSource for Storage {
    type Reader = ObjectReader;
    type Error = StorageError;

    async fn fetch(&self, bucket: &str, key: &str) -> Result<ObjectReader, StorageError> {
        self.get_reader(bucket, key).await
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.delete(bucket, key).await
    }
}
