//! SQS implementations of the queue backends.

use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_sdk_sqs::Client;
use aws_sdk_sqs::config::Region;
use aws_sdk_sqs::error::DisplayErrorContext;
use wordfreq_core::{JobMessage, JobResult};

use crate::backends::{InboundMessage, InboundQueue, PollRequest, QueueError, ResultSink};

/// Build an SQS client for `region` using the default credential chain.
pub async fn sqs_client(region: &str) -> Client {
    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await;
    Client::new(&config)
}

/// Inbound notification queue.
#[derive(Debug, Clone)]
pub struct SqsQueue {
    client: Client,
    queue_url: String,
}

impl SqsQueue {
    pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

impl InboundQueue for SqsQueue {
    async fn poll(&self, request: &PollRequest) -> Result<Vec<InboundMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(i32::try_from(request.max_messages).unwrap_or(i32::MAX))
            .wait_time_seconds(whole_seconds(request.wait_time))
            .visibility_timeout(whole_seconds(request.visibility_timeout))
            .send()
            .await
            .map_err(|e| QueueError::Receive {
                queue_url: self.queue_url.clone(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        let mut messages = Vec::new();
        for msg in output.messages.unwrap_or_default() {
            let id = msg.message_id.unwrap_or_default();
            let Some(receipt_handle) = msg.receipt_handle else {
                tracing::warn!(
                    message_id = %id,
                    "Received message without receipt handle, skipping"
                );
                continue;
            };
            messages.push(InboundMessage {
                message: JobMessage::new(id, receipt_handle, self.queue_url.clone()),
                body: msg.body.unwrap_or_default(),
            });
        }
        Ok(messages)
    }

    async fn delete(&self, message: &JobMessage) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&message.queue_url)
            .receipt_handle(&message.receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Delete {
                message_id: message.id.clone(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }
}

/// Outbound queue receiving serialized job results.
#[derive(Debug, Clone)]
pub struct SqsResultSink {
    client: Client,
    queue_url: String,
}

impl SqsResultSink {
    pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }
}

impl ResultSink for SqsResultSink {
    async fn send(&self, result: &JobResult) -> Result<(), QueueError> {
        let body = serde_json::to_string(result)?;
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| QueueError::Send {
                queue_url: self.queue_url.clone(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }
}

fn whole_seconds(d: Duration) -> i32 {
    i32::try_from(d.as_secs()).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_clamp_to_i32() {
        assert_eq!(whole_seconds(Duration::from_millis(15_900)), 15);
        assert_eq!(whole_seconds(Duration::from_secs(u64::MAX)), i32::MAX);
    }
}
