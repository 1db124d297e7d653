//! Job parser: turns inbound notifications into job batches.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wordfreq_core::events::{self, Notification};
use wordfreq_core::{JobBatch, JobMessage};

use crate::backends::{InboundMessage, InboundQueue};
use crate::config::ParserConfig;
use crate::messages::PipelineError;

/// Counters kept by the parser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserStats {
    pub polls: u64,
    pub empty_polls: u64,
    /// Batches handed to the runner.
    pub batches: u64,
    /// Messages deleted without producing a batch.
    pub discarded: u64,
}

impl ParserStats {
    pub fn merge(&mut self, other: ParserStats) {
        self.polls += other.polls;
        self.empty_polls += other.empty_polls;
        self.batches += other.batches;
        self.discarded += other.discarded;
    }
}

/// Producer half of the pipeline.
///
/// Polls the inbound queue until the poll fails, the runner goes away or the
/// cancellation token fires.
pub struct JobParser<Q> {
    queue: Arc<Q>,
    config: ParserConfig,
    batches: mpsc::Sender<JobBatch>,
    cancel: CancellationToken,
    stats: ParserStats,
}

impl<Q: InboundQueue> JobParser<Q> {
    pub fn new(
        queue: Arc<Q>,
        config: ParserConfig,
        batches: mpsc::Sender<JobBatch>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            config,
            batches,
            cancel,
            stats: ParserStats::default(),
        }
    }

    pub fn stats(&self) -> &ParserStats {
        &self.stats
    }

    /// Consume the parser, releasing its handoff sender.
    pub fn into_stats(self) -> ParserStats {
        self.stats
    }

    /// Run the poll loop.
    ///
    /// Returns `Ok(())` when cancelled. Messages that were received but not
    /// yet handed off at that point are left for redelivery.
    pub async fn run(&mut self) -> Result<(), PipelineError> {
        let request = self.config.poll_request();
        tracing::info!(
            max_messages = request.max_messages,
            wait_secs = request.wait_time.as_secs(),
            visibility_secs = request.visibility_timeout.as_secs(),
            "Job parser started"
        );

        loop {
            let polled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                polled = self.queue.poll(&request) => Some(polled),
            };
            let Some(polled) = polled else {
                tracing::info!("Job parser cancelled");
                return Ok(());
            };

            self.stats.polls += 1;
            let messages = polled.map_err(|e| {
                tracing::error!(error = %e, "Polling inbound queue failed, stopping parser");
                PipelineError::Poll(e)
            })?;

            if messages.is_empty() {
                self.stats.empty_polls += 1;
                tracing::debug!(
                    backoff_secs = self.config.idle_backoff.as_secs(),
                    "No messages received"
                );
                let cancelled = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => true,
                    _ = tokio::time::sleep(self.config.idle_backoff) => false,
                };
                if cancelled {
                    tracing::info!("Job parser cancelled");
                    return Ok(());
                }
                continue;
            }

            tracing::debug!(count = messages.len(), "Received messages");
            for inbound in messages {
                let Some(batch) = self.parse(inbound).await else {
                    continue;
                };
                if !self.hand_off(batch).await? {
                    tracing::info!("Job parser cancelled during handoff");
                    return Ok(());
                }
            }
        }
    }

    /// Decode one message. Messages that carry no jobs are deleted here.
    async fn parse(&mut self, inbound: InboundMessage) -> Option<JobBatch> {
        let InboundMessage { message, body } = inbound;

        let records = match events::decode(&body) {
            Ok(Notification::Records(records)) if !records.is_empty() => records,
            Ok(Notification::Records(_)) => {
                tracing::info!(message_id = %message.id, "Notification has no records, discarding");
                self.discard(&message).await;
                return None;
            }
            Ok(Notification::Test) => {
                tracing::info!(message_id = %message.id, "Discarding test notification");
                self.discard(&message).await;
                return None;
            }
            Err(e) => {
                tracing::warn!(
                    message_id = %message.id,
                    error = %e,
                    "Undecodable notification, discarding"
                );
                self.discard(&message).await;
                return None;
            }
        };

        let batch = JobBatch::from_records(message, &records)?;
        tracing::debug!(
            message_id = %batch.message.id,
            jobs = batch.len(),
            "Parsed job batch"
        );
        Some(batch)
    }

    async fn discard(&mut self, message: &JobMessage) {
        self.stats.discarded += 1;
        if let Err(e) = self.queue.delete(message).await {
            tracing::warn!(
                message_id = %message.id,
                error = %e,
                "Failed to delete discarded message"
            );
        }
    }

    /// Send a batch to the runner. Returns `Ok(false)` if cancelled while waiting.
    async fn hand_off(&mut self, batch: JobBatch) -> Result<bool, PipelineError> {
        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            sent = self.batches.send(batch) => Some(sent),
        };
        match sent {
            None => Ok(false),
            Some(Ok(())) => {
                self.stats.batches += 1;
                Ok(true)
            }
            Some(Err(_)) => {
                tracing::error!("Handoff queue closed, stopping parser");
                Err(PipelineError::HandoffClosed)
            }
        }
    }
}
