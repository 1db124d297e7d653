//! Job runner: executes every job of a batch and retires the batch.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use wordfreq_core::{Job, JobBatch, JobResult, count_top_words};

use crate::backends::{InboundQueue, ObjectSource, ResultSink};
use crate::config::RunnerConfig;

/// Status message reported when an object cannot be read.
pub const FETCH_FAILED: &str = "failed to retrieve data";

/// Counters kept by the runner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerStats {
    /// Batches whose jobs all produced a result.
    pub batches: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Results that could not be delivered to the sink.
    pub unsent: u64,
}

/// Consumer half of the pipeline.
pub struct JobRunner<Q, O, R> {
    queue: Arc<Q>,
    store: Arc<O>,
    results: Arc<R>,
    batches: mpsc::Receiver<JobBatch>,
    config: RunnerConfig,
    cancel: CancellationToken,
    stats: RunnerStats,
}

impl<Q, O, R> JobRunner<Q, O, R>
where
    Q: InboundQueue,
    O: ObjectSource,
    R: ResultSink,
{
    pub fn new(
        queue: Arc<Q>,
        store: Arc<O>,
        results: Arc<R>,
        batches: mpsc::Receiver<JobBatch>,
        config: RunnerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            store,
            results,
            batches,
            config,
            cancel,
            stats: RunnerStats::default(),
        }
    }

    pub fn stats(&self) -> &RunnerStats {
        &self.stats
    }

    pub fn into_stats(self) -> RunnerStats {
        self.stats
    }

    /// Process batches until the handoff queue is closed and empty.
    ///
    /// Cancellation is checked between batches; a batch that has started is
    /// always finished.
    pub async fn run(&mut self) {
        tracing::info!(word_limit = self.config.word_limit, "Job runner started");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::info!("Job runner cancelled");
                    break;
                }
                next = self.batches.recv() => next,
            };
            let Some(batch) = next else {
                tracing::info!("Handoff queue closed, job runner finished");
                break;
            };

            let span = tracing::info_span!(
                "batch",
                message_id = %batch.message.id,
                jobs = batch.len()
            );
            self.process_batch(batch).instrument(span).await;
        }
    }

    async fn process_batch(&mut self, batch: JobBatch) {
        let JobBatch { message, jobs } = batch;

        for job in &jobs {
            let result = self.execute(job).await;
            self.report(&result).await;
            self.cleanup(job).await;
        }

        match self.queue.delete(&message).await {
            Ok(()) => tracing::debug!("Deleted batch message"),
            Err(e) => tracing::warn!(error = %e, "Failed to delete batch message"),
        }
        self.stats.batches += 1;
    }

    async fn execute(&self, job: &Job) -> JobResult {
        let reader = match self.store.fetch(&job.bucket, &job.key).await {
            Ok(reader) => reader,
            Err(e) => {
                tracing::warn!(
                    job_id = %job.id,
                    bucket = %job.bucket,
                    key = %job.key,
                    error = %e,
                    "Failed to retrieve object"
                );
                return JobResult::failure(job, FETCH_FAILED);
            }
        };

        match count_top_words(reader, self.config.word_limit).await {
            Ok(words) => {
                tracing::info!(
                    job_id = %job.id,
                    key = %job.key,
                    words = words.len(),
                    "Job completed"
                );
                JobResult::success(job, words)
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job.id,
                    key = %job.key,
                    error = %e,
                    "Failed to count words"
                );
                JobResult::failure(job, format!("failed to count words: {e}"))
            }
        }
    }

    async fn report(&mut self, result: &JobResult) {
        if result.is_success() {
            self.stats.succeeded += 1;
        } else {
            self.stats.failed += 1;
        }

        if let Err(e) = self.results.send(result).await {
            self.stats.unsent += 1;
            tracing::error!(job_id = %result.job_id, error = %e, "Failed to send job result");
        }
    }

    async fn cleanup(&self, job: &Job) {
        if let Err(e) = self.store.remove(&job.bucket, &job.key).await {
            tracing::warn!(
                job_id = %job.id,
                bucket = %job.bucket,
                key = %job.key,
                error = %e,
                "Failed to delete source object"
            );
        }
    }
}
