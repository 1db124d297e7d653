//! Supervisor actor that owns the parser and runner tasks.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use wordfreq_core::JobBatch;

use crate::backends::{InboundQueue, ObjectSource, ResultSink};
use crate::config::{PipelineConfig, RestartPolicy};
use crate::messages::{PipelineError, PipelineStatus, PipelineSummary, SupervisorMessage};
use crate::parser::{JobParser, ParserStats};
use crate::runner::JobRunner;

/// Supervisor arguments.
pub struct SupervisorArgs<Q, O, R> {
    pub config: PipelineConfig,
    pub queue: Arc<Q>,
    pub store: Arc<O>,
    pub results: Arc<R>,
    pub completion: oneshot::Sender<PipelineSummary>,
}

/// State for the supervisor actor.
pub struct SupervisorState<Q> {
    config: PipelineConfig,
    queue: Arc<Q>,
    /// Kept so a restarted parser can reuse the handoff queue. Dropping it
    /// closes the queue once no parser holds a clone.
    batch_tx: Option<mpsc::Sender<JobBatch>>,
    cancel: CancellationToken,
    parser_running: bool,
    runner_running: bool,
    summary: PipelineSummary,
    completion: Option<oneshot::Sender<PipelineSummary>>,
}

impl<Q> SupervisorState<Q> {
    fn status(&self) -> PipelineStatus {
        PipelineStatus {
            parser_running: self.parser_running,
            runner_running: self.runner_running,
            parser_restarts: self.summary.parser_restarts,
            cancelled: self.cancel.is_cancelled(),
        }
    }

    fn should_restart(&self, error: &PipelineError) -> Option<Duration> {
        if self.cancel.is_cancelled() || !matches!(error, PipelineError::Poll(_)) {
            return None;
        }
        match self.config.restart {
            RestartPolicy::Never => None,
            RestartPolicy::OnFailure {
                max_restarts,
                backoff,
            } => (self.summary.parser_restarts < max_restarts).then_some(backoff),
        }
    }

    fn close_handoff(&mut self) {
        if self.batch_tx.take().is_some() {
            tracing::debug!("Closing handoff queue");
        }
    }
}

fn spawn_parser<Q: InboundQueue>(
    myself: ActorRef<SupervisorMessage>,
    state: &mut SupervisorState<Q>,
    delay: Duration,
) {
    let Some(batches) = state.batch_tx.clone() else {
        return;
    };
    let mut parser = JobParser::new(
        state.queue.clone(),
        state.config.parser.clone(),
        batches,
        state.cancel.clone(),
    );
    let cancel = state.cancel.clone();
    state.parser_running = true;

    let task = tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return (parser.into_stats(), Ok(())),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        let result = parser.run().await;
        (parser.into_stats(), result)
    });

    tokio::spawn(async move {
        let (stats, result) = match task.await {
            Ok(exit) => exit,
            Err(e) => {
                tracing::error!("Job parser task failed: {}", e);
                (ParserStats::default(), Err(PipelineError::TaskPanicked("parser")))
            }
        };
        let _ = myself.send_message(SupervisorMessage::ParserExited { stats, result });
    });
}

fn spawn_runner<Q, O, R>(myself: ActorRef<SupervisorMessage>, mut runner: JobRunner<Q, O, R>)
where
    Q: InboundQueue,
    O: ObjectSource,
    R: ResultSink,
{
    let task = tokio::spawn(async move {
        runner.run().await;
        runner.into_stats()
    });

    tokio::spawn(async move {
        let stats = match task.await {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::error!("Job runner task failed: {}", e);
                None
            }
        };
        let _ = myself.send_message(SupervisorMessage::RunnerExited { stats });
    });
}

/// Supervisor actor that starts the parser and runner and reports completion.
///
/// The runner is never restarted. The parser is restarted after a poll
/// failure only if the configured [`RestartPolicy`] allows it.
pub struct Supervisor<Q, O, R> {
    _backends: PhantomData<fn() -> (Q, O, R)>,
}

impl<Q, O, R> Supervisor<Q, O, R> {
    pub fn new() -> Self {
        Self {
            _backends: PhantomData,
        }
    }
}

impl<Q, O, R> Default for Supervisor<Q, O, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Q, O, R> Actor for Supervisor<Q, O, R>
where
    Q: InboundQueue,
    O: ObjectSource,
    R: ResultSink,
{
    type Msg = SupervisorMessage;
    type State = SupervisorState<Q>;
    type Arguments = SupervisorArgs<Q, O, R>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting pipeline supervisor");

        let (batch_tx, batch_rx) = mpsc::channel(args.config.handoff_capacity.max(1));
        let cancel = CancellationToken::new();

        let runner = JobRunner::new(
            args.queue.clone(),
            args.store,
            args.results,
            batch_rx,
            args.config.runner.clone(),
            cancel.clone(),
        );
        spawn_runner(myself.clone(), runner);

        let mut state = SupervisorState {
            config: args.config,
            queue: args.queue,
            batch_tx: Some(batch_tx),
            cancel,
            parser_running: false,
            runner_running: true,
            summary: PipelineSummary::default(),
            completion: Some(args.completion),
        };
        spawn_parser(myself, &mut state, Duration::ZERO);

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::ParserExited { stats, result } => {
                state.parser_running = false;
                state.summary.parser.merge(stats);

                match result {
                    Ok(()) => {
                        tracing::info!("Job parser stopped");
                        state.summary.parser_error = None;
                        state.close_handoff();
                    }
                    Err(e) => {
                        tracing::warn!("Job parser exited: {}", e);
                        let backoff = state.should_restart(&e);
                        state.summary.parser_error = Some(e.to_string());

                        if let Some(backoff) = backoff {
                            state.summary.parser_restarts += 1;
                            tracing::info!(
                                attempt = state.summary.parser_restarts,
                                backoff_secs = backoff.as_secs(),
                                "Restarting job parser"
                            );
                            spawn_parser(myself.clone(), state, backoff);
                        } else {
                            state.close_handoff();
                        }
                    }
                }
            }

            SupervisorMessage::RunnerExited { stats } => {
                state.runner_running = false;
                match stats {
                    Some(stats) => state.summary.runner = stats,
                    None => state.summary.runner_panicked = true,
                }
                // Nothing consumes batches any more.
                state.cancel.cancel();
                state.close_handoff();
            }

            SupervisorMessage::GetStatus { reply } => {
                let _ = reply.send(state.status());
            }

            SupervisorMessage::Shutdown => {
                tracing::info!("Shutting down pipeline");
                state.cancel.cancel();
            }
        }

        if !state.parser_running && !state.runner_running {
            tracing::info!(
                batches = state.summary.runner.batches,
                succeeded = state.summary.runner.succeeded,
                failed = state.summary.runner.failed,
                "Pipeline drained"
            );
            if let Some(completion) = state.completion.take() {
                let _ = completion.send(state.summary.clone());
            }
            myself.stop(None);
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.cancel.cancel();
        Ok(())
    }
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    supervisor: ActorRef<SupervisorMessage>,
    completion: oneshot::Receiver<PipelineSummary>,
    join: tokio::task::JoinHandle<()>,
}

impl PipelineHandle {
    pub fn supervisor(&self) -> ActorRef<SupervisorMessage> {
        self.supervisor.clone()
    }

    /// Ask the pipeline to stop. Use [`PipelineHandle::wait`] to wait for it.
    pub fn shutdown(&self) {
        let _ = self.supervisor.send_message(SupervisorMessage::Shutdown);
    }

    /// Current task status, or `None` if the supervisor has stopped.
    pub async fn status(&self) -> Option<PipelineStatus> {
        let timeout = Duration::from_secs(5);
        let result = ractor::rpc::call(
            &self.supervisor,
            |reply| SupervisorMessage::GetStatus { reply },
            Some(timeout),
        )
        .await;
        match result {
            Ok(ractor::rpc::CallResult::Success(status)) => Some(status),
            _ => None,
        }
    }

    /// Wait for the pipeline to drain.
    pub async fn wait(self) -> Result<PipelineSummary, PipelineError> {
        let summary = self
            .completion
            .await
            .map_err(|_| PipelineError::CompletionLost)?;
        if let Err(e) = self.join.await {
            tracing::warn!("Supervisor task ended abnormally: {}", e);
        }
        Ok(summary)
    }
}

/// Start the supervisor, which spawns the parser and runner.
pub async fn start_pipeline<Q, O, R>(
    config: PipelineConfig,
    queue: Arc<Q>,
    store: Arc<O>,
    results: Arc<R>,
) -> Result<PipelineHandle, PipelineError>
where
    Q: InboundQueue,
    O: ObjectSource,
    R: ResultSink,
{
    let (completion_tx, completion) = oneshot::channel();
    let args = SupervisorArgs {
        config,
        queue,
        store,
        results,
        completion: completion_tx,
    };

    let (supervisor, join) = Actor::spawn(None, Supervisor::new(), args).await?;

    Ok(PipelineHandle {
        supervisor,
        completion,
        join,
    })
}

/// Run the pipeline until it drains.
pub async fn run_pipeline<Q, O, R>(
    config: PipelineConfig,
    queue: Arc<Q>,
    store: Arc<O>,
    results: Arc<R>,
) -> Result<PipelineSummary, PipelineError>
where
    Q: InboundQueue,
    O: ObjectSource,
    R: ResultSink,
{
    start_pipeline(config, queue, store, results)
        .await?
        .wait()
        .await
}
