//! Message and error types for the pipeline supervisor.

use ractor::RpcReplyPort;

use crate::backends::QueueError;
use crate::parser::ParserStats;
use crate::runner::RunnerStats;

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// The parser task returned.
    ParserExited {
        stats: ParserStats,
        result: Result<(), PipelineError>,
    },

    /// The runner task returned. `stats` is `None` if it panicked.
    RunnerExited { stats: Option<RunnerStats> },

    /// Get the current task status.
    GetStatus { reply: RpcReplyPort<PipelineStatus> },

    /// Stop polling and let the runner finish its current batch.
    Shutdown,
}

/// Snapshot of the supervised tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStatus {
    pub parser_running: bool,
    pub runner_running: bool,
    pub parser_restarts: u32,
    pub cancelled: bool,
}

/// Final report delivered on the completion signal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    /// Parser counters summed over all restarts.
    pub parser: ParserStats,
    pub runner: RunnerStats,
    pub parser_restarts: u32,
    /// Error of the parser's final exit, if it did not stop cleanly.
    pub parser_error: Option<String>,
    pub runner_panicked: bool,
}

/// Error type for pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("inbound queue poll failed: {0}")]
    Poll(#[source] QueueError),

    #[error("handoff queue closed by the runner")]
    HandoffClosed,

    #[error("{0} task panicked")]
    TaskPanicked(&'static str),

    #[error("failed to start supervisor: {0}")]
    Spawn(#[from] ractor::SpawnErr),

    #[error("pipeline stopped without reporting completion")]
    CompletionLost,
}
