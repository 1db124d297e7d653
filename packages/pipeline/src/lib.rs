//! Batch job pipeline for the word-frequency service.
//!
//! A parser task drains storage notifications from an inbound queue and hands
//! job batches to a runner task, which counts words in each object, reports a
//! result per job and cleans up.
//!
//! # Architecture
//!
//! - `Supervisor` - Ractor actor that owns both tasks and the handoff queue
//! - `JobParser` - Polls the inbound queue and builds batches
//! - `JobRunner` - Executes batches and retires their messages
//!
//! # Usage
//!
//! ```ignore
//! use pipeline::{PipelineConfig, run_pipeline};
//!
//! let config = PipelineConfig::new(inbound_url, outbound_url, "us-east-1")?;
//! let summary = run_pipeline(config, queue, store, results).await?;
//! ```

pub mod backends;
pub mod config;
mod messages;
mod parser;
mod runner;
pub mod sqs;
mod supervisor;

pub use backends::{
    InboundMessage, InboundQueue, ObjectSource, PollRequest, QueueError, ResultSink,
};
pub use config::{ConfigError, ParserConfig, PipelineConfig, RestartPolicy, RunnerConfig};
pub use messages::{PipelineError, PipelineStatus, PipelineSummary, SupervisorMessage};
pub use parser::{JobParser, ParserStats};
pub use runner::{FETCH_FAILED, JobRunner, RunnerStats};
pub use supervisor::{PipelineHandle, Supervisor, SupervisorArgs, run_pipeline, start_pipeline};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef};
