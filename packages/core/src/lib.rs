//! Core domain types for the word-frequency pipeline.
//!
//! This crate contains the types shared by the pipeline packages:
//! - Job, JobBatch and JobResult carried from parser to runner
//! - Decoding of storage event notifications
//! - The word counter

pub mod events;
mod job;
pub mod words;

pub use events::{DecodeError, EventRecord, Notification};
pub use job::{Job, JobBatch, JobId, JobMessage, JobResult, JobStatus};
pub use words::{Word, WordTally, Words, count_top_words};
