//! Pipeline configuration, built once at startup and passed to each task.

use std::time::Duration;

use crate::backends::PollRequest;

/// Longest visibility timeout the queue service accepts (12 hours).
pub const MAX_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

/// Longest long-poll wait the queue service accepts.
pub const MAX_WAIT_TIME: Duration = Duration::from_secs(20);

/// Most messages a single receive may return.
pub const MAX_MESSAGES_PER_POLL: u32 = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("visibility timeout of {0}s exceeds the 43200s maximum")]
    VisibilityTooLong(u64),

    #[error("handoff capacity must be at least 1")]
    ZeroCapacity,

    #[error("max messages per poll must be between 1 and 10, got {0}")]
    MaxMessages(u32),

    #[error("long-poll wait of {0}s exceeds the 20s maximum")]
    WaitTooLong(u64),
}

/// Settings for the job parser's poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserConfig {
    /// Messages requested per poll.
    pub max_messages: u32,
    /// Long-poll wait.
    pub wait_time: Duration,
    /// How long a received message stays hidden from other consumers.
    pub visibility_timeout: Duration,
    /// Sleep after a poll that returned nothing.
    pub idle_backoff: Duration,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_messages: 5,
            wait_time: Duration::from_secs(15),
            visibility_timeout: Duration::from_secs(30),
            idle_backoff: Duration::from_secs(10),
        }
    }
}

impl ParserConfig {
    /// Check the poll parameters against the queue service's limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_MESSAGES_PER_POLL).contains(&self.max_messages) {
            return Err(ConfigError::MaxMessages(self.max_messages));
        }
        if self.wait_time > MAX_WAIT_TIME {
            return Err(ConfigError::WaitTooLong(self.wait_time.as_secs()));
        }
        if self.visibility_timeout > MAX_VISIBILITY_TIMEOUT {
            return Err(ConfigError::VisibilityTooLong(
                self.visibility_timeout.as_secs(),
            ));
        }
        Ok(())
    }

    pub fn poll_request(&self) -> PollRequest {
        PollRequest {
            max_messages: self.max_messages,
            wait_time: self.wait_time,
            visibility_timeout: self.visibility_timeout,
        }
    }
}

/// Settings for the job runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Number of top words reported per job.
    pub word_limit: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { word_limit: 10 }
    }
}

/// What the supervisor does when the parser stops on a poll error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Let the pipeline drain and stop.
    #[default]
    Never,
    /// Restart the parser up to `max_restarts` times, waiting `backoff` first.
    OnFailure { max_restarts: u32, backoff: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub inbound_queue_url: String,
    pub outbound_queue_url: String,
    pub region: String,
    pub debug: bool,
    pub parser: ParserConfig,
    pub runner: RunnerConfig,
    pub restart: RestartPolicy,
    /// Batches that may wait between parser and runner.
    pub handoff_capacity: usize,
}

impl PipelineConfig {
    pub fn new(
        inbound_queue_url: impl Into<String>,
        outbound_queue_url: impl Into<String>,
        region: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let inbound_queue_url = required(inbound_queue_url.into(), "inbound queue url")?;
        let outbound_queue_url = required(outbound_queue_url.into(), "outbound queue url")?;
        let region = required(region.into(), "region")?;

        Ok(Self {
            inbound_queue_url,
            outbound_queue_url,
            region,
            debug: false,
            parser: ParserConfig::default(),
            runner: RunnerConfig::default(),
            restart: RestartPolicy::default(),
            handoff_capacity: 1,
        })
    }

    /// Override the visibility timeout used when polling.
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Result<Self, ConfigError> {
        if timeout > MAX_VISIBILITY_TIMEOUT {
            return Err(ConfigError::VisibilityTooLong(timeout.as_secs()));
        }
        self.parser.visibility_timeout = timeout;
        Ok(self)
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_restart_policy(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_parser(mut self, parser: ParserConfig) -> Result<Self, ConfigError> {
        parser.validate()?;
        self.parser = parser;
        Ok(self)
    }

    pub fn with_handoff_capacity(mut self, capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        self.handoff_capacity = capacity;
        Ok(self)
    }
}

fn required(value: String, name: &'static str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ConfigError::Missing(name))
    } else {
        Ok(trimmed.to_string())
    }
}
