use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use pipeline::sqs::{SqsQueue, SqsResultSink, sqs_client};
use pipeline::{PipelineConfig, RestartPolicy, SupervisorMessage, start_pipeline};
use storage::Storage;
use tracing_subscriber::EnvFilter;

/// Word-frequency worker: counts words in uploaded objects announced on a queue.
#[derive(Debug, Parser)]
#[command(name = "wordfreq-worker", version)]
struct Args {
    /// Queue receiving storage event notifications.
    #[arg(long, env = "INBOUND_QUEUE_URL")]
    inbound_queue_url: String,

    /// Queue job results are sent to.
    #[arg(long, env = "OUTBOUND_QUEUE_URL")]
    outbound_queue_url: String,

    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    region: String,

    /// Override the message visibility timeout, in seconds.
    #[arg(long, env = "VISIBILITY_TIMEOUT", value_name = "SECONDS")]
    visibility_timeout: Option<u64>,

    /// Restart the parser this many times after a poll failure.
    #[arg(long, env = "PARSER_MAX_RESTARTS", default_value_t = 0)]
    parser_max_restarts: u32,

    /// Enable debug logging.
    #[arg(long, env = "DEBUG")]
    debug: bool,
}

impl Args {
    fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = PipelineConfig::new(
            &self.inbound_queue_url,
            &self.outbound_queue_url,
            &self.region,
        )?
        .with_debug(self.debug);

        if let Some(secs) = self.visibility_timeout {
            config = config.with_visibility_timeout(Duration::from_secs(secs))?;
        }
        if self.parser_max_restarts > 0 {
            config = config.with_restart_policy(RestartPolicy::OnFailure {
                max_restarts: self.parser_max_restarts,
                backoff: Duration::from_secs(5),
            });
        }
        Ok(config)
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(args.debug);

    let config = args.pipeline_config().context("invalid configuration")?;
    tracing::info!(
        inbound = %config.inbound_queue_url,
        outbound = %config.outbound_queue_url,
        region = %config.region,
        "Starting word-frequency worker"
    );

    let client = sqs_client(&config.region).await;
    let queue = Arc::new(SqsQueue::new(client.clone(), &config.inbound_queue_url));
    let results = Arc::new(SqsResultSink::new(client, &config.outbound_queue_url));
    let store = Arc::new(
        Storage::from_env(Some(&config.region)).context("invalid storage configuration")?,
    );
    tracing::info!(backend = store.kind_str(), "Storage ready");

    let handle = start_pipeline(config, queue, store, results).await?;

    let supervisor = handle.supervisor();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            let _ = supervisor.send_message(SupervisorMessage::Shutdown);
        }
    });

    let summary = handle.wait().await?;
    tracing::info!(
        batches = summary.runner.batches,
        succeeded = summary.runner.succeeded,
        failed = summary.runner.failed,
        discarded = summary.parser.discarded,
        restarts = summary.parser_restarts,
        "Worker stopped"
    );

    if let Some(error) = summary.parser_error {
        anyhow::bail!("pipeline stopped: {error}");
    }
    Ok(())
}
