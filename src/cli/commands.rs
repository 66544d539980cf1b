//! CLI command definitions for precise-indexer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{
    IndexerConfig, ENV_AUTH_TOKEN, ENV_BUDGET_MAX, ENV_BUDGET_RESET_SECS, ENV_COMMAND,
    ENV_FRONTEND_URL, ENV_FRONTEND_URL_FROM_DOCKER, ENV_HEARTBEAT_SECS, ENV_IMAGE, ENV_NAME,
    ENV_NUM_WORKERS, ENV_POLL_INTERVAL_SECS, ENV_SHUTDOWN_TIMEOUT_SECS, ENV_WORKSPACE_ROOT,
};
use crate::execution::ProcessCommander;
use crate::indexer::Indexer;
use crate::metrics::init_metrics;
use crate::queue::HttpQueueClient;

/// Precise code-intelligence indexer.
#[derive(Parser)]
#[command(name = "precise-indexer")]
#[command(about = "Pull index jobs from the queue, index them in a sandbox and upload the results")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the indexer until interrupted.
    Run(RunArgs),

    /// Validate configuration and print it without starting.
    #[command(name = "check-config")]
    CheckConfig(RunArgs),
}

/// Arguments for running an indexer.
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Frontend URL for the queue API and git fetches.
    #[arg(long, env = ENV_FRONTEND_URL)]
    pub frontend_url: String,

    /// Frontend URL as reachable from inside the sandbox container.
    #[arg(long, env = ENV_FRONTEND_URL_FROM_DOCKER)]
    pub frontend_url_from_docker: Option<String>,

    /// Token for the frontend's internal API.
    #[arg(long, env = ENV_AUTH_TOKEN, hide_env_values = true)]
    pub auth_token: String,

    /// Name reported to the queue service.
    #[arg(long, env = ENV_NAME)]
    pub name: Option<String>,

    /// Seconds between polls of an empty queue.
    #[arg(long, env = ENV_POLL_INTERVAL_SECS, default_value_t = 1)]
    pub poll_interval_secs: u64,

    /// Number of concurrent job slots.
    #[arg(short = 'j', long, env = ENV_NUM_WORKERS, default_value_t = 1)]
    pub num_workers: usize,

    /// Budget ceiling; 0 admits every job.
    #[arg(long, env = ENV_BUDGET_MAX, default_value_t = 0)]
    pub budget_max: i64,

    /// Seconds between budget resets; 0 never resets.
    #[arg(long, env = ENV_BUDGET_RESET_SECS, default_value_t = 0)]
    pub budget_reset_secs: u64,

    /// Seconds between heartbeats; 0 disables them.
    #[arg(long, env = ENV_HEARTBEAT_SECS, default_value_t = 5)]
    pub heartbeat_secs: u64,

    /// Seconds to wait for in-flight jobs on shutdown.
    #[arg(long, env = ENV_SHUTDOWN_TIMEOUT_SECS, default_value_t = 60)]
    pub shutdown_timeout_secs: u64,

    /// Sandbox image.
    #[arg(long, env = ENV_IMAGE, default_value = crate::execution::sandbox::DEFAULT_IMAGE)]
    pub image: String,

    /// Indexing command run inside the image.
    #[arg(long, env = ENV_COMMAND, default_value = crate::execution::sandbox::DEFAULT_INDEXER_COMMAND)]
    pub indexer_command: String,

    /// Parent directory for job workspaces.
    #[arg(long, env = ENV_WORKSPACE_ROOT)]
    pub workspace_root: Option<PathBuf>,

    /// Memory limit for the sandbox in MB; 0 means unlimited.
    #[arg(long, default_value_t = 0)]
    pub memory_mb: u64,

    /// CPU limit for the sandbox; 0 means unlimited.
    #[arg(long, default_value_t = 0.0)]
    pub cpus: f64,
}

impl RunArgs {
    /// Builds and validates the indexer configuration.
    pub fn to_config(&self) -> anyhow::Result<IndexerConfig> {
        let mut config = IndexerConfig::new(&self.frontend_url, &self.auth_token)
            .with_poll_interval(Duration::from_secs(self.poll_interval_secs))
            .with_num_workers(self.num_workers)
            .with_budget_max(self.budget_max)
            .with_budget_reset_interval(secs_or_none(self.budget_reset_secs))
            .with_heartbeat_interval(secs_or_none(self.heartbeat_secs))
            .with_shutdown_timeout(Duration::from_secs(self.shutdown_timeout_secs))
            .with_indexer_command(&self.indexer_command);

        if let Some(url) = &self.frontend_url_from_docker {
            config = config.with_frontend_url_from_docker(url);
        }
        if let Some(name) = &self.name {
            config = config.with_worker_name(name);
        }
        if let Some(root) = &self.workspace_root {
            config = config.with_workspace_root(root);
        }

        config.sandbox.image = self.image.clone();
        if self.memory_mb > 0 {
            config.sandbox = config.sandbox.with_memory_mb(self.memory_mb);
        }
        config.sandbox = config.sandbox.with_cpu_limit(self.cpus);

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn secs_or_none(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_indexer_command(args).await,
        Commands::CheckConfig(args) => run_check_config_command(args),
    }
}

async fn run_indexer_command(args: RunArgs) -> anyhow::Result<()> {
    let config = args.to_config()?;
    init_metrics().context("failed to register metrics")?;

    let client = HttpQueueClient::new(
        &config.frontend_url,
        config.worker_name.clone(),
        config.auth_token.clone(),
    )
    .context("failed to create queue client")?;

    let cancel = CancellationToken::new();
    let mut indexer = Indexer::new(
        config,
        Arc::new(client),
        Arc::new(ProcessCommander::new()),
        &cancel,
    );
    indexer.start()?;

    shutdown_signal().await?;
    info!("Shutdown signal received, waiting for in-flight jobs");

    let result = indexer.shutdown().await;
    let stats = indexer.stats();
    info!(
        completed = stats.jobs_completed,
        errored = stats.jobs_errored,
        requeued = stats.jobs_requeued,
        abandoned = stats.jobs_abandoned,
        "Indexer stopped"
    );
    result.context("indexer did not shut down cleanly")
}

fn run_check_config_command(args: RunArgs) -> anyhow::Result<()> {
    let config = args.to_config()?;
    println!("frontend_url: {}", config.frontend_url);
    println!("frontend_url_from_docker: {}", config.docker_frontend_url());
    println!("worker_name: {}", config.worker_name);
    println!("num_workers: {}", config.num_workers);
    println!("poll_interval: {:?}", config.poll_interval);
    println!("budget_max: {}", config.budget_max);
    println!("image: {}", config.sandbox.image);
    println!("indexer_command: {}", config.indexer_command);
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("failed to listen for Ctrl-C")?,
            _ = terminate.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")
    }
}
