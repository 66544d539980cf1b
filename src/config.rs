//! Indexer configuration.
//!
//! Every setting has an environment variable prefixed with
//! `PRECISE_INDEXER_`; the CLI mirrors them as flags.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;
use uuid::Uuid;

use crate::execution::sandbox::{SandboxConfig, DEFAULT_IMAGE, DEFAULT_INDEXER_COMMAND};
use crate::scheduler::WorkerPoolConfig;

pub const ENV_FRONTEND_URL: &str = "PRECISE_INDEXER_FRONTEND_URL";
pub const ENV_FRONTEND_URL_FROM_DOCKER: &str = "PRECISE_INDEXER_FRONTEND_URL_FROM_DOCKER";
pub const ENV_AUTH_TOKEN: &str = "PRECISE_INDEXER_AUTH_TOKEN";
pub const ENV_NAME: &str = "PRECISE_INDEXER_NAME";
pub const ENV_POLL_INTERVAL_SECS: &str = "PRECISE_INDEXER_POLL_INTERVAL_SECS";
pub const ENV_NUM_WORKERS: &str = "PRECISE_INDEXER_NUM_WORKERS";
pub const ENV_BUDGET_MAX: &str = "PRECISE_INDEXER_BUDGET_MAX";
pub const ENV_BUDGET_RESET_SECS: &str = "PRECISE_INDEXER_BUDGET_RESET_SECS";
pub const ENV_HEARTBEAT_SECS: &str = "PRECISE_INDEXER_HEARTBEAT_SECS";
pub const ENV_SHUTDOWN_TIMEOUT_SECS: &str = "PRECISE_INDEXER_SHUTDOWN_TIMEOUT_SECS";
pub const ENV_IMAGE: &str = "PRECISE_INDEXER_IMAGE";
pub const ENV_COMMAND: &str = "PRECISE_INDEXER_COMMAND";
pub const ENV_WORKSPACE_ROOT: &str = "PRECISE_INDEXER_WORKSPACE_ROOT";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for one indexer process.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    // Queue service
    /// Frontend URL used for the queue API and git fetches.
    pub frontend_url: String,
    /// Frontend URL as reachable from inside the sandbox container.
    pub frontend_url_from_docker: Option<String>,
    /// Token for the frontend's internal API.
    pub auth_token: String,
    /// Name this process reports to the queue service.
    pub worker_name: String,

    // Scheduling
    /// Delay between polls when the queue is empty or unreachable.
    pub poll_interval: Duration,
    /// Number of concurrent job slots.
    pub num_workers: usize,
    /// Budget ceiling. Zero disables admission control.
    pub budget_max: i64,
    /// How often the budget is restored to its ceiling, if ever.
    pub budget_reset_interval: Option<Duration>,
    /// How often in-flight job ids are reported, if ever.
    pub heartbeat_interval: Option<Duration>,
    /// How long shutdown waits for in-flight jobs.
    pub shutdown_timeout: Duration,

    // Execution
    /// Sandbox container settings.
    pub sandbox: SandboxConfig,
    /// Indexing command run inside the container.
    pub indexer_command: String,
    /// Parent directory for job workspaces. Defaults to the system temp dir.
    pub workspace_root: Option<PathBuf>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            frontend_url: String::new(),
            frontend_url_from_docker: None,
            auth_token: String::new(),
            worker_name: default_worker_name(std::env::var("HOSTNAME").ok()),

            poll_interval: Duration::from_secs(1),
            num_workers: 1,
            budget_max: 0,
            budget_reset_interval: None,
            heartbeat_interval: Some(Duration::from_secs(5)),
            shutdown_timeout: Duration::from_secs(60),

            sandbox: SandboxConfig::new(DEFAULT_IMAGE),
            indexer_command: DEFAULT_INDEXER_COMMAND.to_string(),
            workspace_root: None,
        }
    }
}

impl IndexerConfig {
    /// Creates a configuration for the given frontend and token.
    pub fn new(frontend_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            frontend_url: frontend_url.into(),
            auth_token: auth_token.into(),
            ..Self::default()
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PRECISE_INDEXER_FRONTEND_URL`: Frontend URL (required)
    /// - `PRECISE_INDEXER_FRONTEND_URL_FROM_DOCKER`: Frontend URL inside containers (default: frontend URL)
    /// - `PRECISE_INDEXER_AUTH_TOKEN`: Internal API token (required)
    /// - `PRECISE_INDEXER_NAME`: Worker name (default: `<hostname>-<random>`)
    /// - `PRECISE_INDEXER_POLL_INTERVAL_SECS`: Poll interval (default: 1)
    /// - `PRECISE_INDEXER_NUM_WORKERS`: Concurrent slots (default: 1)
    /// - `PRECISE_INDEXER_BUDGET_MAX`: Budget ceiling, 0 disables (default: 0)
    /// - `PRECISE_INDEXER_BUDGET_RESET_SECS`: Budget reset period, 0 disables (default: unset)
    /// - `PRECISE_INDEXER_HEARTBEAT_SECS`: Heartbeat period, 0 disables (default: 5)
    /// - `PRECISE_INDEXER_SHUTDOWN_TIMEOUT_SECS`: Shutdown grace period (default: 60)
    /// - `PRECISE_INDEXER_IMAGE`: Sandbox image (default: sourcegraph/lsif-go:latest)
    /// - `PRECISE_INDEXER_COMMAND`: Indexing command (default: lsif-go)
    /// - `PRECISE_INDEXER_WORKSPACE_ROOT`: Workspace parent directory (default: system temp dir)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or have invalid values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`IndexerConfig::from_env`], reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            worker_name: default_worker_name(lookup("HOSTNAME")),
            ..Self::default()
        };

        // Queue service
        config.frontend_url = lookup(ENV_FRONTEND_URL)
            .ok_or_else(|| ConfigError::MissingEnvVar(ENV_FRONTEND_URL.to_string()))?;

        if let Some(val) = lookup(ENV_FRONTEND_URL_FROM_DOCKER) {
            config.frontend_url_from_docker = Some(val);
        }

        config.auth_token = lookup(ENV_AUTH_TOKEN)
            .ok_or_else(|| ConfigError::MissingEnvVar(ENV_AUTH_TOKEN.to_string()))?;

        if let Some(val) = lookup(ENV_NAME) {
            config.worker_name = val;
        }

        // Scheduling
        if let Some(val) = lookup(ENV_POLL_INTERVAL_SECS) {
            let secs: u64 = parse_env_value(&val, ENV_POLL_INTERVAL_SECS)?;
            config.poll_interval = Duration::from_secs(secs);
        }

        if let Some(val) = lookup(ENV_NUM_WORKERS) {
            config.num_workers = parse_env_value(&val, ENV_NUM_WORKERS)?;
        }

        if let Some(val) = lookup(ENV_BUDGET_MAX) {
            config.budget_max = parse_env_value(&val, ENV_BUDGET_MAX)?;
        }

        if let Some(val) = lookup(ENV_BUDGET_RESET_SECS) {
            config.budget_reset_interval = parse_optional_secs(&val, ENV_BUDGET_RESET_SECS)?;
        }

        if let Some(val) = lookup(ENV_HEARTBEAT_SECS) {
            config.heartbeat_interval = parse_optional_secs(&val, ENV_HEARTBEAT_SECS)?;
        }

        if let Some(val) = lookup(ENV_SHUTDOWN_TIMEOUT_SECS) {
            let secs: u64 = parse_env_value(&val, ENV_SHUTDOWN_TIMEOUT_SECS)?;
            config.shutdown_timeout = Duration::from_secs(secs);
        }

        // Execution
        if let Some(val) = lookup(ENV_IMAGE) {
            config.sandbox.image = val;
        }

        if let Some(val) = lookup(ENV_COMMAND) {
            config.indexer_command = val;
        }

        if let Some(val) = lookup(ENV_WORKSPACE_ROOT) {
            config.workspace_root = Some(PathBuf::from(val));
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_http_url("frontend_url", &self.frontend_url)?;
        if let Some(url) = &self.frontend_url_from_docker {
            validate_http_url("frontend_url_from_docker", url)?;
        }

        if self.auth_token.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "auth_token cannot be empty".to_string(),
            ));
        }

        if self.worker_name.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "worker_name cannot be empty".to_string(),
            ));
        }

        if self.num_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "num_workers must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.budget_max < 0 {
            return Err(ConfigError::ValidationFailed(
                "budget_max cannot be negative".to_string(),
            ));
        }

        if self.budget_reset_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::ValidationFailed(
                "budget_reset_interval must be greater than 0".to_string(),
            ));
        }

        if self.heartbeat_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::ValidationFailed(
                "heartbeat_interval must be greater than 0".to_string(),
            ));
        }

        if self.sandbox.image.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "sandbox image cannot be empty".to_string(),
            ));
        }

        if self.indexer_command.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "indexer_command cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Frontend URL handed to the uploader inside the container.
    pub fn docker_frontend_url(&self) -> &str {
        self.frontend_url_from_docker
            .as_deref()
            .unwrap_or(&self.frontend_url)
    }

    /// Worker pool settings derived from this configuration.
    pub fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(self.num_workers)
            .with_poll_interval(self.poll_interval)
            .with_shutdown_timeout(self.shutdown_timeout)
            .with_name(self.worker_name.clone())
    }

    /// Builder method to set the in-container frontend URL.
    pub fn with_frontend_url_from_docker(mut self, url: impl Into<String>) -> Self {
        self.frontend_url_from_docker = Some(url.into());
        self
    }

    /// Builder method to set the worker name.
    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    /// Builder method to set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builder method to set the number of workers.
    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Builder method to set the budget ceiling.
    pub fn with_budget_max(mut self, budget_max: i64) -> Self {
        self.budget_max = budget_max;
        self
    }

    /// Builder method to set the budget reset interval.
    pub fn with_budget_reset_interval(mut self, interval: Option<Duration>) -> Self {
        self.budget_reset_interval = interval;
        self
    }

    /// Builder method to set the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Builder method to set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Builder method to set the sandbox configuration.
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Builder method to set the indexing command.
    pub fn with_indexer_command(mut self, command: impl Into<String>) -> Self {
        self.indexer_command = command.into();
        self
    }

    /// Builder method to set the workspace root.
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }
}

/// `<hostname>-<8 random hex digits>`, with `indexer` when no hostname is known.
fn default_worker_name(hostname: Option<String>) -> String {
    let host = hostname
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "indexer".to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", host, &suffix[..8])
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|e| {
        ConfigError::ValidationFailed(format!("{} '{}' is not a valid URL: {}", field, value, e))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::ValidationFailed(format!(
            "{} must use http or https, got '{}'",
            field,
            url.scheme()
        )));
    }
    Ok(())
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse a number of seconds where zero means "disabled".
fn parse_optional_secs(value: &str, key: &str) -> Result<Option<Duration>, ConfigError> {
    let secs: u64 = parse_env_value(value, key)?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}
