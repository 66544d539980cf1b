//! Container sandbox for the index-and-upload step.
//!
//! Each run gets a uniquely named, auto-removed container with the job's
//! workspace mounted at `/data`. If the run fails or is cancelled the
//! container is force-removed so nothing outlives the handler.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::commander::Commander;
use crate::error::CommandError;

/// Container runtime binary.
pub const DOCKER: &str = "docker";

/// Mount point of the workspace inside the container.
pub const CONTAINER_WORKDIR: &str = "/data";

/// Default indexing image.
pub const DEFAULT_IMAGE: &str = "sourcegraph/lsif-go:latest";

/// Default indexing command run inside the image.
pub const DEFAULT_INDEXER_COMMAND: &str = "lsif-go";

/// Configuration for the sandbox container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxConfig {
    /// Docker image to use.
    pub image: String,
    /// Memory limit in bytes. Zero means no limit.
    pub memory_limit: u64,
    /// CPU limit (number of cores). Zero means no limit.
    pub cpu_limit: f64,
    /// Network mode, or `None` for the runtime default.
    pub network_mode: Option<String>,
    /// Environment variables.
    pub env_vars: Vec<(String, String)>,
}

impl SandboxConfig {
    /// Creates a configuration for `image` without resource limits.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            memory_limit: 0,
            cpu_limit: 0.0,
            network_mode: None,
            env_vars: Vec::new(),
        }
    }

    /// Sets the memory limit in MB.
    pub fn with_memory_mb(mut self, mb: u64) -> Self {
        self.memory_limit = mb * 1024 * 1024;
        self
    }

    /// Sets the CPU limit.
    pub fn with_cpu_limit(mut self, cores: f64) -> Self {
        self.cpu_limit = cores;
        self
    }

    /// Sets the network mode.
    pub fn with_network(mut self, mode: impl Into<String>) -> Self {
        self.network_mode = Some(mode.into());
        self
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE)
    }
}

/// Shell script that indexes the workspace and uploads the result.
///
/// `repo` and `commit` must already be validated; they are interpolated into
/// a shell command line.
pub fn index_script(indexer_command: &str, endpoint: &str, repo: &str, commit: &str) -> String {
    format!(
        "{indexer_command} && src -endpoint {endpoint} lsif upload -repo {repo} -commit {commit}"
    )
}

/// One container run.
#[derive(Debug)]
pub struct Sandbox {
    /// Container name, unique per run.
    pub name: String,
    config: SandboxConfig,
}

impl Sandbox {
    /// Creates a sandbox with a fresh container name.
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            name: format!("precise-indexer-{}", Uuid::new_v4()),
            config,
        }
    }

    /// Arguments for `docker` that run `script` with `workspace` mounted.
    pub fn docker_run_args(&self, workspace: &Path, script: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            self.name.clone(),
        ];

        // Resource limits
        if self.config.memory_limit > 0 {
            let gb = self.config.memory_limit / (1024 * 1024 * 1024);
            if gb > 0 && self.config.memory_limit % (1024 * 1024 * 1024) == 0 {
                args.push(format!("--memory={}g", gb));
            } else {
                args.push(format!("--memory={}m", self.config.memory_limit / (1024 * 1024)));
            }
        }
        if self.config.cpu_limit > 0.0 {
            args.push(format!("--cpus={}", self.config.cpu_limit));
        }
        if let Some(network) = &self.config.network_mode {
            args.push(format!("--network={}", network));
        }

        args.extend([
            "-v".to_string(),
            format!("{}:{}", workspace.display(), CONTAINER_WORKDIR),
            "-w".to_string(),
            CONTAINER_WORKDIR.to_string(),
        ]);

        for (key, value) in &self.config.env_vars {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push(self.config.image.clone());
        args.extend(["bash".to_string(), "-c".to_string(), script.to_string()]);

        args
    }

    /// Runs `script` in the container, removing the container if the run
    /// does not succeed.
    pub async fn run(
        &self,
        commander: &dyn Commander,
        cancel: &CancellationToken,
        workspace: &Path,
        script: &str,
    ) -> Result<(), CommandError> {
        let args = self.docker_run_args(workspace, script);
        debug!(container = %self.name, image = %self.config.image, "Starting sandbox");

        let result = commander.run(cancel, DOCKER, &args).await;
        if result.is_err() {
            self.force_remove(commander).await;
        }
        result
    }

    /// Best-effort `docker rm -f`. Runs even after cancellation.
    async fn force_remove(&self, commander: &dyn Commander) {
        let args = vec!["rm".to_string(), "-f".to_string(), self.name.clone()];
        if let Err(e) = commander.run(&CancellationToken::new(), DOCKER, &args).await {
            warn!(container = %self.name, error = %e, "Failed to remove container");
        }
    }
}
