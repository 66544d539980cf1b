//! Handler that fetches, indexes and uploads one repository commit.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::admission::{Admission, AdmissionController};
use crate::config::IndexerConfig;
use crate::error::IndexerError;
use crate::execution::{
    fetch_repository, index_script, validate_commit, validate_repository_name, Commander, Sandbox,
    SandboxConfig, Workspace,
};
use crate::queue::Job;
use crate::registry::JobRegistry;
use crate::scheduler::Handler;

/// Settings the handler needs for every job.
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    /// Frontend URL used for git fetches.
    pub frontend_url: String,
    /// Frontend URL handed to the uploader inside the container.
    pub frontend_url_from_docker: String,
    /// Token for git fetches.
    pub auth_token: String,
    /// Indexing command run before the upload.
    pub indexer_command: String,
    /// Parent directory for workspaces.
    pub workspace_root: Option<PathBuf>,
    /// Sandbox container settings.
    pub sandbox: SandboxConfig,
}

impl HandlerOptions {
    pub fn from_config(config: &IndexerConfig) -> Self {
        Self {
            frontend_url: config.frontend_url.clone(),
            frontend_url_from_docker: config.docker_frontend_url().to_string(),
            auth_token: config.auth_token.clone(),
            indexer_command: config.indexer_command.clone(),
            workspace_root: config.workspace_root.clone(),
            sandbox: config.sandbox.clone(),
        }
    }
}

/// Processes index jobs.
///
/// Per job: admission check, registry entry, fresh workspace, git fetch of
/// the commit, then one sandboxed index-and-upload run. The workspace and
/// registry entry are released on every exit path.
pub struct IndexHandler {
    options: HandlerOptions,
    registry: Arc<JobRegistry>,
    admission: AdmissionController,
    commander: Arc<dyn Commander>,
}

impl IndexHandler {
    pub fn new(
        options: HandlerOptions,
        registry: Arc<JobRegistry>,
        admission: AdmissionController,
        commander: Arc<dyn Commander>,
    ) -> Self {
        Self {
            options,
            registry,
            admission,
            commander,
        }
    }

    /// Registry of jobs this handler is processing.
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Admission controller consulted before each job.
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    async fn run(&self, cancel: &CancellationToken, job: &Job) -> Result<(), IndexerError> {
        validate_repository_name(&job.repository_name)?;
        validate_commit(&job.commit)?;

        let workspace =
            Workspace::create(self.options.workspace_root.as_deref()).map_err(IndexerError::Workspace)?;

        fetch_repository(
            self.commander.as_ref(),
            cancel,
            &self.options.frontend_url,
            &self.options.auth_token,
            &job.repository_name,
            &job.commit,
            workspace.path(),
        )
        .await?;
        debug!(job_id = job.id, "Fetched repository");

        let script = index_script(
            &self.options.indexer_command,
            &self.options.frontend_url_from_docker,
            &job.repository_name,
            &job.commit,
        );
        let sandbox = Sandbox::new(self.options.sandbox.clone());
        sandbox
            .run(self.commander.as_ref(), cancel, workspace.path(), &script)
            .await
            .map_err(|e| {
                if e.is_cancelled() {
                    IndexerError::Cancelled
                } else {
                    IndexerError::Index(e)
                }
            })?;

        Ok(())
    }
}

#[async_trait]
impl Handler for IndexHandler {
    type Record = Job;
    type Error = IndexerError;

    async fn handle(&self, cancel: &CancellationToken, job: &Job) -> Result<(), IndexerError> {
        if let Admission::Rejected { cost, remaining } = self.admission.admit(job) {
            return Err(IndexerError::Rejected { cost, remaining });
        }

        let _in_flight = self.registry.track(job.id);
        let started = Instant::now();
        info!(
            job_id = job.id,
            repo = %job.repository_name,
            commit = %job.commit,
            "Indexing repository"
        );

        self.run(cancel, job).await?;

        info!(
            job_id = job.id,
            repo = %job.repository_name,
            duration_ms = started.elapsed().as_millis() as u64,
            "Uploaded index"
        );
        Ok(())
    }
}
