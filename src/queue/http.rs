//! HTTP client for the central queue service.
//!
//! Every operation is a `POST` to
//! `<frontend>/.internal-code-intel/index-queue/<operation>` authenticated
//! with HTTP basic auth (`indexer`, token). Each body carries the worker's
//! name so the service can attribute claims.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Serialize;
use tracing::{debug, trace};

use super::client::{QueueClient, QueueError};
use super::job::Job;

/// Path of the queue API relative to the frontend URL.
const QUEUE_PATH: &str = ".internal-code-intel/index-queue/";

/// Basic-auth user name presented to the frontend.
pub const AUTH_USERNAME: &str = "indexer";

/// Request timeout for queue operations.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DequeueRequest<'a> {
    indexer_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest<'a> {
    indexer_name: &'a str,
    index_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequeueRequest<'a> {
    indexer_name: &'a str,
    index_id: i64,
    reason: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatRequest<'a> {
    indexer_name: &'a str,
    index_ids: &'a [i64],
}

/// Queue client speaking the frontend's internal HTTP API.
#[derive(Debug, Clone)]
pub struct HttpQueueClient {
    /// Frontend URL, always ending in `/`.
    base_url: Url,
    /// Name reported with every request.
    worker_name: String,
    /// Token presented as the basic-auth password.
    auth_token: String,
    /// HTTP client for making requests.
    http_client: Client,
}

impl HttpQueueClient {
    /// Creates a client for the given frontend URL.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::InvalidUrl` if `frontend_url` is not an absolute
    /// URL and `QueueError::Transport` if the HTTP client cannot be built.
    pub fn new(
        frontend_url: &str,
        worker_name: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Result<Self, QueueError> {
        let mut base_url = Url::parse(frontend_url).map_err(|e| QueueError::InvalidUrl {
            url: frontend_url.to_string(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(QueueError::InvalidUrl {
                url: frontend_url.to_string(),
                reason: "URL cannot be used as a base".to_string(),
            });
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http_client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            base_url,
            worker_name: worker_name.into(),
            auth_token: auth_token.into(),
            http_client,
        })
    }

    /// The frontend URL this client talks to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The name this client reports to the queue service.
    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    /// Absolute URL of a queue operation.
    pub fn endpoint(&self, operation: &str) -> Result<Url, QueueError> {
        self.base_url
            .join(QUEUE_PATH)
            .and_then(|queue| queue.join(operation))
            .map_err(|e| QueueError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: e.to_string(),
            })
    }

    async fn post<B: Serialize + Sync>(
        &self,
        operation: &str,
        body: &B,
    ) -> Result<Response, QueueError> {
        let url = self.endpoint(operation)?;
        trace!(url = %url, "Sending queue request");

        let response = self
            .http_client
            .post(url)
            .basic_auth(AUTH_USERNAME, Some(&self.auth_token))
            .json(body)
            .send()
            .await?;

        Ok(response)
    }

    /// Maps a non-success response for a job-scoped operation.
    async fn job_error(response: Response, id: i64) -> QueueError {
        match response.status() {
            StatusCode::CONFLICT | StatusCode::NOT_FOUND => QueueError::Conflict(id),
            _ => Self::status_error(response).await,
        }
    }

    async fn status_error(response: Response) -> QueueError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        QueueError::UnexpectedStatus { status, body }
    }
}

#[async_trait]
impl QueueClient for HttpQueueClient {
    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        let request = DequeueRequest {
            indexer_name: &self.worker_name,
        };
        let response = self.post("dequeue", &request).await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => {
                let body = response.bytes().await?;
                let job: Job = serde_json::from_slice(&body)?;
                debug!(job_id = job.id, repo = %job.repository_name, "Dequeued job");
                Ok(Some(job))
            }
            _ => Err(Self::status_error(response).await),
        }
    }

    async fn complete(&self, id: i64, error: Option<&str>) -> Result<(), QueueError> {
        let request = CompleteRequest {
            indexer_name: &self.worker_name,
            index_id: id,
            error_message: error,
        };
        let response = self.post("complete", &request).await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::job_error(response, id).await)
        }
    }

    async fn requeue(&self, id: i64, reason: &str) -> Result<(), QueueError> {
        let request = RequeueRequest {
            indexer_name: &self.worker_name,
            index_id: id,
            reason,
        };
        let response = self.post("requeue", &request).await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::job_error(response, id).await)
        }
    }

    async fn heartbeat(&self, ids: &[i64]) -> Result<(), QueueError> {
        let request = HeartbeatRequest {
            indexer_name: &self.worker_name,
            index_ids: ids,
        };
        let response = self.post("heartbeat", &request).await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::status_error(response).await)
        }
    }
}
