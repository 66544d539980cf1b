//! Index job definitions.
//!
//! A `Job` is one "index this repository at this commit" request handed out
//! by the central queue service. Workers never mutate jobs; they only report
//! an outcome for them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single index request as returned by the queue service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Identifier assigned by the queue service.
    pub id: i64,
    /// Repository name, e.g. `github.com/acme/widgets`.
    pub repository_name: String,
    /// Commit to index.
    pub commit: String,
    /// Processing state as last recorded by the queue service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// When the job was enqueued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    /// Relative cost of the job, for cost models that use it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_hint: Option<i64>,
}

impl Job {
    /// Creates a job with no state, timestamp or cost hint.
    pub fn new(id: i64, repository_name: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            id,
            repository_name: repository_name.into(),
            commit: commit.into(),
            state: None,
            queued_at: None,
            cost_hint: None,
        }
    }

    /// Sets the processing state.
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Sets the cost hint.
    pub fn with_cost_hint(mut self, cost: i64) -> Self {
        self.cost_hint = Some(cost);
        self
    }
}

impl crate::scheduler::Record for Job {
    fn id(&self) -> i64 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_deserializes_queue_payload() {
        let payload = r#"{
            "id": 42,
            "repositoryName": "acme/widgets",
            "commit": "abcd1234",
            "state": "processing",
            "queuedAt": "2024-05-01T12:00:00Z"
        }"#;

        let job: Job = serde_json::from_str(payload).expect("payload should parse");
        assert_eq!(job.id, 42);
        assert_eq!(job.repository_name, "acme/widgets");
        assert_eq!(job.commit, "abcd1234");
        assert_eq!(job.state.as_deref(), Some("processing"));
        assert!(job.queued_at.is_some());
        assert_eq!(job.cost_hint, None);
    }

    #[test]
    fn test_job_serialization_omits_empty_fields() {
        let job = Job::new(7, "acme/gadgets", "ffff0000");
        let value = serde_json::to_value(&job).expect("job should serialize");

        assert_eq!(value["repositoryName"], "acme/gadgets");
        assert!(value.get("state").is_none());
        assert!(value.get("costHint").is_none());
    }
}
