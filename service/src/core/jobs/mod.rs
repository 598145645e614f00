//! Job System Module
//!
//! Render jobs from submission to terminal status: request payloads, the
//! per-kind worker queue, the durable job store, and the orchestrator that
//! drives one job through template processing and the render engine.

mod orchestrator;
mod payloads;
mod queue;
mod service;
mod store;

pub use orchestrator::*;
pub use payloads::*;
pub use queue::*;
pub use service::*;
pub use store::*;

use serde::{Deserialize, Serialize};

use crate::core::{CoreError, CoreResult, JobId};

// =============================================================================
// Job Kinds
// =============================================================================

/// Job kind enumeration. Each kind has its own worker pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// Free-form workflow config
    RawConfig,
    /// Catalog template selected by id
    TemplateById,
    /// Catalog template selected by target platform
    PlatformTemplate,
    /// Caller-supplied template body
    CustomTemplate,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::RawConfig,
        JobKind::TemplateById,
        JobKind::PlatformTemplate,
        JobKind::CustomTemplate,
    ];

    /// Queue name
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::RawConfig => "raw-config",
            JobKind::TemplateById => "template-by-id",
            JobKind::PlatformTemplate => "platform-template",
            JobKind::CustomTemplate => "custom-template",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Job Status
// =============================================================================

/// Job lifecycle status.
///
/// Transitions are monotone: queued -> processing -> completed | failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in queue
    #[default]
    Queued,
    /// Picked up by a worker
    Processing,
    /// Artifact written
    Completed,
    /// Failed with error
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> CoreResult<Self> {
        match value {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(CoreError::Database(format!("Unknown job status: {other}"))),
        }
    }

    /// Checks if job is completed (success or failure)
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Job Record
// =============================================================================

/// Durable job record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Unique job ID
    pub id: JobId,
    pub status: JobStatus,
    /// Original request payload
    pub config: serde_json::Value,
    pub output_name: String,
    /// Set on completion
    pub output_path: Option<String>,
    /// Derived from `output_path`
    pub download_url: Option<String>,
    /// Set on failure
    pub error_message: Option<String>,
    /// Whole percent, 0..=100
    pub progress: u8,
    pub webhook_url: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub failed_at: Option<String>,
}

impl JobRecord {
    /// Creates a queued record with progress reset to 0
    pub fn new(
        id: JobId,
        config: serde_json::Value,
        output_name: String,
        webhook_url: Option<String>,
    ) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            config,
            output_name,
            output_path: None,
            download_url: None,
            error_message: None,
            progress: 0,
            webhook_url,
            created_at: chrono::Utc::now().to_rfc3339(),
            started_at: None,
            completed_at: None,
            failed_at: None,
        }
    }

    /// Status view returned to polling clients
    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            download_url: self.download_url.clone(),
            error: self.error_message.clone(),
            created_at: self.created_at.clone(),
            completed_at: self.completed_at.clone(),
        }
    }
}

/// Client-facing job status
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub download_url: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(JobStatus::parse("running").is_err());
    }

    #[test]
    fn test_transitions_are_monotone() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Processing));
    }

    #[test]
    fn test_new_record_is_queued() {
        let record = JobRecord::new(
            "job-1".to_string(),
            serde_json::json!({"kind": "raw-config"}),
            "video_job-1.mp4".to_string(),
            None,
        );
        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.progress, 0);
        assert!(!record.status.is_terminal());

        let view = record.status_view();
        assert_eq!(view.job_id, "job-1");
        assert!(view.download_url.is_none());
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "queued");
        assert!(json.get("jobId").is_some());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(JobKind::TemplateById.as_str(), "template-by-id");
        assert_eq!(
            serde_json::to_value(JobKind::PlatformTemplate).unwrap(),
            "platform-template"
        );
    }
}
