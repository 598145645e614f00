//! Job Submission Service
//!
//! Accepts render requests, keeps the job record and queue entry in step,
//! serves status polling, and re-enqueues unfinished work at startup.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::{
    with_default_duration, JobKind, JobPayload, JobQueue, JobRecord, JobStatus, JobStatusView,
    JobStore, RenderRequest,
};
use crate::core::fs::validate_output_name;
use crate::core::template::{validate, TemplateCatalog};
use crate::core::{new_job_id, CoreError, CoreResult, JobId, QueueRef};

const MAX_WEBHOOK_URL_LEN: usize = 500;

/// Optional submission fields
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOptions {
    #[serde(alias = "output_name")]
    pub output_name: Option<String>,
    #[serde(alias = "webhook_url")]
    pub webhook_url: Option<String>,
}

/// Acknowledgement returned for an accepted request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub job_id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub queue_ref: QueueRef,
    pub output_name: String,
    pub status_url: String,
}

/// Outcome of startup recovery
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub requeued: Vec<JobId>,
    /// Left in `processing` by a previous run
    pub stuck: Vec<JobId>,
    /// Stored payloads that no longer parse
    pub unreadable: Vec<JobId>,
}

/// Submission and polling front door for render jobs
pub struct JobService {
    store: Arc<JobStore>,
    catalog: Arc<TemplateCatalog>,
    queue: Arc<JobQueue>,
    /// Queued job ids this process has already enqueued (or given up on).
    /// Held across record creation and enqueueing so intake never
    /// enqueues a job twice.
    owned: Mutex<HashSet<JobId>>,
}

impl JobService {
    pub fn new(store: Arc<JobStore>, catalog: Arc<TemplateCatalog>, queue: Arc<JobQueue>) -> Self {
        Self {
            store,
            catalog,
            queue,
            owned: Mutex::new(HashSet::new()),
        }
    }

    /// Creates the job record and its queue entry.
    ///
    /// Template-by-id requests are checked against the template's required
    /// variables first and rejected before anything is stored. If the queue
    /// refuses the entry, the record is removed again.
    pub fn submit(&self, request: RenderRequest, options: SubmitOptions) -> CoreResult<Submission> {
        request.validate()?;

        if let RenderRequest::TemplateById {
            template_id,
            variables,
        } = &request
        {
            let template_id = template_id.trim();
            self.catalog.get(template_id)?;
            let report = validate(template_id, &with_default_duration(variables));
            if !report.valid {
                return Err(CoreError::MissingVariables {
                    missing: report.missing,
                    required: report.required,
                });
            }
        }

        let webhook_url = options
            .webhook_url
            .map(|url| validate_webhook_url(&url))
            .transpose()?;

        let job_id = new_job_id();
        let output_name = match options.output_name {
            Some(name) => validate_output_name(&name)?,
            None => validate_output_name(&request.default_output_name(&job_id))?,
        };
        let kind = request.kind();

        let record = JobRecord::new(
            job_id.clone(),
            request.to_json()?,
            output_name.clone(),
            webhook_url,
        );

        let mut owned = self.owned.lock().unwrap();
        self.store.create(&record)?;

        let payload = JobPayload {
            job_id: job_id.clone(),
            output_name: output_name.clone(),
            request,
        };
        let queue_ref = match self.queue.enqueue(kind, payload) {
            Ok(queue_ref) => queue_ref,
            Err(e) => {
                if let Err(cleanup) = self.store.delete(&job_id) {
                    tracing::error!(
                        "Could not remove job {} after enqueue failure: {}",
                        job_id,
                        cleanup
                    );
                }
                return Err(e);
            }
        };
        owned.insert(job_id.clone());
        drop(owned);

        tracing::info!("Job {} queued on {} as {}", job_id, kind, output_name);
        Ok(Submission {
            status_url: format!("/api/jobs/{job_id}"),
            job_id,
            kind,
            status: JobStatus::Queued,
            queue_ref,
            output_name,
        })
    }

    pub fn job_status(&self, job_id: &str) -> CoreResult<JobStatusView> {
        Ok(self.store.get(job_id)?.status_view())
    }

    /// Newest first
    pub fn list_jobs(&self, limit: usize) -> CoreResult<Vec<JobStatusView>> {
        Ok(self
            .store
            .list(limit)?
            .iter()
            .map(JobRecord::status_view)
            .collect())
    }

    /// Enqueues queued records this process has not enqueued yet.
    ///
    /// Picks up jobs accepted by another process sharing the store (the
    /// CLI `submit` command) as well as jobs left queued by a previous run.
    pub fn intake(&self) -> CoreResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let mut owned = self.owned.lock().unwrap();

        let queued = self.store.list_by_status(JobStatus::Queued)?;
        let still_queued: HashSet<&str> = queued.iter().map(|r| r.id.as_str()).collect();
        owned.retain(|id| still_queued.contains(id.as_str()));

        for record in queued {
            if owned.contains(&record.id) {
                continue;
            }
            let request = match RenderRequest::from_json(&record.config) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!("Job {} has an unreadable payload: {}", record.id, e);
                    owned.insert(record.id.clone());
                    report.unreadable.push(record.id);
                    continue;
                }
            };
            let kind = request.kind();
            self.queue.enqueue(
                kind,
                JobPayload {
                    job_id: record.id.clone(),
                    output_name: record.output_name.clone(),
                    request,
                },
            )?;
            owned.insert(record.id.clone());
            report.requeued.push(record.id);
        }

        if !report.requeued.is_empty() {
            tracing::info!("Enqueued {} stored jobs", report.requeued.len());
        }
        Ok(report)
    }

    /// Startup pass: intake plus a report of jobs a previous run left
    /// processing. Those are left untouched.
    pub fn recover(&self) -> CoreResult<RecoveryReport> {
        let mut report = self.intake()?;

        for record in self.store.list_by_status(JobStatus::Processing)? {
            tracing::warn!(
                "Job {} was processing when the service stopped (started {})",
                record.id,
                record.started_at.as_deref().unwrap_or("unknown")
            );
            report.stuck.push(record.id);
        }
        Ok(report)
    }
}

fn validate_webhook_url(url: &str) -> CoreResult<String> {
    let trimmed = url.trim();
    let lower = trimmed.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return Err(CoreError::ValidationError(
            "webhookUrl must be an http(s) URL".to_string(),
        ));
    }
    if trimmed.len() > MAX_WEBHOOK_URL_LEN {
        return Err(CoreError::ValidationError(format!(
            "webhookUrl is too long (max {MAX_WEBHOOK_URL_LEN} chars)"
        )));
    }
    Ok(trimmed.to_string())
}
