//! Render Orchestrator
//!
//! Drives one job from dequeue to its terminal status:
//!
//! 1. queued -> processing (stamped once; a redelivered processing job
//!    continues, a redelivered terminal job is left alone)
//! 2. request -> template + variables -> `RenderEngineConfig`
//! 3. engine invocation, with progress ticks forwarded to the store
//! 4. completed (output path + download locator) or failed (message)
//!
//! Every error is recorded on the job and then returned to the queue.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    JobHandler, JobPayload, JobRecord, JobStatus, JobStore, JobSummary, ProgressReporter,
    QueueEntry, RenderRequest,
};
use crate::core::fs::{download_locator, validate_output_name};
use crate::core::render::{RenderEngine, RenderEngineConfig, RenderOutcome, RenderProgress};
use crate::core::template::{TemplateCatalog, TemplateProcessor};
use crate::core::{CoreError, CoreResult, JobId};

/// How long to keep draining progress after the engine has returned
const PROGRESS_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Runs render jobs against the template processor and render engine
pub struct RenderOrchestrator {
    store: Arc<JobStore>,
    catalog: Arc<TemplateCatalog>,
    processor: Arc<TemplateProcessor>,
    engine: Arc<dyn RenderEngine>,
}

impl RenderOrchestrator {
    pub fn new(
        store: Arc<JobStore>,
        catalog: Arc<TemplateCatalog>,
        processor: Arc<TemplateProcessor>,
        engine: Arc<dyn RenderEngine>,
    ) -> Self {
        Self {
            store,
            catalog,
            processor,
            engine,
        }
    }

    /// Resolves a request into the config the engine would receive.
    pub async fn build_config(&self, request: &RenderRequest) -> CoreResult<RenderEngineConfig> {
        let (spec, variables) = request.normalize(&self.catalog)?;
        self.processor.build(&spec, &variables).await
    }

    /// Runs one job to a terminal status.
    pub async fn run(
        &self,
        payload: &JobPayload,
        progress: &ProgressReporter,
    ) -> CoreResult<JobSummary> {
        let job_id = &payload.job_id;
        let record = self.store.get(job_id)?;

        match record.status {
            status if status.is_terminal() => {
                tracing::warn!(
                    "Job {} redelivered after reaching {}; skipping",
                    job_id,
                    status
                );
                return Ok(summary(&record));
            }
            JobStatus::Processing => {
                tracing::warn!("Job {} redelivered while processing; continuing", job_id);
            }
            _ => {
                self.claim(job_id)?;
                tracing::info!("Job {} processing", job_id);
            }
        }

        match self.execute(payload, progress).await {
            Ok(outcome) => {
                let output_path = outcome.output_path.to_string_lossy().to_string();
                let download_url = download_locator(&outcome.output_path);
                match self.store.complete(job_id, &output_path, &download_url) {
                    Ok(true) => tracing::info!(
                        "Job {} completed in {:.1}s: {}",
                        job_id,
                        outcome.encoding_time_sec,
                        output_path
                    ),
                    Ok(false) => {
                        tracing::warn!("Duplicate terminal event for job {} ignored", job_id)
                    }
                    Err(e) => {
                        tracing::error!(
                            "Job {} rendered to {} but completion could not be recorded: {}",
                            job_id,
                            output_path,
                            e
                        );
                        return Err(self.record_failure(job_id, e));
                    }
                }
                Ok(summary(&self.store.get(job_id)?))
            }
            Err(e) => Err(self.record_failure(job_id, e)),
        }
    }

    /// Moves a queued job to `processing`. Losing the race to another worker
    /// is an invalid transition, whatever status that worker left behind.
    fn claim(&self, job_id: &str) -> CoreResult<()> {
        if self.store.begin_processing(job_id)? {
            return Ok(());
        }
        let current = self.store.get(job_id)?;
        Err(CoreError::InvalidTransition {
            job_id: job_id.to_string(),
            from: current.status.to_string(),
            to: JobStatus::Processing.to_string(),
        })
    }

    /// Stores `error` as the job's failure and hands it back for re-raising.
    fn record_failure(&self, job_id: &str, error: CoreError) -> CoreError {
        let message = error.to_string();
        match self.store.fail(job_id, &message) {
            Ok(true) => tracing::error!("Job {} failed: {}", job_id, message),
            Ok(false) => tracing::warn!("Duplicate terminal event for job {} ignored", job_id),
            Err(store_err) => tracing::error!(
                "Job {} failed ({}) and the failure could not be recorded: {}",
                job_id,
                message,
                store_err
            ),
        }
        error
    }

    async fn execute(
        &self,
        payload: &JobPayload,
        reporter: &ProgressReporter,
    ) -> CoreResult<RenderOutcome> {
        let output_name = validate_output_name(&payload.output_name)?;
        let output_path: PathBuf = self.processor.paths().output_dir.join(output_name);
        let config = self.build_config(&payload.request).await?;

        let (tx, rx) = mpsc::channel::<RenderProgress>(32);
        let mut forwarder = tokio::spawn(forward_progress(
            Arc::clone(&self.store),
            payload.job_id.clone(),
            reporter.clone(),
            rx,
        ));

        tracing::debug!(
            "Job {} rendering {} scenes with {}",
            payload.job_id,
            config.scenes.len(),
            self.engine.name()
        );
        let result = self.engine.render(&config, &output_path, tx).await;

        // Engines may leak a sender into a detached task; stop listening after a grace period.
        if tokio::time::timeout(PROGRESS_DRAIN_TIMEOUT, &mut forwarder)
            .await
            .is_err()
        {
            tracing::debug!("Progress channel for job {} still open; closing", payload.job_id);
            forwarder.abort();
        }

        result
    }
}

#[async_trait]
impl JobHandler for RenderOrchestrator {
    async fn handle(
        &self,
        entry: &QueueEntry,
        progress: ProgressReporter,
    ) -> CoreResult<JobSummary> {
        self.run(&entry.payload, &progress).await
    }
}

async fn forward_progress(
    store: Arc<JobStore>,
    job_id: JobId,
    reporter: ProgressReporter,
    mut rx: mpsc::Receiver<RenderProgress>,
) {
    let mut last = 0u8;
    while let Some(tick) = rx.recv().await {
        let percent = tick.percent();
        if percent <= last {
            continue;
        }
        last = percent;
        reporter.report(percent);
        match store.update_progress(&job_id, percent) {
            Ok(true) => tracing::debug!("Job {} progress {}%", job_id, percent),
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to record progress for job {}: {}", job_id, e),
        }
    }
}

fn summary(record: &JobRecord) -> JobSummary {
    JobSummary {
        job_id: record.id.clone(),
        status: record.status,
        output_path: record.output_path.clone(),
        download_url: record.download_url.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hardware::FixedProbe;
    use crate::core::jobs::{JobKind, JobQueue};
    use crate::core::render::ScriptedEngine;
    use std::collections::HashMap;
    use std::path::Path;
    use crate::core::template::{ConfigValue, ProcessorPaths, VariableSet};
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        store: Arc<JobStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            for sub in ["assets", "audio", "cache", "videos"] {
                std::fs::create_dir_all(dir.path().join(sub)).unwrap();
            }
            Self {
                dir,
                store: Arc::new(JobStore::in_memory().unwrap()),
            }
        }

        fn orchestrator(&self, engine: Arc<dyn RenderEngine>) -> RenderOrchestrator {
            let paths = ProcessorPaths {
                cache_dir: self.dir.path().join("cache"),
                output_dir: self.dir.path().join("videos"),
                assets_dir: self.dir.path().join("assets"),
                audio_dir: self.dir.path().join("audio"),
            };
            RenderOrchestrator::new(
                Arc::clone(&self.store),
                Arc::new(TemplateCatalog::builtin().unwrap()),
                Arc::new(TemplateProcessor::new(paths, Arc::new(FixedProbe(false)))),
                engine,
            )
        }

        fn submit(&self, id: &str, request: RenderRequest) -> JobPayload {
            let output_name = request.default_output_name(&id.to_string());
            self.store
                .create(&JobRecord::new(
                    id.to_string(),
                    request.to_json().unwrap(),
                    output_name.clone(),
                    None,
                ))
                .unwrap();
            JobPayload {
                job_id: id.to_string(),
                output_name,
                request,
            }
        }
    }

    /// Plays a different tick script per output file, then fails so the last
    /// tick stays visible on the record.
    struct PerJobEngine {
        scripts: HashMap<String, Vec<f64>>,
        both_started: tokio::sync::Barrier,
    }

    #[async_trait]
    impl RenderEngine for PerJobEngine {
        fn name(&self) -> &str {
            "per-job"
        }

        async fn render(
            &self,
            _config: &RenderEngineConfig,
            output_path: &Path,
            progress: mpsc::Sender<RenderProgress>,
        ) -> CoreResult<RenderOutcome> {
            let name = output_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let ticks = self.scripts.get(&name).cloned().unwrap_or_default();
            let mut ticks = ticks.into_iter();
            if let Some(first) = ticks.next() {
                let _ = progress.send(RenderProgress::new(first)).await;
            }
            self.both_started.wait().await;
            for fraction in ticks {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let _ = progress.send(RenderProgress::new(fraction)).await;
            }
            Err(CoreError::EngineFailed(format!("stopped {name}")))
        }
    }

    fn reporter(job_id: &str) -> ProgressReporter {
        ProgressReporter::new(job_id)
    }

    fn raw(value: serde_json::Value) -> RenderRequest {
        RenderRequest::RawConfig {
            config: ConfigValue::from(value),
        }
    }

    #[tokio::test]
    async fn test_success_records_completion() {
        let fx = Fixture::new();
        let engine = Arc::new(ScriptedEngine::succeeding(&[0.25, 0.5, 1.0]));
        let orchestrator = fx.orchestrator(engine.clone());
        let payload = fx.submit("job-1", raw(json!({"scenes": [{"duration": 2}]})));
        let progress = reporter("job-1");

        let summary = orchestrator.run(&payload, &progress).await.unwrap();
        assert_eq!(summary.status, JobStatus::Completed);
        assert_eq!(summary.download_url.as_deref(), Some("/download/video_job-1.mp4"));
        assert_eq!(progress.latest(), 100);

        let job = fx.store.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
        assert!(job.failed_at.is_none());
        assert!(fx.dir.path().join("videos").join("video_job-1.mp4").exists());
        assert_eq!(engine.rendered().len(), 1);
    }

    #[tokio::test]
    async fn test_engine_error_is_recorded_verbatim_and_reraised() {
        let fx = Fixture::new();
        let engine = Arc::new(ScriptedEngine::failing(
            &[0.25, 0.6],
            "encoder exited with status 1",
        ));
        let orchestrator = fx.orchestrator(engine);
        let payload = fx.submit("job-1", raw(json!({"scenes": [{}]})));

        let err = orchestrator
            .run(&payload, &reporter("job-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::EngineFailed(_)));

        let job = fx.store.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error_message.as_deref(),
            Some("encoder exited with status 1")
        );
        assert_eq!(job.progress, 60);
        assert!(job.failed_at.is_some());
        assert!(job.completed_at.is_none());
        assert!(job.download_url.is_none());
    }

    #[tokio::test]
    async fn test_structural_error_fails_before_engine() {
        let fx = Fixture::new();
        let engine = Arc::new(ScriptedEngine::succeeding(&[1.0]));
        let orchestrator = fx.orchestrator(engine.clone());
        let payload = fx.submit("job-1", raw(json!({"width": 720})));

        assert!(orchestrator.run(&payload, &reporter("job-1")).await.is_err());
        let job = fx.store.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error_message.as_deref(),
            Some("Template processing failed: Template must contain scenes array")
        );
        assert!(engine.rendered().is_empty());
    }

    #[tokio::test]
    async fn test_redelivered_terminal_job_is_not_rendered_again() {
        let fx = Fixture::new();
        let engine = Arc::new(ScriptedEngine::succeeding(&[1.0]));
        let orchestrator = fx.orchestrator(engine.clone());
        let payload = fx.submit("job-1", raw(json!({"scenes": [{}]})));

        orchestrator.run(&payload, &reporter("job-1")).await.unwrap();
        let first = fx.store.get("job-1").unwrap();

        let again = orchestrator.run(&payload, &reporter("job-1")).await.unwrap();
        assert_eq!(again.status, JobStatus::Completed);
        assert_eq!(engine.rendered().len(), 1);
        assert_eq!(fx.store.get("job-1").unwrap(), first);
    }

    #[tokio::test]
    async fn test_redelivered_processing_job_finishes_once() {
        let fx = Fixture::new();
        let engine = Arc::new(ScriptedEngine::succeeding(&[1.0]));
        let orchestrator = fx.orchestrator(engine.clone());
        let payload = fx.submit("job-1", raw(json!({"scenes": [{}]})));
        fx.store.begin_processing("job-1").unwrap();
        let started_at = fx.store.get("job-1").unwrap().started_at;

        let summary = orchestrator.run(&payload, &reporter("job-1")).await.unwrap();
        assert_eq!(summary.status, JobStatus::Completed);
        assert_eq!(fx.store.get("job-1").unwrap().started_at, started_at);
    }

    #[tokio::test]
    async fn test_late_progress_after_result_does_not_regress() {
        let fx = Fixture::new();
        let engine = Arc::new(ScriptedEngine::succeeding(&[0.5]).with_late_tick(0.3));
        let orchestrator = fx.orchestrator(engine);
        let payload = fx.submit("job-1", raw(json!({"scenes": [{}]})));

        orchestrator.run(&payload, &reporter("job-1")).await.unwrap();
        let job = fx.store.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
    }

    #[tokio::test]
    async fn test_unsafe_output_name_fails_job() {
        let fx = Fixture::new();
        let engine = Arc::new(ScriptedEngine::succeeding(&[1.0]));
        let orchestrator = fx.orchestrator(engine.clone());
        let mut payload = fx.submit("job-1", raw(json!({"scenes": [{}]})));
        payload.output_name = "../escape.mp4".to_string();

        assert!(orchestrator.run(&payload, &reporter("job-1")).await.is_err());
        assert_eq!(fx.store.get("job-1").unwrap().status, JobStatus::Failed);
        assert!(engine.rendered().is_empty());
    }

    #[tokio::test]
    async fn test_catalog_template_end_to_end() {
        let fx = Fixture::new();
        std::fs::write(fx.dir.path().join("assets").join("x.png"), b"png").unwrap();
        std::fs::write(fx.dir.path().join("audio").join("a.mp3"), b"mp3").unwrap();
        let engine = Arc::new(ScriptedEngine::succeeding(&[1.0]));
        let orchestrator = fx.orchestrator(engine.clone());

        let variables: VariableSet = match ConfigValue::from(json!({
            "comfyui_image": "x.png",
            "subtitle_text": "hi",
            "tts_audio": "a.mp3",
            "duration": 8
        })) {
            ConfigValue::Mapping(m) => m,
            _ => unreachable!(),
        };
        let payload = fx.submit(
            "job-1",
            RenderRequest::TemplateById {
                template_id: "mobile_vertical_standard".to_string(),
                variables,
            },
        );

        let summary = orchestrator.run(&payload, &reporter("job-1")).await.unwrap();
        assert_eq!(
            summary.download_url.as_deref(),
            Some("/download/template_mobile_vertical_standard_job-1.mp4")
        );

        let rendered = engine.rendered();
        let scene = &rendered[0].scenes[0];
        assert_eq!(rendered[0].scenes.len(), 1);
        assert_eq!(scene.duration, 8.0);
        assert_eq!(scene.elements.len(), 2);
        assert!(scene.audio.is_some());
        assert!(!rendered[0].hardware_accelerated);
    }

    #[tokio::test]
    async fn test_platform_template_defaults_main_scene_duration() {
        let fx = Fixture::new();
        let engine = Arc::new(ScriptedEngine::succeeding(&[1.0]));
        let orchestrator = fx.orchestrator(engine.clone());
        let request = RenderRequest::PlatformTemplate {
            platform: "tiktok".to_string(),
            variables: VariableSet::new(),
        };

        let config = orchestrator.build_config(&request).await.unwrap();
        let durations: Vec<f64> = config.scenes.iter().map(|s| s.duration).collect();
        assert_eq!(durations, vec![2.0, 10.0]);
    }

    #[tokio::test]
    async fn test_claim_lost_to_another_worker_is_rejected() {
        let fx = Fixture::new();
        let orchestrator = fx.orchestrator(Arc::new(ScriptedEngine::succeeding(&[1.0])));
        fx.submit("job-1", raw(json!({"scenes": [{"duration": 1}]})));
        assert!(fx.store.begin_processing("job-1").unwrap());

        match orchestrator.claim("job-1") {
            Err(CoreError::InvalidTransition { from, to, .. }) => {
                assert_eq!(from, "processing");
                assert_eq!(to, "processing");
            }
            other => panic!("unexpected claim result {other:?}"),
        }
        assert_eq!(fx.store.get("job-1").unwrap().status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_unrecorded_completion_fails_job() {
        let fx = Fixture::new();
        fx.store
            .execute_sql(
                "CREATE TRIGGER reject_completion BEFORE UPDATE ON jobs \
                 WHEN NEW.status = 'completed' \
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();
        let orchestrator = fx.orchestrator(Arc::new(ScriptedEngine::succeeding(&[1.0])));
        let payload = fx.submit("job-1", raw(json!({"scenes": [{"duration": 1}]})));

        let err = orchestrator.run(&payload, &reporter("job-1")).await.unwrap_err();
        assert!(matches!(err, CoreError::Database(_)));

        let job = fx.store.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap_or_default().contains("disk full"));
    }

    #[tokio::test]
    async fn test_concurrent_jobs_in_one_lane_keep_their_own_progress() {
        let fx = Fixture::new();
        let engine = Arc::new(PerJobEngine {
            scripts: HashMap::from([
                ("video_job-a.mp4".to_string(), vec![0.1, 0.2, 0.3]),
                ("video_job-b.mp4".to_string(), vec![0.5, 0.6, 0.7]),
            ]),
            both_started: tokio::sync::Barrier::new(2),
        });
        let orchestrator = Arc::new(fx.orchestrator(engine));
        let queue = JobQueue::with_defaults();
        queue
            .register_worker(
                JobKind::RawConfig,
                2,
                orchestrator as Arc<dyn JobHandler>,
            )
            .unwrap();

        for id in ["job-a", "job-b"] {
            let payload = fx.submit(id, raw(json!({"scenes": [{"duration": 1}]})));
            queue.enqueue(JobKind::RawConfig, payload).unwrap();
        }
        assert!(queue.wait_idle(Duration::from_secs(5)).await);

        let a = fx.store.get("job-a").unwrap();
        let b = fx.store.get("job-b").unwrap();
        assert_eq!((a.status, a.progress), (JobStatus::Failed, 30));
        assert_eq!((b.status, b.progress), (JobStatus::Failed, 70));
        assert_eq!(a.error_message.as_deref(), Some("stopped video_job-a.mp4"));
        assert_eq!(b.error_message.as_deref(), Some("stopped video_job-b.mp4"));
        assert_eq!(queue.stats(JobKind::RawConfig).failed, 2);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let fx = Fixture::new();
        let orchestrator = fx.orchestrator(Arc::new(ScriptedEngine::succeeding(&[])));
        let payload = JobPayload {
            job_id: "ghost".to_string(),
            output_name: "ghost.mp4".to_string(),
            request: raw(json!({"scenes": [{}]})),
        };
        assert!(matches!(
            orchestrator.run(&payload, &reporter("ghost")).await,
            Err(CoreError::JobNotFound(_))
        ));
    }
}
