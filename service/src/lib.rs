//! Scenecast Core Library
//!
//! Template-driven video render job service.
//! This library contains the template engine, the render job queue and
//! orchestrator, the job store, and the service wiring used by the daemon
//! and the CLI.

pub mod core;

use std::sync::{Arc, OnceLock};

use tracing_appender::non_blocking::WorkerGuard;

use crate::core::{
    hardware::{probe_for_mode, HardwareProbe},
    jobs::{JobKind, JobQueue, JobService, JobStore, RecoveryReport, RenderOrchestrator},
    render::{CommandRenderEngine, RenderEngine},
    settings::{LoggingSettings, ServiceSettings},
    template::{TemplateCatalog, TemplateProcessor},
    CoreResult,
};

// =============================================================================
// Service Context
// =============================================================================

/// Everything a running service shares, constructed once at startup
pub struct ServiceContext {
    pub settings: ServiceSettings,
    pub store: Arc<JobStore>,
    pub catalog: Arc<TemplateCatalog>,
    pub processor: Arc<TemplateProcessor>,
    pub engine: Arc<dyn RenderEngine>,
    pub queue: Arc<JobQueue>,
    pub orchestrator: Arc<RenderOrchestrator>,
    pub jobs: JobService,
}

impl ServiceContext {
    /// Wires the service from explicit collaborators
    pub fn new(
        settings: ServiceSettings,
        store: JobStore,
        engine: Arc<dyn RenderEngine>,
        probe: Arc<dyn HardwareProbe>,
    ) -> CoreResult<Self> {
        let store = Arc::new(store);
        let catalog = Arc::new(TemplateCatalog::builtin()?);
        let processor = Arc::new(TemplateProcessor::new(settings.processor_paths(), probe));
        let queue = Arc::new(JobQueue::new(settings.queue_config()));
        let orchestrator = Arc::new(RenderOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&catalog),
            Arc::clone(&processor),
            Arc::clone(&engine),
        ));
        let jobs = JobService::new(Arc::clone(&store), Arc::clone(&catalog), Arc::clone(&queue));

        Ok(Self {
            settings,
            store,
            catalog,
            processor,
            engine,
            queue,
            orchestrator,
            jobs,
        })
    }

    /// Wires the service from settings: on-disk store, command renderer,
    /// probe chosen by the hardware mode
    pub fn from_settings(settings: ServiceSettings) -> CoreResult<Self> {
        settings.ensure_directories()?;
        let store = JobStore::open(&settings.database.path)?;
        let engine: Arc<dyn RenderEngine> = Arc::new(CommandRenderEngine::new(
            settings.renderer.program.clone(),
            settings.renderer.args.clone(),
            settings.directories.cache.clone(),
        ));
        let probe = probe_for_mode(settings.hardware.mode);
        Self::new(settings, store, engine, probe)
    }

    /// Registers one worker pool per job kind and re-enqueues jobs left
    /// queued by a previous run. Must be called inside a Tokio runtime.
    pub fn start(&self) -> CoreResult<RecoveryReport> {
        for kind in JobKind::ALL {
            self.queue.register_worker(
                kind,
                self.settings.concurrency_for(kind),
                Arc::clone(&self.orchestrator) as Arc<dyn crate::core::jobs::JobHandler>,
            )?;
        }

        let report = self.jobs.recover()?;
        if !report.stuck.is_empty() {
            tracing::warn!(
                "{} jobs were left processing by a previous run and will not be retried",
                report.stuck.len()
            );
        }
        tracing::info!("Scenecast started with {} engine", self.engine.name());
        Ok(report)
    }

    /// Stops the workers after their current job.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        tracing::info!("Scenecast stopped");
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Installs the global subscriber: stdout plus an optional daily rolling file.
///
/// `RUST_LOG` overrides the configured level. Returns the file writer guard,
/// which must be held for the process lifetime. Later calls are no-ops.
pub fn init_logging(settings: &LoggingSettings) -> Option<WorkerGuard> {
    static INITIALIZED: OnceLock<()> = OnceLock::new();
    if INITIALIZED.set(()).is_err() {
        return None;
    }

    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.level));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(cfg!(debug_assertions));

    let (file_layer, guard) = match &settings.dir {
        Some(dir) => {
            let _ = std::fs::create_dir_all(dir);
            let file_appender = tracing_appender::rolling::daily(dir, "scenecast.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer);

    // Avoid panics if already initialized (tests, embedding binaries).
    let _ = tracing::subscriber::set_global_default(subscriber);
    guard
}
