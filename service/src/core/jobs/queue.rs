//! Job Queue Module
//!
//! In-process queue with one lane per job kind. Each lane has its own bounded
//! pool of workers; a worker takes one entry at a time and runs the lane's
//! handler end-to-end. Entries are delivered at most once. Anything still
//! pending at shutdown stays `queued` in the job store and is re-enqueued by
//! startup recovery.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use super::{JobKind, JobPayload, JobStatus};
use crate::core::{new_queue_ref, CoreError, CoreResult, JobId, QueueRef};

/// Idle workers re-check their lane at least this often
const IDLE_POLL: Duration = Duration::from_millis(100);

// =============================================================================
// Queue Entries
// =============================================================================

/// Entry handed to a worker
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub queue_ref: QueueRef,
    pub kind: JobKind,
    pub payload: JobPayload,
    pub enqueued_at: String,
}

/// What a handler returns for a finished job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    pub output_path: Option<String>,
    pub download_url: Option<String>,
}

/// Progress capability passed to a handler for one entry
#[derive(Clone, Debug)]
pub struct ProgressReporter {
    job_id: JobId,
    percent: Arc<AtomicU8>,
}

impl ProgressReporter {
    /// Reporter not attached to a queue entry
    pub fn new(job_id: impl Into<JobId>) -> Self {
        Self {
            job_id: job_id.into(),
            percent: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Records the latest whole-percent progress for this entry
    pub fn report(&self, percent: u8) {
        self.percent.store(percent.min(100), Ordering::Relaxed);
    }

    pub fn latest(&self) -> u8 {
        self.percent.load(Ordering::Relaxed)
    }
}

/// Processes entries for one job kind
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, entry: &QueueEntry, progress: ProgressReporter)
        -> CoreResult<JobSummary>;
}

// =============================================================================
// Queue Configuration
// =============================================================================

/// Queue configuration
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Maximum pending entries across all lanes
    pub max_queue_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
        }
    }
}

/// Per-kind counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub queued: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
    pub workers: usize,
}

/// Snapshot of an entry a worker is running
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveEntry {
    pub queue_ref: QueueRef,
    pub job_id: JobId,
    pub progress: u8,
}

#[derive(Default)]
struct Lane {
    pending: VecDeque<QueueEntry>,
    active: HashMap<QueueRef, (JobId, Arc<AtomicU8>)>,
    completed: u64,
    failed: u64,
    workers: usize,
}

type Lanes = Arc<Mutex<HashMap<JobKind, Lane>>>;

// =============================================================================
// Job Queue
// =============================================================================

/// Per-kind job queue with bounded worker pools
pub struct JobQueue {
    config: QueueConfig,
    lanes: Lanes,
    signals: HashMap<JobKind, Arc<Notify>>,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Self {
        let lanes = JobKind::ALL
            .iter()
            .map(|kind| (*kind, Lane::default()))
            .collect();
        let signals = JobKind::ALL
            .iter()
            .map(|kind| (*kind, Arc::new(Notify::new())))
            .collect();
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            lanes: Arc::new(Mutex::new(lanes)),
            signals,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(QueueConfig::default())
    }

    fn signal(&self, kind: JobKind) -> CoreResult<Arc<Notify>> {
        self.signals
            .get(&kind)
            .cloned()
            .ok_or_else(|| CoreError::NoWorker(kind.to_string()))
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Adds an entry to the lane for `kind`.
    pub fn enqueue(&self, kind: JobKind, payload: JobPayload) -> CoreResult<QueueRef> {
        if self.is_shut_down() {
            return Err(CoreError::Internal("Job queue is shut down".to_string()));
        }
        let signal = self.signal(kind)?;
        let queue_ref = new_queue_ref();

        {
            let mut lanes = self.lanes.lock().unwrap();
            let pending: usize = lanes.values().map(|lane| lane.pending.len()).sum();
            if pending >= self.config.max_queue_size {
                return Err(CoreError::QueueFull(format!(
                    "{} pending (max {})",
                    pending, self.config.max_queue_size
                )));
            }
            let lane = lanes.entry(kind).or_default();
            tracing::debug!(
                "Enqueued job {} on {} as {}",
                payload.job_id,
                kind,
                queue_ref
            );
            lane.pending.push_back(QueueEntry {
                queue_ref: queue_ref.clone(),
                kind,
                payload,
                enqueued_at: chrono::Utc::now().to_rfc3339(),
            });
        }

        signal.notify_one();
        Ok(queue_ref)
    }

    /// Starts `concurrency` workers for `kind`, each running `handler`.
    ///
    /// A kind can be registered once.
    pub fn register_worker(
        &self,
        kind: JobKind,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
    ) -> CoreResult<()> {
        if concurrency == 0 {
            return Err(CoreError::ValidationError(format!(
                "Concurrency for {kind} must be at least 1"
            )));
        }
        if self.is_shut_down() {
            return Err(CoreError::Internal("Job queue is shut down".to_string()));
        }
        let signal = self.signal(kind)?;

        {
            let mut lanes = self.lanes.lock().unwrap();
            let lane = lanes.entry(kind).or_default();
            if lane.workers > 0 {
                return Err(CoreError::ValidationError(format!(
                    "Workers already registered for {kind}"
                )));
            }
            lane.workers = concurrency;
        }

        let mut handles = self.handles.lock().unwrap();
        for index in 0..concurrency {
            handles.push(tokio::spawn(run_worker(
                kind,
                index,
                Arc::clone(&self.lanes),
                Arc::clone(&signal),
                Arc::clone(&handler),
                self.shutdown_tx.subscribe(),
            )));
        }

        tracing::info!("Registered {} workers for {}", concurrency, kind);
        Ok(())
    }

    pub fn stats(&self, kind: JobKind) -> QueueStats {
        self.lanes
            .lock()
            .unwrap()
            .get(&kind)
            .map(lane_stats)
            .unwrap_or_default()
    }

    pub fn all_stats(&self) -> BTreeMap<JobKind, QueueStats> {
        self.lanes
            .lock()
            .unwrap()
            .iter()
            .map(|(kind, lane)| (*kind, lane_stats(lane)))
            .collect()
    }

    /// Entries currently being run, with their last reported progress
    pub fn active_entries(&self, kind: JobKind) -> Vec<ActiveEntry> {
        let lanes = self.lanes.lock().unwrap();
        let mut entries: Vec<ActiveEntry> = lanes
            .get(&kind)
            .map(|lane| {
                lane.active
                    .iter()
                    .map(|(queue_ref, (job_id, percent))| ActiveEntry {
                        queue_ref: queue_ref.clone(),
                        job_id: job_id.clone(),
                        progress: percent.load(Ordering::Relaxed),
                    })
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(|a, b| a.queue_ref.cmp(&b.queue_ref));
        entries
    }

    /// Whether no lane has pending or running entries
    pub fn is_idle(&self) -> bool {
        self.lanes
            .lock()
            .unwrap()
            .values()
            .all(|lane| lane.pending.is_empty() && lane.active.is_empty())
    }

    /// Waits until the queue drains. Returns false on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_idle() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Stops accepting entries and waits for workers to finish their
    /// current job. Pending entries are dropped.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        for signal in self.signals.values() {
            signal.notify_waiters();
        }

        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Worker task ended abnormally: {}", e);
            }
        }

        let dropped: usize = self
            .lanes
            .lock()
            .unwrap()
            .values_mut()
            .map(|lane| {
                let n = lane.pending.len();
                lane.pending.clear();
                n
            })
            .sum();
        if dropped > 0 {
            tracing::info!("Queue shut down with {} pending entries left in the store", dropped);
        }
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn lane_stats(lane: &Lane) -> QueueStats {
    QueueStats {
        queued: lane.pending.len(),
        active: lane.active.len(),
        completed: lane.completed,
        failed: lane.failed,
        workers: lane.workers,
    }
}

// =============================================================================
// Workers
// =============================================================================

fn take_next(lanes: &Lanes, kind: JobKind) -> Option<(QueueEntry, Arc<AtomicU8>)> {
    let mut lanes = lanes.lock().unwrap();
    let lane = lanes.get_mut(&kind)?;
    let entry = lane.pending.pop_front()?;
    let percent = Arc::new(AtomicU8::new(0));
    lane.active.insert(
        entry.queue_ref.clone(),
        (entry.payload.job_id.clone(), Arc::clone(&percent)),
    );
    Some((entry, percent))
}

fn finish(lanes: &Lanes, kind: JobKind, queue_ref: &str, succeeded: bool) {
    let mut lanes = lanes.lock().unwrap();
    if let Some(lane) = lanes.get_mut(&kind) {
        lane.active.remove(queue_ref);
        if succeeded {
            lane.completed += 1;
        } else {
            lane.failed += 1;
        }
    }
}

async fn run_worker(
    kind: JobKind,
    index: usize,
    lanes: Lanes,
    signal: Arc<Notify>,
    handler: Arc<dyn JobHandler>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tracing::debug!("Worker {} started for {}", index, kind);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let Some((entry, percent)) = take_next(&lanes, kind) else {
            tokio::select! {
                _ = signal.notified() => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(IDLE_POLL) => {}
            }
            continue;
        };

        let job_id = entry.payload.job_id.clone();
        tracing::info!("Worker {} processing job {} ({})", index, job_id, kind);

        let reporter = ProgressReporter {
            job_id: job_id.clone(),
            percent,
        };
        let task_handler = Arc::clone(&handler);
        let task_entry = entry.clone();
        // Run on its own task so a panicking handler only fails this entry.
        let result =
            tokio::spawn(async move { task_handler.handle(&task_entry, reporter).await }).await;

        let succeeded = match result {
            Ok(Ok(summary)) => {
                tracing::info!("Job {} finished: {}", job_id, summary.status);
                true
            }
            Ok(Err(e)) => {
                tracing::error!("Job {} failed on {}: {}", job_id, kind, e);
                false
            }
            Err(e) => {
                tracing::error!("Job {} handler panicked on {}: {}", job_id, kind, e);
                false
            }
        };
        finish(&lanes, kind, &entry.queue_ref, succeeded);
    }

    tracing::debug!("Worker {} stopped for {}", index, kind);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::jobs::RenderRequest;
    use crate::core::template::ConfigValue;
    use std::sync::atomic::AtomicUsize;

    fn payload(job_id: &str) -> JobPayload {
        JobPayload {
            job_id: job_id.to_string(),
            output_name: format!("{job_id}.mp4"),
            request: RenderRequest::RawConfig {
                config: ConfigValue::mapping([("scenes", ConfigValue::Sequence(vec![]))]),
            },
        }
    }

    /// Sleeps, tracks peak concurrency, fails jobs whose id starts with "bad"
    #[derive(Default)]
    struct TestHandler {
        running: AtomicUsize,
        peak: AtomicUsize,
        seen: Mutex<Vec<JobId>>,
    }

    #[async_trait]
    impl JobHandler for TestHandler {
        async fn handle(
            &self,
            entry: &QueueEntry,
            progress: ProgressReporter,
        ) -> CoreResult<JobSummary> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            progress.report(50);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(entry.payload.job_id.clone());

            if entry.payload.job_id.starts_with("bad") {
                return Err(CoreError::EngineFailed("boom".to_string()));
            }
            if entry.payload.job_id.starts_with("panic") {
                panic!("handler bug");
            }
            Ok(JobSummary {
                job_id: entry.payload.job_id.clone(),
                status: JobStatus::Completed,
                output_path: None,
                download_url: None,
            })
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_per_kind() {
        let queue = JobQueue::with_defaults();
        let handler = Arc::new(TestHandler::default());
        queue
            .register_worker(JobKind::TemplateById, 2, handler.clone())
            .unwrap();

        for i in 0..6 {
            queue
                .enqueue(JobKind::TemplateById, payload(&format!("job-{i}")))
                .unwrap();
        }
        assert!(queue.wait_idle(Duration::from_secs(5)).await);

        assert_eq!(handler.seen.lock().unwrap().len(), 6);
        assert!(handler.peak.load(Ordering::SeqCst) <= 2);
        let stats = queue.stats(JobKind::TemplateById);
        assert_eq!(stats.completed, 6);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.workers, 2);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_counted() {
        let queue = JobQueue::with_defaults();
        let handler = Arc::new(TestHandler::default());
        queue
            .register_worker(JobKind::RawConfig, 1, handler.clone())
            .unwrap();

        queue.enqueue(JobKind::RawConfig, payload("good")).unwrap();
        queue.enqueue(JobKind::RawConfig, payload("bad-1")).unwrap();
        queue.enqueue(JobKind::RawConfig, payload("panic-1")).unwrap();
        queue.enqueue(JobKind::RawConfig, payload("good-2")).unwrap();
        assert!(queue.wait_idle(Duration::from_secs(5)).await);

        let stats = queue.stats(JobKind::RawConfig);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 2);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_entries_wait_for_registration() {
        let queue = JobQueue::with_defaults();
        let handler = Arc::new(TestHandler::default());
        queue.enqueue(JobKind::PlatformTemplate, payload("early")).unwrap();
        assert_eq!(queue.stats(JobKind::PlatformTemplate).queued, 1);

        queue
            .register_worker(JobKind::PlatformTemplate, 1, handler.clone())
            .unwrap();
        assert!(queue.wait_idle(Duration::from_secs(5)).await);
        assert_eq!(handler.seen.lock().unwrap().as_slice(), ["early".to_string()]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_queue_full() {
        let queue = JobQueue::new(QueueConfig { max_queue_size: 2 });
        queue.enqueue(JobKind::RawConfig, payload("a")).unwrap();
        queue.enqueue(JobKind::CustomTemplate, payload("b")).unwrap();
        let err = queue.enqueue(JobKind::RawConfig, payload("c")).unwrap_err();
        assert!(matches!(err, CoreError::QueueFull(_)));
    }

    #[tokio::test]
    async fn test_register_rejects_zero_and_duplicates() {
        let queue = JobQueue::with_defaults();
        let handler = Arc::new(TestHandler::default());
        assert!(queue
            .register_worker(JobKind::RawConfig, 0, handler.clone())
            .is_err());
        queue
            .register_worker(JobKind::RawConfig, 1, handler.clone())
            .unwrap();
        assert!(queue
            .register_worker(JobKind::RawConfig, 1, handler.clone())
            .is_err());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_progress_visible_while_active() {
        let queue = JobQueue::with_defaults();
        let handler = Arc::new(TestHandler::default());
        queue
            .register_worker(JobKind::CustomTemplate, 1, handler.clone())
            .unwrap();
        queue.enqueue(JobKind::CustomTemplate, payload("slow")).unwrap();

        let mut observed = None;
        for _ in 0..100 {
            if let Some(active) = queue.active_entries(JobKind::CustomTemplate).first() {
                if active.progress == 50 {
                    observed = Some(active.job_id.clone());
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(observed.as_deref(), Some("slow"));
        assert!(queue.wait_idle(Duration::from_secs(5)).await);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_entries() {
        let queue = JobQueue::with_defaults();
        queue
            .register_worker(JobKind::RawConfig, 2, Arc::new(TestHandler::default()))
            .unwrap();
        queue.shutdown().await;
        assert!(queue.enqueue(JobKind::RawConfig, payload("late")).is_err());
    }
}
