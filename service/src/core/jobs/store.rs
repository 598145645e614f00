//! Job State Store
//!
//! SQLite-backed durable job records. The store is the single source of
//! truth for status polling; every write is keyed by job id, and lifecycle
//! writes are conditional on the current status so a duplicate terminal
//! event can never produce an invalid status sequence.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{JobRecord, JobStatus};
use crate::core::{CoreError, CoreResult};

// =============================================================================
// Job Store
// =============================================================================

/// SQLite store for job records
pub struct JobStore {
    conn: Mutex<Connection>,
}

const SELECT_COLUMNS: &str = "id, status, config, output_name, output_path, download_url, \
     error_message, progress, webhook_url, created_at, started_at, completed_at, failed_at";

impl JobStore {
    /// Opens (or creates) the store at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| CoreError::Database(format!("Failed to open job database: {}", e)))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Creates an in-memory store (for testing and one-shot CLI runs)
    pub fn in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            CoreError::Database(format!("Failed to create in-memory database: {}", e))
        })?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    #[cfg(test)]
    pub(crate) fn execute_sql(&self, sql: &str) -> CoreResult<()> {
        self.conn.lock().unwrap().execute_batch(sql)?;
        Ok(())
    }

    fn init_schema(&self) -> CoreResult<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS jobs (
                    id TEXT PRIMARY KEY,
                    status TEXT NOT NULL,
                    config TEXT NOT NULL,
                    output_name TEXT NOT NULL,
                    output_path TEXT,
                    download_url TEXT,
                    error_message TEXT,
                    progress INTEGER NOT NULL DEFAULT 0,
                    webhook_url TEXT,
                    created_at TEXT NOT NULL,
                    started_at TEXT,
                    completed_at TEXT,
                    failed_at TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
                CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at);
                "#,
            )
            .map_err(|e| CoreError::Database(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get(&self, job_id: &str) -> CoreResult<JobRecord> {
        self.find(job_id)?
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))
    }

    pub fn find(&self, job_id: &str) -> CoreResult<Option<JobRecord>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM jobs WHERE id = ?1"),
                [job_id],
                RawRow::from_row,
            )
            .optional()?;
        row.map(RawRow::into_record).transpose()
    }

    /// Newest first
    pub fn list(&self, limit: usize) -> CoreResult<Vec<JobRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map([limit as i64], RawRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawRow::into_record).collect()
    }

    /// Oldest first, so recovery re-enqueues in submission order
    pub fn list_by_status(&self, status: JobStatus) -> CoreResult<Vec<JobRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt
            .query_map([status.as_str()], RawRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawRow::into_record).collect()
    }

    pub fn count_by_status(&self, status: JobStatus) -> CoreResult<usize> {
        let count: i64 = self.conn.lock().unwrap().query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Inserts a new queued record.
    pub fn create(&self, record: &JobRecord) -> CoreResult<()> {
        let config = serde_json::to_string(&record.config)?;
        self.conn.lock().unwrap().execute(
            r#"
            INSERT INTO jobs (id, status, config, output_name, progress, webhook_url, created_at)
            VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)
            "#,
            params![
                record.id,
                JobStatus::Queued.as_str(),
                config,
                record.output_name,
                record.webhook_url,
                record.created_at,
            ],
        )?;
        Ok(())
    }

    /// Removes a record. Returns whether a row was deleted.
    pub fn delete(&self, job_id: &str) -> CoreResult<bool> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute("DELETE FROM jobs WHERE id = ?1", [job_id])?;
        Ok(changed > 0)
    }

    /// queued -> processing. Returns false when the job was not queued.
    pub fn begin_processing(&self, job_id: &str) -> CoreResult<bool> {
        let changed = self.conn.lock().unwrap().execute(
            "UPDATE jobs SET status = 'processing', started_at = ?2 WHERE id = ?1 AND status = 'queued'",
            params![job_id, now()],
        )?;
        Ok(changed > 0)
    }

    /// Progress write, only while processing. Never lowers the stored value.
    pub fn update_progress(&self, job_id: &str, progress: u8) -> CoreResult<bool> {
        let changed = self.conn.lock().unwrap().execute(
            "UPDATE jobs SET progress = ?2 WHERE id = ?1 AND status = 'processing' AND progress < ?2",
            params![job_id, i64::from(progress.min(100))],
        )?;
        Ok(changed > 0)
    }

    /// processing -> completed. Returns false when the job was not processing,
    /// which is how a duplicate terminal event shows up.
    pub fn complete(&self, job_id: &str, output_path: &str, download_url: &str) -> CoreResult<bool> {
        let changed = self.conn.lock().unwrap().execute(
            r#"
            UPDATE jobs
            SET status = 'completed', progress = 100, output_path = ?2, download_url = ?3,
                completed_at = ?4
            WHERE id = ?1 AND status = 'processing'
            "#,
            params![job_id, output_path, download_url, now()],
        )?;
        Ok(changed > 0)
    }

    /// processing -> failed. Same conditional semantics as `complete`.
    pub fn fail(&self, job_id: &str, error_message: &str) -> CoreResult<bool> {
        let changed = self.conn.lock().unwrap().execute(
            r#"
            UPDATE jobs
            SET status = 'failed', error_message = ?2, failed_at = ?3
            WHERE id = ?1 AND status = 'processing'
            "#,
            params![job_id, error_message, now()],
        )?;
        Ok(changed > 0)
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

// =============================================================================
// Row Mapping
// =============================================================================

/// Column values before status and config are parsed
struct RawRow {
    id: String,
    status: String,
    config: String,
    output_name: String,
    output_path: Option<String>,
    download_url: Option<String>,
    error_message: Option<String>,
    progress: i64,
    webhook_url: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    failed_at: Option<String>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            status: row.get(1)?,
            config: row.get(2)?,
            output_name: row.get(3)?,
            output_path: row.get(4)?,
            download_url: row.get(5)?,
            error_message: row.get(6)?,
            progress: row.get(7)?,
            webhook_url: row.get(8)?,
            created_at: row.get(9)?,
            started_at: row.get(10)?,
            completed_at: row.get(11)?,
            failed_at: row.get(12)?,
        })
    }

    fn into_record(self) -> CoreResult<JobRecord> {
        Ok(JobRecord {
            status: JobStatus::parse(&self.status)?,
            config: serde_json::from_str(&self.config)?,
            id: self.id,
            output_name: self.output_name,
            output_path: self.output_path,
            download_url: self.download_url,
            error_message: self.error_message,
            progress: self.progress.clamp(0, 100) as u8,
            webhook_url: self.webhook_url,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            failed_at: self.failed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> JobRecord {
        JobRecord::new(
            id.to_string(),
            serde_json::json!({"kind": "raw-config", "config": {"scenes": []}}),
            format!("video_{id}.mp4"),
            Some("https://hooks.example/done".to_string()),
        )
    }

    #[test]
    fn test_create_and_get() {
        let store = JobStore::in_memory().unwrap();
        store.create(&record("a")).unwrap();

        let job = store.get("a").unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0);
        assert_eq!(job.config["kind"], "raw-config");
        assert_eq!(job.webhook_url.as_deref(), Some("https://hooks.example/done"));
        assert!(matches!(store.get("missing"), Err(CoreError::JobNotFound(_))));
    }

    #[test]
    fn test_lifecycle_to_completed() {
        let store = JobStore::in_memory().unwrap();
        store.create(&record("a")).unwrap();

        assert!(store.begin_processing("a").unwrap());
        assert!(!store.begin_processing("a").unwrap());
        assert!(store.update_progress("a", 40).unwrap());

        assert!(store
            .complete("a", "/app/videos/video_a.mp4", "/download/video_a.mp4")
            .unwrap());
        let job = store.get("a").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.download_url.as_deref(), Some("/download/video_a.mp4"));
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
        assert!(job.failed_at.is_none());
    }

    #[test]
    fn test_duplicate_terminal_write_is_ignored() {
        let store = JobStore::in_memory().unwrap();
        store.create(&record("a")).unwrap();
        store.begin_processing("a").unwrap();

        assert!(store.complete("a", "/v/a.mp4", "/download/a.mp4").unwrap());
        assert!(!store.complete("a", "/v/a.mp4", "/download/a.mp4").unwrap());
        assert!(!store.fail("a", "late error").unwrap());

        let job = store.get("a").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error_message.is_none());
        assert!(job.failed_at.is_none());
    }

    #[test]
    fn test_terminal_requires_processing() {
        let store = JobStore::in_memory().unwrap();
        store.create(&record("a")).unwrap();

        assert!(!store.complete("a", "/v/a.mp4", "/download/a.mp4").unwrap());
        assert!(!store.fail("a", "boom").unwrap());
        assert!(!store.update_progress("a", 10).unwrap());
        assert_eq!(store.get("a").unwrap().status, JobStatus::Queued);
    }

    #[test]
    fn test_progress_never_decreases_and_stops_after_terminal() {
        let store = JobStore::in_memory().unwrap();
        store.create(&record("a")).unwrap();
        store.begin_processing("a").unwrap();

        store.update_progress("a", 60).unwrap();
        assert!(!store.update_progress("a", 30).unwrap());
        assert_eq!(store.get("a").unwrap().progress, 60);

        store.fail("a", "encoder crashed").unwrap();
        assert!(!store.update_progress("a", 90).unwrap());
        let job = store.get("a").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress, 60);
        assert_eq!(job.error_message.as_deref(), Some("encoder crashed"));
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_progress_is_keyed_by_job() {
        let store = JobStore::in_memory().unwrap();
        store.create(&record("a")).unwrap();
        store.create(&record("b")).unwrap();
        store.begin_processing("a").unwrap();
        store.begin_processing("b").unwrap();

        store.update_progress("a", 70).unwrap();
        store.update_progress("b", 20).unwrap();
        assert_eq!(store.get("a").unwrap().progress, 70);
        assert_eq!(store.get("b").unwrap().progress, 20);
    }

    #[test]
    fn test_list_and_filters() {
        let store = JobStore::in_memory().unwrap();
        for id in ["a", "b", "c"] {
            store.create(&record(id)).unwrap();
        }
        store.begin_processing("b").unwrap();

        let newest = store.list(2).unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[0].id, "c");

        let queued: Vec<_> = store
            .list_by_status(JobStatus::Queued)
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(queued, vec!["a", "c"]);
        assert_eq!(store.count_by_status(JobStatus::Processing).unwrap(), 1);

        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
    }

    #[test]
    fn test_open_file_db_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("jobs.db");

        {
            let store = JobStore::open(&path).unwrap();
            store.create(&record("a")).unwrap();
        }

        let store = JobStore::open(&path).unwrap();
        assert_eq!(store.get("a").unwrap().output_name, "video_a.mp4");
    }
}
