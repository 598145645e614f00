//! Settings Persistence System
//!
//! Service settings with:
//! - Atomic file writes (temp file + rename)
//! - Per-section defaults so partial files load
//! - Normalization that clamps bad values instead of failing
//!
//! Storage location: the path passed to `SettingsManager` (default
//! `{config_dir}/scenecast/settings.json`).

use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::core::fs::atomic_write_bytes;
use crate::core::hardware::HardwareMode;
use crate::core::jobs::{JobKind, QueueConfig};
use crate::core::template::ProcessorPaths;
use crate::core::{CoreError, CoreResult};

/// Settings schema version for migration support
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Lock file suffix (advisory lock to prevent concurrent writers)
pub const SETTINGS_LOCK_SUFFIX: &str = "lock";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Service settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSettings {
    /// Schema version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub directories: DirectorySettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub hardware: HardwareSettings,

    #[serde(default)]
    pub renderer: RendererSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            directories: DirectorySettings::default(),
            database: DatabaseSettings::default(),
            queue: QueueSettings::default(),
            hardware: HardwareSettings::default(),
            renderer: RendererSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ServiceSettings {
    /// Normalizes and clamps settings so persisted state is always valid.
    pub fn normalize(&mut self) {
        self.version = SETTINGS_VERSION;

        for concurrency in [
            &mut self.queue.raw_config,
            &mut self.queue.template,
            &mut self.queue.platform,
            &mut self.queue.custom,
        ] {
            *concurrency = (*concurrency).clamp(1, 64);
        }
        self.queue.max_queue_size = self.queue.max_queue_size.clamp(1, 100_000);
        self.queue.intake_interval_ms = self.queue.intake_interval_ms.clamp(100, 60_000);

        let level = self.logging.level.trim().to_ascii_lowercase();
        self.logging.level = if LOG_LEVELS.contains(&level.as_str()) {
            level
        } else {
            default_log_level()
        };

        if self.renderer.program.trim().is_empty() {
            self.renderer.program = default_renderer_program();
        }
    }

    /// Directories the template processor resolves against
    pub fn processor_paths(&self) -> ProcessorPaths {
        ProcessorPaths {
            cache_dir: self.directories.cache.clone(),
            output_dir: self.directories.output.clone(),
            assets_dir: self.directories.assets.clone(),
            audio_dir: self.directories.audio.clone(),
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_queue_size: self.queue.max_queue_size,
        }
    }

    /// Worker count for one job kind
    pub fn concurrency_for(&self, kind: JobKind) -> usize {
        let value = match kind {
            JobKind::RawConfig => self.queue.raw_config,
            JobKind::TemplateById => self.queue.template,
            JobKind::PlatformTemplate => self.queue.platform,
            JobKind::CustomTemplate => self.queue.custom,
        };
        value as usize
    }

    /// Creates every configured directory.
    pub fn ensure_directories(&self) -> CoreResult<()> {
        for dir in [
            &self.directories.output,
            &self.directories.assets,
            &self.directories.audio,
            &self.directories.cache,
        ] {
            fs::create_dir_all(dir).map_err(|e| {
                CoreError::Settings(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }
        if let Some(parent) = self.database.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        if let Some(dir) = &self.logging.dir {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Filesystem layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectorySettings {
    /// Rendered videos
    pub output: PathBuf,
    /// Base for relative image and video paths
    pub assets: PathBuf,
    /// Base for relative audio paths
    pub audio: PathBuf,
    /// Render manifests and engine scratch space
    pub cache: PathBuf,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        let paths = ProcessorPaths::default();
        Self {
            output: paths.output_dir,
            assets: paths.assets_dir,
            audio: paths.audio_dir,
            cache: paths.cache_dir,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// SQLite file holding job records
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/app/data/jobs.db"),
        }
    }
}

/// Worker pool sizes per job kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueSettings {
    #[serde(default = "default_concurrency")]
    pub raw_config: u32,
    #[serde(default = "default_concurrency")]
    pub template: u32,
    #[serde(default = "default_concurrency")]
    pub platform: u32,
    #[serde(default = "default_concurrency")]
    pub custom: u32,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// How often the daemon looks for jobs queued by other processes
    #[serde(default = "default_intake_interval_ms")]
    pub intake_interval_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            raw_config: default_concurrency(),
            template: default_concurrency(),
            platform: default_concurrency(),
            custom: default_concurrency(),
            max_queue_size: default_max_queue_size(),
            intake_interval_ms: default_intake_interval_ms(),
        }
    }
}

fn default_concurrency() -> u32 {
    4
}

fn default_max_queue_size() -> usize {
    1000
}

fn default_intake_interval_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HardwareSettings {
    pub mode: HardwareMode,
}

/// External renderer invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RendererSettings {
    #[serde(default = "default_renderer_program")]
    pub program: String,
    /// `{config}` and `{output}` are substituted per job
    #[serde(default = "default_renderer_args")]
    pub args: Vec<String>,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            program: default_renderer_program(),
            args: default_renderer_args(),
        }
    }
}

fn default_renderer_program() -> String {
    "scenecast-renderer".to_string()
}

fn default_renderer_args() -> Vec<String> {
    vec![
        "--config".to_string(),
        "{config}".to_string(),
        "--output".to_string(),
        "{output}".to_string(),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for the daily rolling log file; stdout only when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

// =============================================================================
// Settings Manager
// =============================================================================

/// Settings manager for loading, saving, and resetting settings
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    /// Manager for an explicit settings file
    pub fn new(settings_path: PathBuf) -> Self {
        Self { settings_path }
    }

    /// Manager for the per-user default location
    pub fn default_location() -> Self {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join("scenecast").join(SETTINGS_FILE))
    }

    fn lock_path(&self) -> PathBuf {
        let name = self
            .settings_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| SETTINGS_FILE.to_string());
        self.settings_path
            .with_file_name(format!("{name}.{SETTINGS_LOCK_SUFFIX}"))
    }

    fn with_lock<T>(&self, exclusive: bool, op: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        // Ensure parent directory exists so the lock file can be created.
        if let Some(parent) = self.settings_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    CoreError::Settings(format!("Failed to create settings directory: {}", e))
                })?;
            }
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(|e| CoreError::Settings(format!("Failed to open settings lock file: {}", e)))?;

        if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file).map_err(|e| {
                CoreError::Settings(format!("Failed to lock settings file (exclusive): {}", e))
            })?;
        } else {
            fs2::FileExt::lock_shared(&lock_file).map_err(|e| {
                CoreError::Settings(format!("Failed to lock settings file (shared): {}", e))
            })?;
        }

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock settings lock file: {}", e);
        }

        result
    }

    /// Get the settings file path
    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Load settings from disk, returning defaults if the file is missing or unreadable
    pub fn load(&self) -> ServiceSettings {
        let result = self.with_lock(false, || {
            if !self.settings_path.exists() {
                info!("Settings file not found, using defaults");
                return Ok(ServiceSettings::default());
            }

            let content = fs::read_to_string(&self.settings_path).map_err(|e| {
                CoreError::Settings(format!("Failed to read settings file: {}", e))
            })?;

            let mut settings = serde_json::from_str::<ServiceSettings>(&content).map_err(|e| {
                CoreError::Settings(format!("Failed to parse settings file: {}", e))
            })?;

            if settings.version < SETTINGS_VERSION {
                info!(
                    "Migrating settings from version {} to {}",
                    settings.version, SETTINGS_VERSION
                );
            }

            settings.normalize();
            Ok(settings)
        });

        match result {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                ServiceSettings::default()
            }
        }
    }

    /// Save settings to disk using atomic write (temp file + rename)
    pub fn save(&self, settings: &ServiceSettings) -> CoreResult<ServiceSettings> {
        self.with_lock(true, || {
            let mut normalized = settings.clone();
            normalized.normalize();

            let content = serde_json::to_vec_pretty(&normalized)?;
            atomic_write_bytes(&self.settings_path, &content)?;

            info!("Settings saved to {:?}", self.settings_path);
            Ok(normalized)
        })
    }

    /// Reset settings to defaults and delete the settings file
    pub fn reset(&self) -> CoreResult<ServiceSettings> {
        self.with_lock(true, || {
            if self.settings_path.exists() {
                fs::remove_file(&self.settings_path).map_err(|e| {
                    CoreError::Settings(format!("Failed to delete settings file: {}", e))
                })?;
                info!("Settings file deleted");
            }
            Ok(ServiceSettings::default())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = ServiceSettings::default();
        assert_eq!(settings.directories.output, PathBuf::from("/app/videos"));
        assert_eq!(settings.directories.audio, PathBuf::from("/app/tts-audio"));
        assert_eq!(settings.concurrency_for(JobKind::TemplateById), 4);
        assert_eq!(settings.queue.max_queue_size, 1000);
        assert_eq!(settings.hardware.mode, HardwareMode::Auto);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let settings: ServiceSettings = serde_json::from_str(
            r#"{"queue": {"template": 8}, "hardware": {"mode": "disabled"}}"#,
        )
        .unwrap();
        assert_eq!(settings.queue.template, 8);
        assert_eq!(settings.queue.raw_config, 4);
        assert_eq!(settings.hardware.mode, HardwareMode::Disabled);
        assert_eq!(settings.renderer.args.len(), 4);
    }

    #[test]
    fn test_normalize_clamps() {
        let mut settings = ServiceSettings::default();
        settings.queue.raw_config = 0;
        settings.queue.custom = 500;
        settings.queue.max_queue_size = 0;
        settings.queue.intake_interval_ms = 5;
        settings.logging.level = "LOUD".to_string();
        settings.renderer.program = "  ".to_string();
        settings.normalize();

        assert_eq!(settings.queue.raw_config, 1);
        assert_eq!(settings.queue.custom, 64);
        assert_eq!(settings.queue.max_queue_size, 1);
        assert_eq!(settings.queue.intake_interval_ms, 100);
        assert_eq!(settings.logging.level, "info");
        assert_eq!(settings.renderer.program, "scenecast-renderer");

        settings.logging.level = " WARN ".to_string();
        settings.normalize();
        assert_eq!(settings.logging.level, "warn");
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path().join("settings.json"));
        assert_eq!(manager.load(), ServiceSettings::default());
    }

    #[test]
    fn test_load_corrupt_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        assert_eq!(SettingsManager::new(path).load(), ServiceSettings::default());
    }

    #[test]
    fn test_save_normalizes_and_round_trips() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path().join("nested").join("settings.json"));

        let mut settings = ServiceSettings::default();
        settings.queue.platform = 0;
        settings.directories.output = dir.path().join("out");
        let saved = manager.save(&settings).unwrap();
        assert_eq!(saved.queue.platform, 1);

        let loaded = manager.load();
        assert_eq!(loaded, saved);
        assert!(manager.settings_path().exists());
    }

    #[test]
    fn test_reset_deletes_file() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path().join("settings.json"));
        manager.save(&ServiceSettings::default()).unwrap();
        assert!(manager.settings_path().exists());

        manager.reset().unwrap();
        assert!(!manager.settings_path().exists());
    }

    #[test]
    fn test_ensure_directories() {
        let dir = TempDir::new().unwrap();
        let mut settings = ServiceSettings::default();
        settings.directories = DirectorySettings {
            output: dir.path().join("videos"),
            assets: dir.path().join("ai-assets"),
            audio: dir.path().join("tts-audio"),
            cache: dir.path().join("cache"),
        };
        settings.database.path = dir.path().join("data").join("jobs.db");
        settings.ensure_directories().unwrap();

        assert!(dir.path().join("videos").is_dir());
        assert!(dir.path().join("cache").is_dir());
        assert!(dir.path().join("data").is_dir());
        assert_eq!(settings.processor_paths().audio_dir, dir.path().join("tts-audio"));
    }
}
