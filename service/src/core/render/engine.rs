//! Render Engine Seam
//!
//! The render engine is an external capability. It consumes a fully resolved
//! `RenderEngineConfig`, reports progress on a side channel and returns a
//! single result once the artifact is written (or the encode failed).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::config::RenderEngineConfig;
use crate::core::CoreResult;

/// Progress tick emitted by an engine while rendering
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderProgress {
    /// Completed fraction in `0.0..=1.0`
    pub fraction: f64,
}

impl RenderProgress {
    pub fn new(fraction: f64) -> Self {
        Self {
            fraction: if fraction.is_finite() {
                fraction.clamp(0.0, 1.0)
            } else {
                0.0
            },
        }
    }

    /// Whole percent, rounded
    pub fn percent(&self) -> u8 {
        (self.fraction * 100.0).round() as u8
    }
}

/// Successful render result
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOutcome {
    pub output_path: PathBuf,
    pub encoding_time_sec: f64,
}

/// External rendering capability
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &str;

    /// Renders `config` into `output_path`.
    ///
    /// Progress ticks are best-effort; a closed channel must not fail the
    /// render. Errors carry the engine's message verbatim.
    async fn render(
        &self,
        config: &RenderEngineConfig,
        output_path: &Path,
        progress: mpsc::Sender<RenderProgress>,
    ) -> CoreResult<RenderOutcome>;
}

// =============================================================================
// Scripted Engine
// =============================================================================

/// Deterministic engine used in tests and dry runs.
///
/// Emits the configured ticks, then either writes a placeholder artifact or
/// fails with the configured message.
#[derive(Clone, Debug, Default)]
pub struct ScriptedEngine {
    ticks: Vec<f64>,
    failure: Option<String>,
    late_tick: Option<f64>,
    tick_delay: Option<std::time::Duration>,
    rendered: std::sync::Arc<std::sync::Mutex<Vec<RenderEngineConfig>>>,
}

impl ScriptedEngine {
    pub fn succeeding(ticks: &[f64]) -> Self {
        Self {
            ticks: ticks.to_vec(),
            ..Self::default()
        }
    }

    pub fn failing(ticks: &[f64], message: &str) -> Self {
        Self {
            ticks: ticks.to_vec(),
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Sends one more tick from a detached task after the terminal result.
    pub fn with_late_tick(mut self, fraction: f64) -> Self {
        self.late_tick = Some(fraction);
        self
    }

    /// Sleeps between ticks, keeping the job observable in `processing`.
    pub fn with_tick_delay(mut self, delay: std::time::Duration) -> Self {
        self.tick_delay = Some(delay);
        self
    }

    /// Configs this engine has been asked to render, in call order
    pub fn rendered(&self) -> Vec<RenderEngineConfig> {
        self.rendered.lock().unwrap().clone()
    }
}

#[async_trait]
impl RenderEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn render(
        &self,
        config: &RenderEngineConfig,
        output_path: &Path,
        progress: mpsc::Sender<RenderProgress>,
    ) -> CoreResult<RenderOutcome> {
        self.rendered.lock().unwrap().push(config.clone());

        for fraction in &self.ticks {
            if let Some(delay) = self.tick_delay {
                tokio::time::sleep(delay).await;
            }
            let _ = progress.send(RenderProgress::new(*fraction)).await;
        }

        if let Some(fraction) = self.late_tick {
            let tx = progress.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                let _ = tx.send(RenderProgress::new(fraction)).await;
            });
        }

        if let Some(message) = &self.failure {
            return Err(crate::core::CoreError::EngineFailed(message.clone()));
        }

        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output_path, b"scripted render").await?;

        Ok(RenderOutcome {
            output_path: output_path.to_path_buf(),
            encoding_time_sec: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent_rounds_and_clamps() {
        assert_eq!(RenderProgress::new(0.426).percent(), 43);
        assert_eq!(RenderProgress::new(1.7).percent(), 100);
        assert_eq!(RenderProgress::new(-0.2).percent(), 0);
        assert_eq!(RenderProgress::new(f64::NAN).percent(), 0);
    }
}
