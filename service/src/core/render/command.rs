//! Command Renderer
//!
//! Runs an external renderer program per job. The resolved configuration is
//! written to a JSON manifest, the program is spawned with `{config}` and
//! `{output}` substituted into its arguments, and `progress=<fraction>` lines
//! on stdout become progress ticks.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::config::RenderEngineConfig;
use super::engine::{RenderEngine, RenderOutcome, RenderProgress};
use crate::core::fs::{atomic_write_json_pretty, file_exists};
use crate::core::process::{configure_tokio_command, last_line};
use crate::core::{CoreError, CoreResult};

/// Renderer backed by an external program
#[derive(Debug, Clone)]
pub struct CommandRenderEngine {
    program: String,
    args: Vec<String>,
    manifest_dir: PathBuf,
}

impl CommandRenderEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>, manifest_dir: PathBuf) -> Self {
        Self {
            program: program.into(),
            args,
            manifest_dir,
        }
    }

    fn manifest_path(&self, output_path: &Path) -> PathBuf {
        let stem = output_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "render".to_string());
        self.manifest_dir.join(format!("{stem}.render.json"))
    }

    fn expand_args(&self, manifest: &Path, output: &Path) -> Vec<String> {
        let manifest = manifest.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|a| a.replace("{config}", &manifest).replace("{output}", &output))
            .collect()
    }

    /// Spawns the renderer on a written manifest and waits for the artifact.
    async fn run_renderer(
        &self,
        manifest: &Path,
        output_path: &Path,
        progress: mpsc::Sender<RenderProgress>,
    ) -> CoreResult<()> {
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut cmd = tokio::process::Command::new(&self.program);
        configure_tokio_command(&mut cmd);
        cmd.args(self.expand_args(manifest, output_path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            CoreError::RendererUnavailable(format!("Failed to spawn {}: {}", self.program, e))
        })?;

        // Drain stderr concurrently so a full pipe cannot stall the renderer.
        let stderr_handle = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                use tokio::io::AsyncReadExt;
                let mut buf = Vec::new();
                let mut stderr = stderr;
                let _ = stderr.read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).to_string()
            })
        });

        let stdout_handle = child.stdout.take().map(|stdout| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(tick) = parse_progress_line(&line) {
                        if progress.send(tick).await.is_err() {
                            // receiver gone; keep draining stdout
                            continue;
                        }
                    }
                }
            })
        });

        let status = child.wait().await.map_err(|e| {
            CoreError::EngineFailed(format!("Failed to wait for {}: {}", self.program, e))
        })?;

        if let Some(handle) = stdout_handle {
            let _ = handle.await;
        }
        let stderr = match stderr_handle {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            let message = last_line(&stderr)
                .unwrap_or_else(|| format!("{} exited with status: {}", self.program, status));
            return Err(CoreError::EngineFailed(message));
        }

        if !file_exists(output_path).await {
            return Err(CoreError::EngineFailed(format!(
                "{} finished without producing {}",
                self.program,
                output_path.display()
            )));
        }

        Ok(())
    }
}

/// Parses a `progress=<fraction>` line.
pub fn parse_progress_line(line: &str) -> Option<RenderProgress> {
    let value = line.trim().strip_prefix("progress=")?;
    value.trim().parse::<f64>().ok().map(RenderProgress::new)
}

#[async_trait]
impl RenderEngine for CommandRenderEngine {
    fn name(&self) -> &str {
        &self.program
    }

    async fn render(
        &self,
        config: &RenderEngineConfig,
        output_path: &Path,
        progress: mpsc::Sender<RenderProgress>,
    ) -> CoreResult<RenderOutcome> {
        let start = Instant::now();
        let manifest = self.manifest_path(output_path);
        atomic_write_json_pretty(&manifest, config)?;

        let result = self.run_renderer(&manifest, output_path, progress).await;
        if let Err(e) = tokio::fs::remove_file(&manifest).await {
            tracing::debug!("Could not remove manifest {}: {}", manifest.display(), e);
        }
        result?;

        Ok(RenderOutcome {
            output_path: output_path.to_path_buf(),
            encoding_time_sec: start.elapsed().as_secs_f64(),
        })
    }
}
