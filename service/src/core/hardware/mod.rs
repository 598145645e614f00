//! Hardware Capability Probe
//!
//! Answers one question per job: is accelerated H.264 encoding available on
//! this host? The answer gates encoder selection for the whole job.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::process::run_with_timeout;

/// Probe timeout for `nvidia-smi`
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Accelerated-encoding capability check
#[async_trait]
pub trait HardwareProbe: Send + Sync {
    /// Returns true when hardware encoding can be used.
    async fn has_accelerated_encoder(&self) -> bool;
}

/// How the service decides hardware availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareMode {
    /// Run the probe for every job
    #[default]
    Auto,
    /// Always use the hardware profile
    Enabled,
    /// Always use the software profile
    Disabled,
}

/// Queries `nvidia-smi` for a visible GPU.
#[derive(Debug, Clone)]
pub struct NvidiaSmiProbe {
    program: String,
    timeout: Duration,
}

impl NvidiaSmiProbe {
    pub fn new() -> Self {
        Self {
            program: "nvidia-smi".to_string(),
            timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for NvidiaSmiProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HardwareProbe for NvidiaSmiProbe {
    async fn has_accelerated_encoder(&self) -> bool {
        let args = ["--query-gpu=name", "--format=csv,noheader"];
        match run_with_timeout(&self.program, &args, self.timeout).await {
            Ok(output) if output.status.success() => {
                tracing::debug!(
                    "GPU detected: {}",
                    String::from_utf8_lossy(&output.stdout).trim()
                );
                true
            }
            Ok(output) => {
                tracing::debug!("nvidia-smi exited with {}", output.status);
                false
            }
            Err(e) => {
                tracing::debug!("GPU probe unavailable: {}", e);
                false
            }
        }
    }
}

/// Probe with a fixed answer (configured override or tests)
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub bool);

#[async_trait]
impl HardwareProbe for FixedProbe {
    async fn has_accelerated_encoder(&self) -> bool {
        self.0
    }
}

/// Builds the probe for a configured mode.
pub fn probe_for_mode(mode: HardwareMode) -> Arc<dyn HardwareProbe> {
    match mode {
        HardwareMode::Auto => Arc::new(NvidiaSmiProbe::new()),
        HardwareMode::Enabled => Arc::new(FixedProbe(true)),
        HardwareMode::Disabled => Arc::new(FixedProbe(false)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_probe() {
        assert!(FixedProbe(true).has_accelerated_encoder().await);
        assert!(!FixedProbe(false).has_accelerated_encoder().await);
    }

    #[tokio::test]
    async fn test_missing_binary_means_no_gpu() {
        let probe = NvidiaSmiProbe::new().with_program("definitely-not-nvidia-smi");
        assert!(!probe.has_accelerated_encoder().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_command_means_gpu() {
        // `true` ignores its arguments and exits 0
        let probe = NvidiaSmiProbe::new().with_program("true");
        assert!(probe.has_accelerated_encoder().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_means_no_gpu() {
        let probe = NvidiaSmiProbe::new().with_program("false");
        assert!(!probe.has_accelerated_encoder().await);
    }

    #[tokio::test]
    async fn test_probe_for_mode() {
        assert!(probe_for_mode(HardwareMode::Enabled).has_accelerated_encoder().await);
        assert!(!probe_for_mode(HardwareMode::Disabled).has_accelerated_encoder().await);
    }

    #[test]
    fn test_mode_serde() {
        let mode: HardwareMode = serde_json::from_str("\"disabled\"").unwrap();
        assert_eq!(mode, HardwareMode::Disabled);
        assert_eq!(HardwareMode::default(), HardwareMode::Auto);
    }
}
