//! Process spawning helpers.
//!
//! Shared by the hardware probe and the command renderer. On Windows the
//! console window is suppressed for every spawned child.

use std::process::{Output, Stdio};
use std::time::Duration;

use crate::core::{CoreError, CoreResult};

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Apply platform-specific flags to a tokio process command.
pub fn configure_tokio_command(cmd: &mut tokio::process::Command) {
    #[cfg(target_os = "windows")]
    {
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd.kill_on_drop(true);
}

/// Runs `program args...` to completion, killing it after `timeout`.
///
/// Returns the captured output regardless of exit status; a spawn failure or
/// timeout is an error.
pub async fn run_with_timeout(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> CoreResult<Output> {
    let mut cmd = tokio::process::Command::new(program);
    configure_tokio_command(&mut cmd);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let child = cmd
        .spawn()
        .map_err(|e| CoreError::Internal(format!("Failed to spawn {program}: {e}")))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(CoreError::Internal(format!(
            "{program} timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Last non-empty line of a process stream, used as a failure summary.
pub fn last_line(stream: &str) -> Option<String> {
    stream
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .map(str::to_string)
}
