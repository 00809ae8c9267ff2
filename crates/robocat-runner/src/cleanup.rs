//! Kill primitive and the debounced post-run cleanup handle.

use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Invoke the external kill primitive. Failures are logged, never returned.
pub async fn kill_leftovers(command: &str) {
    let Some(mut parts) = shlex::split(command).filter(|p| !p.is_empty()) else {
        tracing::warn!(command, "Invalid cleanup command - skipping clean-up");
        return;
    };
    let program = parts.remove(0);

    let status = Command::new(&program)
        .args(&parts)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(status) if status.success() => tracing::debug!(command, "Clean-up finished"),
        Ok(status) => tracing::debug!(command, %status, "Clean-up command exited unsuccessfully"),
        Err(e) => tracing::warn!(command, "Unable to run clean-up command: {e}"),
    }
}

/// A cleanup waiting for its grace delay.
#[derive(Debug)]
pub struct ScheduledCleanup {
    token: CancellationToken,
}

impl ScheduledCleanup {
    pub(crate) const fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Abort the pending cleanup.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for ScheduledCleanup {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
