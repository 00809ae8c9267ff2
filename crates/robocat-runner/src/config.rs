//! Runner configuration.

use std::{path::PathBuf, time::Duration};

/// Default automation wrapper program.
pub const DEFAULT_RUNNER_COMMAND: &str = "run";

/// Default program killing leftover automation processes.
pub const DEFAULT_CLEANUP_COMMAND: &str = "kill_tagui";

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Automation wrapper command; flow arguments are appended.
    pub runner_command: String,
    /// Kill primitive invoked before each run and after the cleanup delay.
    pub cleanup_command: String,
    /// Flow directory holding `input/` and `output/`.
    pub flow_dir: PathBuf,
    /// How long a run may sit on the start marker before it is aborted.
    pub start_timeout: Duration,
    /// Delay between a run exiting and the kill primitive being invoked.
    pub cleanup_delay: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            runner_command: DEFAULT_RUNNER_COMMAND.to_string(),
            cleanup_command: DEFAULT_CLEANUP_COMMAND.to_string(),
            flow_dir: PathBuf::from("flow"),
            start_timeout: Duration::from_secs(60),
            cleanup_delay: Duration::from_secs(1),
        }
    }
}

impl RunnerConfig {
    /// Directory watched for produced files.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.flow_dir.join("output")
    }

    /// Directory `input` commands write into.
    #[must_use]
    pub fn input_dir(&self) -> PathBuf {
        self.flow_dir.join("input")
    }
}
