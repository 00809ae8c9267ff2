//! Command line and environment configuration.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;
use robocat_runner::RunnerConfig;

use crate::auth::Credentials;

/// Default upper bound for one inbound WebSocket message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// robocat automation server.
#[derive(Debug, Clone, Parser)]
#[command(name = "robocat", version, about)]
pub struct Options {
    /// Address to listen on.
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:80")]
    pub listen: SocketAddr,

    /// Basic auth username.
    #[arg(long, env = "AUTH_USERNAME")]
    pub username: Option<String>,

    /// Basic auth password.
    #[arg(long, env = "AUTH_PASSWORD")]
    pub password: Option<String>,

    /// How long a disconnected session may be resumed.
    #[arg(long, env = "SESSION_TIMEOUT", default_value = "1m", value_parser = humantime::parse_duration)]
    pub session_timeout: Duration,

    /// How long a flow may wait after announcing its start.
    #[arg(long, env = "AUTOMATION_START_TIMEOUT", default_value = "1m", value_parser = humantime::parse_duration)]
    pub automation_start_timeout: Duration,

    /// Delay before leftover automation processes are killed after a run.
    #[arg(long, env = "CLEANUP_TIMEOUT", default_value = "1s", value_parser = humantime::parse_duration)]
    pub cleanup_timeout: Duration,

    /// Maximum inbound message size in bytes.
    #[arg(long, env = "MAX_MESSAGE_SIZE", default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,

    /// Flow directory holding `input/` and `output/`.
    #[arg(long, env = "FLOW_DIR", default_value = "flow")]
    pub flow_dir: PathBuf,

    /// Automation wrapper command.
    #[arg(long, env = "RUNNER_COMMAND", default_value = robocat_runner::config::DEFAULT_RUNNER_COMMAND)]
    pub runner_command: String,

    /// Command killing leftover automation processes.
    #[arg(long, env = "CLEANUP_COMMAND", default_value = robocat_runner::config::DEFAULT_CLEANUP_COMMAND)]
    pub cleanup_command: String,
}

impl Options {
    #[must_use]
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            credentials: Credentials::from_parts(self.username.clone(), self.password.clone()),
            session_timeout: self.session_timeout,
            max_message_size: self.max_message_size,
        }
    }

    #[must_use]
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            runner_command: self.runner_command.clone(),
            cleanup_command: self.cleanup_command.clone(),
            flow_dir: self.flow_dir.clone(),
            start_timeout: self.automation_start_timeout,
            cleanup_delay: self.cleanup_timeout,
        }
    }
}

/// Session and transport settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Basic auth credentials; `None` disables authentication.
    pub credentials: Option<Credentials>,
    /// Grace period for resuming a disconnected session.
    pub session_timeout: Duration,
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            credentials: None,
            session_timeout: Duration::from_secs(60),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = Options::try_parse_from(["robocat"]).unwrap();
        assert_eq!(options.listen, "0.0.0.0:80".parse().unwrap());
        assert_eq!(options.session_timeout, Duration::from_secs(60));
        assert_eq!(options.cleanup_timeout, Duration::from_secs(1));
        assert_eq!(options.max_message_size, 64 * 1024 * 1024);
        assert_eq!(options.runner_command, "run");
        assert_eq!(options.cleanup_command, "kill_tagui");
        assert!(options.server_config().credentials.is_none());
    }

    #[test]
    fn test_flags() {
        let options = Options::try_parse_from([
            "robocat",
            "--listen",
            "127.0.0.1:8080",
            "--username",
            "bot",
            "--session-timeout",
            "30s",
            "--automation-start-timeout",
            "2m 30s",
            "--flow-dir",
            "/srv/flow",
        ])
        .unwrap();

        let runner = options.runner_config();
        assert_eq!(runner.start_timeout, Duration::from_secs(150));
        assert_eq!(runner.output_dir(), PathBuf::from("/srv/flow/output"));

        let server = options.server_config();
        assert_eq!(server.session_timeout, Duration::from_secs(30));
        assert_eq!(server.credentials.unwrap().username, "bot");
    }
}
