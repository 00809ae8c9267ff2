//! Command building utilities.

use std::path::{Path, PathBuf};

use robocat_core::RunnerArguments;
use thiserror::Error;
use url::Url;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Base command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Base command is empty after parsing")]
    EmptyCommand,
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandParts {
    /// Create new command parts.
    #[must_use]
    pub const fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Resolve the program to an absolute path.
    ///
    /// # Errors
    /// Returns error if executable not found.
    pub async fn into_resolved(self) -> Result<(PathBuf, Vec<String>), CommandBuildError> {
        let Self { program, args } = self;
        let executable = resolve_executable_path(&program)
            .await
            .ok_or(CommandBuildError::ExecutableNotFound(program))?;
        Ok((executable, args))
    }
}

/// Builds the automation command line from a base command and run arguments.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    /// Base executable command (may carry its own arguments).
    pub base: String,
}

impl CommandBuilder {
    /// Create a new command builder.
    #[must_use]
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self { base: base.into() }
    }

    /// Build the command for one run.
    ///
    /// # Errors
    /// Returns error if the base command is invalid.
    pub fn build(&self, arguments: &RunnerArguments) -> Result<CommandParts, CommandBuildError> {
        let mut parts = split_command_line(&self.base)?;
        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }
        parts.extend(flow_args(arguments));

        let program = parts.remove(0);
        Ok(CommandParts::new(program, parts))
    }
}

/// Turn run arguments into the automation's argument list.
///
/// The flow is positional, data goes to `--data`, and a proxy URL is split
/// into `--proxy-protocol <scheme>` and `--proxy-address [userinfo@]host:port`.
#[must_use]
pub fn flow_args(arguments: &RunnerArguments) -> Vec<String> {
    let mut args = vec![arguments.flow.clone()];

    if let Some(data) = arguments.data.as_deref().filter(|d| !d.is_empty()) {
        args.push("--data".to_string());
        args.push(data.to_string());
    }

    if let Some(proxy) = arguments.proxy.as_deref().filter(|p| !p.is_empty()) {
        match proxy_args(proxy) {
            Ok((protocol, address)) => {
                args.extend(["--proxy-protocol".to_string(), protocol]);
                args.extend(["--proxy-address".to_string(), address]);
            }
            Err(e) => tracing::warn!(proxy, "Ignoring invalid proxy URL: {e}"),
        }
    }

    args
}

fn proxy_args(proxy: &str) -> Result<(String, String), url::ParseError> {
    let url = Url::parse(proxy)?;
    let host = url.host_str().ok_or(url::ParseError::EmptyHost)?;

    let mut address = match url.port_or_known_default() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    if !url.username().is_empty() {
        let userinfo = match url.password() {
            Some(password) => format!("{}:{password}", url.username()),
            None => url.username().to_string(),
        };
        address = format!("{userinfo}@{address}");
    }

    Ok((url.scheme().to_string(), address))
}

fn split_command_line(input: &str) -> Result<Vec<String>, CommandBuildError> {
    shlex::split(input).ok_or_else(|| CommandBuildError::InvalidBase(input.to_string()))
}

/// Resolve an executable by name.
///
/// Explicit paths are used as is; bare names are looked up on `PATH`.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }

    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}
