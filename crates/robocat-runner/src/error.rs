//! Runner errors.

use robocat_core::ProtocolError;
use thiserror::Error;

use crate::command::CommandBuildError;

/// Runner error.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("flow is not running - cannot stop")]
    NotRunning,
    #[error("unable to deserialize body: {0}")]
    Body(#[from] ProtocolError),
    #[error("invalid run arguments: {0}")]
    InvalidArguments(String),
    #[error("unable to start automation: {0}")]
    Command(#[from] CommandBuildError),
    #[error("unable to start automation: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("file path must not be empty")]
    EmptyInputPath,
    #[error("file path must stay inside the input directory: {0}")]
    InvalidInputPath(String),
    #[error("unable to watch output directory: {0}")]
    Watch(#[from] notify::Error),
    #[error("unable to write file: {0}")]
    Io(#[from] std::io::Error),
}
