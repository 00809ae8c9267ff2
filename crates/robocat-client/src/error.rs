//! Client errors.

use std::time::Duration;

use robocat_core::{ProtocolError, StreamError};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Client error.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),
    #[error("invalid server URL: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("not connected")]
    NotConnected,
    #[error("unexpected update message '{name}': {body}")]
    UnexpectedReply { name: String, body: String },
    #[error("update message reference does not match the command: expected {expected}, got {actual}")]
    CorrelationMismatch { expected: String, actual: String },
    #[error("{0}")]
    Remote(String),
    #[error("no reply within {0:?}")]
    RequestTimeout(Duration),
    #[error("flow did not finish within {0:?}")]
    FlowTimeout(Duration),
    #[error("flow was aborted")]
    FlowAborted,
    #[error("client session is closed")]
    SessionClosed,
    #[error(transparent)]
    Stream(#[from] StreamError),
}
