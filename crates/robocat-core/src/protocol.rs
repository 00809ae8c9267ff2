//! Wire protocol for client-server communication.
//!
//! Every frame is a JSON object of the shape
//! `{"type": "command" | "update", "name": ..., "body": ..., "ref": ...}`.
//! The body is carried as an untyped JSON value and decoded lazily by the
//! consumer into whatever type it expects.

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

/// Sub-protocol token both endpoints must negotiate.
pub const SUBPROTOCOL: &str = "robocat";

/// Status body sent when a command was accepted.
pub const STATUS_OK: &str = "ok";

/// Status body sent when a run finished successfully.
pub const STATUS_SUCCESS: &str = "success";

/// Protocol error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("message is not {expected}")]
    WrongMessageKind { expected: MessageKind },
    #[error("unable to decode body: {0}")]
    BodyDecode(#[source] serde_json::Error),
    #[error("unable to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Direction of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Client to server.
    Command,
    /// Server to client.
    Update,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => f.write_str("a command"),
            Self::Update => f.write_str("an update"),
        }
    }
}

/// Message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Correlation id. Empty for unsolicited updates.
    #[serde(rename = "ref", default, skip_serializing_if = "String::is_empty")]
    pub reference: String,
}

impl Message {
    /// Create a command without a correlation id.
    ///
    /// # Errors
    /// Returns error if the body cannot be serialized.
    pub fn command<B: Serialize>(
        name: impl Into<String>,
        body: Option<B>,
    ) -> Result<Self, ProtocolError> {
        Self::with_body(MessageKind::Command, name.into(), body)
    }

    /// Create an update without a correlation id.
    ///
    /// # Errors
    /// Returns error if the body cannot be serialized.
    pub fn update<B: Serialize>(
        name: impl Into<String>,
        body: Option<B>,
    ) -> Result<Self, ProtocolError> {
        Self::with_body(MessageKind::Update, name.into(), body)
    }

    fn with_body<B: Serialize>(
        kind: MessageKind,
        name: String,
        body: Option<B>,
    ) -> Result<Self, ProtocolError> {
        let body = body
            .map(|b| serde_json::to_value(b).map_err(ProtocolError::Encode))
            .transpose()?
            .filter(|v| !v.is_null());

        Ok(Self {
            kind,
            name,
            body,
            reference: String::new(),
        })
    }

    /// Attach a correlation id.
    #[must_use]
    pub fn with_ref(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    /// Build an update answering this message (same correlation id).
    ///
    /// # Errors
    /// Returns error if the body cannot be serialized.
    pub fn reply<B: Serialize>(
        &self,
        name: impl Into<String>,
        body: Option<B>,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::update(name, body)?.with_ref(self.reference.clone()))
    }

    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Parse a JSON text frame.
    ///
    /// # Errors
    /// Returns [`ProtocolError::MalformedEnvelope`] for invalid JSON, missing
    /// fields or a command without a name.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let message: Self = serde_json::from_str(text)
            .map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))?;

        if message.kind == MessageKind::Command && message.name.is_empty() {
            return Err(ProtocolError::MalformedEnvelope(
                "command name must not be empty".to_string(),
            ));
        }

        Ok(message)
    }

    /// Accept this message only if it is a command.
    ///
    /// # Errors
    /// Returns [`ProtocolError::WrongMessageKind`] otherwise.
    pub fn as_command(self) -> Result<Self, ProtocolError> {
        self.expect_kind(MessageKind::Command)
    }

    /// Accept this message only if it is an update.
    ///
    /// # Errors
    /// Returns [`ProtocolError::WrongMessageKind`] otherwise.
    pub fn as_update(self) -> Result<Self, ProtocolError> {
        self.expect_kind(MessageKind::Update)
    }

    fn expect_kind(self, expected: MessageKind) -> Result<Self, ProtocolError> {
        if self.kind == expected {
            Ok(self)
        } else {
            Err(ProtocolError::WrongMessageKind { expected })
        }
    }

    /// Decode the body into `T`. A missing body decodes as JSON `null`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::BodyDecode`] if the body does not match `T`.
    pub fn body<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let value = self.body.clone().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(ProtocolError::BodyDecode)
    }

    /// Decode the body as a string.
    ///
    /// # Errors
    /// Returns [`ProtocolError::BodyDecode`] if the body is not a string.
    pub fn text(&self) -> Result<String, ProtocolError> {
        self.body()
    }

    /// Body as text, or an empty string when it is not a string.
    #[must_use]
    pub fn text_or_empty(&self) -> String {
        self.text().unwrap_or_default()
    }

    /// Typed command name.
    #[must_use]
    pub fn command_name(&self) -> CommandName {
        CommandName::from(self.name.as_str())
    }

    /// Typed update name.
    #[must_use]
    pub fn update_name(&self) -> UpdateName {
        UpdateName::from(self.name.as_str())
    }
}

/// Known command names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommandName {
    Ping,
    Run,
    Stop,
    Input,
    Other(String),
}

impl CommandName {
    /// Wire name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ping => "ping",
            Self::Run => "run",
            Self::Stop => "stop",
            Self::Input => "input",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for CommandName {
    fn from(name: &str) -> Self {
        match name {
            "ping" => Self::Ping,
            "run" => Self::Run,
            "stop" => Self::Stop,
            "input" => Self::Input,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Known update names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UpdateName {
    /// Session token, sent once per fresh session.
    Session,
    Pong,
    Status,
    Log,
    Output,
    Error,
    Other(String),
}

impl UpdateName {
    /// Wire name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Session => "session",
            Self::Pong => "pong",
            Self::Status => "status",
            Self::Log => "log",
            Self::Output => "output",
            Self::Error => "error",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for UpdateName {
    fn from(name: &str) -> Self {
        match name {
            "session" => Self::Session,
            "pong" => Self::Pong,
            "status" => Self::Status,
            "log" => Self::Log,
            "output" => Self::Output,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for UpdateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
