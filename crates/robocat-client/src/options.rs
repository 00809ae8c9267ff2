//! Connection options.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

/// Basic auth credentials sent with every dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub(crate) fn header_value(&self) -> String {
        format!(
            "Basic {}",
            BASE64.encode(format!("{}:{}", self.username, self.password))
        )
    }
}

/// Client connection options.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub credentials: Option<Credentials>,
    /// Redial attempts after a lost connection; 0 disables reconnecting.
    pub reconnect_attempts: u32,
    /// First reconnect delay; doubles on every failed attempt.
    pub backoff_base: Duration,
    /// Upper bound for the reconnect delay, if any.
    pub backoff_max: Option<Duration>,
    /// Maximum inbound message size; `None` means unbounded.
    pub max_message_size: Option<usize>,
    /// How long `ping`, `stop` and `input` wait for their reply.
    pub request_timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            credentials: None,
            reconnect_attempts: 5,
            backoff_base: Duration::from_secs(1),
            backoff_max: None,
            max_message_size: None,
            request_timeout: None,
        }
    }
}

impl ClientOptions {
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    #[must_use]
    pub const fn with_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = attempts;
        self
    }

    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, max: Option<Duration>) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = Some(size);
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}
