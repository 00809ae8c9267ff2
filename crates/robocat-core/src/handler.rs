//! Command handlers and the reply capability handed to them.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::{Message, ProtocolError, STATUS_OK, UpdateName};

/// Reply error.
#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("session is closed")]
    SessionClosed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Sends updates into a session's outgoing queue, tagged with one correlation id.
#[derive(Clone, Debug)]
pub struct Replier {
    updates: mpsc::Sender<Message>,
    scope: CancellationToken,
    reference: String,
}

impl Replier {
    /// Create a replier for `reference` writing into `updates` while `scope` is alive.
    #[must_use]
    pub fn new(
        updates: mpsc::Sender<Message>,
        scope: CancellationToken,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            updates,
            scope,
            reference: reference.into(),
        }
    }

    /// Correlation id replies are tagged with.
    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Enqueue an already built message as is.
    ///
    /// # Errors
    /// Returns [`ReplyError::SessionClosed`] once the session scope ended.
    pub async fn send_message(&self, message: Message) -> Result<(), ReplyError> {
        if self.scope.is_cancelled() {
            return Err(ReplyError::SessionClosed);
        }

        tokio::select! {
            () = self.scope.cancelled() => Err(ReplyError::SessionClosed),
            sent = self.updates.send(message) => sent.map_err(|_| ReplyError::SessionClosed),
        }
    }

    /// Enqueue an update with this replier's correlation id.
    ///
    /// # Errors
    /// Returns error if the body cannot be encoded or the session is closed.
    pub async fn send<B: Serialize>(
        &self,
        name: impl Into<String>,
        body: Option<B>,
    ) -> Result<(), ReplyError> {
        let update = Message::update(name, body)?.with_ref(self.reference.clone());
        self.send_message(update).await
    }

    /// Reply `status: <status>`.
    ///
    /// # Errors
    /// Returns error if the session is closed.
    pub async fn status(&self, status: &str) -> Result<(), ReplyError> {
        self.send(UpdateName::Status.as_str(), Some(status)).await
    }

    /// Reply `status: ok`.
    ///
    /// # Errors
    /// Returns error if the session is closed.
    pub async fn ok(&self) -> Result<(), ReplyError> {
        self.status(STATUS_OK).await
    }

    /// Reply `error: <message>`.
    ///
    /// # Errors
    /// Returns error if the session is closed.
    pub async fn error(&self, message: impl std::fmt::Display) -> Result<(), ReplyError> {
        self.send(UpdateName::Error.as_str(), Some(message.to_string()))
            .await
    }

    /// Same as [`Replier::error`] but only logs when the reply cannot be delivered.
    pub async fn error_or_log(&self, message: impl std::fmt::Display) {
        let message = message.to_string();
        if let Err(e) = self.error(&message).await {
            tracing::debug!(reference = %self.reference, %message, "Unable to deliver error: {e}");
        }
    }
}

/// A dispatched command together with the means to answer it.
#[derive(Clone, Debug)]
pub struct Request {
    /// The command.
    pub message: Message,
    /// Reply capability bound to the command's correlation id.
    pub reply: Replier,
    /// Session scope; cancelled when the session ends.
    pub scope: CancellationToken,
}

/// Trait for server-side command handlers.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle one command. Runs as its own task.
    async fn handle(&self, request: Request);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_carry_reference() {
        let (tx, mut rx) = mpsc::channel(4);
        let replier = Replier::new(tx, CancellationToken::new(), "r7");

        replier.ok().await.unwrap();
        replier.error("boom").await.unwrap();

        let status = rx.recv().await.unwrap();
        assert_eq!(status.name, "status");
        assert_eq!(status.reference, "r7");
        assert_eq!(status.text().unwrap(), "ok");

        let error = rx.recv().await.unwrap();
        assert_eq!(error.update_name(), UpdateName::Error);
        assert_eq!(error.text().unwrap(), "boom");
    }

    #[tokio::test]
    async fn test_closed_scope_rejects_replies() {
        let (tx, _rx) = mpsc::channel(1);
        let scope = CancellationToken::new();
        let replier = Replier::new(tx, scope.clone(), "r1");

        scope.cancel();
        assert!(matches!(
            replier.ok().await,
            Err(ReplyError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_full_queue_unblocks_on_cancel() {
        let (tx, _rx) = mpsc::channel(1);
        let scope = CancellationToken::new();
        let replier = Replier::new(tx, scope.clone(), "r1");
        replier.ok().await.unwrap();

        let pending = tokio::spawn({
            let replier = replier.clone();
            async move { replier.ok().await }
        });
        tokio::task::yield_now().await;
        scope.cancel();

        assert!(matches!(
            pending.await.unwrap(),
            Err(ReplyError::SessionClosed)
        ));
    }
}
