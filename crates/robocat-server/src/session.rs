//! The single resumable session and its lifecycle timers.

use std::{sync::Arc, time::Duration};

use robocat_core::Message;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Capacity of the per-session update queue.
const UPDATE_QUEUE_CAPACITY: usize = 256;

/// Logical conversation that survives transient disconnects.
pub struct Session {
    pub token: String,
    /// Cancelled when the session ends; parents every connection and run.
    pub scope: CancellationToken,
    pub updates: mpsc::Sender<Message>,
    /// Drained by whichever connection is currently live.
    pub queue: Arc<Mutex<mpsc::Receiver<Message>>>,
    connection: Option<(u64, CancellationToken)>,
    shutdown: Option<CancellationToken>,
}

impl Session {
    fn new() -> Self {
        let (updates, queue) = mpsc::channel(UPDATE_QUEUE_CAPACITY);
        Self {
            token: Uuid::new_v4().to_string(),
            scope: CancellationToken::new(),
            updates,
            queue: Arc::new(Mutex::new(queue)),
            connection: None,
            shutdown: None,
        }
    }
}

/// What a freshly attached connection needs.
pub struct Attached {
    pub token: String,
    /// `true` when the session was created for this connection.
    pub fresh: bool,
    pub id: u64,
    pub scope: CancellationToken,
    pub connection: CancellationToken,
    pub updates: mpsc::Sender<Message>,
    pub queue: Arc<Mutex<mpsc::Receiver<Message>>>,
}

/// Holder of the (at most one) active session.
#[derive(Default)]
pub struct SessionSlot {
    current: Mutex<Option<Session>>,
    connections: std::sync::atomic::AtomicU64,
}

impl SessionSlot {
    /// Token of the active session.
    pub async fn token(&self) -> Option<String> {
        self.current
            .lock()
            .await
            .as_ref()
            .filter(|s| !s.scope.is_cancelled())
            .map(|s| s.token.clone())
    }

    /// Bind a new connection, creating the session if none is active.
    ///
    /// Returns `None` when another session is active and `requested` does
    /// not name it. Cancels a pending shutdown and any previous live
    /// connection.
    pub async fn attach(&self, requested: Option<&str>) -> Option<Attached> {
        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|s| s.scope.is_cancelled()) {
            *current = None;
        }
        if let Some(session) = current.as_ref() {
            if requested != Some(session.token.as_str()) {
                tracing::debug!(session = %session.token, "Refusing connection for a foreign session");
                return None;
            }
        }

        let id = self
            .connections
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let fresh = current.is_none();
        let session = current.get_or_insert_with(Session::new);
        if fresh {
            tracing::info!(session = %session.token, "Session started");
        } else {
            tracing::info!(session = %session.token, "Session resumed");
        }

        if let Some(shutdown) = session.shutdown.take() {
            shutdown.cancel();
        }

        let connection = session.scope.child_token();
        if let Some((previous, token)) = session.connection.replace((id, connection.clone())) {
            tracing::info!(session = %session.token, connection = previous, "Replacing live connection");
            token.cancel();
        }

        Some(Attached {
            token: session.token.clone(),
            fresh,
            id,
            scope: session.scope.clone(),
            connection,
            updates: session.updates.clone(),
            queue: Arc::clone(&session.queue),
        })
    }

    /// Release connection `id`.
    ///
    /// A session closed by the client is reset right away; otherwise the
    /// shutdown timer is armed, and the session ends unless a connection
    /// resumes it within `grace`.
    pub async fn detach(self: &Arc<Self>, token: &str, id: u64, grace: Duration) {
        let mut current = self.current.lock().await;
        let Some(session) = current.as_mut() else {
            return;
        };
        if session.token != token {
            return;
        }
        if session.connection.as_ref().is_some_and(|(live, _)| *live != id) {
            // Taken over by a newer connection.
            return;
        }
        session.connection = None;

        if session.scope.is_cancelled() {
            tracing::info!(session = %session.token, "Session closed");
            *current = None;
            return;
        }

        let shutdown = CancellationToken::new();
        session.shutdown = Some(shutdown.clone());
        tracing::debug!(session = %session.token, grace = %humantime::format_duration(grace), "Connection lost, waiting for resume");

        let slot = Arc::clone(self);
        let token = token.to_string();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => return,
                () = tokio::time::sleep(grace) => {}
            }

            let mut current = slot.current.lock().await;
            if shutdown.is_cancelled() {
                return;
            }
            if let Some(session) = current.take_if(|s| s.token == token) {
                tracing::info!(session = %session.token, "Session expired");
                session.scope.cancel();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_attach_claims_or_resumes() {
        let slot = SessionSlot::default();
        let first = slot.attach(None).await.unwrap();
        assert!(first.fresh);

        // A second connection racing without the token must not join.
        assert!(slot.attach(None).await.is_none());
        assert!(slot.attach(Some("stale")).await.is_none());
        assert!(!first.connection.is_cancelled());

        let resumed = slot.attach(Some(&first.token)).await.unwrap();
        assert!(!resumed.fresh);
        assert_eq!(resumed.token, first.token);
        assert!(first.connection.is_cancelled());
    }

    #[tokio::test]
    async fn test_stale_token_after_close_starts_fresh() {
        let slot = Arc::new(SessionSlot::default());
        let first = slot.attach(None).await.unwrap();
        first.scope.cancel();
        slot.detach(&first.token, first.id, Duration::from_secs(60)).await;

        let next = slot.attach(Some(&first.token)).await.unwrap();
        assert!(next.fresh);
        assert_ne!(next.token, first.token);
    }
}
