//! Blocking hand-off stream used for flow log lines and output files.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::{Mutex, RwLock, mpsc};

/// Stream error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("stream channel is closed")]
    StreamClosed,
}

/// Ordered, closable stream of items.
///
/// `push` waits until a consumer (or the buffer) takes the item. `close`
/// waits for in-flight pushes, then consumers see end-of-stream once the
/// buffer is drained.
pub struct Stream<T> {
    sender: RwLock<Option<mpsc::Sender<T>>>,
    receiver: Mutex<mpsc::Receiver<T>>,
    closed: AtomicBool,
}

impl<T: Send> Default for Stream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Stream<T> {
    /// Create a one-slot hand-off stream.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(1)
    }

    /// Create a stream buffering up to `capacity` items (minimum 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            sender: RwLock::new(Some(tx)),
            receiver: Mutex::new(rx),
            closed: AtomicBool::new(false),
        }
    }

    /// Append an item.
    ///
    /// # Errors
    /// Returns [`StreamError::StreamClosed`] once the stream is closed.
    pub async fn push(&self, item: T) -> Result<(), StreamError> {
        if self.is_closed() {
            return Err(StreamError::StreamClosed);
        }

        // Holding the read guard keeps `close` waiting until this push lands.
        let guard = self.sender.read().await;
        let Some(tx) = guard.as_ref() else {
            return Err(StreamError::StreamClosed);
        };
        tx.send(item).await.map_err(|_| StreamError::StreamClosed)
    }

    /// Next item, or `None` after the stream is closed and drained.
    pub async fn next(&self) -> Option<T> {
        self.receiver.lock().await.recv().await
    }

    /// Invoke `callback` for each item until the stream ends.
    pub async fn watch<F>(&self, mut callback: F)
    where
        F: FnMut(T),
    {
        while let Some(item) = self.next().await {
            callback(item);
        }
    }

    /// Collect every remaining item until the stream ends.
    pub async fn collect(&self) -> Vec<T> {
        let mut items = Vec::new();
        self.watch(|item| items.push(item)).await;
        items
    }

    /// Mark the stream closed. Safe to call more than once.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.sender.write().await.take();
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
