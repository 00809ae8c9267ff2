//! Correlation registry: maps a key to the callbacks interested in it.
//!
//! The server keys callbacks by command name, the client keys them by the
//! correlation id it generated for the originating command.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use futures::future::BoxFuture;

use crate::protocol::Message;

/// Callback invoked for every item dispatched to its key.
///
/// The closure body runs synchronously inside [`Registry::dispatch`] (in
/// dispatch order); the returned future is spawned as its own task.
pub type Callback<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

/// Concurrent-safe key → callbacks map.
pub struct Registry<T> {
    callbacks: RwLock<HashMap<String, Vec<Callback<T>>>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Clone + Send + 'static> Registry<T> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback for `key`.
    pub fn subscribe<F>(&self, key: impl Into<String>, callback: F)
    where
        F: Fn(T) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let mut callbacks = self
            .callbacks
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        callbacks
            .entry(key.into())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Drop every callback for `key`. Later dispatches to it are ignored.
    pub fn unsubscribe(&self, key: &str) {
        self.callbacks
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key);
    }

    /// Whether any callback is registered for `key`.
    #[must_use]
    pub fn is_subscribed(&self, key: &str) -> bool {
        self.callbacks
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .is_some_and(|list| !list.is_empty())
    }

    /// Hand `item` to every callback registered for `key`.
    ///
    /// Never waits for the callbacks to finish. Returns the number of
    /// callbacks invoked.
    pub fn dispatch(&self, key: &str, item: T) -> usize {
        let callbacks = {
            let map = self
                .callbacks
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            match map.get(key) {
                Some(list) => list.clone(),
                None => return 0,
            }
        };

        for callback in &callbacks {
            tokio::spawn(callback(item.clone()));
        }

        callbacks.len()
    }
}

impl Registry<Message> {
    /// Dispatch an update by its correlation id.
    pub fn dispatch_update(&self, message: Message) -> usize {
        let key = message.reference.clone();
        if key.is_empty() {
            tracing::debug!(name = %message.name, "dropping update without correlation id");
            return 0;
        }
        self.dispatch(&key, message)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::FutureExt;
    use tokio::sync::{Notify, mpsc};

    use super::*;

    fn update(reference: &str, name: &str) -> Message {
        Message::update::<()>(name, None).unwrap().with_ref(reference)
    }

    #[tokio::test]
    async fn test_dispatch_reaches_every_callback() {
        let registry = Registry::<Message>::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for id in 0..2 {
            let tx = tx.clone();
            registry.subscribe("r1", move |m: Message| {
                let tx = tx.clone();
                async move {
                    tx.send((id, m.name)).unwrap();
                }
                .boxed()
            });
        }

        assert_eq!(registry.dispatch_update(update("r1", "pong")), 2);

        let mut seen = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        seen.sort();
        assert_eq!(seen, vec![(0, "pong".to_string()), (1, "pong".to_string())]);
    }

    #[tokio::test]
    async fn test_ids_do_not_cross() {
        let registry = Registry::<Message>::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for reference in ["a", "b"] {
            let tx = tx.clone();
            registry.subscribe(reference, move |m: Message| {
                tx.send((reference, m.reference)).unwrap();
                async {}.boxed()
            });
        }

        registry.dispatch_update(update("b", "status"));
        registry.dispatch_update(update("a", "status"));

        assert_eq!(rx.recv().await.unwrap(), ("b", "b".to_string()));
        assert_eq!(rx.recv().await.unwrap(), ("a", "a".to_string()));
    }

    #[tokio::test]
    async fn test_unsubscribe_drops_future_dispatches() {
        let registry = Registry::<Message>::new();
        registry.subscribe("r1", |_m: Message| async {}.boxed());
        assert!(registry.is_subscribed("r1"));

        registry.unsubscribe("r1");
        assert!(!registry.is_subscribed("r1"));
        assert_eq!(registry.dispatch_update(update("r1", "pong")), 0);
        assert_eq!(registry.dispatch_update(update("", "session")), 0);
    }

    #[tokio::test]
    async fn test_dispatch_does_not_wait_for_slow_callbacks() {
        let registry = Registry::<Message>::new();
        let release = Arc::new(Notify::new());

        let gate = Arc::clone(&release);
        registry.subscribe("slow", move |_m: Message| {
            let gate = Arc::clone(&gate);
            async move { gate.notified().await }.boxed()
        });

        let dispatched = tokio::time::timeout(Duration::from_millis(100), async {
            registry.dispatch_update(update("slow", "log"))
        })
        .await;
        assert_eq!(dispatched.unwrap(), 1);
        release.notify_waiters();
    }
}
