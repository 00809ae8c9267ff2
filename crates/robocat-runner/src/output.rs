//! Output directory watcher.

use std::{
    collections::HashMap,
    path::{Component, Path, PathBuf},
    time::Duration,
};

use notify::{
    EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    event::{ModifyKind, RemoveKind},
};
use robocat_core::{FlowFile, Replier, UpdateName, file::DEFAULT_MIME_TYPE};
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::error::RunnerError;

const REARM_DELAY: Duration = Duration::from_millis(100);
const ROOT_PROBE_INTERVAL: Duration = Duration::from_millis(250);
/// Quiet period after the last event for a path before it is read.
const SETTLE_DELAY: Duration = Duration::from_millis(50);

/// Emits an `output` update for every file the automation writes.
pub struct OutputWatcher {
    root: PathBuf,
    reply: Replier,
    scope: CancellationToken,
}

struct Armed {
    root: PathBuf,
    // Dropping the watcher stops event delivery.
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
}

enum Drained {
    ScopeEnded,
    RootRemoved,
}

impl OutputWatcher {
    #[must_use]
    pub const fn new(root: PathBuf, reply: Replier, scope: CancellationToken) -> Self {
        Self { root, reply, scope }
    }

    /// Start watching. The watch is armed before this returns, so files
    /// written right after it are not missed.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created or watched.
    pub fn spawn(self) -> Result<JoinHandle<()>, RunnerError> {
        let armed = self.arm()?;
        Ok(tokio::spawn(self.run(armed)))
    }

    fn arm(&self) -> Result<Armed, RunnerError> {
        std::fs::create_dir_all(&self.root)?;
        let root = self.root.canonicalize()?;

        let (tx, events) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            let _ = tx.send(event);
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        tracing::debug!(root = %root.display(), "Watching output directory");
        Ok(Armed {
            root,
            _watcher: watcher,
            events,
        })
    }

    async fn run(self, mut armed: Armed) {
        let mut sent = HashMap::new();

        loop {
            match self.drain(&mut armed, &mut sent).await {
                Drained::ScopeEnded => return,
                Drained::RootRemoved => {
                    tracing::debug!(root = %armed.root.display(), "Output directory removed, re-arming");
                }
            }

            armed = loop {
                tokio::select! {
                    () = self.scope.cancelled() => return,
                    () = tokio::time::sleep(REARM_DELAY) => {}
                }
                match self.arm() {
                    Ok(armed) => break armed,
                    Err(e) => tracing::warn!("Unable to re-arm output watcher: {e}"),
                }
            };
        }
    }

    async fn drain(&self, armed: &mut Armed, sent: &mut HashMap<String, Vec<u8>>) -> Drained {
        let mut probe = tokio::time::interval(ROOT_PROBE_INTERVAL);
        let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

        loop {
            let due = pending.values().min().copied();
            let event = tokio::select! {
                () = self.scope.cancelled() => {
                    self.flush(&armed.root, &mut pending, sent, None).await;
                    return Drained::ScopeEnded;
                }
                () = tokio::time::sleep_until(due.unwrap_or_else(Instant::now)), if due.is_some() => {
                    self.flush(&armed.root, &mut pending, sent, Some(Instant::now())).await;
                    continue;
                }
                _ = probe.tick() => {
                    if !armed.root.exists() {
                        return Drained::RootRemoved;
                    }
                    continue;
                }
                event = armed.events.recv() => event,
            };

            let event = match event {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    tracing::warn!("Output watcher error: {e}");
                    continue;
                }
                None => return Drained::RootRemoved,
            };

            match event.kind {
                EventKind::Modify(ModifyKind::Metadata(_)) => {}
                EventKind::Create(_) | EventKind::Modify(_) => {
                    let settled = Instant::now() + SETTLE_DELAY;
                    for path in event.paths {
                        pending.insert(path, settled);
                    }
                }
                EventKind::Remove(RemoveKind::Folder | RemoveKind::Any) | EventKind::Other
                    if !armed.root.exists() =>
                {
                    return Drained::RootRemoved;
                }
                _ => {}
            }
        }
    }

    /// Emit the pending paths that settled by `now`, or all of them.
    async fn flush(
        &self,
        root: &Path,
        pending: &mut HashMap<PathBuf, Instant>,
        sent: &mut HashMap<String, Vec<u8>>,
        now: Option<Instant>,
    ) {
        let mut due: Vec<(Instant, PathBuf)> = pending
            .iter()
            .filter(|(_, settled)| now.is_none_or(|now| **settled <= now))
            .map(|(path, settled)| (*settled, path.clone()))
            .collect();
        due.sort();

        for (_, path) in due {
            pending.remove(&path);
            self.emit(root, &path, sent).await;
        }
    }

    async fn emit(&self, root: &Path, path: &Path, sent: &mut HashMap<String, Vec<u8>>) {
        let Some(relative) = relative_path(root, path) else {
            return;
        };
        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_dir() => return,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(path = %relative, "Skipping output file: {e}");
                return;
            }
        }

        let payload = match tokio::fs::read(path).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(path = %relative, "Unable to read output file: {e}");
                return;
            }
        };
        let mime_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or(DEFAULT_MIME_TYPE);
        let payload = if mime_type == DEFAULT_MIME_TYPE {
            payload.trim_ascii_end().to_vec()
        } else {
            payload
        };

        if sent.get(&relative) == Some(&payload) {
            return;
        }
        sent.insert(relative.clone(), payload.clone());

        let file = FlowFile::new(relative, mime_type, payload);
        tracing::debug!(path = %file.path, mime_type = %file.mime_type, "Sending output file");
        if let Err(e) = self.reply.send(UpdateName::Output.as_str(), Some(&file)).await {
            tracing::debug!(path = %file.path, "Unable to deliver output file: {e}");
        }
    }
}

/// `path` relative to `root`, joined with `/`.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}
