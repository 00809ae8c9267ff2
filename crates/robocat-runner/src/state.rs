//! Run state machine.

use std::sync::OnceLock;

use robocat_core::{Replier, protocol::STATUS_SUCCESS};
use serde::Serialize;

/// Terminal error for runs ended by stop, preemption or session loss.
pub const ABORTED_MESSAGE: &str = "flow was aborted";

/// Terminal error for a non-zero exit.
pub const FAILED_MESSAGE: &str = "run finished with error";

/// Lifecycle of the most recent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Starting,
    Running,
    Succeeded,
    Failed,
    Aborted,
    TimedOut,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed(String),
    Aborted,
    TimedOut(String),
}

impl RunOutcome {
    /// State the runner settles in.
    #[must_use]
    pub const fn state(&self) -> RunState {
        match self {
            Self::Succeeded => RunState::Succeeded,
            Self::Failed(_) => RunState::Failed,
            Self::Aborted => RunState::Aborted,
            Self::TimedOut(_) => RunState::TimedOut,
        }
    }
}

/// First-wins terminal outcome of one run.
#[derive(Debug, Default)]
pub struct Terminal(OnceLock<RunOutcome>);

impl Terminal {
    /// Record `outcome` unless another one got there first.
    pub fn settle(&self, outcome: RunOutcome) -> bool {
        self.0.set(outcome).is_ok()
    }

    /// Settle `outcome` and, if it won, send the matching terminal reply.
    pub async fn conclude(&self, reply: &Replier, outcome: RunOutcome) -> bool {
        if !self.settle(outcome.clone()) {
            return false;
        }

        let sent = match outcome {
            RunOutcome::Succeeded => reply.status(STATUS_SUCCESS).await,
            RunOutcome::Failed(message) | RunOutcome::TimedOut(message) => {
                reply.error(message).await
            }
            RunOutcome::Aborted => reply.error(ABORTED_MESSAGE).await,
        };
        if let Err(e) = sent {
            tracing::debug!(reference = %reply.reference(), "Unable to deliver run outcome: {e}");
        }
        true
    }

    /// The recorded outcome.
    #[must_use]
    pub fn get(&self) -> Option<&RunOutcome> {
        self.0.get()
    }
}

/// Snapshot of the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunnerStatus {
    pub state: RunState,
    /// Flow of the current or most recent run.
    pub flow: Option<String>,
    /// Whether a post-run cleanup is pending.
    pub cleanup_scheduled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_outcome_wins() {
        let terminal = Terminal::default();
        assert!(terminal.settle(RunOutcome::Failed("boom".into())));
        assert!(!terminal.settle(RunOutcome::Succeeded));
        assert_eq!(terminal.get().map(RunOutcome::state), Some(RunState::Failed));
    }

    #[tokio::test]
    async fn test_only_winner_replies() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let reply = Replier::new(tx, tokio_util::sync::CancellationToken::new(), "run-1");
        let terminal = Terminal::default();

        assert!(terminal.conclude(&reply, RunOutcome::Aborted).await);
        assert!(!terminal.conclude(&reply, RunOutcome::Succeeded).await);
        drop(reply);

        let update = rx.recv().await.unwrap();
        assert_eq!(update.name, "error");
        assert_eq!(update.text().unwrap(), ABORTED_MESSAGE);
        assert!(rx.recv().await.is_none());
    }
}
