//! Automation stdout scanner.
//!
//! Every line is forwarded as a `log` update. Two markers steer the run:
//! the start marker arms a watchdog that the next line disarms, and an
//! error line ends the run with a failure.

use std::{sync::Arc, time::Duration};

use robocat_core::{Replier, UpdateName};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    time::{Instant, sleep},
};
use tokio_stream::{StreamExt, wrappers::LinesStream};
use tokio_util::sync::CancellationToken;

use crate::state::{RunOutcome, Terminal};

/// Line announcing that the automation begins driving the browser.
pub const START_MARKER: &str = "START - automation started";

/// Prefix of lines reporting a fatal automation error.
pub const ERROR_MARKER: &str = "ERROR - ";

/// Reads automation output for one run.
pub struct LogScanner {
    reply: Replier,
    terminal: Arc<Terminal>,
    scope: CancellationToken,
    start_timeout: Duration,
}

impl LogScanner {
    #[must_use]
    pub const fn new(
        reply: Replier,
        terminal: Arc<Terminal>,
        scope: CancellationToken,
        start_timeout: Duration,
    ) -> Self {
        Self {
            reply,
            terminal,
            scope,
            start_timeout,
        }
    }

    /// Scan `reader` until end of input or until the run scope ends.
    pub async fn scan<R>(self, reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = LinesStream::new(BufReader::new(reader).lines());
        let watchdog = sleep(self.start_timeout);
        tokio::pin!(watchdog);
        let mut armed = false;

        loop {
            tokio::select! {
                () = self.scope.cancelled() => break,
                () = &mut watchdog, if armed => {
                    let message = format!(
                        "automation start timeout reached ({})",
                        humantime::format_duration(self.start_timeout)
                    );
                    tracing::warn!(reference = %self.reply.reference(), "{message}");
                    self.terminal
                        .conclude(&self.reply, RunOutcome::TimedOut(message))
                        .await;
                    self.scope.cancel();
                    break;
                }
                line = lines.next() => match line {
                    Some(Ok(line)) => {
                        if self.forward(&line).await {
                            break;
                        }
                        if line.starts_with(START_MARKER) {
                            watchdog.as_mut().reset(Instant::now() + self.start_timeout);
                            armed = true;
                        } else {
                            armed = false;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(reference = %self.reply.reference(), "Error reading automation output: {e}");
                        break;
                    }
                    None => break,
                },
            }
        }
    }

    /// Emit one line. Returns `true` when the line ended the run.
    async fn forward(&self, line: &str) -> bool {
        if let Err(e) = self.reply.send(UpdateName::Log.as_str(), Some(line)).await {
            tracing::debug!(reference = %self.reply.reference(), "Unable to deliver log line: {e}");
        }

        let Some(rest) = line.strip_prefix(ERROR_MARKER) else {
            return false;
        };
        tracing::info!(reference = %self.reply.reference(), "Automation reported an error");
        self.terminal
            .conclude(
                &self.reply,
                RunOutcome::Failed(format!("got error during run execution: {rest}")),
            )
            .await;
        self.scope.cancel();
        true
    }
}
