//! Automation run supervision.

use std::{
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use command_group::{AsyncCommandGroup, AsyncGroupChild};
use robocat_core::{FlowFile, Replier, Request, RunnerArguments};
use tokio::{process::Command, sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    cleanup::{ScheduledCleanup, kill_leftovers},
    command::CommandBuilder,
    config::RunnerConfig,
    error::RunnerError,
    input::write_input,
    logs::LogScanner,
    output::OutputWatcher,
    state::{FAILED_MESSAGE, RunOutcome, RunState, RunnerStatus, Terminal},
};

/// How long preemption waits for the previous run to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a finished process may take to flush its remaining output.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

struct ActiveRun {
    id: u64,
    scope: CancellationToken,
    exited: CancellationToken,
}

struct Inner {
    state: RunState,
    flow: Option<String>,
    active: Option<ActiveRun>,
    cleanup: Option<ScheduledCleanup>,
}

/// Everything a supervisor task needs about its run.
struct Launched {
    id: u64,
    child: AsyncGroupChild,
    scanner: JoinHandle<()>,
    scope: CancellationToken,
    exited: CancellationToken,
    terminal: Arc<Terminal>,
    reply: Replier,
}

/// Owns at most one automation run at a time.
pub struct Runner {
    config: RunnerConfig,
    command: CommandBuilder,
    inner: Mutex<Inner>,
    start_lock: Mutex<()>,
    generation: AtomicU64,
}

impl Runner {
    #[must_use]
    pub fn new(config: RunnerConfig) -> Arc<Self> {
        let command = CommandBuilder::new(config.runner_command.clone());
        Arc::new(Self {
            config,
            command,
            inner: Mutex::new(Inner {
                state: RunState::Idle,
                flow: None,
                active: None,
                cleanup: None,
            }),
            start_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Snapshot of the current state.
    pub async fn status(&self) -> RunnerStatus {
        let inner = self.inner.lock().await;
        RunnerStatus {
            state: inner.state,
            flow: inner.flow.clone(),
            cleanup_scheduled: inner.cleanup.is_some(),
        }
    }

    /// Handle a `run` command: preempt whatever runs, then start a new run.
    pub async fn run(self: &Arc<Self>, request: Request) {
        let arguments: RunnerArguments = match request.message.body() {
            Ok(arguments) => arguments,
            Err(e) => {
                request.reply.error_or_log(RunnerError::Body(e)).await;
                return;
            }
        };
        if arguments.flow.trim().is_empty() {
            let error = RunnerError::InvalidArguments("flow must not be empty".to_string());
            request.reply.error_or_log(error).await;
            return;
        }

        let _start = self.start_lock.lock().await;
        self.preempt().await;

        if let Err(e) = self.start(arguments, &request).await {
            tracing::warn!(reference = %request.reply.reference(), "Unable to start automation: {e}");
            self.inner.lock().await.state = RunState::Failed;
            request.reply.error_or_log(e).await;
        }
    }

    /// Handle a `stop` command.
    pub async fn stop(&self, request: Request) {
        let scope = {
            let inner = self.inner.lock().await;
            inner
                .active
                .as_ref()
                .filter(|run| !run.scope.is_cancelled())
                .map(|run| run.scope.clone())
        };

        match scope {
            Some(scope) => {
                tracing::info!("Stopping automation");
                scope.cancel();
                if let Err(e) = request.reply.ok().await {
                    tracing::debug!("Unable to acknowledge stop: {e}");
                }
            }
            None => request.reply.error_or_log(RunnerError::NotRunning).await,
        }
    }

    /// Handle an `input` command.
    pub async fn input(&self, request: Request) {
        let result = match request.message.body::<FlowFile>() {
            Ok(file) => write_input(&self.config.input_dir(), &file).await,
            Err(e) => Err(RunnerError::Body(e)),
        };

        match result {
            Ok(_) => {
                if let Err(e) = request.reply.ok().await {
                    tracing::debug!("Unable to acknowledge input: {e}");
                }
            }
            Err(e) => request.reply.error_or_log(e).await,
        }
    }

    async fn preempt(&self) {
        let previous = {
            let mut inner = self.inner.lock().await;
            if let Some(cleanup) = inner.cleanup.take() {
                tracing::debug!("Cancelling scheduled clean-up");
                cleanup.cancel();
            }
            inner.active.take()
        };

        if let Some(previous) = previous {
            tracing::info!(run = previous.id, "Aborting previous run");
            previous.scope.cancel();
            if tokio::time::timeout(REAP_TIMEOUT, previous.exited.cancelled())
                .await
                .is_err()
            {
                tracing::warn!(run = previous.id, "Previous run was not reaped in time");
            }
        }

        kill_leftovers(&self.config.cleanup_command).await;
    }

    async fn start(
        self: &Arc<Self>,
        arguments: RunnerArguments,
        request: &Request,
    ) -> Result<(), RunnerError> {
        let id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut inner = self.inner.lock().await;
            inner.state = RunState::Starting;
            inner.flow = Some(arguments.flow.clone());
        }

        let (program, args) = self.command.build(&arguments)?.into_resolved().await?;
        tracing::info!(run = id, program = %program.display(), ?args, "Starting automation");

        let scope = request.scope.child_token();
        let reply = request.reply.clone();

        let watcher = OutputWatcher::new(self.config.output_dir(), reply.clone(), scope.clone());
        if let Err(e) = watcher.spawn() {
            scope.cancel();
            return Err(e);
        }

        let mut child = match Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .group_spawn()
        {
            Ok(child) => child,
            Err(e) => {
                scope.cancel();
                return Err(RunnerError::Spawn(e));
            }
        };
        let stdout = child.inner().stdout.take();

        let exited = CancellationToken::new();
        {
            let mut inner = self.inner.lock().await;
            inner.state = RunState::Running;
            inner.active = Some(ActiveRun {
                id,
                scope: scope.clone(),
                exited: exited.clone(),
            });
        }

        if let Err(e) = reply.ok().await {
            tracing::debug!(run = id, "Unable to acknowledge run: {e}");
        }

        let terminal = Arc::new(Terminal::default());
        let scanner = LogScanner::new(
            reply.clone(),
            Arc::clone(&terminal),
            scope.clone(),
            self.config.start_timeout,
        );
        let scanner = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                scanner.scan(stdout).await;
            }
        });

        let runner = Arc::clone(self);
        tokio::spawn(runner.supervise(Launched {
            id,
            child,
            scanner,
            scope,
            exited,
            terminal,
            reply,
        }));

        Ok(())
    }

    async fn supervise(self: Arc<Self>, launched: Launched) {
        let Launched {
            id,
            mut child,
            mut scanner,
            scope,
            exited,
            terminal,
            reply,
        } = launched;

        let status = tokio::select! {
            status = child.wait() => Some(status),
            () = scope.cancelled() => None,
        };

        let outcome = match status {
            Some(Ok(status)) => {
                if tokio::time::timeout(DRAIN_TIMEOUT, &mut scanner).await.is_err() {
                    tracing::debug!(run = id, "Output still open after exit");
                }
                tracing::info!(run = id, %status, "Automation exited");
                if status.success() {
                    RunOutcome::Succeeded
                } else {
                    RunOutcome::Failed(FAILED_MESSAGE.to_string())
                }
            }
            Some(Err(e)) => {
                tracing::warn!(run = id, "Unable to wait for automation: {e}");
                RunOutcome::Failed(FAILED_MESSAGE.to_string())
            }
            None => RunOutcome::Aborted,
        };

        // Kill whatever is left of the group and reap the leader.
        if let Err(e) = child.start_kill() {
            tracing::debug!(run = id, "Process group already gone: {e}");
        }
        if let Err(e) = child.wait().await {
            tracing::debug!(run = id, "Unable to reap automation: {e}");
        }
        scope.cancel();
        scanner.abort();

        terminal.conclude(&reply, outcome).await;
        exited.cancel();

        let mut inner = self.inner.lock().await;
        if inner.active.as_ref().is_none_or(|run| run.id != id) {
            return;
        }
        inner.active = None;
        if let Some(outcome) = terminal.get() {
            inner.state = outcome.state();
        }
        self.schedule_cleanup(&mut inner);
    }

    fn schedule_cleanup(self: &Arc<Self>, inner: &mut Inner) {
        let token = CancellationToken::new();
        inner.cleanup = Some(ScheduledCleanup::new(token.clone()));

        let runner = Arc::clone(self);
        let delay = self.config.cleanup_delay;
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            let mut inner = runner.inner.lock().await;
            if token.is_cancelled() {
                return;
            }
            tracing::debug!("Running scheduled clean-up");
            kill_leftovers(&runner.config.cleanup_command).await;
            inner.cleanup = None;
        });
    }
}
