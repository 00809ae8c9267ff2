//! Command handlers backed by a [`Runner`].

use std::sync::Arc;

use async_trait::async_trait;
use robocat_core::{CommandHandler, CommandName, Request};

use crate::runner::Runner;

/// `run`: start a flow.
pub struct RunCommand(pub Arc<Runner>);

/// `stop`: abort the current flow.
pub struct StopCommand(pub Arc<Runner>);

/// `input`: drop a file into the flow's input directory.
pub struct InputCommand(pub Arc<Runner>);

#[async_trait]
impl CommandHandler for RunCommand {
    async fn handle(&self, request: Request) {
        self.0.run(request).await;
    }
}

#[async_trait]
impl CommandHandler for StopCommand {
    async fn handle(&self, request: Request) {
        self.0.stop(request).await;
    }
}

#[async_trait]
impl CommandHandler for InputCommand {
    async fn handle(&self, request: Request) {
        self.0.input(request).await;
    }
}

/// Handlers for every command the runner serves.
#[must_use]
pub fn handlers(runner: &Arc<Runner>) -> Vec<(CommandName, Arc<dyn CommandHandler>)> {
    let run: Arc<dyn CommandHandler> = Arc::new(RunCommand(Arc::clone(runner)));
    let stop: Arc<dyn CommandHandler> = Arc::new(StopCommand(Arc::clone(runner)));
    let input: Arc<dyn CommandHandler> = Arc::new(InputCommand(Arc::clone(runner)));
    vec![
        (CommandName::Run, run),
        (CommandName::Stop, stop),
        (CommandName::Input, input),
    ]
}
