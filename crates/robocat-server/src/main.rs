//! `robocat` binary.

use anyhow::Context;
use clap::Parser;
use robocat_runner::Runner;
use robocat_server::{Options, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let options = Options::parse();
    let config = options.server_config();
    if config.credentials.is_none() {
        tracing::warn!("No credentials configured - anyone can connect");
    }

    let runner = Runner::new(options.runner_config());
    let server = Server::new(config);
    for (name, handler) in robocat_runner::handlers(&runner) {
        server.on(&name, handler);
    }

    let listener = tokio::net::TcpListener::bind(options.listen)
        .await
        .with_context(|| format!("unable to listen on {}", options.listen))?;
    tracing::info!(
        listen = %options.listen,
        flow_dir = %options.flow_dir.display(),
        "Server listening"
    );

    server.serve(listener).await.context("server failed")
}
