//! Client for the robocat automation server.
//!
//! ```no_run
//! # async fn demo() -> Result<(), robocat_client::ClientError> {
//! use robocat_client::{Client, ClientOptions};
//!
//! let client = Client::connect(
//!     "ws://localhost:80/",
//!     ClientOptions::default().with_credentials("robocat", "secret"),
//! )
//! .await?;
//!
//! let flow = client.flow("01-example").with_data("k=v").run().await?;
//! let log = flow.log();
//! tokio::spawn(async move { log.watch(|line| println!("{line}")).await });
//! flow.wait().await?;
//!
//! for file in flow.output().collect().await {
//!     println!("{} ({} bytes)", file.path, file.payload.len());
//! }
//! client.close().await
//! # }
//! ```

pub mod backoff;
pub mod client;
pub mod error;
pub mod flow;
pub mod options;

pub use backoff::Backoff;
pub use client::Client;
pub use error::ClientError;
pub use flow::{DEFAULT_FLOW_TIMEOUT, Flow, FlowBuilder};
pub use options::{ClientOptions, Credentials};
pub use robocat_core::{FlowFile, Stream};
