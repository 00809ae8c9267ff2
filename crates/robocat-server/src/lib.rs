//! robocat server: one resumable session over a WebSocket, commands
//! routed to registered handlers, updates streamed back in order.

pub mod auth;
pub mod config;
pub mod server;
pub mod session;

pub use auth::Credentials;
pub use config::{Options, ServerConfig};
pub use server::{ConnectParams, Server};
