//! Core building blocks shared by the robocat server and client.
//!
//! This crate provides:
//! - `Message` - Wire envelope for commands and updates
//! - `FlowFile` / `RunnerArguments` - Typed message bodies
//! - `Stream` - Ordered, closable hand-off queue
//! - `Registry` - Correlation id (or command name) → callbacks
//! - `Replier` / `CommandHandler` - Server-side reply capability and handler trait

pub mod file;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod stream;

pub use file::{FlowFile, RunnerArguments};
pub use handler::{CommandHandler, Replier, ReplyError, Request};
pub use protocol::{CommandName, Message, MessageKind, ProtocolError, UpdateName};
pub use registry::Registry;
pub use stream::{Stream, StreamError};
