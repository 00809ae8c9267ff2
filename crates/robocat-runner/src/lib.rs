//! Supervision of the external browser automation.
//!
//! A [`Runner`] owns at most one run. Each run spawns the automation
//! wrapper as a process group, forwards its stdout as `log` updates,
//! watches the flow's output directory for produced files, and reports
//! exactly one terminal outcome. Leftover automation processes are
//! killed before every run and after a short grace delay once it ends.

pub mod cleanup;
pub mod command;
pub mod config;
pub mod error;
pub mod handlers;
pub mod input;
pub mod logs;
pub mod output;
pub mod runner;
pub mod state;

pub use command::{CommandBuildError, CommandBuilder, CommandParts, flow_args};
pub use config::RunnerConfig;
pub use error::RunnerError;
pub use handlers::handlers;
pub use runner::Runner;
pub use state::{RunOutcome, RunState, RunnerStatus};
