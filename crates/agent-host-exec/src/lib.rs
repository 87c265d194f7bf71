//! Timeout-bounded command execution.
//!
//! Provides:
//! - `run` - One-shot command execution on a spawned process
//! - `run_in_session` - Command execution delegated to a live
//!   `PtySession`

pub mod interactive;
pub mod runner;

pub use interactive::run_in_session;
pub use runner::{CommandRequest, CommandResult, run};
