//! Serialized PTY session management.
//!
//! Provides:
//! - `PtySession` - One interactive process behind a serialized
//!   write/read/resize/close surface
//! - Shell detection utilities for choosing the interactive shell

pub mod session;
pub mod shell;

pub use session::{PtyError, PtySession, SessionConfig, SessionState};
pub use shell::{default_interactive_shell, shell_command};
