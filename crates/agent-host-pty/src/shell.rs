//! Cross-platform shell selection utilities.

use std::path::{Path, PathBuf};

/// Returns the appropriate shell command and argument for running a
/// one-shot command line on the current platform.
///
/// Returns `(shell_program, shell_arg)` where:
/// - Windows: `("cmd", "/C")`
/// - Unix-like: the user's shell from `$SHELL` (or `/bin/sh`) with `-c`
#[must_use]
pub fn shell_command() -> (String, &'static str) {
    if cfg!(windows) {
        ("cmd".into(), "/C")
    } else {
        (
            default_interactive_shell().to_string_lossy().into_owned(),
            "-c",
        )
    }
}

/// Returns the path to an interactive shell for the current platform.
///
/// On Windows, prefers PowerShell if available, falling back to cmd.exe.
/// On Unix, returns `$SHELL` when it names an existing file, else `/bin/sh`.
#[must_use]
pub fn default_interactive_shell() -> PathBuf {
    if cfg!(windows) {
        which::which("powershell.exe").unwrap_or_else(|_| PathBuf::from("cmd.exe"))
    } else {
        if let Ok(shell) = std::env::var("SHELL") {
            let path = Path::new(&shell);
            if path.is_absolute() && path.is_file() {
                return path.to_path_buf();
            }
        }
        PathBuf::from("/bin/sh")
    }
}
