//! One-shot command execution on a spawned process.

use std::{path::PathBuf, process::Stdio, time::Duration};

use tokio::io::AsyncReadExt;

/// A command invocation: argument vector plus optional working
/// directory, environment override, and timeout.
#[derive(Debug, Clone, Default)]
pub struct CommandRequest {
    /// Program and arguments. Must be non-empty.
    pub argv: Vec<String>,
    /// Working directory; must exist when supplied.
    pub cwd: Option<PathBuf>,
    /// When supplied, REPLACES the inherited environment.
    pub env: Option<Vec<(String, String)>>,
    /// Zero or absent means no timeout.
    pub timeout: Option<Duration>,
}

impl CommandRequest {
    /// Create a request for the given argument vector.
    #[must_use]
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Set the working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Replace the inherited environment with exactly these variables.
    #[must_use]
    pub fn env<I, K, V>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Some(
            env.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Bound the execution time. Zero disables the timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of a command execution. Terminal: a result is produced the
/// moment the process exits or the timeout fires, and never reused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// Captured stdout (lossy UTF-8).
    pub stdout: String,
    /// Captured stderr (lossy UTF-8).
    pub stderr: String,
    /// Exit status; absent when the process did not exit cleanly
    /// (timeout kill, signal, or start failure).
    pub exit_code: Option<i32>,
    /// The timeout fired and the process was forcefully terminated.
    pub timed_out: bool,
    /// True iff the exit status was 0 and no timeout occurred.
    pub success: bool,
    /// Failure summary: start failure, non-zero exit, or timeout.
    pub error_message: Option<String>,
}

impl CommandResult {
    /// Stdout, falling back to stderr when stdout is empty.
    ///
    /// Presentation convenience only; both streams remain available.
    #[must_use]
    pub fn combined_output(&self) -> &str {
        if self.stdout.is_empty() {
            &self.stderr
        } else {
            &self.stdout
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Run a command to completion or timeout.
///
/// Invalid arguments (empty argv, nonexistent working directory) are
/// rejected before any process is spawned. A fired timeout forcefully
/// terminates the process and is reported as a result field, not an
/// error; whatever output was captured up to that point is kept.
pub async fn run(request: CommandRequest) -> CommandResult {
    let CommandRequest {
        argv,
        cwd,
        env,
        timeout,
    } = request;

    if argv.is_empty() {
        return CommandResult::invalid("empty command");
    }
    if let Some(dir) = &cwd {
        if !dir.is_dir() {
            return CommandResult::invalid(format!(
                "working directory does not exist: {}",
                dir.display()
            ));
        }
    }

    let mut cmd = tokio::process::Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &cwd {
        cmd.current_dir(dir);
    }
    if let Some(env) = &env {
        cmd.env_clear();
        cmd.envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(error) => {
            return CommandResult::invalid(format!("failed to start '{}': {error}", argv[0]));
        }
    };

    // Drain both pipes concurrently with the wait so neither can fill
    // up and stall the process.
    let stdout_task = tokio::spawn(read_to_string(child.stdout.take()));
    let stderr_task = tokio::spawn(read_to_string(child.stderr.take()));

    let timeout = timeout.filter(|t| !t.is_zero());
    let mut timeout_message = None;
    let status = if let Some(limit) = timeout {
        match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                // Expiry is forceful: terminate, then reap so the
                // process is never left orphaned.
                tracing::debug!(program = %argv[0], ?limit, "command timed out, killing");
                timeout_message = Some(format!("timed out after {limit:?}"));
                let _ = child.start_kill();
                child.wait().await
            }
        }
    } else {
        child.wait().await
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    if let Some(message) = timeout_message {
        return CommandResult {
            stdout,
            stderr,
            exit_code: None,
            timed_out: true,
            success: false,
            error_message: Some(message),
        };
    }

    match status {
        Ok(status) => {
            let exit_code = status.code();
            let success = status.success();
            let error_message = if success {
                None
            } else {
                Some(exit_code.map_or_else(
                    || "terminated by signal".to_string(),
                    |code| format!("exit {code}"),
                ))
            };
            CommandResult {
                stdout,
                stderr,
                exit_code,
                timed_out: false,
                success,
                error_message,
            }
        }
        Err(error) => CommandResult {
            stdout,
            stderr,
            exit_code: None,
            timed_out: false,
            success: false,
            error_message: Some(format!("wait failed: {error}")),
        },
    }
}

async fn read_to_string<R>(pipe: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}
