//! Command execution delegated to a live PTY session.
//!
//! The PTY is a raw byte channel with no framing of its own, so
//! completion is detected by asking the shell to print a marker line
//! with the command's exit status. The channel does not separate
//! stdout from stderr; everything captured lands in `stdout`.

use std::time::{Duration, Instant};

use agent_host_pty::{PtyError, PtySession};
use uuid::Uuid;

use crate::runner::CommandResult;

/// How long to wait, after interrupting a timed-out command, for the
/// shell to confirm it is reading commands again.
const INTERRUPT_GRACE: Duration = Duration::from_secs(2);

/// Run `argv` inside an existing interactive shell session.
///
/// The command is quoted into one shell line, written through the
/// session's serialized `write`, and watched for a completion marker
/// in the session's output buffer. A fired timeout interrupts the
/// foreground job and reports `timed_out: true` with whatever output
/// was captured; the session stays open when the shell comes back and
/// is closed when it does not, so a timed-out command is never left
/// running.
///
/// # Errors
/// [`PtyError::Closed`] when the session no longer accepts input;
/// [`PtyError::Channel`] when the write itself fails.
pub async fn run_in_session(
    session: &PtySession,
    argv: &[String],
    timeout: Option<Duration>,
) -> Result<CommandResult, PtyError> {
    if argv.is_empty() {
        return Ok(CommandResult::invalid("empty command"));
    }
    let Ok(line) = shlex::try_join(argv.iter().map(String::as_str)) else {
        return Ok(CommandResult::invalid("command cannot be quoted for the shell"));
    };

    // Completion marker. The tag is written split in two with a quote
    // boundary between the halves, so the terminal echo of the command
    // itself can never contain the contiguous marker.
    let tag = Uuid::new_v4().simple().to_string();
    let (head, tail) = tag.split_at(tag.len() / 2);
    let marker = format!("{tag}:");
    let framed = format!("{line}; printf '\\n{head}''{tail}:%d\\n' \"$?\"\n");

    let mark = session.output_len();
    session.write(framed.as_bytes()).await?;

    let limit = timeout.filter(|t| !t.is_zero());
    let started = Instant::now();
    let mut final_pass = false;

    loop {
        let snapshot = session.output_snapshot();
        let text =
            String::from_utf8_lossy(&snapshot[mark.min(snapshot.len())..]).into_owned();
        if let Some(result) = parse_completion(&text, &marker) {
            return Ok(result);
        }
        if final_pass {
            // EOF or close arrived without a completion marker.
            return Ok(CommandResult {
                stdout: strip_echo(&text),
                success: false,
                error_message: Some("session closed before command completed".to_string()),
                ..CommandResult::default()
            });
        }

        let want = snapshot.len() + 1;
        let reached = match limit {
            Some(limit) => {
                let Some(remaining) = limit.checked_sub(started.elapsed()) else {
                    return Ok(interrupt_and_report(session, &text, limit).await);
                };
                match tokio::time::timeout(remaining, session.wait_for_output(want)).await {
                    Ok(len) => len,
                    Err(_) => return Ok(interrupt_and_report(session, &text, limit).await),
                }
            }
            None => session.wait_for_output(want).await,
        };
        if reached < want {
            // No more output is coming; scan once more, then give up.
            final_pass = true;
        }
    }
}

fn parse_completion(text: &str, marker: &str) -> Option<CommandResult> {
    let pos = text.find(marker)?;
    let rest = &text[pos + marker.len()..];
    // The marker line must be complete before the status can be trusted.
    let line_end = rest.find('\n')?;
    let exit_code: i32 = rest[..line_end].trim().parse().ok()?;

    let success = exit_code == 0;
    Some(CommandResult {
        stdout: strip_echo(&text[..pos]),
        stderr: String::new(),
        exit_code: Some(exit_code),
        timed_out: false,
        success,
        error_message: (!success).then(|| format!("exit {exit_code}")),
    })
}

/// Terminate a timed-out command, then build the timed-out result.
///
/// A shell never leaves its foreground job running silently: the
/// interrupt byte goes down the channel, and if the shell cannot be
/// confirmed responsive afterwards the whole session is closed, taking
/// the command with it.
async fn interrupt_and_report(
    session: &PtySession,
    text: &str,
    limit: Duration,
) -> CommandResult {
    if !interrupt_foreground(session).await {
        tracing::warn!(
            session = %session.id(),
            "shell unresponsive after interrupt, closing session"
        );
        let _ = session.close().await;
    }
    CommandResult {
        stdout: strip_echo(text),
        timed_out: true,
        success: false,
        error_message: Some(format!("timed out after {limit:?}")),
        ..CommandResult::default()
    }
}

/// Interrupt the session's foreground job and confirm the shell is
/// reading commands again. Returns false when no confirmation arrives
/// within the grace period.
async fn interrupt_foreground(session: &PtySession) -> bool {
    // 0x03 is the byte ^C sends; the line discipline delivers SIGINT
    // to the foreground process group.
    if session.write(b"\x03").await.is_err() {
        return false;
    }

    // The shell only reads the next line once the foreground job is
    // gone, so a fresh marker line doubles as the confirmation. A
    // still-running job that echoes its input cannot forge it: the
    // echo carries the quote boundary and a literal %d, which
    // `parse_completion` rejects.
    let tag = Uuid::new_v4().simple().to_string();
    let (head, tail) = tag.split_at(tag.len() / 2);
    let marker = format!("{tag}:");
    let line = format!("printf '\\n{head}''{tail}:%d\\n' \"$?\"\n");
    let mark = session.output_len();
    if session.write(line.as_bytes()).await.is_err() {
        return false;
    }

    let deadline = Instant::now() + INTERRUPT_GRACE;
    loop {
        let snapshot = session.output_snapshot();
        let text = String::from_utf8_lossy(&snapshot[mark.min(snapshot.len())..]);
        if parse_completion(&text, &marker).is_some() {
            return true;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        let want = snapshot.len() + 1;
        match tokio::time::timeout(remaining, session.wait_for_output(want)).await {
            Ok(len) if len >= want => {}
            _ => return false,
        }
    }
}

/// Drop the terminal echo of the command line itself and normalize
/// line endings.
fn strip_echo(text: &str) -> String {
    let body = text.split_once('\n').map_or("", |(_, rest)| rest);
    body.replace("\r\n", "\n")
        .trim_end_matches(['\n', '\r'])
        .to_string()
}
