//! External command execution.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::CommandError;

/// Maximum number of stderr characters kept in a failure message.
const DEFAULT_STDERR_TAIL: usize = 2048;

/// Runs external programs on behalf of a handler.
#[async_trait]
pub trait Commander: Send + Sync + 'static {
    /// Runs `program` with `args` to completion.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::Cancelled` if `cancel` fires first, and
    /// `CommandError::NonZeroExit` if the program fails.
    async fn run(
        &self,
        cancel: &CancellationToken,
        program: &str,
        args: &[String],
    ) -> Result<(), CommandError>;
}

/// Spawns real child processes.
///
/// The child is killed if the future is dropped or `cancel` fires.
#[derive(Debug, Clone)]
pub struct ProcessCommander {
    stderr_tail: usize,
}

impl ProcessCommander {
    pub fn new() -> Self {
        Self {
            stderr_tail: DEFAULT_STDERR_TAIL,
        }
    }

    /// Sets how many trailing stderr characters are kept on failure.
    pub fn with_stderr_tail(mut self, chars: usize) -> Self {
        self.stderr_tail = chars;
        self
    }
}

impl Default for ProcessCommander {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Commander for ProcessCommander {
    async fn run(
        &self,
        cancel: &CancellationToken,
        program: &str,
        args: &[String],
    ) -> Result<(), CommandError> {
        if cancel.is_cancelled() {
            return Err(CommandError::Cancelled);
        }

        trace!(program, ?args, "Spawning command");
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| CommandError::Spawn {
                program: program.to_string(),
                error,
            })?;

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(program, "Command cancelled, killing child");
                return Err(CommandError::Cancelled);
            }
            output = child.wait_with_output() => output.map_err(|error| CommandError::Spawn {
                program: program.to_string(),
                error,
            })?,
        };

        if output.status.success() {
            debug!(program, "Command finished");
            return Ok(());
        }

        Err(CommandError::NonZeroExit {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: tail(&String::from_utf8_lossy(&output.stderr), self.stderr_tail),
        })
    }
}

/// Last `max_chars` characters of `text`, trimmed.
fn tail(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail("  short\n", 10), "short");
        assert_eq!(tail("abcdefgh", 3), "fgh");
        assert_eq!(tail("ééééé", 2), "éé");
    }

    #[tokio::test]
    async fn test_successful_command() {
        let commander = ProcessCommander::new();
        let cancel = CancellationToken::new();
        commander
            .run(&cancel, "sh", &args(&["-c", "exit 0"]))
            .await
            .expect("command should succeed");
    }

    #[tokio::test]
    async fn test_failing_command_reports_stderr() {
        let commander = ProcessCommander::new();
        let cancel = CancellationToken::new();
        let err = commander
            .run(&cancel, "sh", &args(&["-c", "echo broken >&2; exit 3"]))
            .await
            .unwrap_err();

        match err {
            CommandError::NonZeroExit {
                program, stderr, ..
            } => {
                assert_eq!(program, "sh");
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program() {
        let commander = ProcessCommander::new();
        let cancel = CancellationToken::new();
        let err = commander
            .run(&cancel, "definitely-not-a-real-program-xyz", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_kills_long_command() {
        let commander = ProcessCommander::new();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = commander
            .run(&cancel, "sleep", &args(&["30"]))
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_already_cancelled() {
        let commander = ProcessCommander::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = commander.run(&cancel, "true", &[]).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
