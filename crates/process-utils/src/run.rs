//! Timeout-bounded execution of external tools.

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use super::NoWindowExt;

/// Number of trailing stderr lines kept as a diagnostic.
pub const STDERR_TAIL_LINES: usize = 12;

impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(super::CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
///
/// The child is killed when its handle is dropped, so a cancelled or timed-out
/// caller never leaves a stray process behind.
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd.kill_on_drop(true);
    cmd
}

/// Errors raised while running an external tool.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} did not finish within {after:?}")]
    TimedOut { program: String, after: Duration },
    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Captured result of a finished tool invocation.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    /// Entire stdout, lossily decoded.
    pub stdout: String,
    /// The last [`STDERR_TAIL_LINES`] non-empty stderr lines.
    pub stderr_tail: Vec<String>,
    pub elapsed: Duration,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Diagnostic text for failure reports.
    pub fn diagnostic(&self) -> String {
        if self.stderr_tail.is_empty() {
            format!("exited with {}", self.status)
        } else {
            format!("exited with {}: {}", self.status, self.stderr_tail.join("\n"))
        }
    }
}

/// Spawn `command`, collect its output and wait at most `timeout` for it.
///
/// On timeout the child is killed before returning [`RunError::TimedOut`].
pub async fn run_with_timeout(
    command: &mut tokio::process::Command,
    timeout: Duration,
) -> Result<ToolOutput, RunError> {
    let program = command
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned();
    let start = Instant::now();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|source| RunError::Spawn {
        program: program.clone(),
        source,
    })?;

    let stdout_task = child.stdout.take().map(|out| tokio::spawn(read_to_string(out)));
    let stderr_task = child
        .stderr
        .take()
        .map(|err| tokio::spawn(read_tail(err, STDERR_TAIL_LINES)));

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(source)) => return Err(RunError::Wait { program, source }),
        Err(_) => {
            let _ = child.kill().await;
            return Err(RunError::TimedOut {
                program,
                after: timeout,
            });
        }
    };

    let stdout = match stdout_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };
    let stderr_tail = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    };

    Ok(ToolOutput {
        status,
        stdout,
        stderr_tail,
        elapsed: start.elapsed(),
    })
}

async fn read_to_string<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

async fn read_tail<R: AsyncRead + Unpin>(reader: R, keep: usize) -> Vec<String> {
    let mut tail = VecDeque::with_capacity(keep);
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if tail.len() == keep {
            tail.pop_front();
        }
        tail.push_back(line.to_string());
    }
    tail.into()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout_and_status() {
        let mut cmd = tokio_command("sh");
        cmd.args(["-c", "echo hello"]);
        let output = run_with_timeout(&mut cmd, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_keeps_only_stderr_tail() {
        let mut cmd = tokio_command("sh");
        cmd.args(["-c", "for i in $(seq 1 30); do echo line$i >&2; done; exit 3"]);
        let output = run_with_timeout(&mut cmd, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!output.success());
        assert_eq!(output.stderr_tail.len(), STDERR_TAIL_LINES);
        assert_eq!(output.stderr_tail.last().map(String::as_str), Some("line30"));
        assert!(output.diagnostic().contains("line30"));
    }

    #[tokio::test]
    async fn test_times_out() {
        let mut cmd = tokio_command("sleep");
        cmd.arg("5");
        let err = run_with_timeout(&mut cmd, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let mut cmd = tokio_command("definitely-not-a-real-binary-xyz");
        let err = run_with_timeout(&mut cmd, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }));
    }
}
