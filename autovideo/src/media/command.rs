use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Captured result of an external command.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    /// Wall time in seconds.
    pub duration: f64,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CommandOutput {
    /// Last `n` stderr lines joined, for error messages.
    pub fn stderr_tail(&self, n: usize) -> String {
        let start = self.stderr.len().saturating_sub(n);
        self.stderr[start..].join("\n")
    }
}

/// Run `command`, streaming its output into `tracing` and collecting it.
///
/// The child is killed if the returned future is dropped, so a job timeout or
/// cancellation does not leave an orphaned encoder running.
pub async fn run_command_with_logs(command: &mut Command) -> crate::Result<CommandOutput> {
    let start = std::time::Instant::now();

    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| crate::Error::Other(format!("Failed to spawn command: {}", e)))?;

    let stdout_task = child.stdout.take().map(|stdout| {
        tokio::spawn(async move {
            let mut collected = Vec::new();
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("stdout: {}", line);
                collected.push(line);
            }
            collected
        })
    });

    let stderr_task = child.stderr.take().map(|stderr| {
        tokio::spawn(async move {
            let mut collected = Vec::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                // ffmpeg prints progress and info to stderr
                if line.to_lowercase().contains("error") {
                    warn!("stderr: {}", line);
                } else {
                    debug!("stderr: {}", line);
                }
                collected.push(line);
            }
            collected
        })
    });

    let status = child
        .wait()
        .await
        .map_err(|e| crate::Error::Other(format!("Failed to wait for command: {}", e)))?;

    let stdout = match stdout_task {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    };
    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    };

    Ok(CommandOutput {
        status,
        duration: start.elapsed().as_secs_f64(),
        stdout,
        stderr,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collects_stdout_and_stderr() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err 1>&2; exit 3");

        let output = run_command_with_logs(&mut cmd).await.unwrap();

        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout, vec!["out".to_string()]);
        assert_eq!(output.stderr_tail(5), "err");
    }

    #[tokio::test]
    async fn test_missing_binary_is_error() {
        let mut cmd = Command::new("definitely-not-a-real-binary-autovideo");
        assert!(run_command_with_logs(&mut cmd).await.is_err());
    }
}
