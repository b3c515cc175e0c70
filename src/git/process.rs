use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::watchdog::{SizeLimit, SizeWatchdog};
use crate::progress::LogSink;

/// Result of a captured subprocess run.
#[derive(Debug)]
pub struct CapturedOutput {
    /// `None` when the process was killed before it exited on its own.
    pub status: Option<ExitStatus>,
    /// stdout and stderr lines in arrival order.
    pub lines: Vec<String>,
    pub cancelled: bool,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.status.is_some_and(|s| s.success())
    }
}

#[derive(Debug)]
pub struct SupervisedOutput {
    pub output: CapturedOutput,
    pub size_exceeded: bool,
}

/// Runs `cmd`, forwarding its output line by line to `log` at debug level.
/// The child is killed as soon as `cancel` fires.
pub async fn run_captured(
    mut cmd: Command,
    cancel: &CancellationToken,
    log: &dyn LogSink,
) -> io::Result<CapturedOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        forward_lines(stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        forward_lines(stderr, tx);
    }

    let mut lines = Vec::new();
    loop {
        tokio::select! {
            line = rx.recv() => match line {
                Some(line) => {
                    log.debug(&line);
                    lines.push(line);
                }
                None => break,
            },
            _ = cancel.cancelled() => {
                // Helpers spawned by the child may keep the pipes open, so
                // stop reading instead of waiting for EOF.
                child.kill().await?;
                while let Ok(line) = rx.try_recv() {
                    lines.push(line);
                }
                return Ok(CapturedOutput {
                    status: None,
                    lines,
                    cancelled: true,
                });
            }
        }
    }

    let status = child.wait().await?;
    Ok(CapturedOutput {
        status: Some(status),
        lines,
        cancelled: false,
    })
}

/// Runs `cmd` under a [`SizeWatchdog`] watching `watch_dir`.
pub async fn run_supervised(
    cmd: Command,
    watch_dir: &Path,
    limit: SizeLimit,
    log: &dyn LogSink,
) -> io::Result<SupervisedOutput> {
    let cancel = CancellationToken::new();
    let watchdog = SizeWatchdog::spawn(watch_dir, limit, cancel.clone());
    let output = run_captured(cmd, &cancel, log).await;
    let size_exceeded = watchdog.stop();
    Ok(SupervisedOutput {
        output: output?,
        size_exceeded,
    })
}

fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::progress::TracingLog;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn captures_both_streams() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err 1>&2; exit 3"]);
        let output = run_captured(cmd, &CancellationToken::new(), &TracingLog::new("test"))
            .await
            .unwrap();
        assert!(!output.success());
        assert_eq!(output.status.and_then(|s| s.code()), Some(3));
        assert!(output.lines.contains(&"out".to_string()));
        assert!(output.lines.contains(&"err".to_string()));
    }

    #[tokio::test]
    async fn watchdog_kills_growing_process() {
        let tmp = TempDir::new().unwrap();
        let mut cmd = Command::new("sh");
        cmd.current_dir(tmp.path()).args([
            "-c",
            "while true; do head -c 65536 /dev/zero >> blob; sleep 0.01; done",
        ]);

        let limit = SizeLimit {
            max_bytes: 256 * 1024,
            interval: Duration::from_millis(20),
        };
        let result = tokio::time::timeout(
            Duration::from_secs(30),
            run_supervised(cmd, tmp.path(), limit, &TracingLog::new("test")),
        )
        .await
        .expect("watchdog did not stop the process")
        .unwrap();

        assert!(result.size_exceeded);
        assert!(result.output.cancelled);
        assert!(result.output.status.is_none());
    }
}
