//! Deployment log sinks.
//!
//! Everything the pipeline wants an operator to see goes through a
//! [`LogSink`]. Lines always reach `tracing`; [`RelayLog`] additionally
//! forwards them, in order, to the realtime channel of one project.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::realtime::ConnectionManager;

/// Severity of a log line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn label(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Receives progress and diagnostic lines for one deployment.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

fn emit_tracing(scope: &str, level: LogLevel, message: &str) {
    match level {
        LogLevel::Debug => tracing::debug!(scope, "{message}"),
        LogLevel::Info => tracing::info!(scope, "{message}"),
        LogLevel::Warn => tracing::warn!(scope, "{message}"),
        LogLevel::Error => tracing::error!(scope, "{message}"),
    }
}

/// Sink that only writes to `tracing`.
pub struct TracingLog {
    scope: String,
}

impl TracingLog {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
        }
    }
}

impl LogSink for TracingLog {
    fn log(&self, level: LogLevel, message: &str) {
        emit_tracing(&self.scope, level, message);
    }
}

/// Sink that writes to `tracing` and relays each line to a project's observers.
///
/// Lines are queued on an unbounded channel drained by a single task, so the
/// broadcast order matches the order of `log` calls. Debug lines are not relayed.
pub struct RelayLog {
    project: String,
    tx: mpsc::UnboundedSender<String>,
}

/// Handle used to wait until every relayed line has been broadcast.
pub struct RelayHandle {
    task: JoinHandle<()>,
    stop: CancellationToken,
}

impl RelayLog {
    pub fn spawn(manager: Arc<ConnectionManager>, project: impl Into<String>) -> (Self, RelayHandle) {
        let project = project.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let stop = CancellationToken::new();
        let target = project.clone();
        let token = stop.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    line = rx.recv() => match line {
                        Some(line) => manager.broadcast(&target, &line).await,
                        None => break,
                    },
                    _ = token.cancelled() => {
                        rx.close();
                        while let Some(line) = rx.recv().await {
                            manager.broadcast(&target, &line).await;
                        }
                        break;
                    }
                }
            }
        });
        (Self { project, tx }, RelayHandle { task, stop })
    }
}

impl LogSink for RelayLog {
    fn log(&self, level: LogLevel, message: &str) {
        emit_tracing(&self.project, level, message);
        if level == LogLevel::Debug {
            return;
        }
        // The receiver only goes away once the relay task has finished.
        let _ = self.tx.send(format!("[{}] {}", level.label(), message));
    }
}

impl RelayHandle {
    /// Stops accepting new lines and waits until every queued line has been
    /// broadcast. Lines logged after this call are only traced.
    pub async fn drain(self) {
        self.stop.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!("relay log task failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn relay_preserves_order_and_skips_debug() {
        let manager = Arc::new(ConnectionManager::new());
        let (log, handle) = RelayLog::spawn(manager.clone(), "proj");
        log.info("cloning");
        log.debug("noise");
        log.warn("slow");
        handle.drain().await;
        log.info("after drain");

        let mut observer = manager.connect("proj").await;
        assert_eq!(observer.recv().await.as_deref(), Some("[INFO] cloning"));
        assert_eq!(observer.recv().await.as_deref(), Some("[WARN] slow"));
    }
}
