use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// Hard on-disk size ceiling sampled at a fixed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimit {
    pub max_bytes: u64,
    pub interval: Duration,
}

/// Background thread that samples a directory's size and trips a
/// cancellation token once it grows past the limit.
///
/// Runs on a dedicated OS thread so it keeps sampling while the async
/// runtime is busy waiting on the subprocess.
pub struct SizeWatchdog {
    stop: Arc<AtomicBool>,
    exceeded: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SizeWatchdog {
    pub fn spawn(dir: impl Into<PathBuf>, limit: SizeLimit, cancel: CancellationToken) -> Self {
        let dir = dir.into();
        let stop = Arc::new(AtomicBool::new(false));
        let exceeded = Arc::new(AtomicBool::new(false));

        let thread_stop = stop.clone();
        let thread_exceeded = exceeded.clone();
        let handle = std::thread::Builder::new()
            .name("repo-size-watchdog".into())
            .spawn(move || {
                while !thread_stop.load(Ordering::SeqCst) {
                    let size = dir_size(&dir);
                    if size > limit.max_bytes {
                        tracing::warn!(
                            dir = %dir.display(),
                            size,
                            limit = limit.max_bytes,
                            "size ceiling exceeded, aborting"
                        );
                        thread_exceeded.store(true, Ordering::SeqCst);
                        cancel.cancel();
                        break;
                    }
                    std::thread::park_timeout(limit.interval);
                }
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("failed to start size watchdog: {e}");
                None
            }
        };

        Self {
            stop,
            exceeded,
            handle,
        }
    }

    pub fn exceeded(&self) -> bool {
        self.exceeded.load(Ordering::SeqCst)
    }

    /// Stops sampling and reports whether the ceiling was breached.
    pub fn stop(mut self) -> bool {
        self.halt();
        self.exceeded()
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for SizeWatchdog {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Total size of regular files below `path`. Entries that vanish or cannot
/// be read while the tree is being written are ignored.
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn dir_size_counts_nested_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("a/b")).unwrap();
        std::fs::write(tmp.path().join("a/one"), vec![0u8; 100]).unwrap();
        std::fs::write(tmp.path().join("a/b/two"), vec![0u8; 50]).unwrap();
        assert_eq!(dir_size(tmp.path()), 150);
        assert_eq!(dir_size(&tmp.path().join("missing")), 0);
    }

    #[test]
    fn trips_token_when_limit_exceeded() {
        let tmp = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let watchdog = SizeWatchdog::spawn(
            tmp.path(),
            SizeLimit {
                max_bytes: 1024,
                interval: Duration::from_millis(10),
            },
            token.clone(),
        );
        assert!(!token.is_cancelled());

        std::fs::write(tmp.path().join("big"), vec![0u8; 4096]).unwrap();
        for _ in 0..200 {
            if token.is_cancelled() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(token.is_cancelled());
        assert!(watchdog.stop());
    }

    #[test]
    fn stop_without_breach() {
        let tmp = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let watchdog = SizeWatchdog::spawn(
            tmp.path(),
            SizeLimit {
                max_bytes: 1024,
                interval: Duration::from_secs(60),
            },
            token.clone(),
        );
        assert!(!watchdog.stop());
        assert!(!token.is_cancelled());
    }
}
