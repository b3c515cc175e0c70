//! Realtime relay of deployment progress to attached observers.
//!
//! Each project has a set of observers and a backlog. Messages broadcast
//! while nobody is watching are buffered and replayed, in order, to the next
//! observer that connects. [`ConnectionManager::complete`] ends the channel:
//! it sends a terminal sentinel, closes every observer and forgets the
//! backlog.
//!
//! The observer and backlog maps live behind one `RwLock`. Broadcasting to
//! existing observers takes the read lock; connect, disconnect and shutdown
//! take the write lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, RwLock};

/// Sentinel line marking a successful deployment.
pub const SUCCESS_SENTINEL: &str = "<<success";
/// Sentinel line marking a failed deployment.
pub const ERROR_SENTINEL: &str = "<<error";

/// Identifies one attached observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

struct ObserverSender {
    id: ObserverId,
    tx: mpsc::UnboundedSender<String>,
}

/// Receiving half handed to whoever connected.
///
/// `recv` yields `None` once the manager has closed the observer.
pub struct Observer {
    id: ObserverId,
    rx: mpsc::UnboundedReceiver<String>,
}

impl Observer {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Returns a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

#[derive(Default)]
struct RelayState {
    observers: HashMap<String, Vec<ObserverSender>>,
    backlog: HashMap<String, Vec<String>>,
}

pub struct ConnectionManager {
    state: RwLock<RelayState>,
    next_id: AtomicU64,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RelayState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Attaches a new observer to `project`, replaying its backlog first.
    pub async fn connect(&self, project: &str) -> Observer {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.state.write().await;
        if let Some(backlog) = state.backlog.remove(project) {
            tracing::debug!(project, replayed = backlog.len(), "replaying buffered messages");
            for message in backlog {
                // Receiver is still in scope, the send cannot fail.
                let _ = tx.send(message);
            }
        }
        state
            .observers
            .entry(project.to_string())
            .or_default()
            .push(ObserverSender { id, tx });
        tracing::debug!(project, observer = id.0, "observer connected");

        Observer { id, rx }
    }

    /// Detaches `observer` from every project it watches.
    pub async fn disconnect(&self, observer: ObserverId) {
        let mut state = self.state.write().await;
        for senders in state.observers.values_mut() {
            senders.retain(|s| s.id != observer);
        }
        state.observers.retain(|_, senders| !senders.is_empty());
        tracing::debug!(observer = observer.0, "observer disconnected");
    }

    /// Sends `message` to every observer of `project`, or buffers it when
    /// there are none.
    pub async fn broadcast(&self, project: &str, message: &str) {
        {
            let state = self.state.read().await;
            if let Some(senders) = state.observers.get(project) {
                if !senders.is_empty() {
                    for sender in senders {
                        if sender.tx.send(message.to_string()).is_err() {
                            tracing::debug!(project, observer = sender.id.0, "observer gone");
                        }
                    }
                    return;
                }
            }
        }

        let mut state = self.state.write().await;
        // An observer may have connected between the two locks.
        match state.observers.get(project) {
            Some(senders) if !senders.is_empty() => {
                for sender in senders {
                    let _ = sender.tx.send(message.to_string());
                }
            }
            _ => state
                .backlog
                .entry(project.to_string())
                .or_default()
                .push(message.to_string()),
        }
    }

    /// Sends the terminal sentinel to current observers and shuts the
    /// project's channel down, all under one write guard.
    pub async fn complete(&self, project: &str, success: bool) {
        let sentinel = if success { SUCCESS_SENTINEL } else { ERROR_SENTINEL };
        let mut state = self.state.write().await;
        if let Some(senders) = state.observers.get(project) {
            for sender in senders {
                let _ = sender.tx.send(sentinel.to_string());
            }
        }
        close_project(&mut state, project);
    }

    /// Closes every observer of `project` and drops its backlog.
    pub async fn shutdown(&self, project: &str) {
        let mut state = self.state.write().await;
        close_project(&mut state, project);
    }

    pub async fn observer_count(&self, project: &str) -> usize {
        self.state
            .read()
            .await
            .observers
            .get(project)
            .map_or(0, Vec::len)
    }

    pub async fn buffered_count(&self, project: &str) -> usize {
        self.state
            .read()
            .await
            .backlog
            .get(project)
            .map_or(0, Vec::len)
    }
}

fn close_project(state: &mut RelayState, project: &str) {
    let closed = state.observers.remove(project).map_or(0, |s| s.len());
    state.backlog.remove(project);
    tracing::debug!(project, closed, "realtime channel shut down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffered_messages_replay_first_in_order() {
        let manager = ConnectionManager::new();
        manager.broadcast("p", "one").await;
        manager.broadcast("p", "two").await;
        assert_eq!(manager.buffered_count("p").await, 2);

        let mut observer = manager.connect("p").await;
        manager.broadcast("p", "three").await;

        assert_eq!(observer.recv().await.as_deref(), Some("one"));
        assert_eq!(observer.recv().await.as_deref(), Some("two"));
        assert_eq!(observer.recv().await.as_deref(), Some("three"));
        assert_eq!(manager.buffered_count("p").await, 0);
    }

    #[tokio::test]
    async fn backlog_goes_to_one_observer_only() {
        let manager = ConnectionManager::new();
        manager.broadcast("p", "early").await;
        let mut first = manager.connect("p").await;
        let mut second = manager.connect("p").await;

        assert_eq!(first.try_recv().as_deref(), Some("early"));
        assert_eq!(second.try_recv(), None);

        manager.broadcast("p", "live").await;
        assert_eq!(first.try_recv().as_deref(), Some("live"));
        assert_eq!(second.try_recv().as_deref(), Some("live"));
    }

    #[tokio::test]
    async fn projects_are_isolated() {
        let manager = ConnectionManager::new();
        let mut a = manager.connect("a").await;
        manager.broadcast("b", "for b").await;
        assert_eq!(a.try_recv(), None);
        assert_eq!(manager.buffered_count("b").await, 1);
    }

    #[tokio::test]
    async fn complete_sends_sentinel_then_closes() {
        let manager = ConnectionManager::new();
        let mut observer = manager.connect("p").await;
        manager.broadcast("p", "working").await;
        manager.complete("p", true).await;

        assert_eq!(observer.recv().await.as_deref(), Some("working"));
        assert_eq!(observer.recv().await.as_deref(), Some(SUCCESS_SENTINEL));
        assert_eq!(observer.recv().await, None);
        assert_eq!(manager.observer_count("p").await, 0);
    }

    #[tokio::test]
    async fn complete_clears_state_for_later_observers() {
        let manager = ConnectionManager::new();
        manager.broadcast("p", "unseen").await;
        manager.complete("p", true).await;

        let mut late = manager.connect("p").await;
        assert_eq!(late.try_recv(), None);
    }

    #[tokio::test]
    async fn failure_sentinel() {
        let manager = ConnectionManager::new();
        let mut observer = manager.connect("p").await;
        manager.complete("p", false).await;
        assert_eq!(observer.recv().await.as_deref(), Some(ERROR_SENTINEL));
        assert_eq!(observer.recv().await, None);
    }

    #[tokio::test]
    async fn disconnect_removes_observer_everywhere() {
        let manager = ConnectionManager::new();
        let observer = manager.connect("p").await;
        let _other = manager.connect("q").await;
        manager.disconnect(observer.id()).await;

        assert_eq!(manager.observer_count("p").await, 0);
        assert_eq!(manager.observer_count("q").await, 1);

        manager.broadcast("p", "after").await;
        assert_eq!(manager.buffered_count("p").await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn observers_racing_complete_are_closed_only_after_the_sentinel() {
        for _ in 0..50 {
            let manager = std::sync::Arc::new(ConnectionManager::new());
            let connects: Vec<_> = (0..8)
                .map(|_| {
                    let manager = manager.clone();
                    tokio::spawn(async move { manager.connect("p").await })
                })
                .collect();
            let completer = {
                let manager = manager.clone();
                tokio::spawn(async move { manager.complete("p", true).await })
            };

            completer.await.unwrap();
            let mut without_sentinel = 0;
            for handle in connects {
                let mut observer = handle.await.unwrap();
                let mut last = None;
                while let Some(message) = observer.try_recv() {
                    last = Some(message);
                }
                if last.as_deref() != Some(SUCCESS_SENTINEL) {
                    without_sentinel += 1;
                }
            }
            // Anyone who missed the sentinel connected afterwards and is still attached.
            assert_eq!(without_sentinel, manager.observer_count("p").await);
        }
    }
}
