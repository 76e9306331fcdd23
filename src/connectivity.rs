//! Online/offline state and the deferred sync trigger

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

/// Shared connectivity flag
///
/// Clones observe the same state. Subscribers are woken only on an
/// actual transition.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "connectivity changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::online()
    }
}

/// Platform hook that wakes the dispatcher once connectivity returns
pub trait BackgroundSync: Send + Sync {
    /// Register a one-at-a-time trigger under `tag`
    ///
    /// `None` means the platform has no such facility and the caller has
    /// to poll.
    fn register(&self, tag: &str) -> Option<mpsc::Receiver<()>>;
}

/// No deferred execution available
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackgroundSync;

impl BackgroundSync for NoBackgroundSync {
    fn register(&self, _tag: &str) -> Option<mpsc::Receiver<()>> {
        None
    }
}

/// Fires on every offline-to-online transition of a [`Connectivity`]
///
/// At most one trigger is pending at a time; transitions seen while a
/// trigger is still unconsumed are folded into it.
#[derive(Debug, Clone)]
pub struct ReconnectTrigger {
    connectivity: Connectivity,
}

impl ReconnectTrigger {
    pub fn new(connectivity: Connectivity) -> Self {
        Self { connectivity }
    }
}

impl BackgroundSync for ReconnectTrigger {
    fn register(&self, tag: &str) -> Option<mpsc::Receiver<()>> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let (tx, rx) = mpsc::channel(1);
        let mut state = self.connectivity.subscribe();
        let tag = tag.to_string();

        runtime.spawn(async move {
            let mut was_online = *state.borrow_and_update();
            loop {
                tokio::select! {
                    changed = state.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *state.borrow_and_update();
                        if online && !was_online {
                            tracing::debug!(tag = %tag, "reconnect trigger fired");
                            let _ = tx.try_send(());
                        }
                        was_online = online;
                    }
                    _ = tx.closed() => break,
                }
            }
        });

        Some(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn clones_share_state() {
        let connectivity = Connectivity::offline();
        let other = connectivity.clone();
        other.set_online(true);
        assert!(connectivity.is_online());
    }

    #[test]
    fn register_outside_runtime_is_unsupported() {
        let trigger = ReconnectTrigger::new(Connectivity::offline());
        assert!(trigger.register("sync").is_none());
        assert!(NoBackgroundSync.register("sync").is_none());
    }

    #[tokio::test]
    async fn fires_on_reconnect_only() {
        let connectivity = Connectivity::online();
        let trigger = ReconnectTrigger::new(connectivity.clone());
        let mut rx = trigger.register("sync").unwrap();

        connectivity.set_online(true);
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());

        connectivity.set_online(false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        connectivity.set_online(true);
        assert_eq!(
            timeout(Duration::from_secs(1), rx.recv()).await.unwrap(),
            Some(())
        );
    }
}
