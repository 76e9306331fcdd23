//! Queue replay and its scheduling loop
//!
//! A replay pass walks the queue once, in enqueue order, applying each
//! operation through a [`MutationHandler`]. Successes are removed; a
//! failure stays queued and the pass moves on, except that later
//! operations on the same record wait behind it. Only one pass runs at
//! a time.
//!
//! [`SyncDispatcher::start`] spawns the loop that schedules passes:
//! exponential backoff after a failed pass, the base delay otherwise,
//! and an immediate pass when connectivity returns (or when a
//! [`BackgroundSync`] trigger fires).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::connectivity::{BackgroundSync, Connectivity};
use crate::error::Result;
use crate::events::{EventBus, EventKind};
use crate::model::EntityKind;
use crate::queue::{Mutation, MutationQueue};
use crate::remote::Table;

/// Tag under which the dispatcher registers its background trigger
pub const SYNC_TAG: &str = "sync-offline-mutations";

/// Applies one queued mutation against the remote store
#[async_trait]
pub trait MutationHandler: Send + Sync {
    async fn apply(&self, mutation: &Mutation) -> Result<()>;
}

/// Outcome of one replay pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Left queued behind an earlier failure on the same record
    pub deferred: usize,
    /// The pass did not run because another one was in flight
    #[serde(default)]
    pub skipped: bool,
}

impl ReplaySummary {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.deferred == 0
    }
}

/// Exponential backoff with a ceiling and no jitter
///
/// After the n-th consecutive failure the delay is
/// `min(base * 2^n, cap)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    retries: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
            retries: 0,
        }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Delay when there was nothing to do
    pub fn idle(&self) -> Duration {
        self.base
    }

    pub fn on_success(&mut self) -> Duration {
        self.retries = 0;
        self.base
    }

    pub fn on_failure(&mut self) -> Duration {
        self.retries = self.retries.saturating_add(1);
        let factor = 2u32.checked_pow(self.retries).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }
}

impl From<&crate::config::SyncConfig> for Backoff {
    fn from(config: &crate::config::SyncConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay())
    }
}

struct ReplayGuard<'a>(&'a AtomicBool);

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Inner {
    queue: MutationQueue,
    handler: Arc<dyn MutationHandler>,
    connectivity: Connectivity,
    events: EventBus,
    replaying: AtomicBool,
}

/// Drives replay of the mutation queue
#[derive(Clone)]
pub struct SyncDispatcher {
    inner: Arc<Inner>,
}

impl SyncDispatcher {
    pub fn new(
        queue: MutationQueue,
        handler: Arc<dyn MutationHandler>,
        connectivity: Connectivity,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue,
                handler,
                connectivity,
                events,
                replaying: AtomicBool::new(false),
            }),
        }
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.inner.queue
    }

    /// Run one replay pass over the whole queue
    pub async fn replay(&self) -> Result<ReplaySummary> {
        if self
            .inner
            .replaying
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("replay already in flight; skipping");
            return Ok(ReplaySummary {
                skipped: true,
                ..ReplaySummary::default()
            });
        }
        let _guard = ReplayGuard(&self.inner.replaying);

        let ops = self.inner.queue.list()?;
        let mut summary = ReplaySummary::default();
        let mut blocked: HashSet<(EntityKind, String)> = HashSet::new();
        let mut touched: Vec<Table> = Vec::new();

        for op in &ops {
            let target = op
                .mutation
                .target_id()
                .map(|id| (op.mutation.kind(), id.to_string()));
            if let Some(target) = &target {
                if blocked.contains(target) {
                    tracing::debug!(op_id = %op.id, mutation = %op.mutation, "deferred behind failed operation");
                    summary.deferred += 1;
                    continue;
                }
            }

            match self.inner.handler.apply(&op.mutation).await {
                Ok(()) => {
                    self.inner.queue.remove(&op.id)?;
                    let table = Table::for_entity(op.mutation.kind());
                    if !touched.contains(&table) {
                        touched.push(table);
                    }
                    summary.succeeded += 1;
                    tracing::debug!(op_id = %op.id, mutation = %op.mutation, "replayed");
                }
                Err(err) => {
                    tracing::warn!(op_id = %op.id, mutation = %op.mutation, error = %err, "replay failed; keeping operation queued");
                    summary.failed += 1;
                    if let Some(target) = target {
                        blocked.insert(target);
                    }
                }
            }
        }

        if !ops.is_empty() {
            tracing::info!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                deferred = summary.deferred,
                "replay pass finished"
            );
            for table in touched {
                self.inner.events.refetch(table);
            }
            self.inner.events.notify(EventKind::SyncCompleted, &summary);
        }
        Ok(summary)
    }

    /// One scheduling step; returns the delay before the next one
    ///
    /// With a background trigger the idle delay is the cap, since the
    /// trigger does the waking.
    async fn tick(&self, backoff: &mut Backoff, triggered: bool) -> Duration {
        let idle = if triggered {
            backoff.cap()
        } else {
            backoff.idle()
        };

        if !self.inner.connectivity.is_online() {
            return idle;
        }
        match self.inner.queue.is_empty() {
            Ok(true) => return idle,
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(error = %err, "failed to read mutation queue");
                return backoff.on_failure();
            }
        }

        match self.replay().await {
            Ok(summary) if summary.skipped => idle,
            Ok(summary) if summary.is_clean() => {
                backoff.on_success();
                idle
            }
            Ok(_) | Err(_) => {
                let delay = backoff.on_failure();
                tracing::warn!(retries = backoff.retries(), delay_ms = delay.as_millis() as u64, "replay incomplete; backing off");
                delay
            }
        }
    }

    /// Spawn the replay loop
    ///
    /// Uses the background trigger when `prefer_background` is set and
    /// the platform offers one; otherwise polls, waking early on
    /// reconnect. A pass runs immediately on start.
    pub fn start(
        &self,
        background: &dyn BackgroundSync,
        prefer_background: bool,
        backoff: Backoff,
    ) -> SyncHandle {
        let trigger = if prefer_background {
            background.register(SYNC_TAG)
        } else {
            None
        };
        let wake = match trigger {
            Some(rx) => {
                tracing::info!("sync dispatcher using background trigger");
                Wake::Trigger(rx)
            }
            None => {
                tracing::info!(base_ms = backoff.base().as_millis() as u64, "sync dispatcher polling");
                Wake::Reconnect(self.inner.connectivity.subscribe())
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = self.clone();
        let task = tokio::spawn(async move {
            dispatcher.run(wake, backoff, shutdown_rx).await;
        });

        SyncHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(self, mut wake: Wake, mut backoff: Backoff, mut shutdown: watch::Receiver<bool>) {
        let triggered = matches!(wake, Wake::Trigger(_));
        let mut delay = Duration::ZERO;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
                _ = wake.wait() => {
                    tracing::debug!("sync woken early");
                }
            }
            if *shutdown.borrow() {
                break;
            }
            delay = self.tick(&mut backoff, triggered).await;
        }
        tracing::debug!("sync dispatcher stopped");
    }
}

enum Wake {
    Trigger(mpsc::Receiver<()>),
    Reconnect(watch::Receiver<bool>),
}

impl Wake {
    /// Resolves when an early pass is warranted; pends forever once the
    /// source is gone
    async fn wait(&mut self) {
        match self {
            Wake::Trigger(rx) => {
                if rx.recv().await.is_none() {
                    std::future::pending::<()>().await;
                }
            }
            Wake::Reconnect(rx) => loop {
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
                if *rx.borrow_and_update() {
                    return;
                }
            },
        }
    }
}

/// Handle on a running replay loop
///
/// Dropping the handle also stops the loop.
pub struct SyncHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Ask the loop to stop; an in-flight pass finishes first
    pub fn cancel(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Stop the loop and wait for it to exit
    pub async fn shutdown(self) {
        self.cancel();
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "sync loop ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, RemoteError};
    use crate::model::TaskPatch;
    use crate::storage::MemoryStore;
    use std::sync::Mutex;

    /// Fails every mutation whose target id is in `failing`
    #[derive(Default)]
    struct Recorder {
        failing: Mutex<HashSet<String>>,
        applied: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MutationHandler for Recorder {
        async fn apply(&self, mutation: &Mutation) -> Result<()> {
            let id = mutation.target_id().unwrap_or("new").to_string();
            if self.failing.lock().unwrap().contains(&id) {
                return Err(Error::Remote(RemoteError::Unavailable("down".to_string())));
            }
            self.applied.lock().unwrap().push(mutation.to_string());
            Ok(())
        }
    }

    fn touch(id: &str, title: &str) -> Mutation {
        Mutation::task_update(
            id,
            TaskPatch {
                title: Some(title.to_string()),
                ..TaskPatch::default()
            },
        )
    }

    fn dispatcher(handler: Arc<Recorder>, online: bool) -> SyncDispatcher {
        SyncDispatcher::new(
            MutationQueue::new(Arc::new(MemoryStore::new())),
            handler,
            Connectivity::new(online),
            EventBus::new(),
        )
    }

    #[test]
    fn backoff_schedule() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let delays: Vec<u64> = (0..6).map(|_| backoff.on_failure().as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 30, 30]);
        assert_eq!(backoff.retries(), 6);

        assert_eq!(backoff.on_success(), Duration::from_secs(1));
        assert_eq!(backoff.retries(), 0);
        assert_eq!(backoff.on_failure(), Duration::from_secs(2));
    }

    #[test]
    fn backoff_saturates_at_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        for _ in 0..100 {
            backoff.on_failure();
        }
        assert_eq!(backoff.on_failure(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn partial_progress_keeps_failures_queued() {
        let handler = Arc::new(Recorder::default());
        handler.failing.lock().unwrap().insert("t1".to_string());
        let dispatcher = dispatcher(Arc::clone(&handler), true);

        dispatcher.queue().enqueue(touch("t1", "a")).unwrap();
        dispatcher.queue().enqueue(touch("t2", "b")).unwrap();
        dispatcher.queue().enqueue(touch("t1", "c")).unwrap();

        let summary = dispatcher.replay().await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.deferred, 1);

        let left: Vec<String> = dispatcher
            .queue()
            .list()
            .unwrap()
            .into_iter()
            .map(|op| op.mutation.to_string())
            .collect();
        assert_eq!(left, vec!["task update t1", "task update t1"]);

        handler.failing.lock().unwrap().clear();
        let summary = dispatcher.replay().await.unwrap();
        assert_eq!(summary.succeeded, 2);
        assert!(dispatcher.queue().is_empty().unwrap());
        assert_eq!(
            handler.applied.lock().unwrap().as_slice(),
            ["task update t2", "task update t1", "task update t1"]
        );
    }

    #[tokio::test]
    async fn loop_drains_after_reconnect_and_stops_on_shutdown() {
        let handler = Arc::new(Recorder::default());
        let dispatcher = dispatcher(Arc::clone(&handler), false);
        dispatcher.queue().enqueue(touch("t1", "a")).unwrap();

        let handle = dispatcher.start(
            &crate::connectivity::NoBackgroundSync,
            true,
            Backoff::new(Duration::from_secs(60), Duration::from_secs(60)),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(dispatcher.queue().len().unwrap(), 1);

        dispatcher.inner.connectivity.set_online(true);
        for _ in 0..100 {
            if dispatcher.queue().is_empty().unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(dispatcher.queue().is_empty().unwrap());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn cancel_stops_pending_retries() {
        let handler = Arc::new(Recorder::default());
        handler.failing.lock().unwrap().insert("t1".to_string());
        let dispatcher = dispatcher(Arc::clone(&handler), true);
        dispatcher.queue().enqueue(touch("t1", "a")).unwrap();

        let handle = dispatcher.start(
            &crate::connectivity::NoBackgroundSync,
            false,
            Backoff::new(Duration::from_millis(5), Duration::from_millis(20)),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
        for _ in 0..100 {
            if handle.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(handle.is_finished());
        assert_eq!(dispatcher.queue().len().unwrap(), 1);
    }
}
