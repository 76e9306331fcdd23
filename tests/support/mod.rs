#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use boardsync::config::Config;
use boardsync::connectivity::Connectivity;
use boardsync::error::RemoteError;
use boardsync::model::{Frequency, NewTask, RecurrenceRule, Task};
use boardsync::remote::{Filter, RemoteStore, Table, TableStore};
use boardsync::storage::{KeyValueStore, MemoryStore};
use boardsync::Board;
use serde_json::Value;

/// Remote store that can be switched into failing every write, or
/// made to fail one chosen write
pub struct FlakyRemote {
    inner: TableStore,
    failing: AtomicBool,
    writes: AtomicUsize,
    fail_in: AtomicUsize,
}

impl FlakyRemote {
    pub fn new() -> Self {
        Self {
            inner: TableStore::in_memory(),
            failing: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
            fail_in: AtomicUsize::new(0),
        }
    }

    /// Fail only the `nth` write from now on (1 is the next one)
    pub fn fail_write(&self, nth: usize) {
        self.fail_in.store(nth, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Writes that reached the store
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), RemoteError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("injected failure".to_string()));
        }
        let countdown = self.fail_in.load(Ordering::SeqCst);
        if countdown > 0 {
            self.fail_in.store(countdown - 1, Ordering::SeqCst);
            if countdown == 1 {
                return Err(RemoteError::Unavailable("injected failure".to_string()));
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FlakyRemote {
    async fn insert(&self, table: Table, record: Value) -> Result<Value, RemoteError> {
        self.check()?;
        self.inner.insert(table, record).await
    }

    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<Option<Value>, RemoteError> {
        self.check()?;
        self.inner.update(table, id, patch).await
    }

    async fn delete(&self, table: Table, id: &str) -> Result<(), RemoteError> {
        self.check()?;
        self.inner.delete(table, id).await
    }

    async fn select(&self, table: Table, filter: &Filter) -> Result<Vec<Value>, RemoteError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("injected failure".to_string()));
        }
        self.inner.select(table, filter).await
    }
}

pub struct TestBoard {
    pub board: Board,
    pub remote: Arc<FlakyRemote>,
    pub local: Arc<dyn KeyValueStore>,
}

impl TestBoard {
    pub fn new(online: bool) -> Self {
        Self::with_local(online, Arc::new(MemoryStore::new()))
    }

    pub fn with_local(online: bool, local: Arc<dyn KeyValueStore>) -> Self {
        let remote = Arc::new(FlakyRemote::new());
        let board = Board::assemble(
            Config::default(),
            Arc::clone(&remote) as Arc<dyn RemoteStore>,
            Arc::clone(&local),
            Connectivity::new(online),
        );
        Self {
            board,
            remote,
            local,
        }
    }

    /// Reopen over the same remote and local stores, as after a restart
    pub fn restart(&self, online: bool) -> Board {
        Board::assemble(
            Config::default(),
            Arc::clone(&self.remote) as Arc<dyn RemoteStore>,
            Arc::clone(&self.local),
            Connectivity::new(online),
        )
    }

    pub async fn all_tasks(&self) -> Vec<Task> {
        self.board
            .tasks()
            .list(&Default::default())
            .await
            .expect("list tasks")
    }

    pub async fn task(&self, id: &str) -> Task {
        self.board
            .tasks()
            .get(id)
            .await
            .expect("get task")
            .unwrap_or_else(|| panic!("task {id} missing"))
    }

    /// Create a task through the repository and return the stored record
    pub async fn create(&self, new: NewTask) -> Task {
        self.board
            .tasks()
            .create(new)
            .await
            .expect("create task")
            .into_applied()
            .expect("task applied directly")
    }
}

impl TestBoard {
    pub async fn mirror_pairs(&self) -> Vec<Value> {
        self.remote
            .select(Table::MirrorPairs, &Filter::all())
            .await
            .expect("select mirror pairs")
    }
}

pub fn daily_rule() -> RecurrenceRule {
    RecurrenceRule::new(Frequency::Daily, 1)
}

pub fn init_board_dir(path: &Path) {
    boardsync::storage::Layout::new(path)
        .init()
        .expect("init layout");
}
