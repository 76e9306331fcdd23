//! Wiring of a board's services
//!
//! A [`Board`] owns one of each collaborator and hands out the
//! repositories, the mirror coordinator and the sync dispatcher built on
//! them. [`Board::open`] backs everything with files under a root
//! directory; [`Board::assemble`] takes any remote store and local
//! store, which is what tests use.

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::connectivity::{BackgroundSync, Connectivity};
use crate::dispatcher::{Backoff, SyncDispatcher, SyncHandle};
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::history::HistoryLog;
use crate::mirror::MirrorCoordinator;
use crate::queue::MutationQueue;
use crate::remote::{RemoteStore, Table, TableStore, TypedTable};
use crate::repository::{
    Backend, CategoryRepository, CategoryWrites, NoteRepository, NoteWrites, TaskRepository,
    TaskWrites, Writers,
};
use crate::storage::{FileStore, KeyValueStore, Layout};

#[derive(Clone)]
pub struct Board {
    config: Config,
    backend: Backend,
    mirror: Arc<MirrorCoordinator>,
    tasks: TaskRepository,
    notes: NoteRepository,
    categories: CategoryRepository,
    dispatcher: SyncDispatcher,
}

impl Board {
    pub fn assemble(
        config: Config,
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn KeyValueStore>,
        connectivity: Connectivity,
    ) -> Self {
        let events = EventBus::new();
        let queue = MutationQueue::with_key(local, config.queue.key.clone());
        let history = HistoryLog::new(Arc::clone(&remote), config.history.enabled);
        let mirror = Arc::new(MirrorCoordinator::new(
            Arc::clone(&remote),
            config.board.clone(),
            events.clone(),
        ));

        let writers = Writers {
            tasks: TaskWrites::new(
                TypedTable::new(Arc::clone(&remote), Table::Tasks),
                Arc::clone(&mirror),
                queue.clone(),
            ),
            notes: NoteWrites::new(TypedTable::new(Arc::clone(&remote), Table::Notes)),
            categories: CategoryWrites::new(TypedTable::new(
                Arc::clone(&remote),
                Table::Categories,
            )),
        };

        let backend = Backend {
            remote,
            queue: queue.clone(),
            connectivity: connectivity.clone(),
            events: events.clone(),
            history,
        };

        let tasks = TaskRepository::new(
            backend.clone(),
            writers.tasks.clone(),
            Arc::clone(&mirror),
        );
        let notes = NoteRepository::new(backend.clone(), writers.notes.clone());
        let categories = CategoryRepository::new(backend.clone(), writers.categories.clone());
        let dispatcher = SyncDispatcher::new(queue, Arc::new(writers), connectivity, events);

        Self {
            config,
            backend,
            mirror,
            tasks,
            notes,
            categories,
            dispatcher,
        }
    }

    /// Open the file-backed board under `root`
    ///
    /// Fails when the board was never initialized.
    pub fn open(root: &Path, connectivity: Connectivity) -> Result<Self> {
        let layout = Layout::new(root);
        if !layout.is_initialized() {
            return Err(Error::OperationFailed(format!(
                "no board at {}; run 'boardsync init' first",
                root.display()
            )));
        }
        let config = Config::load_from_root(root)?;
        let local: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(layout.local_dir()));
        let remote: Arc<dyn RemoteStore> =
            Arc::new(TableStore::new(Arc::new(FileStore::new(layout.remote_dir()))));
        tracing::debug!(root = %root.display(), "opened board");
        Ok(Self::assemble(config, remote, local, connectivity))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tasks(&self) -> &TaskRepository {
        &self.tasks
    }

    pub fn notes(&self) -> &NoteRepository {
        &self.notes
    }

    pub fn categories(&self) -> &CategoryRepository {
        &self.categories
    }

    pub fn mirror(&self) -> &MirrorCoordinator {
        &self.mirror
    }

    pub fn dispatcher(&self) -> &SyncDispatcher {
        &self.dispatcher
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.backend.queue
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.backend.connectivity
    }

    pub fn events(&self) -> &EventBus {
        &self.backend.events
    }

    pub fn history(&self) -> &HistoryLog {
        &self.backend.history
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.backend.remote
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::from(&self.config.sync)
    }

    /// Spawn the replay loop with the configured backoff and trigger
    /// preference
    pub fn start_sync(&self, background: &dyn BackgroundSync) -> SyncHandle {
        self.dispatcher
            .start(background, self.config.sync.prefer_background, self.backoff())
    }
}
