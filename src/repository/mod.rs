//! Entity repositories
//!
//! Application code writes through these, never through the remote store
//! directly. Every write follows the same path:
//!
//! 1. validate the payload (a failure aborts before anything is sent or
//!    queued)
//! 2. when online, apply it directly
//! 3. when offline, or when the direct write fails, queue it and report
//!    [`WriteOutcome::SavedOffline`]
//! 4. after a direct write, record a history entry
//! 5. signal dependent views to refetch
//!
//! Queued writes are replayed by the dispatcher through [`Writers`],
//! which calls the same write primitives as step 2.

mod category;
mod note;
mod task;

pub use category::{CategoryRepository, CategoryWrites};
pub use note::{NoteRepository, NoteWrites};
pub use task::{TaskQuery, TaskRepository, TaskWrites};

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::connectivity::Connectivity;
use crate::dispatcher::MutationHandler;
use crate::error::{Result, ValidationError};
use crate::events::{EventBus, EventKind};
use crate::history::HistoryLog;
use crate::queue::{CategoryMutation, Mutation, MutationQueue, NoteMutation, TaskMutation};
use crate::remote::RemoteStore;

/// Result of a repository write
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WriteOutcome<T> {
    /// Written to the remote store
    Applied { record: T },
    /// Queued for replay
    SavedOffline { operation_id: String },
}

impl<T> WriteOutcome<T> {
    pub fn applied(&self) -> Option<&T> {
        match self {
            WriteOutcome::Applied { record } => Some(record),
            WriteOutcome::SavedOffline { .. } => None,
        }
    }

    pub fn into_applied(self) -> Option<T> {
        match self {
            WriteOutcome::Applied { record } => Some(record),
            WriteOutcome::SavedOffline { .. } => None,
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, WriteOutcome::SavedOffline { .. })
    }

    pub fn operation_id(&self) -> Option<&str> {
        match self {
            WriteOutcome::SavedOffline { operation_id } => Some(operation_id),
            WriteOutcome::Applied { .. } => None,
        }
    }
}

/// Collaborators shared by every repository
#[derive(Clone)]
pub struct Backend {
    pub remote: Arc<dyn RemoteStore>,
    pub queue: MutationQueue,
    pub connectivity: Connectivity,
    pub events: EventBus,
    pub history: HistoryLog,
}

impl Backend {
    /// Apply `direct` when online, otherwise (or when it fails for a
    /// reason other than the request itself) queue `mutation`
    pub(crate) async fn write_or_enqueue<T, F, Fut>(
        &self,
        mutation: Mutation,
        direct: F,
    ) -> Result<WriteOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.connectivity.is_online() {
            match direct().await {
                Ok(record) => return Ok(WriteOutcome::Applied { record }),
                Err(err) if err.is_user_error() => return Err(err),
                Err(err) => {
                    tracing::warn!(mutation = %mutation, error = %err, "direct write failed; saving offline");
                }
            }
        } else {
            tracing::debug!(mutation = %mutation, "offline; saving to queue");
        }

        let kind = mutation.kind();
        let action = mutation.action();
        let operation_id = self.queue.enqueue(mutation)?;
        self.events.notify(
            EventKind::SavedOffline,
            serde_json::json!({
                "operation_id": operation_id,
                "type": kind,
                "action": action,
            }),
        );
        Ok(WriteOutcome::SavedOffline { operation_id })
    }
}

pub(crate) fn validate_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::new("id", "cannot be empty").into());
    }
    Ok(())
}

/// Replay target: maps each queued mutation onto its write primitive
#[derive(Clone)]
pub struct Writers {
    pub tasks: TaskWrites,
    pub notes: NoteWrites,
    pub categories: CategoryWrites,
}

fn warn_missing(mutation: &Mutation) {
    tracing::warn!(mutation = %mutation, "replayed update targets a missing record; dropping");
}

#[async_trait]
impl MutationHandler for Writers {
    async fn apply(&self, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::Task(TaskMutation::Create(new)) => {
                self.tasks.create(new.clone()).await?;
            }
            Mutation::Task(TaskMutation::Update(update)) => {
                if self.tasks.update(&update.id, &update.patch).await?.is_none() {
                    warn_missing(mutation);
                }
            }
            Mutation::Task(TaskMutation::Delete(target)) => {
                self.tasks.delete(&target.id).await?;
            }
            Mutation::Note(NoteMutation::Create(new)) => {
                self.notes.create(new.clone()).await?;
            }
            Mutation::Note(NoteMutation::Update(update)) => {
                if self.notes.update(&update.id, &update.patch).await?.is_none() {
                    warn_missing(mutation);
                }
            }
            Mutation::Note(NoteMutation::Delete(target)) => {
                self.notes.delete(&target.id).await?;
            }
            Mutation::Category(CategoryMutation::Create(new)) => {
                self.categories.create(new.clone()).await?;
            }
            Mutation::Category(CategoryMutation::Update(update)) => {
                if self
                    .categories
                    .update(&update.id, &update.patch)
                    .await?
                    .is_none()
                {
                    warn_missing(mutation);
                }
            }
            Mutation::Category(CategoryMutation::Delete(target)) => {
                self.categories.delete(&target.id).await?;
            }
        }
        Ok(())
    }
}
