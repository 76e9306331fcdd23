use std::sync::Arc;

use crate::error::{Error, Result};
use crate::events::EventKind;
use crate::history::{self, HistoryEntry};
use crate::mirror::{next_position, MirrorCoordinator, MirrorOutcome};
use crate::model::{EntityKind, MutationAction, NewTask, Task, TaskPatch};
use crate::queue::{Mutation, MutationQueue, TaskMutation};
use crate::remote::{Filter, Table, TypedTable};

use super::{validate_id, Backend, WriteOutcome};

/// Task write primitives shared by direct writes and queue replay
///
/// Mirror maintenance runs after every create and update, and the task
/// returned is the one stored after it. When it fails on an update the
/// error propagates, so the update is queued (or stays queued) and its
/// replay settles the mirror. A created task cannot be re-queued
/// without duplicating it, so a failure there queues an update
/// re-asserting the rule instead.
#[derive(Clone)]
pub struct TaskWrites {
    tasks: TypedTable<Task>,
    mirror: Arc<MirrorCoordinator>,
    queue: MutationQueue,
}

impl TaskWrites {
    pub fn new(tasks: TypedTable<Task>, mirror: Arc<MirrorCoordinator>, queue: MutationQueue) -> Self {
        Self {
            tasks,
            mirror,
            queue,
        }
    }

    pub async fn create(&self, mut new: NewTask) -> Result<Task> {
        if new.position.is_none() {
            new.position = Some(next_position(&self.tasks, &new.category_id, &new.column_id).await?);
        }
        let task = self.tasks.insert(&new).await?;
        match self.maintain_mirror(task.clone(), None).await {
            Ok(task) => Ok(task),
            Err(err) if err.is_user_error() => Err(err),
            Err(err) => {
                let patch = TaskPatch {
                    recurrence: Some(task.recurrence),
                    ..TaskPatch::default()
                };
                let operation_id = self.queue.enqueue(Mutation::task_update(&task.id, patch))?;
                tracing::warn!(task_id = %task.id, %operation_id, error = %err, "mirror maintenance failed; queued a retry");
                Ok(task)
            }
        }
    }

    /// `None` when no such task exists
    pub async fn update(&self, id: &str, patch: &TaskPatch) -> Result<Option<Task>> {
        let Some(task) = self.tasks.update(id, patch).await? else {
            return Ok(None);
        };
        Ok(Some(self.maintain_mirror(task, Some(patch)).await?))
    }

    /// Detach any mirror link, then delete. Deleting a missing task
    /// succeeds with `None`.
    pub async fn delete(&self, id: &str) -> Result<Option<Task>> {
        let Some(task) = self.tasks.get(id).await? else {
            self.tasks.delete(id).await?;
            return Ok(None);
        };
        self.mirror.detach(&task).await?;
        self.tasks.delete(id).await?;
        Ok(Some(task))
    }

    async fn maintain_mirror(&self, task: Task, patch: Option<&TaskPatch>) -> Result<Task> {
        let task_id = task.id.clone();
        let (task, outcome) = self.mirror.after_save(task, patch).await?;
        if outcome != MirrorOutcome::Unchanged {
            tracing::debug!(task_id = %task_id, ?outcome, "mirror maintained");
        }
        Ok(task)
    }
}

/// Placement filter for listing tasks
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub category_id: Option<String>,
    pub column_id: Option<String>,
    pub completed: Option<bool>,
}

impl TaskQuery {
    fn filter(&self) -> Filter {
        let mut filter = Filter::all();
        if let Some(category_id) = &self.category_id {
            filter = filter.eq("category_id", category_id.as_str());
        }
        if let Some(column_id) = &self.column_id {
            filter = filter.eq("column_id", column_id.as_str());
        }
        if let Some(completed) = self.completed {
            filter = filter.eq("is_completed", completed);
        }
        filter
    }
}

/// The only entry point application code uses to write tasks
#[derive(Clone)]
pub struct TaskRepository {
    backend: Backend,
    tasks: TypedTable<Task>,
    writes: TaskWrites,
    mirror: Arc<MirrorCoordinator>,
}

impl TaskRepository {
    pub fn new(backend: Backend, writes: TaskWrites, mirror: Arc<MirrorCoordinator>) -> Self {
        Self {
            tasks: TypedTable::new(Arc::clone(&backend.remote), Table::Tasks),
            backend,
            writes,
            mirror,
        }
    }

    pub async fn create(&self, new: NewTask) -> Result<WriteOutcome<Task>> {
        new.validate()?;

        let mutation = Mutation::Task(TaskMutation::Create(new.clone()));
        let outcome = self
            .backend
            .write_or_enqueue(mutation, || self.writes.create(new))
            .await?;

        if let Some(task) = outcome.applied() {
            self.backend
                .history
                .record(HistoryEntry::new(
                    EntityKind::Task,
                    &task.id,
                    MutationAction::Create,
                    history::summarize_create(&task.title),
                ))
                .await;
            self.backend.events.notify(EventKind::TaskCreated, task);
        }
        self.backend.events.refetch(Table::Tasks);
        Ok(outcome)
    }

    pub async fn update(&self, id: &str, patch: TaskPatch) -> Result<WriteOutcome<Task>> {
        validate_id(id)?;
        patch.validate()?;

        let mutation = Mutation::task_update(id, patch.clone());
        let outcome = self
            .backend
            .write_or_enqueue(mutation, || async {
                self.writes
                    .update(id, &patch)
                    .await?
                    .ok_or_else(|| Error::not_found("task", id))
            })
            .await?;

        if let Some(task) = outcome.applied() {
            self.backend
                .history
                .record(HistoryEntry::new(
                    EntityKind::Task,
                    &task.id,
                    MutationAction::Update,
                    history::summarize_update(&patch.changed_fields()),
                ))
                .await;
            self.backend.events.notify(EventKind::TaskUpdated, task);
        }
        self.backend.events.refetch(Table::Tasks);
        Ok(outcome)
    }

    /// Delete a task; the history entry carries the deleted title
    pub async fn delete(&self, id: &str) -> Result<WriteOutcome<Task>> {
        validate_id(id)?;

        let outcome = self
            .backend
            .write_or_enqueue(Mutation::task_delete(id), || async {
                let task = self
                    .tasks
                    .get(id)
                    .await?
                    .ok_or_else(|| Error::not_found("task", id))?;
                self.writes.delete(id).await?;
                Ok(task)
            })
            .await?;

        if let Some(task) = outcome.applied() {
            self.backend
                .history
                .record(HistoryEntry::new(
                    EntityKind::Task,
                    &task.id,
                    MutationAction::Delete,
                    history::summarize_delete(&task.title),
                ))
                .await;
            self.backend
                .events
                .notify(EventKind::TaskDeleted, serde_json::json!({ "id": task.id }));
        }
        self.backend.events.refetch(Table::Tasks);
        Ok(outcome)
    }

    /// Check a task off (or back on), showing the change optimistically
    pub async fn set_completed(&self, id: &str, completed: bool) -> Result<WriteOutcome<Task>> {
        self.mirror.shadow().set(id, completed);
        let patch = TaskPatch {
            is_completed: Some(completed),
            ..TaskPatch::default()
        };
        self.update(id, patch).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Task>> {
        self.tasks.get(id).await
    }

    /// Tasks ordered by category, column, then position
    pub async fn list(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        let mut tasks = self.tasks.select(&query.filter()).await?;
        tasks.sort_by(|a, b| {
            (&a.category_id, &a.column_id, a.position).cmp(&(&b.category_id, &b.column_id, b.position))
        });
        Ok(tasks)
    }
}
