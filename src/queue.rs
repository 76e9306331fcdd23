//! Durable FIFO of writes that could not reach the remote store
//!
//! The whole queue is a single JSON array under one key. Every call is a
//! locked read-modify-write of that record through
//! [`KeyValueStore::update`], so two processes sharing a store cannot
//! drop each other's entries. No compaction: two offline edits of the
//! same task stay two entries and replay in order.
//!
//! On the wire each entry is
//!
//! ```json
//! {"id": "01J...", "type": "task", "action": "update",
//!  "data": {"id": "t1", "title": "..."}, "timestamp": 1704067200000}
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::Result;
use crate::model::{
    CategoryPatch, EntityKind, MutationAction, NewCategory, NewNote, NewTask, NotePatch,
    TaskPatch,
};
use crate::storage::{read_record, update_record, KeyValueStore};

/// Key of the queue record when none is configured
pub const DEFAULT_QUEUE_KEY: &str = "offline_mutation_queue";

/// `data` of a delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub id: String,
    #[serde(flatten)]
    pub patch: TaskPatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteUpdate {
    pub id: String,
    #[serde(flatten)]
    pub patch: NotePatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryUpdate {
    pub id: String,
    #[serde(flatten)]
    pub patch: CategoryPatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "lowercase")]
pub enum TaskMutation {
    Create(NewTask),
    Update(TaskUpdate),
    Delete(EntityRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "lowercase")]
pub enum NoteMutation {
    Create(NewNote),
    Update(NoteUpdate),
    Delete(EntityRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "lowercase")]
pub enum CategoryMutation {
    Create(NewCategory),
    Update(CategoryUpdate),
    Delete(EntityRef),
}

/// A write against one entity table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Mutation {
    Task(TaskMutation),
    Note(NoteMutation),
    Category(CategoryMutation),
}

impl Mutation {
    pub fn task_update(id: impl Into<String>, patch: TaskPatch) -> Self {
        Mutation::Task(TaskMutation::Update(TaskUpdate {
            id: id.into(),
            patch,
        }))
    }

    pub fn task_delete(id: impl Into<String>) -> Self {
        Mutation::Task(TaskMutation::Delete(EntityRef { id: id.into() }))
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Mutation::Task(_) => EntityKind::Task,
            Mutation::Note(_) => EntityKind::Note,
            Mutation::Category(_) => EntityKind::Category,
        }
    }

    pub fn action(&self) -> MutationAction {
        match self {
            Mutation::Task(TaskMutation::Create(_))
            | Mutation::Note(NoteMutation::Create(_))
            | Mutation::Category(CategoryMutation::Create(_)) => MutationAction::Create,
            Mutation::Task(TaskMutation::Update(_))
            | Mutation::Note(NoteMutation::Update(_))
            | Mutation::Category(CategoryMutation::Update(_)) => MutationAction::Update,
            Mutation::Task(TaskMutation::Delete(_))
            | Mutation::Note(NoteMutation::Delete(_))
            | Mutation::Category(CategoryMutation::Delete(_)) => MutationAction::Delete,
        }
    }

    /// Identity of the targeted record; creates have none yet
    pub fn target_id(&self) -> Option<&str> {
        match self {
            Mutation::Task(TaskMutation::Update(update)) => Some(&update.id),
            Mutation::Note(NoteMutation::Update(update)) => Some(&update.id),
            Mutation::Category(CategoryMutation::Update(update)) => Some(&update.id),
            Mutation::Task(TaskMutation::Delete(target))
            | Mutation::Note(NoteMutation::Delete(target))
            | Mutation::Category(CategoryMutation::Delete(target)) => Some(&target.id),
            _ => None,
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.action())?;
        if let Some(id) = self.target_id() {
            write!(f, " {id}")?;
        }
        Ok(())
    }
}

/// A not-yet-applied mutation as persisted in the queue record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: String,
    #[serde(flatten)]
    pub mutation: Mutation,
    /// Enqueue time, epoch milliseconds
    pub timestamp: i64,
}

/// Handle on one durable queue record
///
/// Calls are synchronous. Over a [`FileStore`](crate::storage::FileStore)
/// each one holds the queue's file lock for a single read-modify-write of
/// a small record, so async callers invoke it inline.
#[derive(Clone)]
pub struct MutationQueue {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl fmt::Debug for MutationQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationQueue")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl MutationQueue {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(store, DEFAULT_QUEUE_KEY)
    }

    pub fn with_key(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append a mutation and return its operation id
    pub fn enqueue(&self, mutation: Mutation) -> Result<String> {
        let op = QueuedOperation {
            id: Ulid::new().to_string(),
            mutation,
            timestamp: Utc::now().timestamp_millis(),
        };
        let id = op.id.clone();

        let depth = update_record(self.store.as_ref(), &self.key, |ops: &mut Vec<QueuedOperation>| {
            ops.push(op);
            Ok(ops.len())
        })?;

        tracing::debug!(op_id = %id, depth, "queued mutation");
        Ok(id)
    }

    /// Pending operations in enqueue order
    pub fn list(&self) -> Result<Vec<QueuedOperation>> {
        read_record(self.store.as_ref(), &self.key)
    }

    /// Drop one operation; returns whether it was present
    pub fn remove(&self, id: &str) -> Result<bool> {
        update_record(self.store.as_ref(), &self.key, |ops: &mut Vec<QueuedOperation>| {
            let before = ops.len();
            ops.retain(|op| op.id != id);
            Ok(ops.len() != before)
        })
    }

    /// Drop every pending operation; returns how many were dropped
    pub fn clear(&self) -> Result<usize> {
        update_record(self.store.as_ref(), &self.key, |ops: &mut Vec<QueuedOperation>| {
            let dropped = ops.len();
            ops.clear();
            Ok(dropped)
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.list()?.is_empty())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn queue() -> MutationQueue {
        MutationQueue::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn wire_format_matches_queue_record() {
        let op = QueuedOperation {
            id: "op1".to_string(),
            mutation: Mutation::task_update(
                "t1",
                TaskPatch {
                    title: Some("Renamed".to_string()),
                    due_date: Some(None),
                    ..TaskPatch::default()
                },
            ),
            timestamp: 1_704_067_200_000,
        };

        let encoded = serde_json::to_value(&op).unwrap();
        assert_eq!(
            encoded,
            json!({
                "id": "op1",
                "type": "task",
                "action": "update",
                "data": {"id": "t1", "title": "Renamed", "due_date": null},
                "timestamp": 1_704_067_200_000_i64,
            })
        );

        let decoded: QueuedOperation = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, op);
    }

    #[test]
    fn decodes_create_and_delete_records() {
        let ops: Vec<QueuedOperation> = serde_json::from_value(json!([
            {"id": "a", "type": "note", "action": "create",
             "data": {"title": "Groceries"}, "timestamp": 1},
            {"id": "b", "type": "category", "action": "delete",
             "data": {"id": "c9"}, "timestamp": 2},
        ]))
        .unwrap();

        assert_eq!(ops[0].mutation.kind(), EntityKind::Note);
        assert_eq!(ops[0].mutation.action(), MutationAction::Create);
        assert_eq!(ops[0].mutation.target_id(), None);
        assert_eq!(ops[1].mutation.to_string(), "category delete c9");
    }

    #[test]
    fn unknown_entity_type_is_rejected() {
        let result: serde_json::Result<QueuedOperation> = serde_json::from_value(json!({
            "id": "a", "type": "board", "action": "create", "data": {}, "timestamp": 1
        }));
        assert!(result.is_err());
    }

    #[test]
    fn fifo_without_compaction() {
        let queue = queue();
        let first = queue
            .enqueue(Mutation::task_update(
                "t1",
                TaskPatch {
                    title: Some("a".to_string()),
                    ..TaskPatch::default()
                },
            ))
            .unwrap();
        let second = queue
            .enqueue(Mutation::task_update(
                "t1",
                TaskPatch {
                    title: Some("b".to_string()),
                    ..TaskPatch::default()
                },
            ))
            .unwrap();

        let ops = queue.list().unwrap();
        assert_eq!(
            ops.iter().map(|op| op.id.as_str()).collect::<Vec<_>>(),
            vec![first.as_str(), second.as_str()]
        );
        assert_ne!(first, second);
    }

    #[test]
    fn remove_and_clear() {
        let queue = queue();
        assert!(queue.is_empty().unwrap());

        let id = queue.enqueue(Mutation::task_delete("t1")).unwrap();
        queue.enqueue(Mutation::task_delete("t2")).unwrap();
        assert_eq!(queue.len().unwrap(), 2);

        assert!(queue.remove(&id).unwrap());
        assert!(!queue.remove(&id).unwrap());
        assert_eq!(queue.len().unwrap(), 1);

        assert_eq!(queue.clear().unwrap(), 1);
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn independent_queues_share_nothing() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let tab_a = MutationQueue::with_key(Arc::clone(&store), "tab_a");
        let tab_b = MutationQueue::with_key(store, "tab_b");

        tab_a.enqueue(Mutation::task_delete("t1")).unwrap();
        assert_eq!(tab_a.len().unwrap(), 1);
        assert!(tab_b.is_empty().unwrap());
    }
}
