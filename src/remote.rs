//! Remote table store
//!
//! The backing store is a black box offering insert/update/delete/select
//! per table plus a change feed. Records are JSON objects keyed by a
//! string `id` that the store assigns on insert, so inserting the same
//! payload twice yields two records.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{Error, RemoteError, Result};
use crate::model::EntityKind;
use crate::storage::{update_record, read_record, KeyValueStore, MemoryStore};

const CHANGE_FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Tasks,
    Notes,
    Categories,
    History,
    MirrorPairs,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Tasks,
        Table::Notes,
        Table::Categories,
        Table::History,
        Table::MirrorPairs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Tasks => "tasks",
            Table::Notes => "notes",
            Table::Categories => "categories",
            Table::History => "history",
            Table::MirrorPairs => "mirror_pairs",
        }
    }

    pub fn for_entity(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Task => Table::Tasks,
            EntityKind::Note => Table::Notes,
            EntityKind::Category => Table::Categories,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conjunction of field equality conditions
///
/// A missing field compares equal to `null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    /// Matches every record
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    pub fn matches(&self, record: &Value) -> bool {
        self.conditions.iter().all(|(field, expected)| {
            record.get(field).unwrap_or(&Value::Null) == expected
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Notification published after a successful write
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Change {
    pub table: Table,
    pub kind: ChangeKind,
    pub id: String,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert a record and return it with its assigned `id`
    async fn insert(&self, table: Table, record: Value) -> std::result::Result<Value, RemoteError>;

    /// Merge `patch` into the record. `None` when no such record exists.
    async fn update(
        &self,
        table: Table,
        id: &str,
        patch: Value,
    ) -> std::result::Result<Option<Value>, RemoteError>;

    /// Delete a record. Deleting a missing record succeeds.
    async fn delete(&self, table: Table, id: &str) -> std::result::Result<(), RemoteError>;

    async fn select(
        &self,
        table: Table,
        filter: &Filter,
    ) -> std::result::Result<Vec<Value>, RemoteError>;

    /// Change feed, when the store offers one
    fn changes(&self) -> Option<broadcast::Receiver<Change>> {
        None
    }
}

fn as_object(table: Table, value: Value) -> std::result::Result<Map<String, Value>, RemoteError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(RemoteError::Rejected {
            code: "invalid_record".to_string(),
            message: format!("{table} records must be objects, got {other}"),
        }),
    }
}

fn record_id(record: &Value) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

fn local_failure(err: Error) -> RemoteError {
    RemoteError::Unavailable(err.to_string())
}

/// Table store over a [`KeyValueStore`], one JSON array per table
///
/// Backs the CLI (over a `FileStore`) and tests (over a `MemoryStore`).
/// Store access runs on tokio's blocking pool, since a `FileStore` waits
/// on file locks.
pub struct TableStore {
    store: Arc<dyn KeyValueStore>,
    changes: broadcast::Sender<Change>,
}

impl fmt::Debug for TableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableStore").finish_non_exhaustive()
    }
}

impl TableStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { store, changes }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    fn publish(&self, table: Table, kind: ChangeKind, id: &str) {
        // No subscribers is fine.
        let _ = self.changes.send(Change {
            table,
            kind,
            id: id.to_string(),
        });
    }

    /// Mutate one table's rows off the async workers
    async fn with_rows<R, F>(&self, table: Table, f: F) -> std::result::Result<R, RemoteError>
    where
        F: FnOnce(&mut Vec<Value>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || update_record(store.as_ref(), table.as_str(), f))
            .await
            .map_err(|err| RemoteError::Unavailable(format!("{table} store task failed: {err}")))?
            .map_err(local_failure)
    }

    async fn rows(&self, table: Table) -> std::result::Result<Vec<Value>, RemoteError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || read_record::<Vec<Value>>(store.as_ref(), table.as_str()))
            .await
            .map_err(|err| RemoteError::Unavailable(format!("{table} store task failed: {err}")))?
            .map_err(local_failure)
    }
}

#[async_trait]
impl RemoteStore for TableStore {
    async fn insert(&self, table: Table, record: Value) -> std::result::Result<Value, RemoteError> {
        let mut record = as_object(table, record)?;
        let id = match record.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        record.insert("id".to_string(), Value::String(id.clone()));
        let record = Value::Object(record);

        let inserted = record.clone();
        let row_id = id.clone();
        let conflict = self
            .with_rows(table, move |rows| {
                if rows.iter().any(|row| record_id(row) == Some(row_id.as_str())) {
                    return Ok(true);
                }
                rows.push(inserted);
                Ok(false)
            })
            .await?;

        if conflict {
            return Err(RemoteError::Conflict {
                table: table.to_string(),
                id,
            });
        }

        self.publish(table, ChangeKind::Insert, &id);
        Ok(record)
    }

    async fn update(
        &self,
        table: Table,
        id: &str,
        patch: Value,
    ) -> std::result::Result<Option<Value>, RemoteError> {
        let patch = as_object(table, patch)?;
        let row_id = id.to_string();
        let updated = self
            .with_rows(table, move |rows| {
                let Some(Value::Object(row)) =
                    rows.iter_mut().find(|row| record_id(row) == Some(row_id.as_str()))
                else {
                    return Ok(None);
                };
                for (field, value) in patch {
                    if field != "id" {
                        row.insert(field, value);
                    }
                }
                Ok(Some(Value::Object(row.clone())))
            })
            .await?;

        if updated.is_some() {
            self.publish(table, ChangeKind::Update, id);
        }
        Ok(updated)
    }

    async fn delete(&self, table: Table, id: &str) -> std::result::Result<(), RemoteError> {
        let row_id = id.to_string();
        let removed = self
            .with_rows(table, move |rows| {
                let before = rows.len();
                rows.retain(|row| record_id(row) != Some(row_id.as_str()));
                Ok(rows.len() != before)
            })
            .await?;

        if removed {
            self.publish(table, ChangeKind::Delete, id);
        }
        Ok(())
    }

    async fn select(
        &self,
        table: Table,
        filter: &Filter,
    ) -> std::result::Result<Vec<Value>, RemoteError> {
        let rows = self.rows(table).await?;
        Ok(rows.into_iter().filter(|row| filter.matches(row)).collect())
    }

    fn changes(&self) -> Option<broadcast::Receiver<Change>> {
        Some(self.changes.subscribe())
    }
}

/// Typed view of one table
pub struct TypedTable<T> {
    remote: Arc<dyn RemoteStore>,
    table: Table,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedTable<T> {
    fn clone(&self) -> Self {
        Self {
            remote: Arc::clone(&self.remote),
            table: self.table,
            _record: PhantomData,
        }
    }
}

impl<T> TypedTable<T>
where
    T: DeserializeOwned + Send,
{
    pub fn new(remote: Arc<dyn RemoteStore>, table: Table) -> Self {
        Self {
            remote,
            table,
            _record: PhantomData,
        }
    }

    pub fn table(&self) -> Table {
        self.table
    }

    pub async fn insert<N>(&self, record: &N) -> Result<T>
    where
        N: Serialize + Sync,
    {
        let value = serde_json::to_value(record)?;
        let stored = self.remote.insert(self.table, value).await?;
        Ok(serde_json::from_value(stored)?)
    }

    pub async fn update<P>(&self, id: &str, patch: &P) -> Result<Option<T>>
    where
        P: Serialize + Sync,
    {
        let value = serde_json::to_value(patch)?;
        match self.remote.update(self.table, id, value).await? {
            Some(stored) => Ok(Some(serde_json::from_value(stored)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        Ok(self.remote.delete(self.table, id).await?)
    }

    pub async fn select(&self, filter: &Filter) -> Result<Vec<T>> {
        self.remote
            .select(self.table, filter)
            .await?
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(Error::from))
            .collect()
    }

    pub async fn get(&self, id: &str) -> Result<Option<T>> {
        Ok(self
            .select(&Filter::all().eq("id", id))
            .await?
            .into_iter()
            .next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_assigns_distinct_ids() {
        let store = TableStore::in_memory();
        let a = store.insert(Table::Tasks, json!({"title": "x"})).await.unwrap();
        let b = store.insert(Table::Tasks, json!({"title": "x"})).await.unwrap();

        assert_ne!(a["id"], b["id"]);
        let rows = store.select(Table::Tasks, &Filter::all()).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn insert_with_taken_id_conflicts() {
        let store = TableStore::in_memory();
        store.insert(Table::MirrorPairs, json!({"id": "p1"})).await.unwrap();
        let err = store
            .insert(Table::MirrorPairs, json!({"id": "p1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Conflict { .. }));
    }

    #[tokio::test]
    async fn update_merges_and_null_clears() {
        let store = TableStore::in_memory();
        let row = store
            .insert(Table::Tasks, json!({"title": "x", "mirror_id": "m"}))
            .await
            .unwrap();
        let id = row["id"].as_str().unwrap();

        let updated = store
            .update(Table::Tasks, id, json!({"mirror_id": null, "id": "hijack"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["title"], "x");
        assert_eq!(updated["mirror_id"], Value::Null);
        assert_eq!(updated["id"], id);
    }

    #[tokio::test]
    async fn update_and_delete_of_missing_record() {
        let store = TableStore::in_memory();
        assert_eq!(
            store.update(Table::Tasks, "nope", json!({"title": "y"})).await.unwrap(),
            None
        );
        store.delete(Table::Tasks, "nope").await.unwrap();
    }

    #[tokio::test]
    async fn filter_treats_missing_as_null() {
        let store = TableStore::in_memory();
        store.insert(Table::Tasks, json!({"title": "a"})).await.unwrap();
        store
            .insert(Table::Tasks, json!({"title": "b", "mirror_id": "t9"}))
            .await
            .unwrap();

        let unlinked = store
            .select(Table::Tasks, &Filter::all().eq("mirror_id", Value::Null))
            .await
            .unwrap();
        assert_eq!(unlinked.len(), 1);
        assert_eq!(unlinked[0]["title"], "a");

        let linked = store
            .select(Table::Tasks, &Filter::all().eq("mirror_id", "t9"))
            .await
            .unwrap();
        assert_eq!(linked[0]["title"], "b");
    }

    #[tokio::test]
    async fn change_feed_reports_writes() {
        let store = TableStore::in_memory();
        let mut feed = store.changes().unwrap();

        let row = store.insert(Table::Notes, json!({"title": "n"})).await.unwrap();
        let id = row["id"].as_str().unwrap().to_string();
        store.delete(Table::Notes, &id).await.unwrap();

        assert_eq!(feed.recv().await.unwrap().kind, ChangeKind::Insert);
        let deleted = feed.recv().await.unwrap();
        assert_eq!(deleted.kind, ChangeKind::Delete);
        assert_eq!(deleted.id, id);
    }

    #[tokio::test]
    async fn lock_wait_does_not_stall_the_runtime() {
        use crate::lock::{lock_path_for, FileLock};
        use crate::storage::FileStore;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TableStore::new(Arc::new(FileStore::new(dir.path()))));
        let held = FileLock::acquire(lock_path_for(&dir.path().join("tasks.json")), 1000).unwrap();

        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.insert(Table::Tasks, json!({"title": "x"})).await })
        };
        // Single-threaded runtime: the timer only fires if the insert
        // is waiting elsewhere.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!writer.is_finished());

        drop(held);
        writer.await.unwrap().unwrap();
        let rows = store.select(Table::Tasks, &Filter::all()).await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
