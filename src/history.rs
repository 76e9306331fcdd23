//! Audit trail of direct writes
//!
//! Entries live in the remote `history` table. Recording is advisory: a
//! failed history insert is logged and never fails the write it
//! describes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::Result;
use crate::model::{EntityKind, MutationAction};
use crate::remote::{Filter, RemoteStore, Table, TypedTable};

/// History record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub entity: EntityKind,
    pub entity_id: String,
    pub action: MutationAction,
    pub summary: String,
}

impl HistoryEntry {
    pub fn new(
        entity: EntityKind,
        entity_id: impl Into<String>,
        action: MutationAction,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: Ulid::new().to_string(),
            timestamp: Utc::now(),
            entity,
            entity_id: entity_id.into(),
            action,
            summary: summary.into(),
        }
    }
}

/// Filter for selecting history entries
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub entity: Option<EntityKind>,
    pub entity_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl HistoryFilter {
    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        if let Some(entity) = self.entity {
            if entry.entity != entity {
                return false;
            }
        }

        if let Some(entity_id) = &self.entity_id {
            if &entry.entity_id != entity_id {
                return false;
            }
        }

        if let Some(since) = &self.since {
            if &entry.timestamp < since {
                return false;
            }
        }

        true
    }
}

/// History writer and reader
#[derive(Clone)]
pub struct HistoryLog {
    table: TypedTable<HistoryEntry>,
    enabled: bool,
}

impl HistoryLog {
    pub fn new(remote: Arc<dyn RemoteStore>, enabled: bool) -> Self {
        Self {
            table: TypedTable::new(remote, Table::History),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Insert an entry; failures are logged, not returned
    pub async fn record(&self, entry: HistoryEntry) {
        if !self.enabled {
            return;
        }
        if let Err(err) = self.table.insert(&entry).await {
            tracing::warn!(
                entity = %entry.entity,
                entity_id = %entry.entity_id,
                action = %entry.action,
                error = %err,
                "failed to record history entry"
            );
        }
    }

    /// Entries matching `filter`, newest first
    pub async fn recent(
        &self,
        filter: &HistoryFilter,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryEntry>> {
        let mut entries = self.table.select(&Filter::all()).await?;
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));

        let mut filtered: Vec<HistoryEntry> = entries
            .into_iter()
            .filter(|entry| filter.matches(entry))
            .collect();

        if let Some(limit) = limit {
            filtered.truncate(limit);
        }

        Ok(filtered)
    }
}

pub fn summarize_create(title: &str) -> String {
    format!("created \"{title}\"")
}

pub fn summarize_update(fields: &[&str]) -> String {
    format!("updated {}", fields.join(", "))
}

pub fn summarize_delete(title: &str) -> String {
    format!("deleted \"{title}\"")
}

/// Format a single history entry for human-readable output
pub fn format_entry(entry: &HistoryEntry) -> String {
    format!(
        "{ts} {entity} {action} {entity_id}: {summary}",
        ts = entry.timestamp.to_rfc3339(),
        entity = entry.entity,
        action = entry.action,
        entity_id = entry.entity_id,
        summary = entry.summary
    )
}

/// Format multiple entries as lines
pub fn format_entries(entries: &[HistoryEntry]) -> String {
    entries.iter().map(format_entry).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::TableStore;
    use chrono::TimeZone;

    #[tokio::test]
    async fn record_and_read_newest_first() {
        let log = HistoryLog::new(Arc::new(TableStore::in_memory()), true);

        let mut older = HistoryEntry::new(EntityKind::Task, "t1", MutationAction::Create, "created \"a\"");
        older.timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut newer = HistoryEntry::new(EntityKind::Note, "n1", MutationAction::Delete, "deleted \"b\"");
        newer.timestamp = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        log.record(older.clone()).await;
        log.record(newer.clone()).await;

        let entries = log.recent(&HistoryFilter::default(), None).await.unwrap();
        assert_eq!(entries, vec![newer.clone(), older.clone()]);

        let tasks_only = HistoryFilter {
            entity: Some(EntityKind::Task),
            ..HistoryFilter::default()
        };
        assert_eq!(log.recent(&tasks_only, Some(5)).await.unwrap(), vec![older]);
        assert_eq!(log.recent(&HistoryFilter::default(), Some(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disabled_log_writes_nothing() {
        let log = HistoryLog::new(Arc::new(TableStore::in_memory()), false);
        log.record(HistoryEntry::new(EntityKind::Task, "t1", MutationAction::Update, "updated title"))
            .await;
        assert!(log.recent(&HistoryFilter::default(), None).await.unwrap().is_empty());
    }

    #[test]
    fn format_line() {
        let mut entry = HistoryEntry::new(
            EntityKind::Task,
            "t1",
            MutationAction::Update,
            summarize_update(&["title", "due_date"]),
        );
        entry.timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        assert_eq!(
            format_entry(&entry),
            "2024-03-01T12:00:00+00:00 task update t1: updated title, due_date"
        );
    }
}
