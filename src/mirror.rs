//! Recurring-task mirroring
//!
//! A recurring task created on a project board gets a counterpart in the
//! daily category's recurring column. The pairing lives in the
//! `mirror_pairs` table; both tasks also carry `mirror_id` pointing at
//! each other. Shared fields (title, description, priority, due date,
//! tags minus the marker tag, subtasks, rule) are copied across on every
//! save. Placement (category, column, position) and completion stay per
//! side, except during rollover, which advances both.
//!
//! Tasks linked before pairs existed are found through `mirror_id` or a
//! reverse lookup, and repaired into a pair on first contact.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::config::BoardConfig;
use crate::error::Result;
use crate::events::{EventBus, EventKind};
use crate::model::{NewTask, Task, TaskPatch};
use crate::recurrence;
use crate::remote::{Filter, RemoteStore, Table, TypedTable};

/// Authoritative link between a task and its daily-board counterpart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorPair {
    pub id: String,
    /// The task outside the daily category
    pub owner_id: String,
    /// The copy in the recurring column
    pub daily_id: String,
    pub created_at: DateTime<Utc>,
}

impl MirrorPair {
    fn new(owner_id: &str, daily_id: &str) -> Self {
        Self {
            id: Ulid::new().to_string(),
            owner_id: owner_id.to_string(),
            daily_id: daily_id.to_string(),
            created_at: Utc::now(),
        }
    }

    /// The other side of the pair, if `task_id` is part of it
    pub fn other(&self, task_id: &str) -> Option<&str> {
        if self.owner_id == task_id {
            Some(&self.daily_id)
        } else if self.daily_id == task_id {
            Some(&self.owner_id)
        } else {
            None
        }
    }
}

/// Where a task sits in the mirroring lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurrenceState {
    /// No rule, no link
    Standalone,
    /// Rule set outside the daily category, no counterpart yet
    OwnerWithRule,
    /// Rule set inside the daily category; never mirrored
    DailyRecurring,
    /// Linked to a counterpart
    Mirrored,
}

/// What a save did to the mirror relation
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorOutcome {
    Unchanged,
    Created(Task),
    Synced(Task),
    MovedToRecurring(Task),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdvancedTask {
    pub task_id: String,
    pub next_due: Option<DateTime<Utc>>,
    pub counterparts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RolloverReport {
    pub advanced: Vec<AdvancedTask>,
}

/// Optimistic completion state shown before the store confirms it
#[derive(Debug, Clone, Default)]
pub struct CompletionShadow {
    marks: Arc<Mutex<HashMap<String, bool>>>,
}

impl CompletionShadow {
    fn marks(&self) -> MutexGuard<'_, HashMap<String, bool>> {
        self.marks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set(&self, task_id: &str, completed: bool) {
        self.marks().insert(task_id.to_string(), completed);
    }

    pub fn get(&self, task_id: &str) -> Option<bool> {
        self.marks().get(task_id).copied()
    }

    pub fn clear(&self, task_id: &str) {
        self.marks().remove(task_id);
    }

    pub fn len(&self) -> usize {
        self.marks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks().is_empty()
    }
}

#[derive(Serialize)]
struct LinkedCopy<'a> {
    #[serde(flatten)]
    task: &'a NewTask,
    mirror_id: &'a str,
}

/// `1 + max(position)` over the column, 0 when empty
pub async fn next_position(
    tasks: &TypedTable<Task>,
    category_id: &str,
    column_id: &str,
) -> Result<i64> {
    let siblings = tasks
        .select(
            &Filter::all()
                .eq("category_id", category_id)
                .eq("column_id", column_id),
        )
        .await?;
    Ok(siblings
        .iter()
        .map(|task| task.position)
        .max()
        .map_or(0, |max| max + 1))
}

pub struct MirrorCoordinator {
    tasks: TypedTable<Task>,
    pairs: TypedTable<MirrorPair>,
    board: BoardConfig,
    events: EventBus,
    shadow: CompletionShadow,
}

impl MirrorCoordinator {
    pub fn new(remote: Arc<dyn RemoteStore>, board: BoardConfig, events: EventBus) -> Self {
        Self {
            tasks: TypedTable::new(Arc::clone(&remote), Table::Tasks),
            pairs: TypedTable::new(remote, Table::MirrorPairs),
            board,
            events,
            shadow: CompletionShadow::default(),
        }
    }

    pub fn shadow(&self) -> &CompletionShadow {
        &self.shadow
    }

    pub fn board(&self) -> &BoardConfig {
        &self.board
    }

    fn in_daily(&self, task: &Task) -> bool {
        task.category_id == self.board.daily_category
    }

    pub fn state_of(&self, task: &Task) -> RecurrenceState {
        if task.mirror_id.is_some() {
            RecurrenceState::Mirrored
        } else if task.recurrence.is_none() {
            RecurrenceState::Standalone
        } else if self.in_daily(task) {
            RecurrenceState::DailyRecurring
        } else {
            RecurrenceState::OwnerWithRule
        }
    }

    async fn pairs_of(&self, task_id: &str) -> Result<Vec<MirrorPair>> {
        let mut pairs = self
            .pairs
            .select(&Filter::all().eq("owner_id", task_id))
            .await?;
        pairs.extend(
            self.pairs
                .select(&Filter::all().eq("daily_id", task_id))
                .await?,
        );
        Ok(pairs)
    }

    async fn reverse_lookup(&self, task_id: &str) -> Result<Vec<Task>> {
        let linked = self
            .tasks
            .select(&Filter::all().eq("mirror_id", task_id))
            .await?;
        Ok(linked.into_iter().filter(|task| task.id != task_id).collect())
    }

    /// Resolve the counterpart of `task`
    ///
    /// Pair records are consulted first. Without one, the task's own
    /// `mirror_id` and then a reverse lookup are tried, and a hit is
    /// repaired into a pair.
    pub async fn counterpart(&self, task: &Task) -> Result<Option<Task>> {
        for pair in self.pairs_of(&task.id).await? {
            let Some(other_id) = pair.other(&task.id) else {
                continue;
            };
            match self.tasks.get(other_id).await? {
                Some(other) => return Ok(Some(other)),
                None => {
                    tracing::warn!(pair_id = %pair.id, task_id = %task.id, "dropping stale mirror pair");
                    self.pairs.delete(&pair.id).await?;
                }
            }
        }

        let mut legacy = None;
        if let Some(mirror_id) = task.mirror_id.as_deref().filter(|id| *id != task.id) {
            legacy = self.tasks.get(mirror_id).await?;
        }
        if legacy.is_none() {
            legacy = self.reverse_lookup(&task.id).await?.into_iter().next();
        }

        let Some(other) = legacy else {
            return Ok(None);
        };
        if let Err(err) = self.repair(task, &other).await {
            tracing::warn!(task_id = %task.id, mirror_id = %other.id, error = %err, "failed to repair mirror link");
        }
        Ok(Some(other))
    }

    async fn repair(&self, task: &Task, other: &Task) -> Result<()> {
        let (owner, daily) = if self.in_daily(task) && !self.in_daily(other) {
            (other, task)
        } else {
            (task, other)
        };
        tracing::info!(owner_id = %owner.id, daily_id = %daily.id, "repairing legacy mirror link");

        self.pairs
            .insert(&MirrorPair::new(&owner.id, &daily.id))
            .await?;
        self.link(task, &other.id).await?;
        self.link(other, &task.id).await?;
        Ok(())
    }

    /// Point `task` at `mirror_id` and return the stored record
    async fn link(&self, task: &Task, mirror_id: &str) -> Result<Task> {
        if task.mirror_id.as_deref() == Some(mirror_id) {
            return Ok(task.clone());
        }
        let patch = TaskPatch {
            mirror_id: Some(Some(mirror_id.to_string())),
            ..TaskPatch::default()
        };
        Ok(self
            .tasks
            .update(&task.id, &patch)
            .await?
            .unwrap_or_else(|| task.clone()))
    }

    async fn reload(&self, task: Task) -> Result<Task> {
        Ok(self.tasks.get(&task.id).await?.unwrap_or(task))
    }

    /// Bring the mirror relation up to date after `task` was written
    ///
    /// `patch` is `None` for a create. Mirror creation and the move into
    /// the recurring column only happen on creates and on writes that
    /// touch the rule or placement. Returns `task` as stored once the
    /// relation is settled, which may carry a new `mirror_id` or column.
    pub async fn after_save(&self, task: Task, patch: Option<&TaskPatch>) -> Result<(Task, MirrorOutcome)> {
        if let Some(other) = self.counterpart(&task).await? {
            let task = if task.mirror_id.as_deref() == Some(other.id.as_str()) {
                task
            } else {
                self.reload(task).await?
            };
            if patch.is_some_and(|patch| !patch.touches_shared_fields()) {
                return Ok((task, MirrorOutcome::Unchanged));
            }
            let outcome = match self.propagate(&task, &other).await? {
                Some(synced) => MirrorOutcome::Synced(synced),
                None => MirrorOutcome::Unchanged,
            };
            return Ok((task, outcome));
        }

        if patch.is_some_and(|patch| !patch.touches_placement_or_rule()) {
            return Ok((task, MirrorOutcome::Unchanged));
        }

        match self.state_of(&task) {
            RecurrenceState::OwnerWithRule => {
                let (owner, daily) = self.create_mirror(&task).await?;
                Ok((owner, MirrorOutcome::Created(daily)))
            }
            RecurrenceState::DailyRecurring if task.column_id != self.board.recurring_column => {
                let moved = self.move_to_recurring(&task).await?;
                Ok((moved.clone(), MirrorOutcome::MovedToRecurring(moved)))
            }
            _ => Ok((task, MirrorOutcome::Unchanged)),
        }
    }

    async fn move_to_recurring(&self, task: &Task) -> Result<Task> {
        let position =
            next_position(&self.tasks, &self.board.daily_category, &self.board.recurring_column)
                .await?;
        let patch = TaskPatch {
            column_id: Some(self.board.recurring_column.clone()),
            position: Some(position),
            ..TaskPatch::default()
        };
        tracing::info!(task_id = %task.id, "moving daily task into recurring column");
        self.tasks
            .update(&task.id, &patch)
            .await?
            .ok_or_else(|| crate::error::Error::not_found("task", &task.id))
    }

    /// Create the daily-side copy of `owner` and link both sides
    ///
    /// The copy is inserted already pointing at its owner, so a failure
    /// part way through leaves a one-sided link that the next save of
    /// the owner finds by reverse lookup and repairs. Returns the owner
    /// as stored, then the copy.
    pub async fn create_mirror(&self, owner: &Task) -> Result<(Task, Task)> {
        let mut tags: BTreeSet<String> = self.shared_tags(&owner.tags);
        tags.insert(self.board.marker_tag.clone());

        let position =
            next_position(&self.tasks, &self.board.daily_category, &self.board.recurring_column)
                .await?;
        let copy = NewTask {
            title: owner.title.clone(),
            description: owner.description.clone(),
            priority: owner.priority,
            due_date: owner.due_date,
            tags,
            category_id: self.board.daily_category.clone(),
            column_id: self.board.recurring_column.clone(),
            position: Some(position),
            is_completed: false,
            is_favorite: false,
            subtasks: owner.subtasks.clone(),
            recurrence: owner.recurrence,
        };

        let daily: Task = self
            .tasks
            .insert(&LinkedCopy {
                task: &copy,
                mirror_id: &owner.id,
            })
            .await?;
        self.pairs
            .insert(&MirrorPair::new(&owner.id, &daily.id))
            .await?;
        let owner = self.link(owner, &daily.id).await?;

        tracing::info!(owner_id = %owner.id, daily_id = %daily.id, "created mirror task");
        self.events.notify(
            EventKind::MirrorCreated,
            serde_json::json!({ "owner_id": owner.id, "daily_id": daily.id }),
        );
        Ok((owner, daily))
    }

    fn shared_tags(&self, tags: &BTreeSet<String>) -> BTreeSet<String> {
        tags.iter()
            .filter(|tag| **tag != self.board.marker_tag)
            .cloned()
            .collect()
    }

    /// Shared-field differences that would make `target` match `source`
    pub fn shared_patch(&self, source: &Task, target: &Task) -> TaskPatch {
        let mut patch = TaskPatch::default();
        if source.title != target.title {
            patch.title = Some(source.title.clone());
        }
        if source.description != target.description {
            patch.description = Some(source.description.clone());
        }
        if source.priority != target.priority {
            patch.priority = Some(source.priority);
        }
        if source.due_date != target.due_date {
            patch.due_date = Some(source.due_date);
        }
        let mut tags = self.shared_tags(&source.tags);
        if target.tags.contains(&self.board.marker_tag) {
            tags.insert(self.board.marker_tag.clone());
        }
        if tags != target.tags {
            patch.tags = Some(tags);
        }
        if source.subtasks != target.subtasks {
            patch.subtasks = Some(source.subtasks.clone());
        }
        if source.recurrence != target.recurrence {
            patch.recurrence = Some(source.recurrence);
        }
        patch
    }

    /// Copy shared fields from `source` onto `target`; `None` when they
    /// already match
    pub async fn propagate(&self, source: &Task, target: &Task) -> Result<Option<Task>> {
        let patch = self.shared_patch(source, target);
        if patch.is_empty() {
            return Ok(None);
        }

        let fields = patch.changed_fields();
        let Some(updated) = self.tasks.update(&target.id, &patch).await? else {
            tracing::warn!(source_id = %source.id, target_id = %target.id, "mirror target vanished during propagation");
            return Ok(None);
        };

        tracing::debug!(source_id = %source.id, target_id = %target.id, ?fields, "propagated shared fields");
        self.events.notify(
            EventKind::MirrorSynced,
            serde_json::json!({ "source_id": source.id, "target_id": target.id, "fields": fields }),
        );
        Ok(Some(updated))
    }

    /// Unlink `task` before it is deleted
    ///
    /// Pairs involving it are removed and any task still pointing at it
    /// loses its `mirror_id`. Survivors keep their rule and fields.
    /// Returns the ids of the detached survivors.
    pub async fn detach(&self, task: &Task) -> Result<Vec<String>> {
        let mut survivors = BTreeSet::new();

        for pair in self.pairs_of(&task.id).await? {
            if let Some(other) = pair.other(&task.id) {
                survivors.insert(other.to_string());
            }
            self.pairs.delete(&pair.id).await?;
        }
        for linked in self.reverse_lookup(&task.id).await? {
            survivors.insert(linked.id);
        }

        let unlink = TaskPatch {
            mirror_id: Some(None),
            ..TaskPatch::default()
        };
        for survivor_id in &survivors {
            let Some(survivor) = self.tasks.get(survivor_id).await? else {
                continue;
            };
            if survivor.mirror_id.as_deref() == Some(task.id.as_str()) {
                self.tasks.update(survivor_id, &unlink).await?;
            }
        }

        if !survivors.is_empty() {
            tracing::info!(task_id = %task.id, ?survivors, "detached mirror");
            self.events.notify(
                EventKind::MirrorDetached,
                serde_json::json!({ "task_id": task.id, "survivors": survivors }),
            );
        }
        Ok(survivors.into_iter().collect())
    }

    /// Roll over the daily category's recurring column
    pub async fn rollover(&self) -> Result<RolloverReport> {
        let category = self.board.daily_category.clone();
        let column = self.board.recurring_column.clone();
        self.rollover_column(&category, &column).await
    }

    /// Advance every completed recurring task in a column, and every
    /// copy of it, to the next occurrence
    pub async fn rollover_column(&self, category_id: &str, column_id: &str) -> Result<RolloverReport> {
        let candidates = self
            .tasks
            .select(
                &Filter::all()
                    .eq("category_id", category_id)
                    .eq("column_id", column_id)
                    .eq("is_completed", true),
            )
            .await?;

        let mut report = RolloverReport::default();
        for task in candidates {
            let Some(rule) = task.recurrence else {
                continue;
            };
            report.advanced.push(self.advance(&task, &rule).await?);
        }

        tracing::info!(category_id, column_id, advanced = report.advanced.len(), "rollover complete");
        self.events.notify(EventKind::RolloverCompleted, &report);
        self.events.refetch(Table::Tasks);
        Ok(report)
    }

    async fn advance(&self, task: &Task, rule: &crate::model::RecurrenceRule) -> Result<AdvancedTask> {
        let next_due = recurrence::next_due(task.due_date, rule);
        let patch = TaskPatch {
            due_date: Some(next_due),
            is_completed: Some(false),
            ..TaskPatch::default()
        };
        self.tasks.update(&task.id, &patch).await?;

        let mut targets = BTreeSet::new();
        for pair in self.pairs_of(&task.id).await? {
            if let Some(other) = pair.other(&task.id) {
                targets.insert(other.to_string());
            }
        }
        if let Some(mirror_id) = &task.mirror_id {
            targets.insert(mirror_id.clone());
        }
        for linked in self.reverse_lookup(&task.id).await? {
            targets.insert(linked.id);
        }
        targets.remove(&task.id);

        let mut counterparts = Vec::new();
        for target in targets {
            if self.tasks.update(&target, &patch).await?.is_some() {
                self.shadow.clear(&target);
                counterparts.push(target);
            }
        }
        if counterparts.is_empty() {
            tracing::debug!(task_id = %task.id, "no counterpart found; advanced primary only");
        }
        self.shadow.clear(&task.id);

        Ok(AdvancedTask {
            task_id: task.id.clone(),
            next_due,
            counterparts,
        })
    }
}
