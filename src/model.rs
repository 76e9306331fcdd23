//! Board entities and their mutation shapes
//!
//! Each entity has three shapes: the stored record (`Task`), the create
//! payload (`NewTask`, no identity since the remote assigns it), and the
//! partial update (`TaskPatch`). Patch fields that may be cleared use
//! `Option<Option<T>>`: absent leaves the field alone, `null` clears it.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValidationError;

const MAX_TITLE_LEN: usize = 500;
const MAX_INTERVAL: u32 = 1000;

/// Entity type of a queued operation (`type` on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Task,
    Note,
    Category,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Task => "task",
            EntityKind::Note => "note",
            EntityKind::Category => "category",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write action of a queued operation (`action` on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationAction {
    Create,
    Update,
    Delete,
}

impl MutationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationAction::Create => "create",
            MutationAction::Update => "update",
            MutationAction::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl std::str::FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            other => Err(format!("unknown frequency '{other}'")),
        }
    }
}

/// Repeat every `interval` units of `frequency`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
}

impl RecurrenceRule {
    pub fn new(frequency: Frequency, interval: u32) -> Self {
        Self {
            frequency,
            interval,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interval == 0 || self.interval > MAX_INTERVAL {
            return Err(ValidationError::new(
                "recurrence.interval",
                format!("must be between 1 and {MAX_INTERVAL}"),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.frequency {
            Frequency::Daily => "day",
            Frequency::Weekly => "week",
            Frequency::Monthly => "month",
        };
        if self.interval == 1 {
            write!(f, "every {unit}")
        } else {
            write!(f, "every {} {unit}s", self.interval)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub is_completed: bool,
}

/// A stored task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub category_id: String,
    pub column_id: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub subtasks: Option<Vec<Subtask>>,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,
    #[serde(default)]
    pub mirror_id: Option<String>,
}

impl Task {
    pub fn is_in_column(&self, category_id: &str, column_id: &str) -> bool {
        self.category_id == category_id && self.column_id == column_id
    }
}

/// Create payload for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub category_id: String,
    pub column_id: String,
    /// Resolved at write time when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtasks: Option<Vec<Subtask>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<RecurrenceRule>,
}

impl NewTask {
    pub fn new(
        title: impl Into<String>,
        category_id: impl Into<String>,
        column_id: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: None,
            priority: None,
            due_date: None,
            tags: BTreeSet::new(),
            category_id: category_id.into(),
            column_id: column_id.into(),
            position: None,
            is_completed: false,
            is_favorite: false,
            subtasks: None,
            recurrence: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_title("title", &self.title)?;
        validate_id("category_id", &self.category_id)?;
        validate_id("column_id", &self.column_id)?;
        if let Some(position) = self.position {
            validate_position(position)?;
        }
        validate_tags(&self.tags)?;
        if let Some(subtasks) = &self.subtasks {
            validate_subtasks(subtasks)?;
        }
        if let Some(rule) = &self.recurrence {
            rule.validate()?;
        }
        Ok(())
    }
}

/// Partial update of a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub priority: Option<Option<Priority>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_favorite: Option<bool>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub subtasks: Option<Option<Vec<Subtask>>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub recurrence: Option<Option<RecurrenceRule>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub mirror_id: Option<Option<String>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }

    /// Names of the fields this patch touches, in declaration order
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        let mut mark = |present: bool, name: &'static str| {
            if present {
                fields.push(name);
            }
        };
        mark(self.title.is_some(), "title");
        mark(self.description.is_some(), "description");
        mark(self.priority.is_some(), "priority");
        mark(self.due_date.is_some(), "due_date");
        mark(self.tags.is_some(), "tags");
        mark(self.category_id.is_some(), "category_id");
        mark(self.column_id.is_some(), "column_id");
        mark(self.position.is_some(), "position");
        mark(self.is_completed.is_some(), "is_completed");
        mark(self.is_favorite.is_some(), "is_favorite");
        mark(self.subtasks.is_some(), "subtasks");
        mark(self.recurrence.is_some(), "recurrence");
        mark(self.mirror_id.is_some(), "mirror_id");
        fields
    }

    /// True when the patch touches a field replicated across a mirror pair
    pub fn touches_shared_fields(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.priority.is_some()
            || self.due_date.is_some()
            || self.tags.is_some()
            || self.subtasks.is_some()
            || self.recurrence.is_some()
    }

    /// True when the patch can change a task's recurrence state
    pub fn touches_placement_or_rule(&self) -> bool {
        self.recurrence.is_some() || self.category_id.is_some() || self.column_id.is_some()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.is_empty() {
            return Err(ValidationError::new("patch", "no fields to update"));
        }
        if let Some(title) = &self.title {
            validate_title("title", title)?;
        }
        if let Some(category_id) = &self.category_id {
            validate_id("category_id", category_id)?;
        }
        if let Some(column_id) = &self.column_id {
            validate_id("column_id", column_id)?;
        }
        if let Some(position) = self.position {
            validate_position(position)?;
        }
        if let Some(tags) = &self.tags {
            validate_tags(tags)?;
        }
        if let Some(Some(subtasks)) = &self.subtasks {
            validate_subtasks(subtasks)?;
        }
        if let Some(Some(rule)) = &self.recurrence {
            rule.validate()?;
        }
        if let Some(Some(mirror_id)) = &self.mirror_id {
            validate_id("mirror_id", mirror_id)?;
        }
        Ok(())
    }

    /// Apply the patch to a stored task in place
    pub fn apply(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(tags) = &self.tags {
            task.tags = tags.clone();
        }
        if let Some(category_id) = &self.category_id {
            task.category_id = category_id.clone();
        }
        if let Some(column_id) = &self.column_id {
            task.column_id = column_id.clone();
        }
        if let Some(position) = self.position {
            task.position = position;
        }
        if let Some(is_completed) = self.is_completed {
            task.is_completed = is_completed;
        }
        if let Some(is_favorite) = self.is_favorite {
            task.is_favorite = is_favorite;
        }
        if let Some(subtasks) = &self.subtasks {
            task.subtasks = subtasks.clone();
        }
        if let Some(recurrence) = self.recurrence {
            task.recurrence = recurrence;
        }
        if let Some(mirror_id) = &self.mirror_id {
            task.mirror_id = mirror_id.clone();
        }
    }
}

/// A stored note
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub is_pinned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNote {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(default)]
    pub is_pinned: bool,
}

impl NewNote {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: None,
            category_id: None,
            is_pinned: false,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_title("title", &self.title)?;
        if let Some(category_id) = &self.category_id {
            validate_id("category_id", category_id)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub content: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub category_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_pinned: Option<bool>,
}

impl NotePatch {
    pub fn changed_fields(&self) -> Vec<&'static str> {
        [
            (self.title.is_some(), "title"),
            (self.content.is_some(), "content"),
            (self.category_id.is_some(), "category_id"),
            (self.is_pinned.is_some(), "is_pinned"),
        ]
        .into_iter()
        .filter_map(|(present, name)| present.then_some(name))
        .collect()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.changed_fields().is_empty() {
            return Err(ValidationError::new("patch", "no fields to update"));
        }
        if let Some(title) = &self.title {
            validate_title("title", title)?;
        }
        if let Some(Some(category_id)) = &self.category_id {
            validate_id("category_id", category_id)?;
        }
        Ok(())
    }
}

/// A stored category (a board)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCategory {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

impl NewCategory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: None,
            position: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_title("name", &self.name)?;
        if let Some(color) = &self.color {
            validate_color(color)?;
        }
        if let Some(position) = self.position {
            validate_position(position)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub color: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

impl CategoryPatch {
    pub fn changed_fields(&self) -> Vec<&'static str> {
        [
            (self.name.is_some(), "name"),
            (self.color.is_some(), "color"),
            (self.position.is_some(), "position"),
        ]
        .into_iter()
        .filter_map(|(present, name)| present.then_some(name))
        .collect()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.changed_fields().is_empty() {
            return Err(ValidationError::new("patch", "no fields to update"));
        }
        if let Some(name) = &self.name {
            validate_title("name", name)?;
        }
        if let Some(Some(color)) = &self.color {
            validate_color(color)?;
        }
        if let Some(position) = self.position {
            validate_position(position)?;
        }
        Ok(())
    }
}

/// Present-but-null deserializes to `Some(None)`; absence is handled by
/// `#[serde(default)]`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn validate_title(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "cannot be empty"));
    }
    if value.chars().count() > MAX_TITLE_LEN {
        return Err(ValidationError::new(
            field,
            format!("must be at most {MAX_TITLE_LEN} characters"),
        ));
    }
    Ok(())
}

fn validate_id(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "cannot be empty"));
    }
    Ok(())
}

fn validate_position(position: i64) -> Result<(), ValidationError> {
    if position < 0 {
        return Err(ValidationError::new("position", "cannot be negative"));
    }
    Ok(())
}

fn validate_tags(tags: &BTreeSet<String>) -> Result<(), ValidationError> {
    for tag in tags {
        if tag.trim().is_empty() || tag.chars().any(char::is_whitespace) {
            return Err(ValidationError::new(
                "tags",
                format!("invalid tag '{tag}': tags are single non-empty words"),
            ));
        }
    }
    Ok(())
}

fn validate_subtasks(subtasks: &[Subtask]) -> Result<(), ValidationError> {
    for subtask in subtasks {
        validate_id("subtasks.id", &subtask.id)?;
        validate_title("subtasks.title", &subtask.title)?;
    }
    Ok(())
}

fn validate_color(color: &str) -> Result<(), ValidationError> {
    let hex = color.strip_prefix('#').unwrap_or("");
    if !matches!(hex.len(), 3 | 6) || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::new(
            "color",
            format!("'{color}' is not a #rgb or #rrggbb color"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_task() -> Task {
        serde_json::from_value(json!({
            "id": "t1",
            "title": "Water plants",
            "category_id": "home",
            "column_id": "todo",
        }))
        .unwrap()
    }

    #[test]
    fn stored_task_defaults_optional_fields() {
        let task = sample_task();
        assert_eq!(task.position, 0);
        assert!(task.tags.is_empty());
        assert!(task.mirror_id.is_none());
        assert!(!task.is_completed);
    }

    #[test]
    fn patch_distinguishes_null_from_absent() {
        let patch: TaskPatch =
            serde_json::from_value(json!({"description": null, "title": "x"})).unwrap();
        assert_eq!(patch.description, Some(None));
        assert_eq!(patch.due_date, None);
        assert_eq!(patch.changed_fields(), vec!["title", "description"]);

        let encoded = serde_json::to_value(&patch).unwrap();
        assert_eq!(encoded, json!({"title": "x", "description": null}));
    }

    #[test]
    fn apply_clears_and_sets() {
        let mut task = sample_task();
        task.description = Some("old".to_string());

        let patch = TaskPatch {
            description: Some(None),
            is_completed: Some(true),
            recurrence: Some(Some(RecurrenceRule::new(Frequency::Weekly, 2))),
            ..TaskPatch::default()
        };
        patch.apply(&mut task);

        assert_eq!(task.description, None);
        assert!(task.is_completed);
        assert_eq!(
            task.recurrence,
            Some(RecurrenceRule::new(Frequency::Weekly, 2))
        );
    }

    #[test]
    fn new_task_validation() {
        let mut task = NewTask::new("  ", "home", "todo");
        assert_eq!(task.validate().unwrap_err().field, "title");

        task.title = "ok".to_string();
        task.recurrence = Some(RecurrenceRule::new(Frequency::Daily, 0));
        assert_eq!(task.validate().unwrap_err().field, "recurrence.interval");

        task.recurrence = Some(RecurrenceRule::new(Frequency::Daily, 1));
        task.tags.insert("two words".to_string());
        assert_eq!(task.validate().unwrap_err().field, "tags");
    }

    #[test]
    fn empty_patch_is_rejected() {
        assert_eq!(TaskPatch::default().validate().unwrap_err().field, "patch");
        assert!(NotePatch::default().validate().is_err());
        assert!(CategoryPatch::default().validate().is_err());
    }

    #[test]
    fn category_color_must_be_hex() {
        let mut category = NewCategory {
            name: "Work".to_string(),
            color: Some("blue".to_string()),
            position: None,
        };
        assert_eq!(category.validate().unwrap_err().field, "color");
        category.color = Some("#1e90ff".to_string());
        assert!(category.validate().is_ok());
    }

    #[test]
    fn rule_display() {
        assert_eq!(
            RecurrenceRule::new(Frequency::Daily, 1).to_string(),
            "every day"
        );
        assert_eq!(
            RecurrenceRule::new(Frequency::Monthly, 3).to_string(),
            "every 3 months"
        );
    }
}
