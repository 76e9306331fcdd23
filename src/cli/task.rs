//! boardsync task command implementations.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{Frequency, NewTask, Priority, RecurrenceRule, Task, TaskPatch};
use crate::output::{emit, Report};
use crate::repository::{TaskQuery, WriteOutcome};

use super::{parse_arg, parse_due, Context};

pub struct AddOptions {
    pub title: String,
    pub category: String,
    pub column: String,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub due: Option<String>,
    pub tags: Vec<String>,
    pub favorite: bool,
    pub frequency: Option<String>,
    pub every: Option<u32>,
}

pub struct EditOptions {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub clear_description: bool,
    pub priority: Option<String>,
    pub due: Option<String>,
    pub clear_due: bool,
    pub tags: Option<Vec<String>>,
    pub category: Option<String>,
    pub column: Option<String>,
    pub position: Option<i64>,
    pub favorite: Option<bool>,
}

#[derive(Serialize)]
struct TaskListOutput {
    total: usize,
    tasks: Vec<Task>,
}

pub fn run_add(ctx: &Context, options: AddOptions) -> Result<()> {
    let mut new = NewTask::new(options.title, options.category, options.column);
    new.description = options.description;
    new.priority = options
        .priority
        .as_deref()
        .map(|value| parse_arg::<Priority>("priority", value))
        .transpose()?;
    new.due_date = options.due.as_deref().map(parse_due).transpose()?;
    new.tags = options.tags.into_iter().collect();
    new.is_favorite = options.favorite;
    new.recurrence = options
        .frequency
        .as_deref()
        .map(|value| parse_rule(value, options.every.unwrap_or(1)))
        .transpose()?;

    let outcome = ctx.with_board(|board| async move { board.tasks().create(new).await })?;
    emit_write(ctx, "task add", "Task created", &outcome)
}

pub fn run_edit(ctx: &Context, options: EditOptions) -> Result<()> {
    let patch = TaskPatch {
        title: options.title,
        description: if options.clear_description {
            Some(None)
        } else {
            options.description.map(Some)
        },
        priority: options
            .priority
            .as_deref()
            .map(|value| parse_arg::<Priority>("priority", value).map(Some))
            .transpose()?,
        due_date: if options.clear_due {
            Some(None)
        } else {
            options.due.as_deref().map(parse_due).transpose()?.map(Some)
        },
        tags: options
            .tags
            .map(|tags| tags.into_iter().collect::<BTreeSet<_>>()),
        category_id: options.category,
        column_id: options.column,
        position: options.position,
        is_favorite: options.favorite,
        ..TaskPatch::default()
    };
    if patch.is_empty() {
        return Err(Error::InvalidArgument(
            "nothing to change; pass at least one field".to_string(),
        ));
    }

    let id = options.id;
    let outcome =
        ctx.with_board(|board| async move { board.tasks().update(&id, patch).await })?;
    emit_write(ctx, "task edit", "Task updated", &outcome)
}

pub fn run_rm(ctx: &Context, id: String) -> Result<()> {
    let outcome = ctx.with_board(|board| async move { board.tasks().delete(&id).await })?;
    emit_write(ctx, "task rm", "Task deleted", &outcome)
}

pub fn run_done(ctx: &Context, id: String, completed: bool) -> Result<()> {
    let outcome = ctx.with_board(|board| async move {
        board.tasks().set_completed(&id, completed).await
    })?;
    let header = if completed {
        "Task completed"
    } else {
        "Task reopened"
    };
    emit_write(ctx, "task done", header, &outcome)
}

pub fn run_recur(ctx: &Context, id: String, frequency: Option<String>, every: u32) -> Result<()> {
    let rule = frequency
        .as_deref()
        .map(|value| parse_rule(value, every))
        .transpose()?;
    let patch = TaskPatch {
        recurrence: Some(rule),
        ..TaskPatch::default()
    };
    let outcome =
        ctx.with_board(|board| async move { board.tasks().update(&id, patch).await })?;
    let header = if rule.is_some() {
        "Recurrence set"
    } else {
        "Recurrence cleared"
    };
    emit_write(ctx, "task recur", header, &outcome)
}

pub fn run_list(ctx: &Context, query: TaskQuery) -> Result<()> {
    let tasks = ctx.with_board(|board| async move { board.tasks().list(&query).await })?;

    let mut human = Report::new("Tasks");
    human.field("Total", tasks.len().to_string());
    for task in &tasks {
        human.line(format_task_line(task));
    }

    let output = TaskListOutput {
        total: tasks.len(),
        tasks,
    };
    emit(ctx.output(), "task list", &output, &human)
}

fn parse_rule(frequency: &str, every: u32) -> Result<RecurrenceRule> {
    let frequency = parse_arg::<Frequency>("freq", frequency)?;
    Ok(RecurrenceRule::new(frequency, every))
}

fn emit_write(
    ctx: &Context,
    command: &str,
    header: &str,
    outcome: &WriteOutcome<Task>,
) -> Result<()> {
    let report = Report::for_write(header, outcome, |report, task| {
        report
            .field("ID", &task.id)
            .field("Title", &task.title)
            .field("Column", format!("{}/{}", task.category_id, task.column_id));
        if let Some(rule) = &task.recurrence {
            report.field("Repeats", rule.to_string());
        }
        if let Some(mirror_id) = &task.mirror_id {
            report.field("Mirror", mirror_id);
        }
    });
    emit(ctx.output(), command, outcome, &report)
}

fn format_task_line(task: &Task) -> String {
    let mark = if task.is_completed { "x" } else { " " };
    let mut line = format!(
        "[{mark}] {}/{}#{} {} {}",
        task.category_id, task.column_id, task.position, task.id, task.title
    );
    if let Some(due) = task.due_date {
        line.push_str(&format!(" (due: {})", due.format("%Y-%m-%d %H:%M")));
    }
    if let Some(rule) = &task.recurrence {
        line.push_str(&format!(" ({rule})"));
    }
    if task.mirror_id.is_some() {
        line.push_str(" (mirrored)");
    }
    line
}
