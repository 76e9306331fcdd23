//! boardsync queue subcommand implementations.

use chrono::{TimeZone, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::output::{emit, Report};
use crate::queue::QueuedOperation;

use super::Context;

#[derive(Serialize)]
struct QueueListOutput {
    total: usize,
    operations: Vec<QueuedOperation>,
}

#[derive(Serialize)]
struct QueueClearOutput {
    removed: usize,
}

pub fn run_list(ctx: &Context) -> Result<()> {
    let operations = ctx.with_board(|board| async move { board.queue().list() })?;

    let mut human = Report::new("Pending operations");
    human.field("Total", operations.len().to_string());
    for op in &operations {
        human.line(format_operation(op));
    }
    if !operations.is_empty() {
        human.next("boardsync sync");
    }

    let output = QueueListOutput {
        total: operations.len(),
        operations,
    };
    emit(ctx.output(), "queue list", &output, &human)
}

pub fn run_clear(ctx: &Context) -> Result<()> {
    let removed = ctx.with_board(|board| async move {
        let removed = board.queue().clear()?;
        if removed > 0 {
            tracing::warn!(removed, "discarded pending operations");
        }
        Ok(removed)
    })?;

    let mut human = Report::new("Queue cleared");
    human.field("Removed", removed.to_string());
    emit(ctx.output(), "queue clear", &QueueClearOutput { removed }, &human)
}

fn format_operation(op: &QueuedOperation) -> String {
    let queued_at = Utc
        .timestamp_millis_opt(op.timestamp)
        .single()
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| op.timestamp.to_string());
    format!("{} {} {}", op.id, queued_at, op.mutation)
}
