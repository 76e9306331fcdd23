//! boardsync history and next-due commands.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::history::{format_entries, HistoryEntry, HistoryFilter};
use crate::model::{Frequency, RecurrenceRule};
use crate::output::{emit, Report};
use crate::recurrence;

use super::{parse_arg, parse_due, Context};

#[derive(Serialize)]
struct HistoryReport {
    entries: Vec<HistoryEntry>,
    total: usize,
}

#[derive(Serialize)]
struct NextDueOutput {
    due: DateTime<Utc>,
    rule: RecurrenceRule,
    next_due: Option<DateTime<Utc>>,
}

pub fn run_history(
    ctx: &Context,
    limit: usize,
    id: Option<String>,
    since: Option<String>,
) -> Result<()> {
    let since = parse_timestamp("since", since.as_deref())?;
    let filter = HistoryFilter {
        entity: None,
        entity_id: id,
        since,
    };
    let entries = ctx.with_board(|board| async move {
        if !board.history().is_enabled() {
            tracing::info!("history recording is disabled");
        }
        board.history().recent(&filter, Some(limit)).await
    })?;

    let mut human = Report::new("History");
    human.field("Total", entries.len().to_string());
    if !entries.is_empty() {
        human.line(format_entries(&entries));
    }

    let report = HistoryReport {
        total: entries.len(),
        entries,
    };
    emit(ctx.output(), "history", &report, &human)
}

/// Pure calculation; needs no board
pub fn run_next_due(ctx: &Context, due: &str, frequency: &str, every: u32) -> Result<()> {
    let due = parse_due(due)?;
    let rule = RecurrenceRule::new(parse_arg::<Frequency>("freq", frequency)?, every);
    rule.validate()?;
    let next_due = recurrence::next_due(Some(due), &rule);

    let mut human = Report::new("Next due");
    human.field("Rule", rule.to_string());
    human.field("From", due.to_rfc3339());
    human.field(
        "Next",
        next_due
            .map(|next| next.to_rfc3339())
            .unwrap_or_else(|| "out of range".to_string()),
    );

    emit(
        ctx.output(),
        "next-due",
        &NextDueOutput {
            due,
            rule,
            next_due,
        },
        &human,
    )
}

fn parse_timestamp(label: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let parsed = DateTime::parse_from_rfc3339(value).map_err(|err| {
        Error::InvalidArgument(format!("invalid {label} timestamp '{value}': {err}"))
    })?;
    Ok(Some(parsed.with_timezone(&Utc)))
}
