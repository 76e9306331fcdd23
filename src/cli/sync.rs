//! boardsync sync and rollover commands.

use std::time::Duration;

use serde::Serialize;

use crate::connectivity::ReconnectTrigger;
use crate::dispatcher::ReplaySummary;
use crate::error::{Error, Result};
use crate::mirror::RolloverReport;
use crate::output::{emit, Report};

use super::Context;

#[derive(Serialize)]
struct SyncOutput {
    #[serde(flatten)]
    summary: ReplaySummary,
    remaining: usize,
}

pub fn run_sync(ctx: &Context, watch: bool, timeout_secs: Option<u64>) -> Result<()> {
    if ctx.offline {
        return Err(Error::InvalidArgument(
            "cannot sync with --offline".to_string(),
        ));
    }

    let output = ctx.with_board(|board| async move {
        let summary = if watch {
            watch_until_drained(&board, timeout_secs.map(Duration::from_secs)).await?
        } else {
            board.dispatcher().replay().await?
        };
        Ok(SyncOutput {
            summary,
            remaining: board.queue().len()?,
        })
    })?;

    let report = Report::for_replay(&output.summary, output.remaining);
    emit(ctx.output(), "sync", &output, &report)
}

/// Run the dispatcher loop until the queue drains or `timeout` passes;
/// returns totals over every pass
async fn watch_until_drained(
    board: &crate::board::Board,
    timeout: Option<Duration>,
) -> Result<ReplaySummary> {
    let mut events = board.events().subscribe();
    let handle = board.start_sync(&ReconnectTrigger::new(board.connectivity().clone()));
    let deadline = timeout.map(|timeout| tokio::time::Instant::now() + timeout);
    let mut total = ReplaySummary::default();

    while !board.queue().is_empty()? {
        let next = async {
            loop {
                match events.recv().await {
                    Ok(event) if event.event == crate::events::EventKind::SyncCompleted => {
                        return Some(event);
                    }
                    Ok(_) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(_) => return None,
                }
            }
        };
        let event = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, next).await {
                Ok(event) => event,
                Err(_) => {
                    tracing::info!("sync watch timed out");
                    break;
                }
            },
            None => next.await,
        };
        let Some(event) = event else {
            break;
        };
        let pass = event
            .data
            .and_then(|data| serde_json::from_value::<ReplaySummary>(data).ok());
        if let Some(pass) = pass {
            total.succeeded += pass.succeeded;
            total.failed = pass.failed;
            total.deferred = pass.deferred;
        }
    }

    handle.shutdown().await;
    Ok(total)
}

pub fn run_rollover(ctx: &Context, category: Option<String>, column: Option<String>) -> Result<()> {
    let report: RolloverReport = ctx.with_board(|board| async move {
        let board_config = board.config().board.clone();
        let category = category.unwrap_or(board_config.daily_category);
        let column = column.unwrap_or(board_config.recurring_column);
        board.mirror().rollover_column(&category, &column).await
    })?;

    let mut human = Report::new("Rollover complete");
    human.field("Advanced", report.advanced.len().to_string());
    for advanced in &report.advanced {
        let due = advanced
            .next_due
            .map(|due| due.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "none".to_string());
        let mut line = format!("{} -> due {due}", advanced.task_id);
        if !advanced.counterparts.is_empty() {
            line.push_str(&format!(" (also {})", advanced.counterparts.join(", ")));
        }
        human.line(line);
    }

    emit(ctx.output(), "rollover", &report, &human)
}
