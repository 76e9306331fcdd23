//! Command-line interface for boardsync
//!
//! This module defines the CLI structure using clap derive macros.
//! Each command group is implemented in its own submodule.

use std::future::Future;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};

use crate::board::Board;
use crate::connectivity::Connectivity;
use crate::error::{Error, Result};
use crate::events::EventDestination;
use crate::output::OutputOptions;

mod history;
mod init;
mod queue;
mod sync;
mod task;

/// boardsync - offline-capable task board
///
/// Writes made while offline are queued and replayed later. Recurring
/// tasks are mirrored onto the daily board and rolled over together.
#[derive(Parser, Debug)]
#[command(name = "boardsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Board root (defaults to current directory)
    #[arg(long, global = true, env = "BOARDSYNC_DIR")]
    pub dir: Option<PathBuf>,

    /// Treat the remote store as unreachable; writes are queued
    #[arg(long, global = true)]
    pub offline: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Copy board events as JSON lines to a file, or `-` for stdout
    #[arg(long, global = true, value_name = "DEST")]
    pub events: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a board in the target directory
    Init,

    /// Task management
    #[command(subcommand)]
    Task(TaskCommands),

    /// Advance completed recurring tasks to their next occurrence
    Rollover {
        /// Column to roll over (defaults to the recurring column)
        #[arg(long)]
        column: Option<String>,

        /// Category of the column (defaults to the daily category)
        #[arg(long)]
        category: Option<String>,
    },

    /// Inspect or clear the offline mutation queue
    #[command(subcommand)]
    Queue(QueueCommands),

    /// Replay queued writes against the remote store
    Sync {
        /// Keep replaying with backoff until the queue is empty
        #[arg(long)]
        watch: bool,

        /// Give up watching after this many seconds
        #[arg(long, requires = "watch")]
        timeout: Option<u64>,
    },

    /// Show the audit trail, newest first
    History {
        /// Maximum number of entries
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Only entries for this record id
        #[arg(long)]
        id: Option<String>,

        /// Only entries newer than this (RFC 3339)
        #[arg(long)]
        since: Option<String>,
    },

    /// Compute the next due date for a recurrence rule
    NextDue {
        /// Current due date (YYYY-MM-DD, YYYY-MM-DDTHH:MM or RFC 3339)
        due: String,

        /// daily, weekly or monthly
        #[arg(long = "freq")]
        frequency: String,

        /// Repeat every N units
        #[arg(long, default_value_t = 1)]
        every: u32,
    },
}

/// Task subcommands
#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Create a task
    Add {
        title: String,

        #[arg(long)]
        category: String,

        #[arg(long)]
        column: String,

        #[arg(long)]
        description: Option<String>,

        /// low, medium or high
        #[arg(long)]
        priority: Option<String>,

        /// Due date (YYYY-MM-DD, YYYY-MM-DDTHH:MM or RFC 3339)
        #[arg(long)]
        due: Option<String>,

        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long)]
        favorite: bool,

        /// Recurrence frequency: daily, weekly or monthly
        #[arg(long = "freq")]
        frequency: Option<String>,

        /// Recurrence interval
        #[arg(long, requires = "frequency")]
        every: Option<u32>,
    },

    /// Change fields of a task
    Edit {
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long, conflicts_with = "clear_description")]
        description: Option<String>,

        #[arg(long)]
        clear_description: bool,

        #[arg(long)]
        priority: Option<String>,

        #[arg(long, conflicts_with = "clear_due")]
        due: Option<String>,

        #[arg(long)]
        clear_due: bool,

        /// Replace the tag set (repeatable)
        #[arg(long = "tag")]
        tags: Option<Vec<String>>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        column: Option<String>,

        #[arg(long)]
        position: Option<i64>,

        #[arg(long)]
        favorite: Option<bool>,
    },

    /// Delete a task
    Rm { id: String },

    /// List tasks
    List {
        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        column: Option<String>,

        /// Only completed (true) or open (false) tasks
        #[arg(long)]
        completed: Option<bool>,
    },

    /// Mark a task completed
    Done {
        id: String,

        /// Mark it open again
        #[arg(long)]
        undo: bool,
    },

    /// Set or clear a task's recurrence rule
    Recur {
        id: String,

        /// daily, weekly or monthly
        #[arg(long = "freq", required_unless_present = "clear")]
        frequency: Option<String>,

        #[arg(long, default_value_t = 1)]
        every: u32,

        #[arg(long, conflicts_with = "frequency")]
        clear: bool,
    },
}

/// Queue subcommands
#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// Show pending operations in replay order
    List,

    /// Drop every pending operation
    Clear,
}

/// Global options shared by every command
#[derive(Debug, Clone)]
pub(crate) struct Context {
    pub dir: Option<PathBuf>,
    pub offline: bool,
    pub json: bool,
    pub quiet: bool,
    pub events: Option<String>,
}

impl Context {
    pub fn root(&self) -> Result<PathBuf> {
        match &self.dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    fn events_to_stdout(&self) -> bool {
        matches!(
            EventDestination::parse(self.events.as_deref()),
            Some(EventDestination::Stdout)
        )
    }

    /// Output options; JSON and human output yield to events on stdout
    pub fn output(&self) -> OutputOptions {
        let events_to_stdout = self.events_to_stdout();
        OutputOptions {
            json: self.json && !events_to_stdout,
            quiet: self.quiet || events_to_stdout,
        }
    }

    fn connectivity(&self) -> Connectivity {
        if self.offline {
            Connectivity::offline()
        } else {
            Connectivity::online()
        }
    }

    /// Open the board and run `op` on a fresh runtime, then copy the
    /// events it published to the `--events` destination
    pub fn with_board<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(Board) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let root = self.root()?;
        let mut sink = EventDestination::parse(self.events.as_deref())
            .map(|destination| destination.open())
            .transpose()?;

        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(async {
            let board = Board::open(&root, self.connectivity())?;
            let mut events = board.events().subscribe();
            let result = op(board).await;
            if let Some(sink) = sink.as_mut() {
                if let Err(err) = sink.drain(&mut events) {
                    tracing::warn!(error = %err, "failed to write events");
                }
            }
            result
        })
    }
}

/// Parse a due date given as a date, a minute-precision local-free
/// timestamp, or RFC 3339; the first two are taken as UTC
pub(crate) fn parse_due(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(parsed.and_utc());
        }
    }
    if let Some(midnight) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc());
    }
    Err(Error::InvalidArgument(format!("invalid due date '{value}'")))
}

pub(crate) fn parse_arg<T>(label: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|err: String| Error::InvalidArgument(format!("{label}: {err}")))
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let ctx = Context {
            dir: self.dir,
            offline: self.offline,
            json: self.json,
            quiet: self.quiet,
            events: self.events,
        };

        match self.command {
            Commands::Init => init::run(&ctx),
            Commands::Task(cmd) => match cmd {
                TaskCommands::Add {
                    title,
                    category,
                    column,
                    description,
                    priority,
                    due,
                    tags,
                    favorite,
                    frequency,
                    every,
                } => task::run_add(
                    &ctx,
                    task::AddOptions {
                        title,
                        category,
                        column,
                        description,
                        priority,
                        due,
                        tags,
                        favorite,
                        frequency,
                        every,
                    },
                ),
                TaskCommands::Edit {
                    id,
                    title,
                    description,
                    clear_description,
                    priority,
                    due,
                    clear_due,
                    tags,
                    category,
                    column,
                    position,
                    favorite,
                } => task::run_edit(
                    &ctx,
                    task::EditOptions {
                        id,
                        title,
                        description,
                        clear_description,
                        priority,
                        due,
                        clear_due,
                        tags,
                        category,
                        column,
                        position,
                        favorite,
                    },
                ),
                TaskCommands::Rm { id } => task::run_rm(&ctx, id),
                TaskCommands::List {
                    category,
                    column,
                    completed,
                } => task::run_list(
                    &ctx,
                    crate::repository::TaskQuery {
                        category_id: category,
                        column_id: column,
                        completed,
                    },
                ),
                TaskCommands::Done { id, undo } => task::run_done(&ctx, id, !undo),
                TaskCommands::Recur {
                    id,
                    frequency,
                    every,
                    clear,
                } => task::run_recur(&ctx, id, if clear { None } else { frequency }, every),
            },
            Commands::Rollover { column, category } => sync::run_rollover(&ctx, category, column),
            Commands::Queue(cmd) => match cmd {
                QueueCommands::List => queue::run_list(&ctx),
                QueueCommands::Clear => queue::run_clear(&ctx),
            },
            Commands::Sync { watch, timeout } => sync::run_sync(&ctx, watch, timeout),
            Commands::History { limit, id, since } => history::run_history(&ctx, limit, id, since),
            Commands::NextDue {
                due,
                frequency,
                every,
            } => history::run_next_due(&ctx, &due, &frequency, every),
        }
    }
}
