//! Command output: a human report on stdout, or one JSON envelope
//!
//! Every command builds a [`Report`] for people and hands a serializable
//! payload to [`emit`] for `--json`. Repository writes and replay passes
//! have their own report builders so every command words "saved offline"
//! and "still queued" the same way.

use serde::Serialize;

use crate::dispatcher::ReplaySummary;
use crate::error::{Error, Result};
use crate::repository::WriteOutcome;

pub const SCHEMA_VERSION: &str = "boardsync.v1";

/// Subcommand groups whose second word is part of the command name
const COMMAND_GROUPS: [&str; 2] = ["task", "queue"];

/// Global flags that consume the following argument
const VALUE_FLAGS: [&str; 2] = ["--dir", "--events"];

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Summary,
    Details,
    Warnings,
    NextSteps,
}

impl Section {
    const ORDER: [Section; 4] = [
        Section::Summary,
        Section::Details,
        Section::Warnings,
        Section::NextSteps,
    ];

    fn title(self) -> &'static str {
        match self {
            Section::Summary => "Summary",
            Section::Details => "Details",
            Section::Warnings => "Warnings",
            Section::NextSteps => "Next steps",
        }
    }
}

/// Human-readable result of a command
#[derive(Debug, Clone)]
pub struct Report {
    header: String,
    items: Vec<(Section, String)>,
}

impl Report {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            items: Vec::new(),
        }
    }

    /// `key: value` line in the summary; an empty value prints the key alone
    pub fn field(&mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> &mut Self {
        let (key, value) = (key.as_ref(), value.as_ref());
        let text = if value.is_empty() {
            key.to_string()
        } else {
            format!("{key}: {value}")
        };
        self.items.push((Section::Summary, text));
        self
    }

    pub fn line(&mut self, text: impl Into<String>) -> &mut Self {
        self.items.push((Section::Details, text.into()));
        self
    }

    pub fn warn(&mut self, text: impl Into<String>) -> &mut Self {
        self.items.push((Section::Warnings, text.into()));
        self
    }

    /// Suggest a follow-up command
    pub fn next(&mut self, command: impl Into<String>) -> &mut Self {
        self.items.push((Section::NextSteps, command.into()));
        self
    }

    fn entries(&self, section: Section) -> Vec<String> {
        self.items
            .iter()
            .filter(|(s, _)| *s == section)
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// Header, then each non-empty section as a titled bullet list
    pub fn render(&self) -> String {
        let mut out = self.header.clone();
        for section in Section::ORDER {
            let entries = self.entries(section);
            if entries.is_empty() {
                continue;
            }
            out.push_str("\n\n");
            out.push_str(section.title());
            out.push(':');
            for entry in entries {
                out.push_str("\n- ");
                out.push_str(&entry);
            }
        }
        out
    }

    /// Report for a repository write
    ///
    /// `describe` fills in the record when the write was applied. A
    /// queued write names its operation and points at `boardsync sync`.
    pub fn for_write<T>(
        header: &str,
        outcome: &WriteOutcome<T>,
        describe: impl FnOnce(&mut Report, &T),
    ) -> Self {
        match outcome {
            WriteOutcome::Applied { record } => {
                let mut report = Report::new(header);
                describe(&mut report, record);
                report
            }
            WriteOutcome::SavedOffline { operation_id } => {
                let mut report = Report::new(format!("{header} (saved offline)"));
                report.field("Operation", operation_id).next("boardsync sync");
                report
            }
        }
    }

    /// Counts of a replay pass plus what is still queued
    pub fn for_replay(summary: &ReplaySummary, remaining: usize) -> Self {
        let header = if summary.skipped {
            "Sync already running"
        } else if remaining == 0 {
            "Sync complete"
        } else {
            "Sync incomplete"
        };
        let mut report = Report::new(header);
        report
            .field("Applied", summary.succeeded.to_string())
            .field("Failed", summary.failed.to_string());
        if summary.deferred > 0 {
            report.field("Deferred", summary.deferred.to_string());
        }
        report.field("Remaining", remaining.to_string());
        if remaining > 0 {
            report
                .warn("some operations could not be applied; they stay queued")
                .next("boardsync queue list");
        }
        report
    }
}

#[derive(Serialize)]
struct Envelope<'a, B: Serialize> {
    schema_version: &'static str,
    command: &'a str,
    status: &'static str,
    #[serde(flatten)]
    body: B,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    next_steps: Vec<String>,
}

#[derive(Serialize)]
struct Data<'a, T: Serialize> {
    data: &'a T,
}

#[derive(Serialize)]
struct Failure {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    code: i32,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

fn print_json<B: Serialize>(envelope: &Envelope<'_, B>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(envelope)?);
    Ok(())
}

/// Print a successful command's result
pub fn emit<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    report: &Report,
) -> Result<()> {
    if options.json {
        return print_json(&Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "success",
            body: Data { data },
            warnings: report.entries(Section::Warnings),
            next_steps: report.entries(Section::NextSteps),
        });
    }
    if !options.quiet {
        println!("{}", report.render());
    }
    Ok(())
}

/// Print a failed command's error; JSON goes to stdout, text to stderr
pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    let next_steps = error_next_steps(err);
    if json {
        return print_json(&Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "error",
            body: Failure {
                error: ErrorBody {
                    message: err.to_string(),
                    code: err.exit_code(),
                    kind: if err.is_user_error() {
                        "user_error"
                    } else {
                        "operation_failed"
                    },
                    details: err.details(),
                },
            },
            warnings: Vec::new(),
            next_steps,
        });
    }

    eprintln!("error: {err}");
    if let Some(hint) = next_steps.first() {
        eprintln!("hint: {hint}");
    }
    Ok(())
}

fn error_next_steps(err: &Error) -> Vec<String> {
    let step = match err {
        Error::NotFound { entity, .. } if entity == "task" => "boardsync task list",
        Error::InvalidConfig(_) => "fix .boardsync.toml then retry",
        Error::OperationFailed(message) if message.contains("boardsync init") => "boardsync init",
        Error::LockFailed(_) => "retry once the other boardsync process finishes",
        Error::Remote(_) => "boardsync queue list",
        _ => return Vec::new(),
    };
    vec![step.to_string()]
}

/// Command name for error envelopes, read from raw arguments
///
/// Used before clap has parsed anything, so it must cope with any input.
/// `task` and `queue` take their subcommand along (`task add`).
pub fn command_name<I>(args: I) -> String
where
    I: IntoIterator<Item = String>,
{
    let mut words = Vec::new();
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        if VALUE_FLAGS.contains(&arg.as_str()) {
            args.next();
        } else if !arg.starts_with('-') {
            words.push(arg);
            if words.len() == 2 {
                break;
            }
        }
    }

    let mut words = words.into_iter();
    match words.next() {
        None => "boardsync".to_string(),
        Some(group) if COMMAND_GROUPS.contains(&group.as_str()) => match words.next() {
            Some(sub) => format!("{group} {sub}"),
            None => group,
        },
        Some(command) => command,
    }
}
