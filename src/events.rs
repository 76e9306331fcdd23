//! Board events: in-process notifications and JSONL output.
//!
//! Writers publish on an [`EventBus`]; views subscribe to refetch, and
//! the CLI can copy events to stdout or a file as JSON lines.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::{Error, Result};

pub const EVENT_SCHEMA_VERSION: &str = "boardsync.event.v1";

const EVENT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum EventDestination {
    Stdout,
    File(PathBuf),
}

impl EventDestination {
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        raw.and_then(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return None;
            }
            if trimmed == "-" {
                return Some(EventDestination::Stdout);
            }
            Some(EventDestination::File(PathBuf::from(trimmed)))
        })
    }

    pub fn open(&self) -> Result<EventSink> {
        match self {
            EventDestination::Stdout => Ok(EventSink::stdout()),
            EventDestination::File(path) => EventSink::file(path),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    NoteCreated,
    NoteUpdated,
    NoteDeleted,
    CategoryCreated,
    CategoryUpdated,
    CategoryDeleted,
    /// A write was queued instead of applied
    SavedOffline,
    /// Dependent views should reload the named table
    Refetch,
    SyncCompleted,
    MirrorCreated,
    MirrorSynced,
    MirrorDetached,
    RolloverCompleted,
}

/// A structured event with optional payload.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub schema_version: &'static str,
    pub event: EventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Event {
    pub fn new(event: EventKind) -> Self {
        Self {
            schema_version: EVENT_SCHEMA_VERSION,
            event,
            timestamp: Utc::now(),
            data: None,
        }
    }

    /// Attach a serializable payload to the event.
    pub fn with_data<T: Serialize>(mut self, data: T) -> Result<Self> {
        self.data = Some(serde_json::to_value(data)?);
        Ok(self)
    }
}

/// Fan-out of board events to any number of subscribers
///
/// Publishing never fails: events without subscribers are dropped, and
/// slow subscribers see `Lagged` rather than blocking writers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// Publish `kind` with a payload
    pub fn notify<T: Serialize>(&self, kind: EventKind, data: T) {
        match Event::new(kind).with_data(data) {
            Ok(event) => self.publish(event),
            Err(err) => tracing::warn!(?kind, error = %err, "dropping unserializable event"),
        }
    }

    /// Ask views of `table` to reload
    pub fn refetch(&self, table: crate::remote::Table) {
        self.notify(EventKind::Refetch, serde_json::json!({ "table": table }));
    }
}

/// Event sink that writes JSONL output to a destination.
pub struct EventSink {
    writer: Box<dyn Write + Send>,
}

impl EventSink {
    pub fn stdout() -> Self {
        Self {
            writer: Box::new(std::io::stdout()),
        }
    }

    /// Emit events to a file, creating it if necessary.
    pub fn file(path: &Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: Box::new(file),
        })
    }

    #[cfg(test)]
    fn buffer(buffer: std::sync::Arc<std::sync::Mutex<Vec<u8>>>) -> Self {
        struct Shared(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        Self {
            writer: Box::new(Shared(buffer)),
        }
    }

    /// Write a single event as JSONL.
    pub fn emit(&mut self, event: &Event) -> Result<()> {
        let serialized = serde_json::to_vec(event)?;
        self.writer.write_all(&serialized)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush().map_err(Error::Io)?;
        Ok(())
    }

    /// Write every event already buffered on `rx`; returns the count
    pub fn drain(&mut self, rx: &mut broadcast::Receiver<Event>) -> Result<usize> {
        let mut written = 0;
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    self.emit(&event)?;
                    written += 1;
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event sink lagged");
                }
                Err(_) => return Ok(written),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn destination_parse() {
        assert!(EventDestination::parse(None).is_none());
        assert!(EventDestination::parse(Some("  ")).is_none());
        assert!(matches!(
            EventDestination::parse(Some("-")),
            Some(EventDestination::Stdout)
        ));
        assert!(matches!(
            EventDestination::parse(Some("events.jsonl")),
            Some(EventDestination::File(_))
        ));
    }

    #[test]
    fn drain_writes_jsonl() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.notify(EventKind::SavedOffline, serde_json::json!({"operation_id": "op1"}));
        bus.refetch(crate::remote::Table::Tasks);

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let mut sink = EventSink::buffer(Arc::clone(&buffer));
        assert_eq!(sink.drain(&mut rx).unwrap(), 2);

        let text = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines[0]["event"], "saved_offline");
        assert_eq!(lines[0]["schema_version"], EVENT_SCHEMA_VERSION);
        assert_eq!(lines[1]["event"], "refetch");
        assert_eq!(lines[1]["data"]["table"], "tasks");
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        EventBus::new().notify(EventKind::TaskCreated, serde_json::json!({}));
    }
}
