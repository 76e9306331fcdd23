//! boardsync - offline-capable task board core
//!
//! This library provides the write path of a personal task and notes
//! board that keeps working while disconnected from its backing store,
//! and keeps recurring tasks mirrored between a project board and the
//! daily board.
//!
//! # Core Concepts
//!
//! - **Mutation queue**: durable FIFO of writes that could not be applied
//! - **Sync dispatcher**: replays the queue with exponential backoff
//! - **Repositories**: validate, write or queue, record history, signal refetch
//! - **Mirror coordinator**: pairs a recurring task with its daily copy and
//!   rolls both over to the next occurrence
//! - **Recurrence**: next-due arithmetic anchored at the previous due date
//!
//! # Module Organization
//!
//! - `board`: wiring of all services for one board
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `.boardsync.toml`
//! - `connectivity`: online/offline state and reconnect triggers
//! - `dispatcher`: queue replay and its scheduling loop
//! - `error`: Error types and result aliases
//! - `events`: refetch signals and advisory notices
//! - `history`: audit trail of direct writes
//! - `lock`: File locking and atomic writes
//! - `mirror`: recurring-task mirroring and rollover
//! - `model`: tasks, notes, categories and their patches
//! - `queue`: the durable mutation queue
//! - `recurrence`: next-due calculation
//! - `remote`: the remote table store collaborator
//! - `repository`: entity repositories
//! - `storage`: durable key/value records and on-disk layout

pub mod board;
pub mod cli;
pub mod config;
pub mod connectivity;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod history;
pub mod lock;
pub mod mirror;
pub mod model;
pub mod output;
pub mod queue;
pub mod recurrence;
pub mod remote;
pub mod repository;
pub mod storage;

pub use board::Board;
pub use error::{Error, Result};
