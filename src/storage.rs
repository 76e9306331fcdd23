//! Storage layer for boardsync
//!
//! Durable state lives under the board root:
//!
//! ```text
//! .boardsync.toml               # Configuration
//! .boardsync/
//!   local/                      # Device-local records
//!     offline_mutation_queue.json
//!   remote/                     # Bundled table store (one file per table)
//!     tasks.json
//!     notes.json
//!     categories.json
//!     history.json
//!     mirror_pairs.json
//! ```
//!
//! Records are reached through [`KeyValueStore`], so the queue and the
//! table store can run against disk ([`FileStore`]) or memory
//! ([`MemoryStore`]) without knowing which.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::lock::{self, DEFAULT_LOCK_TIMEOUT_MS};

/// Name of the configuration file at the board root
pub const CONFIG_FILE: &str = ".boardsync.toml";

/// Name of the data directory at the board root
pub const DATA_DIR: &str = ".boardsync";

/// Paths of a board's on-disk state
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    /// Device-local records (the mutation queue)
    pub fn local_dir(&self) -> PathBuf {
        self.data_dir().join("local")
    }

    /// Tables of the bundled remote store
    pub fn remote_dir(&self) -> PathBuf {
        self.data_dir().join("remote")
    }

    /// Create the data directories
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.local_dir())?;
        fs::create_dir_all(self.remote_dir())?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.data_dir().is_dir()
    }
}

/// Durable key/value records holding whole JSON documents
///
/// `update` is the only safe way to read-modify-write: implementations
/// must hold exclusive access to the key for the duration of `f`, and
/// must leave the stored value untouched when `f` fails.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;

    fn set(&self, key: &str, value: &Value) -> Result<()>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<Value>) -> Result<Value>,
    ) -> Result<()>;
}

/// Read a typed record, falling back to `T::default()` when absent
pub fn read_record<T>(store: &dyn KeyValueStore, key: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match store.get(key)? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(T::default()),
    }
}

/// Atomically mutate a typed record and return what `f` produced
pub fn update_record<T, R>(
    store: &dyn KeyValueStore,
    key: &str,
    f: impl FnOnce(&mut T) -> Result<R>,
) -> Result<R>
where
    T: DeserializeOwned + Serialize + Default,
{
    let mut f = Some(f);
    let mut output = None;

    store.update(key, &mut |current| {
        let mut record: T = match current {
            Some(value) => serde_json::from_value(value)?,
            None => T::default(),
        };
        let op = f
            .take()
            .ok_or_else(|| Error::OperationFailed(format!("record {key} updated twice")))?;
        output = Some(op(&mut record)?);
        Ok(serde_json::to_value(&record)?)
    })?;

    output.ok_or_else(|| Error::OperationFailed(format!("record {key} was not updated")))
}

fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !key.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!("invalid store key '{key}'")))
    }
}

/// One pretty-printed JSON file per key, written atomically under an
/// advisory lock
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    lock_timeout_ms: u64,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }

    pub fn with_lock_timeout(mut self, timeout_ms: u64) -> Self {
        self.lock_timeout_ms = timeout_ms;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }

    fn read_unlocked(path: &Path) -> Result<Option<Value>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write_unlocked(path: &Path, value: &Value) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        lock::write_atomic(path, json.as_bytes())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key)?;
        Self::read_unlocked(&path)
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.path_for(key)?;
        lock::with_lock(&path, self.lock_timeout_ms, || {
            Self::write_unlocked(&path, value)
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        lock::with_lock(&path, self.lock_timeout_ms, || {
            match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            }
        })
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<Value>) -> Result<Value>,
    ) -> Result<()> {
        let path = self.path_for(key)?;
        lock::with_lock(&path, self.lock_timeout_ms, || {
            let current = Self::read_unlocked(&path)?;
            let next = f(current)?;
            Self::write_unlocked(&path, &next)
        })
    }
}

/// In-process store for tests and ephemeral queues
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>> {
        self.records
            .lock()
            .map_err(|_| Error::OperationFailed("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.records()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.records()?.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.records()?.remove(key);
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<Value>) -> Result<Value>,
    ) -> Result<()> {
        let mut records = self.records()?;
        let next = f(records.get(key).cloned())?;
        records.insert(key.to_string(), next);
        Ok(())
    }
}
