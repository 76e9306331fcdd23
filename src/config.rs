//! Configuration loading and management
//!
//! Handles parsing of `.boardsync.toml` configuration files.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Board layout used by recurring-task mirroring
    #[serde(default)]
    pub board: BoardConfig,

    /// Replay scheduling
    #[serde(default)]
    pub sync: SyncConfig,

    /// Durable queue settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Audit trail settings
    #[serde(default)]
    pub history: HistoryConfig,
}

/// Board layout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Category that holds the daily board
    #[serde(default = "default_daily_category")]
    pub daily_category: String,

    /// Column (inside the daily category) holding recurring tasks
    #[serde(default = "default_recurring_column")]
    pub recurring_column: String,

    /// Internal tag carried by the daily-side copy of a mirrored task
    #[serde(default = "default_marker_tag")]
    pub marker_tag: String,
}

fn default_daily_category() -> String {
    "daily".to_string()
}

fn default_recurring_column() -> String {
    "recurring".to_string()
}

fn default_marker_tag() -> String {
    "recurring-mirror".to_string()
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            daily_category: default_daily_category(),
            recurring_column: default_recurring_column(),
            marker_tag: default_marker_tag(),
        }
    }
}

/// Replay scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Delay between poll ticks after success (one backoff unit)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on the backoff delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Use a background trigger instead of polling when one is available
    #[serde(default = "default_true")]
    pub prefer_background: bool,
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            prefer_background: true,
        }
    }
}

impl SyncConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Durable queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Fixed key of the queue record
    #[serde(default = "default_queue_key")]
    pub key: String,
}

fn default_queue_key() -> String {
    crate::queue::DEFAULT_QUEUE_KEY.to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            key: default_queue_key(),
        }
    }
}

/// Audit trail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Record a history entry after each successful direct write
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load configuration from a `.boardsync.toml` file
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a board root, or return defaults when the
    /// file is missing
    pub fn load_from_root(root: &Path) -> crate::error::Result<Self> {
        let config_path = root.join(crate::storage::CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> crate::error::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        self.board.validate()?;
        self.sync.validate()?;
        if self.queue.key.trim().is_empty() {
            return Err(crate::error::Error::InvalidConfig(
                "queue.key cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl BoardConfig {
    fn validate(&self) -> crate::error::Result<()> {
        for (field, value) in [
            ("board.daily_category", &self.daily_category),
            ("board.recurring_column", &self.recurring_column),
            ("board.marker_tag", &self.marker_tag),
        ] {
            if value.trim().is_empty() {
                return Err(crate::error::Error::InvalidConfig(format!(
                    "{field} cannot be empty"
                )));
            }
        }
        if self.marker_tag.chars().any(char::is_whitespace) {
            return Err(crate::error::Error::InvalidConfig(format!(
                "board.marker_tag '{}' cannot contain whitespace",
                self.marker_tag
            )));
        }
        Ok(())
    }
}

impl SyncConfig {
    fn validate(&self) -> crate::error::Result<()> {
        if self.base_delay_ms == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "sync.base_delay_ms must be > 0".to_string(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(crate::error::Error::InvalidConfig(format!(
                "sync.max_delay_ms ({}) must be >= sync.base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        Ok(())
    }
}
