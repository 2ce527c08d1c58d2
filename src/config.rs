//! Configuration types for unitypackage-unpacker

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default cap on history entries
pub const DEFAULT_HISTORY_CAPACITY: usize = 512;

/// What the sequencer does when the scanner fails for a package
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanUnavailablePolicy {
    /// Extract anyway; the queue entry keeps its "unavailable" warning
    #[default]
    Proceed,
    /// Hold the item at the approval gate until the user decides
    RequireApproval,
}

/// Security scan behavior
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Scan packages before extracting (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Behavior when a scan fails (default: proceed)
    #[serde(default)]
    pub unavailable_policy: ScanUnavailablePolicy,

    /// Start scans for every item when a run begins, so later items are
    /// already scanned by the time they are reached (default: true)
    #[serde(default = "default_true")]
    pub prewarm: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            unavailable_policy: ScanUnavailablePolicy::default(),
            prewarm: true,
        }
    }
}

/// Extraction behavior
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Root output directory (default: "./extracted")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Extract each package into `output_dir/<package stem>` (default: true)
    #[serde(default = "default_true")]
    pub per_package_subdir: bool,

    /// Overwrite existing files (default: true)
    #[serde(default = "default_true")]
    pub overwrite: bool,

    /// Pause between items so transient UI state can settle (default: 250ms)
    #[serde(default = "default_settle_delay", with = "duration_millis")]
    pub settle_delay: Duration,

    /// Interval of the elapsed-time progress tick (default: 500ms)
    #[serde(default = "default_progress_tick", with = "duration_millis")]
    pub progress_tick: Duration,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            per_package_subdir: true,
            overwrite: true,
            settle_delay: default_settle_delay(),
            progress_tick: default_progress_tick(),
        }
    }
}

/// History ledger settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum number of entries kept (default: 512)
    #[serde(default = "default_history_capacity")]
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// Data storage settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path (default: "./unitypackage-unpacker.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for the [`Orchestrator`](crate::Orchestrator)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Security scanning
    #[serde(default)]
    pub scan: ScanConfig,

    /// Extraction output and pacing
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// History ledger
    #[serde(default)]
    pub history: HistoryConfig,

    /// Persistence
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.history.max_entries == 0 {
            return Err(Error::Config {
                message: "history capacity must be at least 1".into(),
                key: Some("history.max_entries".into()),
            });
        }
        if self.extraction.progress_tick.is_zero() {
            return Err(Error::Config {
                message: "progress tick interval must be non-zero".into(),
                key: Some("extraction.progress_tick".into()),
            });
        }
        Ok(())
    }
}

/// Options for a single sequencer run
///
/// Fields left as `None` fall back to the orchestrator's runtime settings.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunOptions {
    /// Override the scan-unavailable policy for this run only
    pub unavailable_policy: Option<ScanUnavailablePolicy>,
}

fn default_true() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./extracted")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./unitypackage-unpacker.db")
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_settle_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_progress_tick() -> Duration {
    Duration::from_millis(500)
}

/// Durations are stored as integer milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
