//! Database layer for unitypackage-unpacker
//!
//! Handles SQLite persistence for the queue, the history ledger and lifetime
//! statistics.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`history`]: History ledger rows
//! - [`state`]: Queue order, statistics and the [`SettingsStore`](crate::SettingsStore) impl

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

use crate::path::NormalizedPath;
use crate::types::HistoryEntry;

mod history;
mod migrations;
mod state;

/// History record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct HistoryRow {
    /// Normalized package path
    pub path: String,
    /// File name at the time of tracking
    pub file_name: String,
    /// Unix timestamp (ms) when first seen
    pub added_at: i64,
    /// Unix timestamp (ms) of the most recent enqueue
    pub last_seen_at: i64,
    /// Unix timestamp (ms) of the most recent extraction
    pub extracted_at: Option<i64>,
    /// Assets in the most recent extraction
    pub assets_extracted: i64,
    /// Files in the most recent extraction
    pub extracted_file_count: i64,
    /// Bytes in the most recent extraction
    pub extracted_bytes: i64,
    /// Duration of the most recent extraction
    pub extraction_duration_ms: i64,
    /// Output directory of the most recent extraction
    pub output_directory: Option<String>,
    /// Package size at last sighting
    pub file_size_bytes: i64,
}

impl From<HistoryRow> for HistoryEntry {
    fn from(row: HistoryRow) -> Self {
        Self {
            path: NormalizedPath::from_canonical(PathBuf::from(row.path)),
            file_name: row.file_name,
            added_utc: from_millis(row.added_at),
            last_seen_utc: from_millis(row.last_seen_at),
            extracted_utc: row.extracted_at.map(from_millis),
            assets_extracted: row.assets_extracted.max(0) as u64,
            extracted_file_count: row.extracted_file_count.max(0) as u64,
            extracted_bytes: row.extracted_bytes.max(0) as u64,
            extraction_duration_ms: row.extraction_duration_ms.max(0) as u64,
            output_directory: row.output_directory.map(PathBuf::from),
            file_size_bytes: row.file_size_bytes.max(0) as u64,
        }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Database handle for unitypackage-unpacker
pub struct Database {
    pool: SqlitePool,
}
