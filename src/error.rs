//! Error types for unitypackage-unpacker
//!
//! This module provides error handling for the library, including:
//! - Per-item failure kinds the sequencer contains (missing file, corrupt archive, ...)
//! - Run-scoped conditions (cancellation, approval gate misuse)
//! - Ambient persistence and I/O errors
//! - Machine-readable error codes for the UI collaborator

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for unitypackage-unpacker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for unitypackage-unpacker
///
/// Each variant carries enough context to render a human-readable message
/// without consulting any other state.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "history.max_entries")
        key: Option<String>,
    },

    /// The package no longer exists on disk
    #[error("package not found on disk: {}", path.display())]
    MissingFile {
        /// The path that was expected to exist
        path: PathBuf,
    },

    /// The extraction engine recognized the archive as corrupt
    #[error("corrupt package {}: {reason}", path.display())]
    CorruptArchive {
        /// The package that could not be read
        path: PathBuf,
        /// What the engine reported
        reason: String,
    },

    /// Any other extraction engine failure (raw message preserved)
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// The security scanner threw or returned nothing
    #[error("security scan unavailable for {}: {reason}", path.display())]
    ScanUnavailable {
        /// The package whose scan failed
        path: PathBuf,
        /// Why the scan is unavailable
        reason: String,
    },

    /// The active sequence was cancelled by the user
    #[error("extraction sequence cancelled")]
    Cancelled,

    /// A second approval request was made while one is outstanding
    #[error("approval gate misuse: {0}")]
    ApprovalGateMisuse(String),

    /// An approval decision was submitted but nothing is waiting for one
    #[error("no approval request is pending")]
    NoPendingApproval,

    /// A sequence is already running on this orchestrator
    #[error("an extraction sequence is already running")]
    RunInProgress,

    /// The path is not in the queue
    #[error("package not queued: {}", path.display())]
    NotQueued {
        /// The path that was looked up
        path: PathBuf,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

impl Error {
    /// Machine-readable error code
    ///
    /// Stable identifiers the UI collaborator can switch on (for example to pick
    /// a localized message) without parsing `Display` output.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::MissingFile { .. } => "missing_file",
            Error::CorruptArchive { .. } => "corrupt_archive",
            Error::Extraction(_) => "extraction_failed",
            Error::ScanUnavailable { .. } => "scan_unavailable",
            Error::Cancelled => "cancelled",
            Error::ApprovalGateMisuse(_) => "approval_gate_misuse",
            Error::NoPendingApproval => "no_pending_approval",
            Error::RunInProgress => "run_in_progress",
            Error::NotQueued { .. } => "not_queued",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Other(_) => "internal_error",
        }
    }

    /// Whether this error only affects the item being processed
    ///
    /// The sequencer contains item-scoped errors and moves on to the next item.
    /// Everything else (cancellation, gate misuse) ends the run.
    pub fn is_item_scoped(&self) -> bool {
        !matches!(self, Error::Cancelled | Error::ApprovalGateMisuse(_))
    }
}
