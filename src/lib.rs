//! # unitypackage-unpacker
//!
//! Orchestration core for a Unity package unpacker: a deduplicated package
//! queue, memoized malicious-content scanning, a strictly sequential
//! extraction run with a human approval gate, progress reporting and a capped
//! history ledger.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - No UI; a UI collaborator drives the [`Orchestrator`]
//!   and subscribes to its events
//! - **Pluggable** - Scanning, extraction and persistence sit behind traits
//!   ([`MaliciousScanner`], [`ExtractionEngine`], [`SettingsStore`])
//! - **Fail soft** - A bad package fails on its own; the run continues
//! - **Never silently unsafe** - A failed scan is reported as unavailable,
//!   never as clean
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use unitypackage_unpacker::*;
//!
//! # async fn example(engine: Arc<dyn ExtractionEngine>, source: Arc<dyn PackageEntrySource>) -> Result<()> {
//! let config = Config::default();
//! let db = Database::new(&config.persistence.database_path).await?;
//! let orchestrator = Orchestrator::new(
//!     config,
//!     Collaborators::new(Arc::new(PatternScanner::new(source)), engine, Arc::new(db)),
//! )
//! .await?;
//!
//! // Subscribe to events
//! let mut events = orchestrator.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//! });
//!
//! orchestrator.enqueue(["/downloads/Tools.unitypackage"]).await?;
//! let summary = orchestrator.run_queue().await?;
//! println!("{} extracted", summary.count(ItemState::Succeeded));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Approval gate for risky packages
pub mod approval;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Extraction engine seam
pub mod engine;
/// Error types
pub mod error;
/// History ledger
pub mod history;
/// User-facing notices
pub mod notify;
/// Orchestrator (decomposed into focused submodules)
pub mod orchestrator;
/// Path normalization
pub mod path;
/// Progress events and elapsed-time ticker
pub mod progress;
/// Package queue
pub mod queue;
/// Malicious-content scanning
pub mod scan;
/// Persistence seam
pub mod settings;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use approval::{ApprovalGate, ApprovalRequest, PendingApproval};
pub use config::{Config, RunOptions, ScanUnavailablePolicy};
pub use db::Database;
pub use engine::{AssetProgress, EngineOutput, ExtractOptions, ExtractionEngine, ProgressFn};
pub use error::{DatabaseError, Error, Result};
pub use notify::{NotificationSink, TracingNotifier};
pub use orchestrator::{Collaborators, Orchestrator, RuntimeSettings};
pub use path::{NormalizedPath, normalize_path};
pub use scan::{MaliciousScanner, PackageEntrySource, PatternScanner, ScanCache, TextEntry, ThreatRule};
pub use settings::{MemorySettingsStore, PersistedState, SettingsStore};
pub use types::{
    EnqueueOutcome, Event, ExtractionItem, ExtractionSnapshot, ExtractionStats, FailureKind,
    HistoryEntry, ItemReport, ItemState, Phase, ProgressUpdate, QueueEntry, RunSummary,
    ScanOutcome, ScanResult, SecurityStatus, Severity, Threat, ThreatMatch, ThreatType,
};

/// Helper function to run the orchestrator until a termination signal arrives.
///
/// Waits for Ctrl+C (and SIGTERM on Unix), then calls the orchestrator's
/// `shutdown()` method, which cancels any active run and persists state.
///
/// # Example
///
/// ```no_run
/// use unitypackage_unpacker::{Orchestrator, run_with_shutdown};
///
/// # async fn example(orchestrator: Orchestrator) {
/// let runner = orchestrator.clone();
/// tokio::spawn(async move { runner.run_queue().await });
///
/// run_with_shutdown(orchestrator).await;
/// # }
/// ```
pub async fn run_with_shutdown(orchestrator: Orchestrator) {
    wait_for_signal().await;
    orchestrator.shutdown().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
                    } else {
                        tracing::info!("Received SIGINT signal (Ctrl+C)");
                    }
                }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for Ctrl+C only");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
