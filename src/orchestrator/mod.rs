//! Orchestrator: the surface a UI collaborator drives.
//!
//! ## Submodules
//!
//! Methods on [`Orchestrator`] are organized by concern:
//! - `lifecycle`: construction, restore from persisted state, persistence
//! - `queue_ops`: enqueue, remove, clear, queue/history/stats snapshots
//! - `scanning`: background scans, scanning toggle, scan policy
//! - `sequencer`: the strictly sequential extraction run
//! - `control`: cancellation and approval decisions

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::approval::ApprovalGate;
use crate::config::{Config, ScanUnavailablePolicy};
use crate::engine::ExtractionEngine;
use crate::history::HistoryLedger;
use crate::notify::{NotificationSink, TracingNotifier};
use crate::progress::ProgressSink;
use crate::queue::PackageQueue;
use crate::scan::{MaliciousScanner, ScanCache};
use crate::settings::{PersistedState, SettingsStore};
use crate::types::{Event, ExtractionStats};

mod control;
mod lifecycle;
mod queue_ops;
mod scanning;
mod sequencer;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

/// External components the orchestrator delegates to
#[derive(Clone)]
pub struct Collaborators {
    /// Malicious-content analysis
    pub scanner: Arc<dyn MaliciousScanner>,
    /// Unpacks one package
    pub engine: Arc<dyn ExtractionEngine>,
    /// Loads and saves queue, history and statistics
    pub store: Arc<dyn SettingsStore>,
    /// Receives user-facing notices
    pub notifier: Arc<dyn NotificationSink>,
}

impl Collaborators {
    /// Collaborators with the default [`TracingNotifier`]
    pub fn new(
        scanner: Arc<dyn MaliciousScanner>,
        engine: Arc<dyn ExtractionEngine>,
        store: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            scanner,
            engine,
            store,
            notifier: Arc::new(TracingNotifier),
        }
    }

    /// Replace the notifier
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }
}

/// Settings that can change while the orchestrator runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Whether packages are scanned before extraction
    pub scanning_enabled: bool,
    /// What to do when a scan fails
    pub unavailable_policy: ScanUnavailablePolicy,
}

/// Queue, history and statistics, serialized through one lock
pub(crate) struct LibraryState {
    pub(crate) queue: PackageQueue,
    pub(crate) history: HistoryLedger,
    pub(crate) stats: ExtractionStats,
}

impl LibraryState {
    fn new(history_capacity: usize) -> Self {
        Self {
            queue: PackageQueue::new(),
            history: HistoryLedger::new(history_capacity),
            stats: ExtractionStats::default(),
        }
    }

    /// Snapshot for the settings store
    pub(crate) fn persisted(&self) -> PersistedState {
        PersistedState {
            queue: self.queue.entries().iter().map(|e| e.path.clone()).collect(),
            history: self.history.entries(),
            stats: self.stats.clone(),
        }
    }
}

/// Queue, scan and extraction orchestrator for Unity packages
///
/// Cheap to clone: every field is shared, so clones drive the same queue,
/// cache and event channel. A UI typically keeps one clone for commands and
/// hands another to the task that awaits [`run_queue`](Self::run_queue).
#[derive(Clone)]
pub struct Orchestrator {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Queue, history and statistics behind one async lock
    pub(crate) state: Arc<tokio::sync::Mutex<LibraryState>>,
    /// Memoized scan results
    pub(crate) scans: ScanCache,
    /// Single-slot approval channel
    pub(crate) approvals: ApprovalGate,
    /// Event broadcast
    pub(crate) events: ProgressSink,
    /// Package extraction
    pub(crate) engine: Arc<dyn ExtractionEngine>,
    /// Persistence
    pub(crate) store: Arc<dyn SettingsStore>,
    /// User-facing notices
    pub(crate) notifier: Arc<dyn NotificationSink>,
    /// Runtime-mutable settings
    pub(crate) runtime: Arc<RwLock<RuntimeSettings>>,
    /// Cancellation handle of the active run, if any
    pub(crate) active_run: Arc<Mutex<Option<CancellationToken>>>,
}

impl Orchestrator {
    /// Subscribe to orchestrator events
    ///
    /// Each subscriber receives every event emitted after it subscribed. A slow
    /// subscriber that falls more than the channel capacity behind receives a
    /// `Lagged` error and then continues with newer events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Events as a `Stream`
    pub fn events(&self) -> BroadcastStream<Event> {
        BroadcastStream::new(self.events.subscribe())
    }

    /// Current runtime settings
    pub async fn runtime_settings(&self) -> RuntimeSettings {
        *self.runtime.read().await
    }

    /// The configuration the orchestrator was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether an extraction run is in progress
    pub fn is_running(&self) -> bool {
        self.active_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn emit_event(&self, event: Event) {
        self.events.emit(event);
    }
}
