//! Startup, restore and shutdown coordination.

use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

use crate::approval::ApprovalGate;
use crate::config::Config;
use crate::error::Result;
use crate::progress::ProgressSink;
use crate::queue::PackageFile;
use crate::scan::ScanCache;
use crate::settings::PersistedState;

use super::{Collaborators, LibraryState, Orchestrator, RuntimeSettings};

impl Orchestrator {
    /// Create an orchestrator and restore the previous session
    ///
    /// Loads persisted history and statistics, then re-queues persisted queue
    /// entries whose files still exist. Entries that vanished since the last
    /// session are dropped (their history survives).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the settings store
    /// cannot be read.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use unitypackage_unpacker::*;
    /// # async fn example(engine: Arc<dyn ExtractionEngine>, source: Arc<dyn PackageEntrySource>) -> Result<()> {
    /// let config = Config::default();
    /// let db = Database::new(&config.persistence.database_path).await?;
    /// let collaborators = Collaborators::new(
    ///     Arc::new(PatternScanner::new(source)),
    ///     engine,
    ///     Arc::new(db),
    /// );
    /// let orchestrator = Orchestrator::new(config, collaborators).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(config: Config, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let runtime = RuntimeSettings {
            scanning_enabled: config.scan.enabled,
            unavailable_policy: config.scan.unavailable_policy,
        };

        let orchestrator = Self {
            state: Arc::new(tokio::sync::Mutex::new(LibraryState::new(
                config.history.max_entries,
            ))),
            scans: ScanCache::new(collaborators.scanner),
            approvals: ApprovalGate::new(),
            events: ProgressSink::new(),
            engine: collaborators.engine,
            store: collaborators.store,
            notifier: collaborators.notifier,
            runtime: Arc::new(RwLock::new(runtime)),
            active_run: Arc::new(Mutex::new(None)),
            config: Arc::new(config),
        };

        if let Some(persisted) = orchestrator.store.load().await? {
            orchestrator.restore(persisted).await;
        }

        tracing::info!(
            scanner = orchestrator.scans.scanner_name(),
            engine = orchestrator.engine.name(),
            scanning_enabled = runtime.scanning_enabled,
            "orchestrator ready"
        );

        Ok(orchestrator)
    }

    /// Rebuild in-memory state from a persisted snapshot
    async fn restore(&self, persisted: PersistedState) {
        // Probe outside the lock; restored entries keep their queue order
        let mut files = Vec::with_capacity(persisted.queue.len());
        let mut dropped = 0usize;
        for path in &persisted.queue {
            match PackageFile::probe(&path.as_path().to_string_lossy()).await {
                Some(file) => files.push(file),
                None => dropped += 1,
            }
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.history.restore(persisted.history);
        state.stats = persisted.stats;
        let (outcome, _) = state.queue.enqueue(files, &mut state.history);

        tracing::info!(
            queued = outcome.added,
            dropped_missing = dropped,
            history = state.history.len(),
            "restored previous session"
        );
    }

    /// Save the current queue, history and statistics
    ///
    /// Failures are logged and swallowed: losing a snapshot must never abort
    /// a run.
    pub(crate) async fn persist(&self, snapshot: PersistedState) {
        if let Err(e) = self.store.save(&snapshot).await {
            tracing::warn!(error = %e, "failed to persist state");
        }
    }

    /// Snapshot the library state and persist it
    pub(crate) async fn persist_current(&self) {
        let snapshot = self.state.lock().await.persisted();
        self.persist(snapshot).await;
    }

    /// Cancel any active run and write a final snapshot
    ///
    /// The orchestrator stays usable afterwards; this only brings it to a
    /// quiescent, persisted state.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating shutdown");

        if self.cancel() {
            tracing::info!("Cancelled active extraction run");
        }
        self.scans.invalidate_all();
        self.persist_current().await;

        tracing::info!("Shutdown complete");
    }
}
