//! Queue operations: enqueue, remove, clear and read-only snapshots.

use crate::error::{Error, Result};
use crate::path::normalize_path;
use crate::queue::PackageFile;
use crate::types::{EnqueueOutcome, Event, ExtractionStats, HistoryEntry, QueueEntry};

use super::Orchestrator;

impl Orchestrator {
    /// Add packages to the queue
    ///
    /// Each raw path (plain path, quoted path or `file://` URI) is normalized
    /// and probed on disk. Paths that are not existing regular files count as
    /// `rejected`; paths already queued (or repeated within `paths`) count as
    /// `already_queued`. Enqueueing the same set twice is a no-op the second
    /// time.
    ///
    /// Every newly queued package is recorded in the history ledger, and when
    /// scan prewarming is on a background scan is started for it.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use unitypackage_unpacker::*;
    /// # async fn example(orchestrator: Orchestrator) -> Result<()> {
    /// let outcome = orchestrator
    ///     .enqueue(["/downloads/Tools.unitypackage", "file:///downloads/Shaders.unitypackage"])
    ///     .await?;
    /// println!("{} added, {} already queued", outcome.added, outcome.already_queued);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn enqueue<I, S>(&self, paths: I) -> Result<EnqueueOutcome>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        // Probe before taking the lock so slow disks don't stall other callers
        let mut files = Vec::new();
        let mut rejected = 0;
        for raw in paths {
            match PackageFile::probe(raw.as_ref()).await {
                Some(file) => files.push(file),
                None => {
                    tracing::debug!(path = raw.as_ref(), "rejected non-existent package");
                    rejected += 1;
                }
            }
        }

        let (mut outcome, added, snapshot) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let (outcome, added) = state.queue.enqueue(files, &mut state.history);
            (outcome, added, state.persisted())
        };
        outcome.rejected = rejected;

        for entry in &added {
            self.emit_event(Event::Queued {
                path: entry.path.clone(),
                name: entry.display_name.clone(),
            });
        }

        tracing::info!(
            added = outcome.added,
            already_queued = outcome.already_queued,
            rejected = outcome.rejected,
            "enqueue request processed"
        );

        if outcome.added > 0 {
            self.persist(snapshot).await;

            if self.config.scan.prewarm
                && let Some(generation) = self.scan_generation().await
            {
                for entry in &added {
                    self.spawn_background_scan(entry.path.clone(), generation);
                }
            }
        }

        Ok(outcome)
    }

    /// Remove one package from the queue
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotQueued`] if the path is not queued.
    pub async fn remove(&self, raw_path: &str) -> Result<QueueEntry> {
        let path = normalize_path(raw_path);
        let (removed, snapshot) = {
            let mut state = self.state.lock().await;
            let removed = state.queue.remove(&path);
            (removed, state.persisted())
        };

        let removed = removed.ok_or_else(|| Error::NotQueued {
            path: path.as_path().to_path_buf(),
        })?;

        self.emit_event(Event::Removed { path: path.clone() });
        self.persist(snapshot).await;
        tracing::debug!(path = %path, "removed from queue");

        Ok(removed)
    }

    /// Remove every package from the queue
    ///
    /// History is untouched. Returns the number of removed entries.
    pub async fn clear_queue(&self) -> usize {
        let (removed, snapshot) = {
            let mut state = self.state.lock().await;
            let removed = state.queue.clear();
            (removed, state.persisted())
        };

        self.emit_event(Event::QueueCleared { removed });
        if removed > 0 {
            self.persist(snapshot).await;
        }
        tracing::info!(removed, "queue cleared");

        removed
    }

    /// Snapshot of the queue, in order
    pub async fn queue(&self) -> Vec<QueueEntry> {
        self.state.lock().await.queue.entries().to_vec()
    }

    /// Snapshot of the history ledger, oldest first
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.state.lock().await.history.entries()
    }

    /// Lifetime extraction statistics
    pub async fn stats(&self) -> ExtractionStats {
        self.state.lock().await.stats.clone()
    }
}
