//! Background scanning, the scanning toggle and scan policy.

use crate::config::ScanUnavailablePolicy;
use crate::path::NormalizedPath;
use crate::types::{Event, ScanOutcome, SecurityStatus};

use super::Orchestrator;

impl Orchestrator {
    /// Start background scans for every queued package not yet scanned
    ///
    /// Returns how many scans were started. Does nothing while scanning is
    /// disabled. Results are written into the queue entries as they arrive.
    pub async fn prewarm_scans(&self) -> usize {
        let Some(generation) = self.scan_generation().await else {
            return 0;
        };

        let paths = self.state.lock().await.queue.idle_paths();
        let mut started = 0;
        for path in paths {
            if self.scans.cached(&path).is_none() && !self.scans.is_scanning(&path) {
                self.spawn_background_scan(path, generation);
                started += 1;
            }
        }
        tracing::debug!(started, "prewarmed scans");
        started
    }

    /// Turn scanning on or off
    ///
    /// Disabling drops every cached result and aborts in-flight scans, and
    /// clears the security text on all queue entries. Scans requested before
    /// the switch can neither start nor publish afterwards. Re-enabling starts
    /// fresh background scans when prewarming is configured.
    pub async fn set_scanning_enabled(&self, enabled: bool) {
        {
            let mut runtime = self.runtime.write().await;
            if runtime.scanning_enabled == enabled {
                return;
            }
            runtime.scanning_enabled = enabled;
            if !enabled {
                // Under the write lock so no caller can read a generation while disabled
                self.scans.invalidate_all();
            }
        }

        if !enabled {
            self.state.lock().await.queue.reset_security();
        }

        self.emit_event(Event::ScanningToggled { enabled });
        tracing::info!(enabled, "security scanning toggled");

        if enabled && self.config.scan.prewarm {
            self.prewarm_scans().await;
        }
    }

    /// Change what the sequencer does when a scan fails
    pub async fn set_scan_unavailable_policy(&self, policy: ScanUnavailablePolicy) {
        self.runtime.write().await.unavailable_policy = policy;
        tracing::info!(?policy, "scan-unavailable policy changed");
    }

    /// Security status of a package as the scan cache sees it
    pub fn scan_status(&self, path: &NormalizedPath) -> SecurityStatus {
        if self.scans.is_scanning(path) {
            return SecurityStatus::Scanning;
        }
        self.scans
            .cached(path)
            .map(|outcome| outcome.status())
            .unwrap_or(SecurityStatus::NotScanned)
    }

    /// Scan generation to tag new scans with, or `None` while scanning is off
    pub(crate) async fn scan_generation(&self) -> Option<u64> {
        let runtime = self.runtime.read().await;
        runtime.scanning_enabled.then(|| self.scans.generation())
    }

    /// Scan a queued package in the background and publish the result
    pub(crate) fn spawn_background_scan(&self, path: NormalizedPath, generation: u64) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            if !orchestrator.mark_scanning(&path, generation).await {
                return;
            }
            // None when scanning was switched off in the meantime; the reset wins
            if let Some(outcome) = orchestrator.scans.ensure_scan_in(&path, generation).await {
                orchestrator
                    .publish_scan_outcome(&path, &outcome, generation)
                    .await;
            }
        });
    }

    /// Flag the entry as scanning unless the cache moved past `generation`
    pub(crate) async fn mark_scanning(&self, path: &NormalizedPath, generation: u64) -> bool {
        {
            let mut state = self.state.lock().await;
            if self.scans.generation() != generation {
                return false;
            }
            state.queue.mark_scanning(path);
        }
        self.emit_event(Event::ScanStarted { path: path.clone() });
        true
    }

    /// Write a scan outcome into the queue entry and emit `ScanCompleted`
    ///
    /// Returns false, leaving the entry alone, if the cache was invalidated
    /// since `generation`.
    pub(crate) async fn publish_scan_outcome(
        &self,
        path: &NormalizedPath,
        outcome: &ScanOutcome,
        generation: u64,
    ) -> bool {
        {
            let mut state = self.state.lock().await;
            if self.scans.generation() != generation {
                return false;
            }
            state.queue.apply_security_result(path, outcome);
        }

        let detail = match outcome {
            ScanOutcome::Completed(result) => result.summary(),
            ScanOutcome::Failed(reason) => reason.clone(),
        };
        self.emit_event(Event::ScanCompleted {
            path: path.clone(),
            status: outcome.status(),
            detail,
        });
        true
    }
}
