//! Extraction sequencer: strictly sequential scan/approve/extract loop.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::approval::ApprovalRequest;
use crate::config::{RunOptions, ScanUnavailablePolicy};
use crate::engine::ExtractOptions;
use crate::error::{Error, Result};
use crate::progress::{ProgressTicker, format_elapsed};
use crate::types::{
    Event, ExtractionItem, ExtractionSnapshot, FailureKind, ItemReport, ItemState, Phase,
    ProgressUpdate, RunSummary, ScanOutcome,
};

use super::Orchestrator;

/// Terminal result of one item, before timing is attached
struct ItemOutcome {
    state: ItemState,
    failure: Option<FailureKind>,
    message: Option<String>,
    snapshot: Option<ExtractionSnapshot>,
}

impl ItemOutcome {
    fn succeeded(snapshot: ExtractionSnapshot) -> Self {
        Self {
            state: ItemState::Succeeded,
            failure: None,
            message: None,
            snapshot: Some(snapshot),
        }
    }

    fn failed(kind: FailureKind, message: String) -> Self {
        Self {
            state: ItemState::Failed,
            failure: Some(kind),
            message: Some(message),
            snapshot: None,
        }
    }

    fn skipped() -> Self {
        Self {
            state: ItemState::SkippedByUser,
            failure: None,
            message: None,
            snapshot: None,
        }
    }

    fn cancelled() -> Self {
        Self {
            state: ItemState::Cancelled,
            failure: None,
            message: None,
            snapshot: None,
        }
    }
}

impl Orchestrator {
    /// Extract every idle queue entry, in queue order
    pub async fn run_queue(&self) -> Result<RunSummary> {
        let items = self
            .state
            .lock()
            .await
            .queue
            .idle_paths()
            .into_iter()
            .map(ExtractionItem::queued)
            .collect();
        self.run_sequence(items).await
    }

    /// Extract `items` one at a time using the current runtime settings
    pub async fn run_sequence(&self, items: Vec<ExtractionItem>) -> Result<RunSummary> {
        self.run_sequence_with(items, RunOptions::default()).await
    }

    /// Extract `items` one at a time
    ///
    /// Each item moves through scan, optional approval and extraction before
    /// the next one starts. Per-item failures (missing file, corrupt archive,
    /// engine errors) are recorded in the summary and the run continues.
    /// Cancellation stops the current item, leaves later items `Pending` and
    /// returns a summary with `cancelled` set.
    ///
    /// # Errors
    ///
    /// - [`Error::RunInProgress`] if another run is active
    /// - [`Error::ApprovalGateMisuse`] if the approval gate was driven
    ///   concurrently (the run is aborted)
    pub async fn run_sequence_with(
        &self,
        items: Vec<ExtractionItem>,
        options: RunOptions,
    ) -> Result<RunSummary> {
        let slot = self.begin_run()?;
        let cancel = slot.token.clone();

        let policy = match options.unavailable_policy {
            Some(policy) => policy,
            None => self.runtime.read().await.unavailable_policy,
        };
        let names: Vec<String> = items.iter().map(|i| i.path.display_name()).collect();
        let mut summary = RunSummary {
            items: items
                .iter()
                .zip(&names)
                .map(|(item, name)| ItemReport {
                    path: item.path.clone(),
                    name: name.clone(),
                    state: ItemState::Pending,
                    failure: None,
                    message: None,
                    snapshot: None,
                    elapsed_ms: 0,
                })
                .collect(),
            cancelled: false,
        };

        tracing::info!(items = items.len(), ?policy, "extraction run started");
        self.events.progress(ProgressUpdate {
            phase: Phase::Starting,
            current_package: None,
            asset_path: None,
            assets_extracted: 0,
            remaining: items.len(),
            next_package: names.first().cloned(),
            elapsed_text: format_elapsed(Duration::ZERO),
        });

        self.prewarm_run(&items).await;

        for (index, item) in items.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let name = &names[index];
            let remaining = items.len() - index - 1;
            let ticker = ProgressTicker::start(
                self.events.clone(),
                ProgressUpdate {
                    phase: Phase::Scanning,
                    current_package: Some(name.clone()),
                    asset_path: None,
                    assets_extracted: 0,
                    remaining,
                    next_package: names.get(index + 1).cloned(),
                    elapsed_text: format_elapsed(Duration::ZERO),
                },
                self.config.extraction.progress_tick,
                &cancel,
            );

            let outcome = match self.process_item(item, name, policy, &cancel, &ticker).await {
                Ok(outcome) => outcome,
                Err(Error::Cancelled) => ItemOutcome::cancelled(),
                Err(e) if e.is_item_scoped() => {
                    let kind = failure_kind(&e);
                    self.release_item(item).await;
                    tracing::warn!(path = %item.path, error = %e, ?kind, "item failed");
                    ItemOutcome::failed(kind, e.to_string())
                }
                Err(e) => {
                    // Run-scoped failure: release the item and abort the run
                    ticker.stop().await;
                    self.release_item(item).await;
                    tracing::error!(path = %item.path, error = %e, "extraction run aborted");
                    return Err(e);
                }
            };

            let report = &mut summary.items[index];
            report.state = outcome.state;
            report.failure = outcome.failure;
            report.message = outcome.message;
            report.snapshot = outcome.snapshot;
            report.elapsed_ms = ticker.elapsed().as_millis() as u64;

            if outcome.state == ItemState::Cancelled {
                self.release_item(item).await;
            }
            self.transition(item, name, outcome.state);
            self.notifier
                .item_status(name, outcome.state, report.message.as_deref());

            // Flush the item's final progress with look-ahead
            let mut last = ticker.stop().await;
            last.phase = Phase::ItemFinished;
            last.remaining = remaining;
            last.next_package = match names.get(index + 1) {
                Some(next) => Some(next.clone()),
                None => self
                    .state
                    .lock()
                    .await
                    .queue
                    .first_idle_except(&item.path)
                    .map(|e| e.display_name.clone()),
            };
            self.events.progress(last);

            if outcome.state == ItemState::Cancelled {
                summary.cancelled = true;
                break;
            }

            if remaining > 0 && !self.config.extraction.settle_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.extraction.settle_delay) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }

        let succeeded = summary.count(ItemState::Succeeded);
        let failed = summary.count(ItemState::Failed);
        let skipped = summary.count(ItemState::SkippedByUser);

        self.events.progress(ProgressUpdate {
            phase: Phase::Done,
            current_package: None,
            asset_path: None,
            assets_extracted: 0,
            remaining: 0,
            next_package: None,
            elapsed_text: String::new(),
        });
        self.emit_event(Event::SequenceFinished {
            succeeded,
            failed,
            skipped,
            cancelled: summary.cancelled,
        });
        self.notifier.run_finished(&summary);

        tracing::info!(
            succeeded,
            failed,
            skipped,
            cancelled = summary.cancelled,
            "extraction run finished"
        );

        drop(slot);
        Ok(summary)
    }

    /// Start scans for every item that exists on disk so later items are ready
    async fn prewarm_run(&self, items: &[ExtractionItem]) {
        if !self.config.scan.prewarm {
            return;
        }
        let Some(generation) = self.scan_generation().await else {
            return;
        };
        for item in items {
            // Missing files are reported by the item guard, never scanned
            if tokio::fs::try_exists(item.path.as_path())
                .await
                .unwrap_or(false)
            {
                self.scans.prewarm_in(&item.path, generation);
            }
        }
    }

    async fn process_item(
        &self,
        item: &ExtractionItem,
        name: &str,
        policy: ScanUnavailablePolicy,
        cancel: &CancellationToken,
        ticker: &ProgressTicker,
    ) -> Result<ItemOutcome> {
        if !tokio::fs::try_exists(item.path.as_path())
            .await
            .unwrap_or(false)
        {
            let err = Error::MissingFile {
                path: item.path.as_path().to_path_buf(),
            };
            tracing::warn!(path = %item.path, "package vanished before extraction");
            self.emit_event(Event::ItemFailed {
                path: item.path.clone(),
                name: name.to_string(),
                kind: FailureKind::MissingFile,
                error: err.to_string(),
            });
            return Ok(ItemOutcome::failed(FailureKind::MissingFile, err.to_string()));
        }

        if let Some(request) = self.scan_item(item, name, policy, cancel, ticker).await? {
            self.transition(item, name, ItemState::AwaitingApproval);
            ticker.update(|p| p.phase = Phase::AwaitingApproval);
            self.emit_event(Event::ApprovalRequested {
                path: item.path.clone(),
                name: name.to_string(),
                summary: request.summary(),
                malicious: request.is_malicious(),
            });

            let force = self
                .approvals
                .wait(item.path.clone(), request, cancel)
                .await?;
            if !force {
                tracing::info!(path = %item.path, "extraction declined at approval gate");
                self.emit_event(Event::ItemSkipped {
                    path: item.path.clone(),
                    name: name.to_string(),
                });
                return Ok(ItemOutcome::skipped());
            }

            tracing::warn!(path = %item.path, "user accepted risk, extracting flagged package");
            self.emit_event(Event::RiskAccepted {
                path: item.path.clone(),
                name: name.to_string(),
            });
        }

        self.extract_item(item, name, cancel, ticker).await
    }

    /// Scan the item and decide whether it needs approval
    async fn scan_item(
        &self,
        item: &ExtractionItem,
        name: &str,
        policy: ScanUnavailablePolicy,
        cancel: &CancellationToken,
        ticker: &ProgressTicker,
    ) -> Result<Option<ApprovalRequest>> {
        let Some(generation) = self.scan_generation().await else {
            return Ok(None);
        };

        self.transition(item, name, ItemState::Scanning);
        ticker.update(|p| p.phase = Phase::Scanning);
        self.mark_scanning(&item.path, generation).await;

        // Dropping the join on cancel leaves the scan running; its result is still cached
        let outcome = tokio::select! {
            outcome = self.scans.ensure_scan_in(&item.path, generation) => outcome,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        // Scanning was switched off while we waited: extract as if it never ran
        let Some(outcome) = outcome else {
            return Ok(None);
        };
        if !self.publish_scan_outcome(&item.path, &outcome, generation).await {
            return Ok(None);
        }

        Ok(match outcome {
            ScanOutcome::Completed(result) if result.is_malicious => {
                tracing::warn!(path = %item.path, threats = %result.summary(), "malicious content detected");
                Some(ApprovalRequest::Malicious(result))
            }
            ScanOutcome::Completed(_) => None,
            ScanOutcome::Failed(reason) => match policy {
                ScanUnavailablePolicy::Proceed => {
                    tracing::warn!(path = %item.path, reason = %reason, "scan unavailable, extracting unverified package");
                    None
                }
                ScanUnavailablePolicy::RequireApproval => {
                    Some(ApprovalRequest::ScanUnavailable(reason))
                }
            },
        })
    }

    async fn extract_item(
        &self,
        item: &ExtractionItem,
        name: &str,
        cancel: &CancellationToken,
        ticker: &ProgressTicker,
    ) -> Result<ItemOutcome> {
        self.transition(item, name, ItemState::Extracting);
        if item.queued {
            self.state
                .lock()
                .await
                .queue
                .set_extracting(&item.path, true);
        }
        ticker.update(|p| {
            p.phase = Phase::Extracting;
            p.asset_path = None;
            p.assets_extracted = 0;
        });

        let output_dir = self.output_dir_for(item.path.as_path());
        let options = ExtractOptions {
            overwrite: self.config.extraction.overwrite,
        };
        let reporter = ticker.reporter();

        tracing::info!(path = %item.path, output = %output_dir.display(), "extracting package");
        let started = Instant::now();
        let result = match tokio::fs::create_dir_all(&output_dir).await {
            Ok(()) => {
                self.engine
                    .extract(
                        item.path.as_path(),
                        &output_dir,
                        &options,
                        &reporter,
                        cancel.child_token(),
                    )
                    .await
            }
            Err(e) => Err(Error::Io(e)),
        };
        let duration = started.elapsed();

        match result {
            Ok(output) => {
                let snapshot = ExtractionSnapshot {
                    assets_extracted: output.assets_extracted,
                    extracted_file_count: output.extracted_files.len() as u64,
                    extracted_bytes: total_size(&output.extracted_files).await,
                    extraction_duration_ms: duration.as_millis() as u64,
                    output_directory: output_dir,
                };

                let persisted = {
                    let mut guard = self.state.lock().await;
                    let state = &mut *guard;
                    state.history.record_outcome(&item.path, &snapshot);
                    state.stats.record_success(&snapshot);
                    if item.queued {
                        state.queue.remove(&item.path);
                    }
                    state.persisted()
                };
                self.persist(persisted).await;

                if item.queued {
                    self.emit_event(Event::Removed {
                        path: item.path.clone(),
                    });
                }
                self.emit_event(Event::ItemCompleted {
                    path: item.path.clone(),
                    name: name.to_string(),
                    snapshot: snapshot.clone(),
                });
                tracing::info!(
                    path = %item.path,
                    assets = snapshot.assets_extracted,
                    files = snapshot.extracted_file_count,
                    bytes = snapshot.extracted_bytes,
                    duration_ms = snapshot.extraction_duration_ms,
                    "package extracted"
                );

                Ok(ItemOutcome::succeeded(snapshot))
            }
            // The engine may surface its own error once the token fires; cancellation wins
            Err(_) if cancel.is_cancelled() => Err(Error::Cancelled),
            Err(e) if !e.is_item_scoped() => Err(e),
            Err(e) => {
                let kind = failure_kind(&e);

                let persisted = {
                    let mut state = self.state.lock().await;
                    state.queue.set_extracting(&item.path, false);
                    state.stats.packages_failed += 1;
                    state.persisted()
                };
                self.persist(persisted).await;

                tracing::warn!(path = %item.path, error = %e, ?kind, "extraction failed");
                self.emit_event(Event::ItemFailed {
                    path: item.path.clone(),
                    name: name.to_string(),
                    kind,
                    error: e.to_string(),
                });

                Ok(ItemOutcome::failed(kind, e.to_string()))
            }
        }
    }

    /// Clear the extracting flag after a run-scoped stop
    async fn release_item(&self, item: &ExtractionItem) {
        if item.queued {
            self.state
                .lock()
                .await
                .queue
                .set_extracting(&item.path, false);
        }
    }

    fn transition(&self, item: &ExtractionItem, name: &str, state: ItemState) {
        tracing::debug!(path = %item.path, ?state, "item state changed");
        self.emit_event(Event::ItemStateChanged {
            path: item.path.clone(),
            name: name.to_string(),
            state,
        });
    }

    fn output_dir_for(&self, package: &Path) -> PathBuf {
        let root = &self.config.extraction.output_dir;
        if !self.config.extraction.per_package_subdir {
            return root.clone();
        }
        match package.file_stem() {
            Some(stem) => root.join(stem),
            None => root.clone(),
        }
    }
}

/// Failure category of an item-scoped error
fn failure_kind(error: &Error) -> FailureKind {
    match error {
        Error::MissingFile { .. } => FailureKind::MissingFile,
        Error::CorruptArchive { .. } => FailureKind::CorruptArchive,
        _ => FailureKind::ExtractionError,
    }
}

/// Sum of the sizes of the files the engine wrote
async fn total_size(files: &[PathBuf]) -> u64 {
    let mut total = 0;
    for file in files {
        match tokio::fs::metadata(file).await {
            Ok(metadata) => total += metadata.len(),
            Err(e) => {
                tracing::debug!(path = %file.display(), error = %e, "extracted file not measurable");
            }
        }
    }
    total
}
