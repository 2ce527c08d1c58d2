//! Package queue: deduplicated, ordered set of pending extraction candidates.

use chrono::{DateTime, Utc};

use crate::history::HistoryLedger;
use crate::path::{NormalizedPath, normalize_path};
use crate::types::{EnqueueOutcome, QueueEntry, ScanOutcome, SecurityStatus};

/// A package file probed on disk, ready to be queued
#[derive(Clone, Debug)]
pub struct PackageFile {
    /// Dedup key
    pub path: NormalizedPath,
    /// File name for display
    pub display_name: String,
    /// Size on disk
    pub size_bytes: u64,
    /// Modification time, when the platform reports one
    pub last_modified: Option<DateTime<Utc>>,
}

impl PackageFile {
    /// Normalize `raw` and read its metadata
    ///
    /// Returns `None` for paths that do not exist or are not regular files.
    pub async fn probe(raw: &str) -> Option<Self> {
        let path = normalize_path(raw);
        let metadata = match tokio::fs::metadata(path.as_path()).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => {
                tracing::debug!(path = %path, "skipping non-file path");
                return None;
            }
            Err(e) => {
                tracing::debug!(path = %path, error = %e, "skipping unreadable path");
                return None;
            }
        };

        Some(Self {
            display_name: path.display_name(),
            size_bytes: metadata.len(),
            last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            path,
        })
    }
}

/// Ordered queue of extraction candidates, unique by normalized path
///
/// Not synchronized on its own: the orchestrator keeps it behind the same
/// mutex as the [`HistoryLedger`] so enqueue, clear and extraction outcomes
/// serialize through one boundary.
#[derive(Default)]
pub struct PackageQueue {
    entries: Vec<QueueEntry>,
}

impl PackageQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue every genuinely new file and record it in the history ledger
    ///
    /// Duplicates (of existing entries or earlier files in the same batch) are
    /// counted as `already_queued`. Returns the counts and the entries added.
    pub fn enqueue(
        &mut self,
        files: Vec<PackageFile>,
        history: &mut HistoryLedger,
    ) -> (EnqueueOutcome, Vec<QueueEntry>) {
        let mut outcome = EnqueueOutcome::default();
        let mut added = Vec::new();

        for file in files {
            if self.contains(&file.path) {
                outcome.already_queued += 1;
                continue;
            }

            history.track(&file);

            let entry = QueueEntry {
                path: file.path,
                display_name: file.display_name,
                file_size_bytes: file.size_bytes,
                last_modified: file.last_modified,
                in_queue: true,
                is_extracting: false,
                security_warning: None,
                security_info: None,
                security_status: SecurityStatus::NotScanned,
            };
            added.push(entry.clone());
            self.entries.push(entry);
            outcome.added += 1;
        }

        (outcome, added)
    }

    /// Remove one entry
    pub fn remove(&mut self, path: &NormalizedPath) -> Option<QueueEntry> {
        let index = self.entries.iter().position(|e| &e.path == path)?;
        let mut entry = self.entries.remove(index);
        entry.in_queue = false;
        Some(entry)
    }

    /// Remove every entry, returning how many were removed
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Write a scan outcome into the matching entry's warning/info text
    ///
    /// No-op (returns false) if the path is no longer queued.
    pub fn apply_security_result(&mut self, path: &NormalizedPath, outcome: &ScanOutcome) -> bool {
        let Some(entry) = self.get_mut(path) else {
            return false;
        };

        entry.security_status = outcome.status();
        match outcome {
            ScanOutcome::Completed(result) if result.is_malicious => {
                entry.security_warning =
                    Some(format!("Potentially malicious content: {}", result.summary()));
                entry.security_info = None;
            }
            ScanOutcome::Completed(result) => {
                entry.security_warning = None;
                entry.security_info = Some(if result.threats.is_empty() {
                    "No threats detected".to_string()
                } else {
                    format!("Scanned clean, minor findings: {}", result.summary())
                });
            }
            ScanOutcome::Failed(reason) => {
                entry.security_warning = Some(format!("Security scan unavailable: {reason}"));
                entry.security_info = Some("Package has not been verified".to_string());
            }
        }
        true
    }

    /// Mark an entry as being scanned
    pub fn mark_scanning(&mut self, path: &NormalizedPath) -> bool {
        match self.get_mut(path) {
            Some(entry) => {
                entry.security_status = SecurityStatus::Scanning;
                true
            }
            None => false,
        }
    }

    /// Reset every entry's security fields (used when scanning is disabled)
    pub fn reset_security(&mut self) {
        for entry in &mut self.entries {
            entry.security_status = SecurityStatus::NotScanned;
            entry.security_warning = None;
            entry.security_info = None;
        }
    }

    /// Toggle the extracting flag on an entry
    pub fn set_extracting(&mut self, path: &NormalizedPath, extracting: bool) -> bool {
        match self.get_mut(path) {
            Some(entry) => {
                entry.is_extracting = extracting;
                true
            }
            None => false,
        }
    }

    /// Entry for a path
    pub fn get(&self, path: &NormalizedPath) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| &e.path == path)
    }

    fn get_mut(&mut self, path: &NormalizedPath) -> Option<&mut QueueEntry> {
        self.entries.iter_mut().find(|e| &e.path == path)
    }

    /// Whether a path is queued
    pub fn contains(&self, path: &NormalizedPath) -> bool {
        self.get(path).is_some()
    }

    /// All entries in queue order
    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    /// Paths of entries not currently being extracted, in queue order
    pub fn idle_paths(&self) -> Vec<NormalizedPath> {
        self.entries
            .iter()
            .filter(|e| !e.is_extracting)
            .map(|e| e.path.clone())
            .collect()
    }

    /// First non-extracting entry other than `current`
    pub fn first_idle_except(&self, current: &NormalizedPath) -> Option<&QueueEntry> {
        self.entries
            .iter()
            .find(|e| !e.is_extracting && &e.path != current)
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
