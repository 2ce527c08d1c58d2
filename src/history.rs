//! History ledger: capped, deduplicated record of every package ever queued or extracted.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::path::NormalizedPath;
use crate::queue::PackageFile;
use crate::types::{ExtractionSnapshot, HistoryEntry};

struct TrackedEntry {
    entry: HistoryEntry,
    /// Insertion order, breaks ties between identical `added_utc` values
    seq: u64,
}

/// Append/update log of packages, one entry per normalized path
///
/// Every mutation goes through [`HistoryLedger::lookup_or_create`], so the
/// same path can never produce two entries regardless of whether it arrives
/// via enqueue or via an extraction outcome.
pub struct HistoryLedger {
    entries: HashMap<NormalizedPath, TrackedEntry>,
    capacity: usize,
    next_seq: u64,
}

impl HistoryLedger {
    /// Create an empty ledger holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            next_seq: 0,
        }
    }

    /// Create or touch the entry for a package
    pub fn track(&mut self, file: &PackageFile) {
        self.track_at(file, Utc::now());
    }

    /// [`track`](Self::track) with an explicit clock
    pub fn track_at(&mut self, file: &PackageFile, now: DateTime<Utc>) {
        let mut created = false;
        let entry = self.lookup_or_create(&file.path, now, || {
            created = true;
            (file.display_name.clone(), file.size_bytes)
        });
        if !created {
            entry.touch(file.size_bytes, now);
        }
        self.trim();
    }

    /// Fill extraction fields on the tracked entry, creating it if missing
    pub fn record_outcome(&mut self, path: &NormalizedPath, snapshot: &ExtractionSnapshot) {
        self.record_outcome_at(path, snapshot, Utc::now());
    }

    /// [`record_outcome`](Self::record_outcome) with an explicit clock
    pub fn record_outcome_at(
        &mut self,
        path: &NormalizedPath,
        snapshot: &ExtractionSnapshot,
        now: DateTime<Utc>,
    ) {
        let entry = self.lookup_or_create(path, now, || (path.display_name(), 0));
        entry.capture_extraction_snapshot(snapshot, now);
        self.trim();
    }

    /// Evict oldest-by-`added_utc` entries until at or under capacity
    ///
    /// Returns the number of evicted entries.
    pub fn trim(&mut self) -> usize {
        if self.entries.len() <= self.capacity {
            return 0;
        }

        let overflow = self.entries.len() - self.capacity;
        let mut by_age: Vec<(DateTime<Utc>, u64, NormalizedPath)> = self
            .entries
            .iter()
            .map(|(path, tracked)| (tracked.entry.added_utc, tracked.seq, path.clone()))
            .collect();
        by_age.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        for (_, _, path) in by_age.into_iter().take(overflow) {
            self.entries.remove(&path);
        }

        tracing::debug!(
            evicted = overflow,
            capacity = self.capacity,
            "trimmed history ledger"
        );
        overflow
    }

    /// Entry for a path, if tracked
    pub fn get(&self, path: &NormalizedPath) -> Option<&HistoryEntry> {
        self.entries.get(path).map(|t| &t.entry)
    }

    /// All entries, oldest first
    pub fn entries(&self) -> Vec<HistoryEntry> {
        let mut tracked: Vec<&TrackedEntry> = self.entries.values().collect();
        tracked.sort_by(|a, b| (a.entry.added_utc, a.seq).cmp(&(b.entry.added_utc, b.seq)));
        tracked.into_iter().map(|t| t.entry.clone()).collect()
    }

    /// Number of tracked packages
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been tracked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace the ledger contents with persisted entries
    ///
    /// Duplicate paths keep the first occurrence; the result is trimmed.
    pub fn restore(&mut self, entries: Vec<HistoryEntry>) {
        self.entries.clear();
        self.next_seq = 0;
        for entry in entries {
            if self.entries.contains_key(&entry.path) {
                continue;
            }
            let seq = self.next_seq;
            self.next_seq += 1;
            self.entries
                .insert(entry.path.clone(), TrackedEntry { entry, seq });
        }
        self.trim();
    }

    fn lookup_or_create(
        &mut self,
        path: &NormalizedPath,
        now: DateTime<Utc>,
        seed: impl FnOnce() -> (String, u64),
    ) -> &mut HistoryEntry {
        let next_seq = &mut self.next_seq;
        &mut self
            .entries
            .entry(path.clone())
            .or_insert_with(|| {
                let (file_name, size) = seed();
                let seq = *next_seq;
                *next_seq += 1;
                TrackedEntry {
                    entry: HistoryEntry::new(path.clone(), file_name, size, now),
                    seq,
                }
            })
            .entry
    }
}
