//! Core types for unitypackage-unpacker

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::path::NormalizedPath;

/// Security state of a queue entry as shown to the user
///
/// `Clean` and `Unavailable` are deliberately distinct: a failed scan must
/// never be rendered as a clean one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityStatus {
    /// No scan has run for this package
    #[default]
    NotScanned,
    /// A scan is in flight
    Scanning,
    /// Scanned and nothing was found
    Clean,
    /// Scanned and threats were found
    Malicious,
    /// The scanner failed; the package is unscanned, not safe
    Unavailable,
}

/// A pending extraction candidate with display/status metadata
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Dedup key
    pub path: NormalizedPath,
    /// File name shown in the queue
    pub display_name: String,
    /// Size on disk when enqueued
    pub file_size_bytes: u64,
    /// Modification time when enqueued
    pub last_modified: Option<DateTime<Utc>>,
    /// Whether the entry is still part of the queue
    pub in_queue: bool,
    /// Set while the sequencer is extracting this entry
    pub is_extracting: bool,
    /// Warning text (malicious content or unavailable scan)
    pub security_warning: Option<String>,
    /// Informational text (scan summary)
    pub security_info: Option<String>,
    /// Machine-readable security state
    pub security_status: SecurityStatus,
}

/// Kind of malicious content found in a package
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    /// Hard-coded Discord webhook URLs (typical credential exfiltration)
    DiscordWebhook,
    /// Links to executables, raw IPs, paste sites or URL shorteners
    UnsafeLinks,
    /// Process spawning, dynamic assembly loading, registry access, etc.
    SuspiciousCodePatterns,
}

impl ThreatType {
    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            ThreatType::DiscordWebhook => "Discord webhook",
            ThreatType::UnsafeLinks => "unsafe links",
            ThreatType::SuspiciousCodePatterns => "suspicious code patterns",
        }
    }
}

/// Threat severity
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Worth a look
    #[default]
    Low,
    /// Likely unwanted
    Medium,
    /// Almost certainly malicious
    High,
}

/// One location where a threat pattern matched
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatMatch {
    /// Path of the asset inside the package
    pub file_path: String,
    /// Matched text with a little surrounding context
    pub snippet: String,
}

/// A category of threat with all of its matches
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threat {
    /// What was found
    pub kind: ThreatType,
    /// How bad it is
    pub severity: Severity,
    /// Where it was found
    pub matches: Vec<ThreatMatch>,
}

/// Outcome of a malicious-content analysis of a package
#[must_use]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Whether the package should be gated behind user approval
    pub is_malicious: bool,
    /// Everything that was found (may be non-empty for non-malicious results)
    pub threats: Vec<Threat>,
}

impl ScanResult {
    /// A result with no findings
    pub fn clean() -> Self {
        Self::default()
    }

    /// Highest severity among all threats
    pub fn max_severity(&self) -> Option<Severity> {
        self.threats.iter().map(|t| t.severity).max()
    }

    /// Total number of matches across all threats
    pub fn match_count(&self) -> usize {
        self.threats.iter().map(|t| t.matches.len()).sum()
    }

    /// One-line summary for the approval prompt and queue warning text
    pub fn summary(&self) -> String {
        if self.threats.is_empty() {
            return "No threats detected".to_string();
        }
        let parts: Vec<String> = self
            .threats
            .iter()
            .map(|t| {
                format!(
                    "{} ({:?}, {} match{})",
                    t.kind.label(),
                    t.severity,
                    t.matches.len(),
                    if t.matches.len() == 1 { "" } else { "es" }
                )
            })
            .collect();
        parts.join(", ")
    }
}

/// Cached outcome of a scan attempt
#[derive(Clone, Debug)]
pub enum ScanOutcome {
    /// The scanner produced a result
    Completed(Arc<ScanResult>),
    /// The scanner failed; treat the package as unscanned
    Failed(String),
}

impl ScanOutcome {
    /// The UI-facing status this outcome maps to
    pub fn status(&self) -> SecurityStatus {
        match self {
            ScanOutcome::Completed(r) if r.is_malicious => SecurityStatus::Malicious,
            ScanOutcome::Completed(_) => SecurityStatus::Clean,
            ScanOutcome::Failed(_) => SecurityStatus::Unavailable,
        }
    }
}

/// Extraction statistics captured for one successful run of a package
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionSnapshot {
    /// Assets reported by the engine
    pub assets_extracted: u64,
    /// Files written to disk
    pub extracted_file_count: u64,
    /// Bytes written to disk
    pub extracted_bytes: u64,
    /// Wall-clock time spent in the engine
    pub extraction_duration_ms: u64,
    /// Where the files went
    pub output_directory: PathBuf,
}

/// Record of a package ever queued or extracted
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Dedup key
    pub path: NormalizedPath,
    /// File name at the time of tracking
    pub file_name: String,
    /// First time the package was seen
    pub added_utc: DateTime<Utc>,
    /// Most recent enqueue
    pub last_seen_utc: DateTime<Utc>,
    /// Most recent successful extraction
    pub extracted_utc: Option<DateTime<Utc>>,
    /// Assets in the most recent extraction
    pub assets_extracted: u64,
    /// Files in the most recent extraction
    pub extracted_file_count: u64,
    /// Bytes in the most recent extraction
    pub extracted_bytes: u64,
    /// Duration of the most recent extraction
    pub extraction_duration_ms: u64,
    /// Output directory of the most recent extraction
    pub output_directory: Option<PathBuf>,
    /// Package size at last sighting
    pub file_size_bytes: u64,
}

impl HistoryEntry {
    /// Fresh entry for a package seen for the first time
    pub fn new(path: NormalizedPath, file_name: String, size: u64, now: DateTime<Utc>) -> Self {
        Self {
            path,
            file_name,
            added_utc: now,
            last_seen_utc: now,
            extracted_utc: None,
            assets_extracted: 0,
            extracted_file_count: 0,
            extracted_bytes: 0,
            extraction_duration_ms: 0,
            output_directory: None,
            file_size_bytes: size,
        }
    }

    /// Record a re-sighting of the package
    pub fn touch(&mut self, size: u64, now: DateTime<Utc>) {
        self.last_seen_utc = now;
        self.file_size_bytes = size;
    }

    /// Fill the extraction fields; a re-extraction overwrites the previous run
    pub fn capture_extraction_snapshot(&mut self, snapshot: &ExtractionSnapshot, now: DateTime<Utc>) {
        self.extracted_utc = Some(now);
        self.assets_extracted = snapshot.assets_extracted;
        self.extracted_file_count = snapshot.extracted_file_count;
        self.extracted_bytes = snapshot.extracted_bytes;
        self.extraction_duration_ms = snapshot.extraction_duration_ms;
        self.output_directory = Some(snapshot.output_directory.clone());
    }
}

/// Lifetime extraction totals
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Packages extracted successfully
    pub packages_extracted: u64,
    /// Packages that failed to extract
    pub packages_failed: u64,
    /// Assets extracted across all packages
    pub assets_extracted: u64,
    /// Files written across all packages
    pub files_extracted: u64,
    /// Bytes written across all packages
    pub bytes_extracted: u64,
    /// Time spent extracting across all packages
    pub total_duration_ms: u64,
}

impl ExtractionStats {
    /// Fold one successful extraction into the totals
    pub fn record_success(&mut self, snapshot: &ExtractionSnapshot) {
        self.packages_extracted += 1;
        self.assets_extracted += snapshot.assets_extracted;
        self.files_extracted += snapshot.extracted_file_count;
        self.bytes_extracted += snapshot.extracted_bytes;
        self.total_duration_ms += snapshot.extraction_duration_ms;
    }
}

/// Counts returned from an enqueue request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOutcome {
    /// Genuinely new entries
    pub added: usize,
    /// Paths that were already queued
    pub already_queued: usize,
    /// Paths that do not exist on disk
    pub rejected: usize,
}

/// Ephemeral pairing of a path with its queue entry for one sequencer run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractionItem {
    /// Package to extract
    pub path: NormalizedPath,
    /// Whether the item came from the queue (and so has an entry to update)
    pub queued: bool,
}

impl ExtractionItem {
    /// Item backed by a queue entry
    pub fn queued(path: NormalizedPath) -> Self {
        Self { path, queued: true }
    }

    /// Ad-hoc item with no queue entry
    pub fn ad_hoc(path: NormalizedPath) -> Self {
        Self {
            path,
            queued: false,
        }
    }
}

/// Per-item state in the sequencer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Not reached yet
    #[default]
    Pending,
    /// Waiting on the scan cache
    Scanning,
    /// Waiting on the user
    AwaitingApproval,
    /// Inside the extraction engine
    Extracting,
    /// Extracted and recorded
    Succeeded,
    /// Missing file or engine failure
    Failed,
    /// Stopped by sequence cancellation
    Cancelled,
    /// Declined at the approval gate
    SkippedByUser,
}

impl ItemState {
    /// Whether the item is done for this run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemState::Succeeded | ItemState::Failed | ItemState::Cancelled | ItemState::SkippedByUser
        )
    }
}

/// Why an item failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The file disappeared before it was reached
    MissingFile,
    /// The engine recognized the archive as corrupt
    CorruptArchive,
    /// Any other engine or I/O failure
    ExtractionError,
}

/// Progress phase reported to the UI
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Run is starting
    Starting,
    /// Scanning the current package
    Scanning,
    /// Waiting for the user's decision
    AwaitingApproval,
    /// Extracting the current package
    Extracting,
    /// The current package reached a terminal state
    ItemFinished,
    /// The run is over
    Done,
}

/// Progress snapshot pushed to the UI collaborator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// What the sequencer is doing
    pub phase: Phase,
    /// Display name of the current package
    pub current_package: Option<String>,
    /// Asset currently being written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_path: Option<String>,
    /// Assets written so far for the current package
    pub assets_extracted: u64,
    /// Items left after the current one
    pub remaining: usize,
    /// Display name of the next package
    pub next_package: Option<String>,
    /// Elapsed time for the current package (`mm:ss`)
    pub elapsed_text: String,
}

/// Event emitted by the orchestrator
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Package added to the queue
    Queued {
        /// Package path
        path: NormalizedPath,
        /// Display name
        name: String,
    },

    /// Package removed from the queue
    Removed {
        /// Package path
        path: NormalizedPath,
    },

    /// Queue cleared
    QueueCleared {
        /// Number of entries removed
        removed: usize,
    },

    /// Scan started or joined for a package
    ScanStarted {
        /// Package path
        path: NormalizedPath,
    },

    /// Scan result applied to a package
    ScanCompleted {
        /// Package path
        path: NormalizedPath,
        /// Resulting status
        status: SecurityStatus,
        /// Summary or failure reason
        detail: String,
    },

    /// Scanning was turned on or off
    ScanningToggled {
        /// New setting
        enabled: bool,
    },

    /// Sequencer moved an item to a new state
    ItemStateChanged {
        /// Package path
        path: NormalizedPath,
        /// Display name
        name: String,
        /// New state
        state: ItemState,
    },

    /// The sequencer is waiting for a force/skip decision
    ApprovalRequested {
        /// Package path
        path: NormalizedPath,
        /// Display name
        name: String,
        /// Threat summary or scan failure reason
        summary: String,
        /// Whether this is a malicious result (vs an unavailable scan)
        malicious: bool,
    },

    /// The user chose to extract despite the warning
    RiskAccepted {
        /// Package path
        path: NormalizedPath,
        /// Display name
        name: String,
    },

    /// Progress snapshot
    Progress(ProgressUpdate),

    /// Package extracted
    ItemCompleted {
        /// Package path
        path: NormalizedPath,
        /// Display name
        name: String,
        /// What was extracted
        snapshot: ExtractionSnapshot,
    },

    /// Package failed
    ItemFailed {
        /// Package path
        path: NormalizedPath,
        /// Display name
        name: String,
        /// Failure category
        kind: FailureKind,
        /// Human-readable message
        error: String,
    },

    /// Package skipped at the approval gate
    ItemSkipped {
        /// Package path
        path: NormalizedPath,
        /// Display name
        name: String,
    },

    /// Run finished (normally, cancelled, or exhausted)
    SequenceFinished {
        /// Items that succeeded
        succeeded: usize,
        /// Items that failed
        failed: usize,
        /// Items the user skipped
        skipped: usize,
        /// Whether the run was cancelled
        cancelled: bool,
    },
}

/// Final report for one item of a run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    /// Package path
    pub path: NormalizedPath,
    /// Display name
    pub name: String,
    /// State at the end of the run (`Pending` if never reached)
    pub state: ItemState,
    /// Failure category, when `state == Failed`
    pub failure: Option<FailureKind>,
    /// Human-readable detail for failures
    pub message: Option<String>,
    /// Extraction details, when `state == Succeeded`
    pub snapshot: Option<ExtractionSnapshot>,
    /// Time spent on this item
    pub elapsed_ms: u64,
}

/// Result of a whole sequencer run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// One report per input item, in input order
    pub items: Vec<ItemReport>,
    /// Whether the run was cancelled
    pub cancelled: bool,
}

impl RunSummary {
    /// Number of items in the given state
    pub fn count(&self, state: ItemState) -> usize {
        self.items.iter().filter(|i| i.state == state).count()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn threat(kind: ThreatType, severity: Severity, matches: usize) -> Threat {
        Threat {
            kind,
            severity,
            matches: (0..matches)
                .map(|i| ThreatMatch {
                    file_path: format!("Assets/Script{i}.cs"),
                    snippet: "...".into(),
                })
                .collect(),
        }
    }

    #[test]
    fn failed_scan_maps_to_unavailable_not_clean() {
        let failed = ScanOutcome::Failed("scanner crashed".into());
        assert_eq!(failed.status(), SecurityStatus::Unavailable);

        let clean = ScanOutcome::Completed(Arc::new(ScanResult::clean()));
        assert_eq!(clean.status(), SecurityStatus::Clean);
    }

    #[test]
    fn summary_lists_each_threat_with_match_count() {
        let result = ScanResult {
            is_malicious: true,
            threats: vec![
                threat(ThreatType::DiscordWebhook, Severity::High, 1),
                threat(ThreatType::UnsafeLinks, Severity::Medium, 3),
            ],
        };

        let summary = result.summary();
        assert_eq!(
            summary,
            "Discord webhook (High, 1 match), unsafe links (Medium, 3 matches)"
        );
        assert_eq!(result.max_severity(), Some(Severity::High));
        assert_eq!(result.match_count(), 4);
    }

    #[test]
    fn re_extraction_overwrites_snapshot_fields() {
        let now = Utc::now();
        let mut entry = HistoryEntry::new(
            NormalizedPath::from_canonical("/p/a.unitypackage"),
            "a.unitypackage".into(),
            10,
            now,
        );

        let first = ExtractionSnapshot {
            assets_extracted: 5,
            extracted_file_count: 7,
            extracted_bytes: 100,
            extraction_duration_ms: 20,
            output_directory: PathBuf::from("/out/1"),
        };
        entry.capture_extraction_snapshot(&first, now);

        let second = ExtractionSnapshot {
            assets_extracted: 2,
            extracted_file_count: 2,
            extracted_bytes: 40,
            extraction_duration_ms: 9,
            output_directory: PathBuf::from("/out/2"),
        };
        entry.capture_extraction_snapshot(&second, now);

        assert_eq!(entry.assets_extracted, 2);
        assert_eq!(entry.extracted_bytes, 40);
        assert_eq!(entry.output_directory, Some(PathBuf::from("/out/2")));
        assert_eq!(entry.added_utc, now, "added time never moves");
    }

    #[test]
    fn terminal_states() {
        assert!(!ItemState::Pending.is_terminal());
        assert!(!ItemState::AwaitingApproval.is_terminal());
        assert!(ItemState::SkippedByUser.is_terminal());
        assert!(ItemState::Cancelled.is_terminal());
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = Event::ItemSkipped {
            path: NormalizedPath::from_canonical("/p/x.unitypackage"),
            name: "x.unitypackage".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "item_skipped");
        assert_eq!(json["name"], "x.unitypackage");
    }
}
