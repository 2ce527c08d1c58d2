//! User-facing notices emitted at the end of a run and per item

use crate::types::{ItemState, RunSummary};

/// Trait for surfacing short human-readable notices
///
/// Separate from the event channel: events drive UI state, notices are the
/// toast/status-bar text a user reads.
pub trait NotificationSink: Send + Sync {
    /// Per-item status line (e.g. "Extracted Foo.unitypackage")
    fn item_status(&self, name: &str, state: ItemState, detail: Option<&str>);

    /// Terminal notice for a whole run
    fn run_finished(&self, summary: &RunSummary);
}

/// Notifier that writes notices to `tracing`
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn item_status(&self, name: &str, state: ItemState, detail: Option<&str>) {
        let text = item_status_text(name, state, detail);
        match state {
            ItemState::Failed => tracing::warn!("{text}"),
            _ => tracing::info!("{text}"),
        }
    }

    fn run_finished(&self, summary: &RunSummary) {
        tracing::info!("{}", run_notice_text(summary));
    }
}

/// Status line for one item
pub fn item_status_text(name: &str, state: ItemState, detail: Option<&str>) -> String {
    let base = match state {
        ItemState::Pending => format!("Waiting: {name}"),
        ItemState::Scanning => format!("Scanning {name}"),
        ItemState::AwaitingApproval => format!("Waiting for approval: {name}"),
        ItemState::Extracting => format!("Extracting {name}"),
        ItemState::Succeeded => format!("Extracted {name}"),
        ItemState::Failed => format!("Failed to extract {name}"),
        ItemState::Cancelled => format!("Cancelled {name}"),
        ItemState::SkippedByUser => format!("Skipped {name}"),
    };
    match detail {
        Some(detail) => format!("{base}: {detail}"),
        None => base,
    }
}

/// Terminal notice for a run
pub fn run_notice_text(summary: &RunSummary) -> String {
    let succeeded = summary.count(ItemState::Succeeded);
    let failed = summary.count(ItemState::Failed);
    let skipped = summary.count(ItemState::SkippedByUser);
    let plural = |n: usize| if n == 1 { "package" } else { "packages" };

    let mut text = if summary.cancelled {
        format!("Extraction cancelled after {succeeded} {}", plural(succeeded))
    } else {
        format!("Extracted {succeeded} {}", plural(succeeded))
    };
    if failed > 0 {
        text.push_str(&format!(", {failed} failed"));
    }
    if skipped > 0 {
        text.push_str(&format!(", {skipped} skipped"));
    }
    text
}
