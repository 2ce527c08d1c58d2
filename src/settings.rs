//! Persistence seam for queue, history and statistics

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::path::NormalizedPath;
use crate::types::{ExtractionStats, HistoryEntry};

/// Everything the orchestrator persists between sessions
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Queued package paths in queue order
    pub queue: Vec<NormalizedPath>,
    /// History ledger entries, oldest first
    pub history: Vec<HistoryEntry>,
    /// Lifetime statistics
    pub stats: ExtractionStats,
}

/// Trait for loading and saving [`PersistedState`]
///
/// `save` replaces the whole snapshot. The orchestrator calls it after queue
/// changes and successful extractions; failures are logged, never fatal.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Load the last saved state, `None` if nothing was ever saved
    async fn load(&self) -> crate::Result<Option<PersistedState>>;

    /// Replace the saved state
    async fn save(&self, state: &PersistedState) -> crate::Result<()>;
}

/// In-memory store for tests and embedders without on-disk state
#[derive(Default)]
pub struct MemorySettingsStore {
    state: Mutex<Option<PersistedState>>,
    saves: AtomicUsize,
}

impl MemorySettingsStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a state, as if a previous session saved it
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of successful `save` calls
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Most recently saved state
    pub fn snapshot(&self) -> Option<PersistedState> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> crate::Result<Option<PersistedState>> {
        Ok(self.snapshot())
    }

    async fn save(&self, state: &PersistedState) -> crate::Result<()> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips_and_counts() {
        let store = MemorySettingsStore::new();
        assert!(store.load().await.unwrap().is_none());

        let state = PersistedState {
            queue: vec![NormalizedPath::from_canonical("/p/a.unitypackage")],
            ..Default::default()
        };
        store.save(&state).await.unwrap();
        store.save(&state).await.unwrap();

        assert_eq!(store.save_count(), 2);
        assert_eq!(store.load().await.unwrap(), Some(state));
    }
}
