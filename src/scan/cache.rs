//! Memoized scan cache with at-most-one in-flight scan per path.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::MaliciousScanner;
use crate::error::Error;
use crate::path::NormalizedPath;
use crate::types::ScanOutcome;

type SharedScan = Shared<BoxFuture<'static, ScanOutcome>>;

struct InFlight {
    /// Identifies this registration; completions from invalidated scans carry a stale ticket
    ticket: u64,
    future: SharedScan,
    abort: tokio::task::AbortHandle,
}

#[derive(Default)]
struct CacheState {
    results: HashMap<NormalizedPath, ScanOutcome>,
    in_flight: HashMap<NormalizedPath, InFlight>,
    next_ticket: u64,
    /// Bumped by `invalidate_all`; scans requested for an older generation never start
    generation: u64,
}

enum Lookup {
    Stale,
    Ready(ScanOutcome),
    Joined(SharedScan),
    Started(SharedScan),
}

/// Security scan cache
///
/// Results and in-flight registrations live behind one `std::sync::Mutex`
/// that is only held for map lookups and inserts, never across an `.await`.
/// Scans run as spawned tasks, so they keep going (and populate the cache)
/// even when the caller that started them is cancelled.
#[derive(Clone)]
pub struct ScanCache {
    scanner: Arc<dyn MaliciousScanner>,
    state: Arc<Mutex<CacheState>>,
}

impl ScanCache {
    /// Create an empty cache around a scanner
    pub fn new(scanner: Arc<dyn MaliciousScanner>) -> Self {
        Self {
            scanner,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    /// Return the cached outcome, join the in-flight scan, or start one
    ///
    /// Whichever of the three applies is decided inside a single critical
    /// section, so concurrent callers for the same path can never start two
    /// scans. Must be called from within a Tokio runtime.
    pub async fn ensure_scan(&self, path: &NormalizedPath) -> ScanOutcome {
        match self.lookup_or_start(path, None) {
            Lookup::Ready(outcome) => outcome,
            Lookup::Joined(future) | Lookup::Started(future) => future.await,
            Lookup::Stale => ScanOutcome::Failed("scan cache was invalidated".to_string()),
        }
    }

    /// Like [`ensure_scan`](Self::ensure_scan), but only while the cache is
    /// still at `generation`
    ///
    /// Returns `None` without touching the scanner if the cache was
    /// invalidated since `generation` was read.
    pub async fn ensure_scan_in(
        &self,
        path: &NormalizedPath,
        generation: u64,
    ) -> Option<ScanOutcome> {
        match self.lookup_or_start(path, Some(generation)) {
            Lookup::Stale => None,
            Lookup::Ready(outcome) => Some(outcome),
            Lookup::Joined(future) | Lookup::Started(future) => Some(future.await),
        }
    }

    /// Start a scan in the background if none is cached or running
    ///
    /// Returns true if a new scan was started.
    pub fn prewarm(&self, path: &NormalizedPath) -> bool {
        matches!(self.lookup_or_start(path, None), Lookup::Started(_))
    }

    /// Prewarm only while the cache is still at `generation`
    pub fn prewarm_in(&self, path: &NormalizedPath, generation: u64) -> bool {
        matches!(
            self.lookup_or_start(path, Some(generation)),
            Lookup::Started(_)
        )
    }

    /// Current cache generation; changes on every [`invalidate_all`](Self::invalidate_all)
    pub fn generation(&self) -> u64 {
        lock(&self.state).generation
    }

    /// Cached outcome without starting a scan
    pub fn cached(&self, path: &NormalizedPath) -> Option<ScanOutcome> {
        lock(&self.state).results.get(path).cloned()
    }

    /// Whether a scan is currently running for `path`
    pub fn is_scanning(&self, path: &NormalizedPath) -> bool {
        lock(&self.state).in_flight.contains_key(path)
    }

    /// Drop the cached result and any in-flight scan for one path
    pub fn invalidate(&self, path: &NormalizedPath) {
        let mut state = lock(&self.state);
        state.results.remove(path);
        if let Some(in_flight) = state.in_flight.remove(path) {
            in_flight.abort.abort();
        }
    }

    /// Drop every cached result and in-flight scan
    pub fn invalidate_all(&self) {
        let mut state = lock(&self.state);
        let aborted = state.in_flight.len();
        for (_, in_flight) in state.in_flight.drain() {
            in_flight.abort.abort();
        }
        let dropped = state.results.len();
        state.results.clear();
        state.generation += 1;
        tracing::debug!(dropped, aborted, "scan cache invalidated");
    }

    /// Name of the underlying scanner
    pub fn scanner_name(&self) -> &'static str {
        self.scanner.name()
    }

    fn lookup_or_start(&self, path: &NormalizedPath, generation: Option<u64>) -> Lookup {
        let mut state = lock(&self.state);

        if generation.is_some_and(|g| g != state.generation) {
            return Lookup::Stale;
        }
        if let Some(outcome) = state.results.get(path) {
            return Lookup::Ready(outcome.clone());
        }
        if let Some(in_flight) = state.in_flight.get(path) {
            return Lookup::Joined(in_flight.future.clone());
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;

        // The task cannot observe the registration map until this guard is dropped,
        // so the insert below always happens before its completion check.
        let handle = tokio::spawn(run_scan(
            Arc::clone(&self.scanner),
            Arc::clone(&self.state),
            path.clone(),
            ticket,
        ));
        let abort = handle.abort_handle();

        let cache_state = Arc::clone(&self.state);
        let key = path.clone();
        let future = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => {
                    ScanOutcome::Failed("scan was invalidated before it completed".to_string())
                }
                Err(e) => {
                    tracing::error!(path = %key, error = %e, "scan task panicked");
                    let outcome = ScanOutcome::Failed(format!("scanner panicked: {e}"));
                    settle(&cache_state, &key, ticket, Some(&outcome));
                    outcome
                }
            }
        }
        .boxed()
        .shared();

        state.in_flight.insert(
            path.clone(),
            InFlight {
                ticket,
                future: future.clone(),
                abort,
            },
        );
        tracing::debug!(path = %path, scanner = self.scanner.name(), "scan started");

        Lookup::Started(future)
    }
}

async fn run_scan(
    scanner: Arc<dyn MaliciousScanner>,
    state: Arc<Mutex<CacheState>>,
    path: NormalizedPath,
    ticket: u64,
) -> ScanOutcome {
    let outcome = match scanner.scan(path.as_path()).await {
        Ok(result) => {
            tracing::debug!(
                path = %path,
                malicious = result.is_malicious,
                threats = result.threats.len(),
                "scan completed"
            );
            Some(ScanOutcome::Completed(Arc::new(result)))
        }
        Err(Error::Cancelled) => {
            tracing::debug!(path = %path, "scan cancelled, not caching");
            None
        }
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "scan failed, package treated as unscanned");
            Some(ScanOutcome::Failed(e.to_string()))
        }
    };

    settle(&state, &path, ticket, outcome.as_ref());
    outcome.unwrap_or_else(|| ScanOutcome::Failed("scan was cancelled".to_string()))
}

/// Publish a finished scan: cache the outcome, then clear the registration
///
/// Skipped entirely when the registration was invalidated in the meantime.
fn settle(
    state: &Mutex<CacheState>,
    path: &NormalizedPath,
    ticket: u64,
    outcome: Option<&ScanOutcome>,
) {
    let mut state = lock(state);
    let current = state
        .in_flight
        .get(path)
        .is_some_and(|in_flight| in_flight.ticket == ticket);
    if !current {
        return;
    }
    if let Some(outcome) = outcome {
        state.results.insert(path.clone(), outcome.clone());
    }
    state.in_flight.remove(path);
}

fn lock(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
