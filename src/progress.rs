//! Progress reporting over the event broadcast channel

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::AssetProgress;
use crate::types::{Event, ProgressUpdate};

/// Capacity of the event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Publisher half of the event channel
///
/// Cloning shares the same channel. Sends never fail from the caller's point
/// of view: with no subscribers the event is dropped.
#[derive(Clone)]
pub struct ProgressSink {
    tx: broadcast::Sender<Event>,
}

impl ProgressSink {
    /// Create a sink with a fresh channel
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event
    pub fn emit(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.tx.send(event).ok();
    }

    /// Publish a progress snapshot
    pub fn progress(&self, update: ProgressUpdate) {
        self.emit(Event::Progress(update));
    }

    /// New receiver for all subsequent events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Render an elapsed duration as `mm:ss`, or `h:mm:ss` past one hour
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// Per-item timer that republishes the latest progress snapshot with a fresh
/// elapsed time until stopped
///
/// The sequencer owns one ticker per item and feeds it through
/// [`update`](Self::update); the background task only rewrites `elapsed_text`.
pub struct ProgressTicker {
    latest: Arc<Mutex<ProgressUpdate>>,
    started: Instant,
    sink: ProgressSink,
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ProgressTicker {
    /// Start ticking every `interval`
    ///
    /// `parent` is the run's cancellation token; cancelling the run also stops
    /// the ticker.
    pub fn start(
        sink: ProgressSink,
        initial: ProgressUpdate,
        interval: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let started = Instant::now();
        let latest = Arc::new(Mutex::new(initial));
        let stop = parent.child_token();

        let handle = tokio::spawn({
            let latest = latest.clone();
            let sink = sink.clone();
            let stop = stop.clone();
            async move {
                let mut ticks = tokio::time::interval(interval);
                // The first tick completes immediately
                ticks.tick().await;
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticks.tick() => {
                            let snapshot = {
                                let mut guard = latest.lock().unwrap_or_else(PoisonError::into_inner);
                                guard.elapsed_text = format_elapsed(started.elapsed());
                                guard.clone()
                            };
                            sink.progress(snapshot);
                        }
                    }
                }
            }
        });

        Self {
            latest,
            started,
            sink,
            stop,
            handle: Some(handle),
        }
    }

    /// Time since the ticker started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Modify the current snapshot and publish it immediately
    pub fn update(&self, change: impl FnOnce(&mut ProgressUpdate)) {
        let snapshot = {
            let mut guard = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
            change(&mut guard);
            guard.elapsed_text = format_elapsed(self.started.elapsed());
            guard.clone()
        };
        self.sink.progress(snapshot);
    }

    /// Closure suitable for handing to the extraction engine
    pub fn reporter(&self) -> impl Fn(AssetProgress) + Send + Sync + 'static {
        let latest = self.latest.clone();
        let sink = self.sink.clone();
        let started = self.started;
        move |progress: AssetProgress| {
            let snapshot = {
                let mut guard = latest.lock().unwrap_or_else(PoisonError::into_inner);
                guard.asset_path = Some(progress.asset_path);
                guard.assets_extracted = progress.assets_extracted;
                guard.elapsed_text = format_elapsed(started.elapsed());
                guard.clone()
            };
            sink.progress(snapshot);
        }
    }

    /// Stop the background task and wait for it to exit
    ///
    /// Returns the last snapshot so the caller can flush a final update.
    pub async fn stop(mut self) -> ProgressUpdate {
        self.stop.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            tracing::debug!(error = %e, "progress ticker task ended abnormally");
        }
        let mut last = self
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        last.elapsed_text = format_elapsed(self.started.elapsed());
        last
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
