//! Shared test helpers for creating Orchestrator instances in tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::engine::{AssetProgress, EngineOutput, ExtractOptions, ExtractionEngine, ProgressFn};
use crate::error::{Error, Result};
use crate::notify::NotificationSink;
use crate::scan::MaliciousScanner;
use crate::settings::MemorySettingsStore;
use crate::types::{
    Event, ItemState, RunSummary, ScanResult, Severity, Threat, ThreatMatch, ThreatType,
};

use super::{Collaborators, Orchestrator};

/// What the mock scanner reports for a file name
#[derive(Clone)]
pub(crate) enum ScanBehavior {
    Clean,
    Malicious,
    Fail(String),
}

/// Scanner keyed by file name; unknown names scan clean
#[derive(Default)]
pub(crate) struct MockScanner {
    behaviors: Mutex<HashMap<String, ScanBehavior>>,
    calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl MockScanner {
    pub(crate) fn set(&self, file_name: &str, behavior: ScanBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(file_name.to_string(), behavior);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub(crate) fn malicious_result() -> ScanResult {
    ScanResult {
        is_malicious: true,
        threats: vec![Threat {
            kind: ThreatType::DiscordWebhook,
            severity: Severity::High,
            matches: vec![ThreatMatch {
                file_path: "Assets/Editor/Loader.cs".into(),
                snippet: "https://discord.com/api/webhooks/1/abc".into(),
            }],
        }],
    }
}

#[async_trait]
impl MaliciousScanner for MockScanner {
    async fn scan(&self, package: &Path) -> Result<ScanResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let name = package
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .unwrap_or(ScanBehavior::Clean);

        match behavior {
            ScanBehavior::Clean => Ok(ScanResult::clean()),
            ScanBehavior::Malicious => Ok(malicious_result()),
            ScanBehavior::Fail(reason) => Err(Error::Other(reason)),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// What the mock engine does for a file name
#[derive(Clone)]
pub(crate) enum EngineBehavior {
    /// Write this many assets
    Assets(u64),
    /// Report a corrupt archive
    Corrupt,
    /// Fail with an unrecognized error
    Fail(String),
    /// Report that the package disappeared mid-extraction
    Vanish,
    /// Block until cancelled
    Hang,
}

/// Engine keyed by file name; unknown names extract two assets
#[derive(Default)]
pub(crate) struct MockEngine {
    behaviors: Mutex<HashMap<String, EngineBehavior>>,
    /// File names in the order `extract` was entered
    started: Mutex<Vec<String>>,
    /// File names in the order `extract` returned
    finished: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockEngine {
    pub(crate) fn set(&self, file_name: &str, behavior: EngineBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(file_name.to_string(), behavior);
    }

    pub(crate) fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub(crate) fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }

    pub(crate) fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionEngine for MockEngine {
    async fn extract(
        &self,
        package: &Path,
        output_dir: &Path,
        _options: &ExtractOptions,
        on_progress: &ProgressFn,
        cancel: CancellationToken,
    ) -> Result<EngineOutput> {
        let name = package
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.started.lock().unwrap().push(name.clone());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .unwrap_or(EngineBehavior::Assets(2));

        // Yield so overlapping calls would be observable
        tokio::task::yield_now().await;

        let result = match behavior {
            EngineBehavior::Assets(count) => {
                let mut files = Vec::new();
                for i in 0..count {
                    let asset = format!("Assets/asset_{i}.txt");
                    let file = output_dir.join(format!("asset_{i}.txt"));
                    tokio::fs::write(&file, b"0123456789").await?;
                    files.push(file);
                    on_progress(AssetProgress {
                        asset_path: asset,
                        assets_extracted: i + 1,
                    });
                }
                Ok(EngineOutput {
                    assets_extracted: count,
                    extracted_files: files,
                })
            }
            EngineBehavior::Corrupt => Err(Error::CorruptArchive {
                path: package.to_path_buf(),
                reason: "gzip header invalid".into(),
            }),
            EngineBehavior::Fail(reason) => Err(Error::Extraction(reason)),
            EngineBehavior::Vanish => Err(Error::MissingFile {
                path: package.to_path_buf(),
            }),
            EngineBehavior::Hang => {
                cancel.cancelled().await;
                Err(Error::Cancelled)
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.finished.lock().unwrap().push(name);
        result
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Notifier that records every notice
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    pub(crate) items: Mutex<Vec<(String, ItemState)>>,
    pub(crate) runs: Mutex<Vec<RunSummary>>,
}

impl NotificationSink for RecordingNotifier {
    fn item_status(&self, name: &str, state: ItemState, _detail: Option<&str>) {
        self.items.lock().unwrap().push((name.to_string(), state));
    }

    fn run_finished(&self, summary: &RunSummary) {
        self.runs.lock().unwrap().push(summary.clone());
    }
}

/// Everything a test needs to drive and observe an orchestrator
pub(crate) struct TestHarness {
    pub(crate) orchestrator: Orchestrator,
    pub(crate) scanner: Arc<MockScanner>,
    pub(crate) engine: Arc<MockEngine>,
    pub(crate) store: Arc<MemorySettingsStore>,
    pub(crate) notifier: Arc<RecordingNotifier>,
    pub(crate) temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a package file in the harness's inbox and return its path
    pub(crate) fn write_package(&self, name: &str) -> PathBuf {
        let inbox = self.temp_dir.path().join("inbox");
        std::fs::create_dir_all(&inbox).unwrap();
        let path = inbox.join(name);
        std::fs::write(&path, b"fake unitypackage").unwrap();
        path
    }

    /// Create several packages and return their paths as strings
    pub(crate) fn write_packages(&self, names: &[&str]) -> Vec<String> {
        names
            .iter()
            .map(|n| self.write_package(n).to_string_lossy().into_owned())
            .collect()
    }
}

/// Test configuration: no pacing delays, fast ticker, output inside `root`
pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.extraction.output_dir = root.join("out");
    config.extraction.settle_delay = Duration::ZERO;
    config.extraction.progress_tick = Duration::from_millis(20);
    config.persistence.database_path = root.join("state.db");
    config
}

/// Helper to create a test Orchestrator with mock collaborators.
/// Returns a harness owning the tempdir (which must be kept alive).
pub(crate) async fn create_test_orchestrator() -> TestHarness {
    create_test_orchestrator_with(|_| {}).await
}

/// Like [`create_test_orchestrator`] but lets the test adjust the config
pub(crate) async fn create_test_orchestrator_with(configure: impl FnOnce(&mut Config)) -> TestHarness {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    configure(&mut config);

    let scanner = Arc::new(MockScanner::default());
    let engine = Arc::new(MockEngine::default());
    let store = Arc::new(MemorySettingsStore::new());
    let notifier = Arc::new(RecordingNotifier::default());

    let collaborators = Collaborators::new(scanner.clone(), engine.clone(), store.clone())
        .with_notifier(notifier.clone());
    let orchestrator = Orchestrator::new(config, collaborators).await.unwrap();

    TestHarness {
        orchestrator,
        scanner,
        engine,
        store,
        notifier,
        temp_dir,
    }
}

/// Drain every event currently buffered on a receiver
pub(crate) fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Wait until the orchestrator is holding an approval request
pub(crate) async fn wait_for_approval(orchestrator: &Orchestrator) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while orchestrator.pending_approval().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("approval was never requested");
}
