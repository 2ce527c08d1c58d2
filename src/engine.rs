//! Traits and types for the extraction engine collaborator

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Options passed to the engine for one package
#[derive(Clone, Debug)]
pub struct ExtractOptions {
    /// Overwrite files that already exist in the output directory
    pub overwrite: bool,
}

/// Per-asset progress reported by the engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetProgress {
    /// Path of the asset just written, relative to the package root
    pub asset_path: String,
    /// Assets written so far for this package
    pub assets_extracted: u64,
}

/// Callback the engine invokes after each asset
pub type ProgressFn = dyn Fn(AssetProgress) + Send + Sync;

/// What the engine produced for one package
#[must_use]
#[derive(Clone, Debug, Default)]
pub struct EngineOutput {
    /// Number of assets in the package that were extracted
    pub assets_extracted: u64,
    /// Every file written to disk
    pub extracted_files: Vec<PathBuf>,
}

/// Trait for the component that unpacks a single package
///
/// The orchestrator owns sequencing, scanning and bookkeeping; an engine
/// only turns one package into files. Error contract:
///
/// - `Error::CorruptArchive` for archives the engine recognizes as damaged
/// - `Error::Cancelled` when `cancel` fired before completion
/// - any other error is reported to the user as an unknown extraction error
///
/// # Examples
///
/// ```no_run
/// use async_trait::async_trait;
/// use std::path::Path;
/// use tokio_util::sync::CancellationToken;
/// use unitypackage_unpacker::{EngineOutput, ExtractOptions, ExtractionEngine, ProgressFn};
///
/// struct NothingToDo;
///
/// #[async_trait]
/// impl ExtractionEngine for NothingToDo {
///     async fn extract(
///         &self,
///         _package: &Path,
///         _output_dir: &Path,
///         _options: &ExtractOptions,
///         _on_progress: &ProgressFn,
///         _cancel: CancellationToken,
///     ) -> unitypackage_unpacker::Result<EngineOutput> {
///         Ok(EngineOutput::default())
///     }
///
///     fn name(&self) -> &'static str {
///         "nothing"
///     }
/// }
/// ```
#[async_trait]
pub trait ExtractionEngine: Send + Sync {
    /// Extract `package` into `output_dir`
    async fn extract(
        &self,
        package: &Path,
        output_dir: &Path,
        options: &ExtractOptions,
        on_progress: &ProgressFn,
        cancel: CancellationToken,
    ) -> crate::Result<EngineOutput>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
