//! Common test utilities for unitypackage-unpacker integration tests
//!
//! Packages in these tests are JSON files holding a list of
//! `{ "path": ..., "contents": ... }` assets. The same file backs both the
//! scanner's entry source and the extraction engine.

#![allow(dead_code)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use unitypackage_unpacker::{
    AssetProgress, Collaborators, Config, Database, EngineOutput, Error, ExtractOptions,
    ExtractionEngine, Orchestrator, PackageEntrySource, PatternScanner, ProgressFn, Result,
    TextEntry,
};

/// One asset inside a test package
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Asset {
    pub path: String,
    pub contents: String,
}

impl Asset {
    pub fn new(path: &str, contents: &str) -> Self {
        Self {
            path: path.to_string(),
            contents: contents.to_string(),
        }
    }
}

async fn read_assets(package: &Path) -> Result<Vec<Asset>> {
    let bytes = tokio::fs::read(package).await?;
    serde_json::from_slice(&bytes).map_err(|e| Error::CorruptArchive {
        path: package.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Entry source reading JSON packages
pub struct JsonEntrySource;

#[async_trait]
impl PackageEntrySource for JsonEntrySource {
    async fn text_entries(&self, package: &Path) -> Result<Vec<TextEntry>> {
        Ok(read_assets(package)
            .await?
            .into_iter()
            .map(|a| TextEntry {
                path: a.path,
                contents: a.contents,
            })
            .collect())
    }
}

/// Engine that writes every asset of a JSON package below the output directory
pub struct JsonEngine;

#[async_trait]
impl ExtractionEngine for JsonEngine {
    async fn extract(
        &self,
        package: &Path,
        output_dir: &Path,
        options: &ExtractOptions,
        on_progress: &ProgressFn,
        cancel: CancellationToken,
    ) -> Result<EngineOutput> {
        let mut output = EngineOutput::default();
        for asset in read_assets(package).await? {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let target = output_dir.join(&asset.path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if options.overwrite || !target.exists() {
                tokio::fs::write(&target, asset.contents.as_bytes()).await?;
            }
            output.assets_extracted += 1;
            output.extracted_files.push(target);
            on_progress(AssetProgress {
                asset_path: asset.path,
                assets_extracted: output.assets_extracted,
            });
        }
        Ok(output)
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// A workspace with an inbox for packages and a SQLite database
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        std::fs::create_dir_all(dir.path().join("inbox")).expect("Failed to create inbox");
        Self { dir }
    }

    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.extraction.output_dir = self.dir.path().join("out");
        config.extraction.settle_delay = std::time::Duration::ZERO;
        config.extraction.progress_tick = std::time::Duration::from_millis(20);
        config.persistence.database_path = self.dir.path().join("state.db");
        config
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    /// Write a package and return its path as a string
    pub fn write_package(&self, file_name: &str, assets: &[Asset]) -> String {
        let path = self.dir.path().join("inbox").join(file_name);
        let json = serde_json::to_vec(assets).expect("Failed to encode package");
        std::fs::write(&path, json).expect("Failed to write package");
        path.to_string_lossy().into_owned()
    }

    /// Build an orchestrator backed by the pattern scanner and the database
    pub async fn orchestrator(&self) -> Orchestrator {
        let config = self.config();
        let db = Database::new(&config.persistence.database_path)
            .await
            .expect("Failed to open database");
        let scanner = PatternScanner::new(Arc::new(JsonEntrySource));
        Orchestrator::new(
            config,
            Collaborators::new(Arc::new(scanner), Arc::new(JsonEngine), Arc::new(db)),
        )
        .await
        .expect("Failed to create orchestrator")
    }
}

/// A harmless editor script
pub fn clean_assets() -> Vec<Asset> {
    vec![
        Asset::new("Assets/Scripts/Player.cs", "public class Player {}"),
        Asset::new("Assets/readme.txt", "Thanks for downloading"),
    ]
}

/// An editor script that posts to a webhook
pub fn webhook_assets() -> Vec<Asset> {
    vec![Asset::new(
        "Assets/Editor/Loader.cs",
        r#"var url = "https://discord.com/api/webhooks/123456/abcDEF-token";"#,
    )]
}
