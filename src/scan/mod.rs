//! Malicious-content scanning
//!
//! - [`MaliciousScanner`] is the seam to whatever analyses a package
//! - [`ScanCache`] memoizes results and guarantees at most one in-flight scan per path
//! - [`PatternScanner`] is a regex rule set over a package's text assets

use async_trait::async_trait;
use std::path::Path;

use crate::types::ScanResult;

mod cache;
mod patterns;

pub use cache::ScanCache;
pub use patterns::{PackageEntrySource, PatternScanner, TextEntry, ThreatRule};

/// Trait for malicious-content analysis of a package
///
/// Implementations may return `Error::Cancelled` to signal a cooperative
/// stop; the cache does not record cancelled scans. Any other error is cached
/// as an unavailable scan.
#[async_trait]
pub trait MaliciousScanner: Send + Sync {
    /// Analyse the package at `package`
    async fn scan(&self, package: &Path) -> crate::Result<ScanResult>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
