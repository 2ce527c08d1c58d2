//! Path normalization for queue, scan-cache and history keys.
//!
//! Every path that enters the library goes through [`normalize_path`] so two
//! spellings of the same file (relative vs absolute, `file://` URI, quoted
//! drag-and-drop text) dedup to one key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Canonical absolute path used as a dedup/cache key
///
/// Equality and hashing use a comparison key that is case-folded on
/// case-insensitive platforms, so `C:\Pkg\A.unitypackage` and
/// `c:\pkg\a.unitypackage` are the same entry on Windows.
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "PathBuf", into = "PathBuf")]
pub struct NormalizedPath {
    path: PathBuf,
    key: String,
}

impl NormalizedPath {
    /// Wrap a path that is already canonical (e.g. loaded from persisted state)
    pub fn from_canonical(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let key = comparison_key(&path);
        Self { path, key }
    }

    /// The normalized path on disk
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// File name for display, falling back to the full path
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

impl PartialEq for NormalizedPath {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for NormalizedPath {}

impl Hash for NormalizedPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Debug for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.path)
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl AsRef<Path> for NormalizedPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl From<PathBuf> for NormalizedPath {
    fn from(path: PathBuf) -> Self {
        Self::from_canonical(path)
    }
}

impl From<NormalizedPath> for PathBuf {
    fn from(path: NormalizedPath) -> Self {
        path.path
    }
}

/// Normalize a raw, possibly relative or URI-form path
///
/// Resolution order:
/// 1. Trim whitespace and surrounding quotes
/// 2. Decode `file://` URIs
/// 3. Canonicalize (resolves symlinks, `..`, and case on some platforms)
/// 4. If the file does not exist, make it absolute, canonicalize the nearest
///    existing ancestor and re-append the rest, so the key does not change
///    when a file is deleted
/// 5. If even that fails, use the trimmed input as-is
///
/// Never fails: dedup is best-effort, so a path that cannot be resolved still
/// gets a stable key.
pub fn normalize_path(raw: &str) -> NormalizedPath {
    let trimmed = raw.trim().trim_matches('"').trim();
    let candidate = decode_file_uri(trimmed).unwrap_or_else(|| PathBuf::from(trimmed));

    let resolved = match std::fs::canonicalize(&candidate) {
        Ok(path) => strip_verbatim_prefix(path),
        Err(_) => match std::path::absolute(&candidate) {
            Ok(path) => resolve_existing_prefix(path),
            Err(e) => {
                tracing::debug!(raw = %trimmed, error = %e, "path normalization fell back to raw input");
                PathBuf::from(trimmed)
            }
        },
    };

    NormalizedPath::from_canonical(resolved)
}

fn resolve_existing_prefix(path: PathBuf) -> PathBuf {
    let mut tail = Vec::new();
    let mut current = path.clone();
    loop {
        if let Ok(base) = std::fs::canonicalize(&current) {
            let mut resolved = strip_verbatim_prefix(base);
            resolved.extend(tail.iter().rev());
            return resolved;
        }
        let Some(name) = current.file_name().map(|n| n.to_os_string()) else {
            return path;
        };
        tail.push(name);
        if !current.pop() {
            return path;
        }
    }
}

fn decode_file_uri(raw: &str) -> Option<PathBuf> {
    if !raw.starts_with("file:") {
        return None;
    }
    url::Url::parse(raw).ok()?.to_file_path().ok()
}

#[cfg(windows)]
fn strip_verbatim_prefix(path: PathBuf) -> PathBuf {
    let text = path.to_string_lossy();
    match text.strip_prefix(r"\\?\") {
        Some(rest) if !rest.starts_with("UNC\\") => PathBuf::from(rest),
        _ => path,
    }
}

#[cfg(not(windows))]
fn strip_verbatim_prefix(path: PathBuf) -> PathBuf {
    path
}

#[cfg(any(windows, target_os = "macos"))]
fn comparison_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

#[cfg(not(any(windows, target_os = "macos")))]
fn comparison_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn existing_file_normalizes_identically_from_different_spellings() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Props.unitypackage");
        std::fs::write(&file, b"x").unwrap();

        let direct = normalize_path(file.to_str().unwrap());
        let dotted = normalize_path(
            dir.path()
                .join(".")
                .join("Props.unitypackage")
                .to_str()
                .unwrap(),
        );
        let quoted = normalize_path(&format!("  \"{}\"  ", file.display()));

        assert_eq!(direct, dotted, "`.` segments must not change the key");
        assert_eq!(direct, quoted, "quotes and whitespace must be stripped");
    }

    #[test]
    fn file_uri_resolves_to_same_key_as_plain_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("uri.unitypackage");
        std::fs::write(&file, b"x").unwrap();

        let uri = url::Url::from_file_path(&file).unwrap();
        assert_eq!(
            normalize_path(uri.as_str()),
            normalize_path(file.to_str().unwrap())
        );
    }

    #[test]
    fn missing_file_still_gets_an_absolute_key() {
        let normalized = normalize_path("does/not/exist.unitypackage");
        assert!(
            normalized.as_path().is_absolute(),
            "non-existent relative paths should be made absolute, got {normalized}"
        );
    }

    #[test]
    fn normalization_is_stable_across_calls() {
        let a = normalize_path("some/relative.unitypackage");
        let b = normalize_path("some/relative.unitypackage");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[cfg(unix)]
    #[test]
    fn key_survives_deletion_behind_a_symlinked_dir() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        std::fs::create_dir(&inbox).unwrap();
        std::os::unix::fs::symlink(&inbox, dir.path().join("linked")).unwrap();

        let raw = dir.path().join("linked").join("a.unitypackage");
        std::fs::write(inbox.join("a.unitypackage"), b"x").unwrap();
        let before = normalize_path(raw.to_str().unwrap());

        std::fs::remove_file(inbox.join("a.unitypackage")).unwrap();
        let after = normalize_path(raw.to_str().unwrap());

        assert_eq!(before, after);
        assert_eq!(
            after.as_path(),
            std::fs::canonicalize(&inbox).unwrap().join("a.unitypackage")
        );
    }

    #[test]
    fn missing_file_under_missing_dirs_keeps_its_tail() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("nope").join("deeper").join("x.unitypackage");

        let normalized = normalize_path(raw.to_str().unwrap());
        assert_eq!(
            normalized.as_path(),
            std::fs::canonicalize(dir.path())
                .unwrap()
                .join("nope")
                .join("deeper")
                .join("x.unitypackage")
        );
    }

    #[test]
    fn display_name_is_file_name() {
        let p = NormalizedPath::from_canonical("/packages/Trees.unitypackage");
        assert_eq!(p.display_name(), "Trees.unitypackage");
    }

    #[test]
    fn serde_round_trip_preserves_key() {
        let p = NormalizedPath::from_canonical("/packages/Rocks.unitypackage");
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"/packages/Rocks.unitypackage\"");

        let back: NormalizedPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
