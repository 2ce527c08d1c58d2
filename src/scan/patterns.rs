//! Regex-based malicious content rules over a package's text assets.

use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use super::MaliciousScanner;
use crate::types::{ScanResult, Severity, Threat, ThreatMatch, ThreatType};

/// Longest snippet kept per match
const MAX_SNIPPET_CHARS: usize = 160;

/// Asset extensions worth scanning as text
const SCANNED_EXTENSIONS: &[&str] = &[
    "cs", "js", "boo", "txt", "json", "xml", "asmdef", "yaml", "yml", "shader",
];

/// A text asset inside a package
#[derive(Clone, Debug)]
pub struct TextEntry {
    /// Asset path inside the package (e.g. `Assets/Editor/Setup.cs`)
    pub path: String,
    /// Decoded contents
    pub contents: String,
}

/// Supplies the text assets of a package
///
/// Reading the package format is the extraction engine's job; this seam lets
/// the scanner consume whatever reader the engine exposes.
#[async_trait]
pub trait PackageEntrySource: Send + Sync {
    /// Text entries of the package at `package`
    async fn text_entries(&self, package: &Path) -> crate::Result<Vec<TextEntry>>;
}

/// One detection rule
#[derive(Clone, Debug)]
pub struct ThreatRule {
    /// Threat category the rule contributes to
    pub kind: ThreatType,
    /// Severity of a match
    pub severity: Severity,
    /// Regex source
    pub pattern: &'static str,
}

const DEFAULT_RULES: &[ThreatRule] = &[
    ThreatRule {
        kind: ThreatType::DiscordWebhook,
        severity: Severity::High,
        pattern: r"https?://(?:ptb\.|canary\.)?discord(?:app)?\.com/api/webhooks/\d+/[\w-]+",
    },
    ThreatRule {
        kind: ThreatType::UnsafeLinks,
        severity: Severity::Medium,
        pattern: r"https?://(?:\d{1,3}\.){3}\d{1,3}(?::\d+)?/",
    },
    ThreatRule {
        kind: ThreatType::UnsafeLinks,
        severity: Severity::High,
        pattern: r#"https?://[^\s"']+\.(?:exe|bat|cmd|ps1|scr|vbs)\b"#,
    },
    ThreatRule {
        kind: ThreatType::UnsafeLinks,
        severity: Severity::Medium,
        pattern: r"https?://(?:www\.)?(?:pastebin\.com|bit\.ly|tinyurl\.com|grabify\.link|iplogger\.org)/\S*",
    },
    ThreatRule {
        kind: ThreatType::SuspiciousCodePatterns,
        severity: Severity::High,
        pattern: r"Process\.Start\s*\(",
    },
    ThreatRule {
        kind: ThreatType::SuspiciousCodePatterns,
        severity: Severity::High,
        pattern: r"Assembly\.Load(?:From|File)?\s*\(",
    },
    ThreatRule {
        kind: ThreatType::SuspiciousCodePatterns,
        severity: Severity::Medium,
        pattern: r"Convert\.FromBase64String\s*\(",
    },
    ThreatRule {
        kind: ThreatType::SuspiciousCodePatterns,
        severity: Severity::Medium,
        pattern: r"Registry\.(?:CurrentUser|LocalMachine)",
    },
    ThreatRule {
        kind: ThreatType::SuspiciousCodePatterns,
        severity: Severity::Medium,
        pattern: r"WebClient\s*\(\s*\)\s*\.\s*Download(?:File|Data|String)",
    },
];

struct CompiledRule {
    kind: ThreatType,
    severity: Severity,
    regex: Regex,
}

/// Scanner that applies regex rules to every text asset of a package
///
/// A package is malicious when any rule of `High` severity matches; lower
/// severity findings are still reported so the UI can show them.
pub struct PatternScanner {
    source: Arc<dyn PackageEntrySource>,
    rules: Vec<CompiledRule>,
}

impl PatternScanner {
    /// Scanner with the built-in rule set
    pub fn new(source: Arc<dyn PackageEntrySource>) -> Self {
        Self::with_rules(source, DEFAULT_RULES)
    }

    /// Scanner with a custom rule set; invalid patterns are logged and skipped
    pub fn with_rules(source: Arc<dyn PackageEntrySource>, rules: &[ThreatRule]) -> Self {
        let rules = rules
            .iter()
            .filter_map(|rule| {
                regex::RegexBuilder::new(rule.pattern)
                    .size_limit(1024 * 1024)
                    .build()
                    .map_err(|e| {
                        warn!(pattern = rule.pattern, error = %e, "invalid threat rule skipped");
                    })
                    .ok()
                    .map(|regex| CompiledRule {
                        kind: rule.kind,
                        severity: rule.severity,
                        regex,
                    })
            })
            .collect();

        Self { source, rules }
    }

    /// Number of usable rules
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Apply the rules to already-loaded entries
    pub fn analyze(&self, entries: &[TextEntry]) -> ScanResult {
        let mut found: BTreeMap<ThreatKey, Threat> = BTreeMap::new();

        for entry in entries.iter().filter(|e| is_scannable(&e.path)) {
            for rule in &self.rules {
                for m in rule.regex.find_iter(&entry.contents) {
                    let threat = found.entry(ThreatKey(rule.kind)).or_insert_with(|| Threat {
                        kind: rule.kind,
                        severity: rule.severity,
                        matches: Vec::new(),
                    });
                    threat.severity = threat.severity.max(rule.severity);
                    threat.matches.push(ThreatMatch {
                        file_path: entry.path.clone(),
                        snippet: snippet_around(&entry.contents, m.start(), m.end()),
                    });
                }
            }
        }

        let threats: Vec<Threat> = found.into_values().collect();
        let is_malicious = threats.iter().any(|t| t.severity == Severity::High);
        ScanResult {
            is_malicious,
            threats,
        }
    }
}

#[async_trait]
impl MaliciousScanner for PatternScanner {
    async fn scan(&self, package: &Path) -> crate::Result<ScanResult> {
        let entries = self.source.text_entries(package).await?;
        let result = self.analyze(&entries);
        debug!(
            package = %package.display(),
            entries = entries.len(),
            threats = result.threats.len(),
            "pattern scan finished"
        );
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "pattern"
    }
}

/// Stable ordering key so threats are reported in enum order
#[derive(PartialEq, Eq)]
struct ThreatKey(ThreatType);

impl ThreatKey {
    fn rank(&self) -> u8 {
        match self.0 {
            ThreatType::DiscordWebhook => 0,
            ThreatType::UnsafeLinks => 1,
            ThreatType::SuspiciousCodePatterns => 2,
        }
    }
}

impl PartialOrd for ThreatKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ThreatKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

fn is_scannable(asset_path: &str) -> bool {
    Path::new(asset_path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            SCANNED_EXTENSIONS
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        })
}

/// The matched line, trimmed and capped to [`MAX_SNIPPET_CHARS`]
fn snippet_around(text: &str, start: usize, end: usize) -> String {
    let line_start = text[..start].rfind('\n').map_or(0, |i| i + 1);
    let line_end = text[end..].find('\n').map_or(text.len(), |i| end + i);
    let line = text[line_start..line_end].trim();
    if line.chars().count() <= MAX_SNIPPET_CHARS {
        line.to_string()
    } else {
        let mut cut: String = line.chars().take(MAX_SNIPPET_CHARS).collect();
        cut.push('…');
        cut
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixedSource(HashMap<String, Vec<TextEntry>>);

    #[async_trait]
    impl PackageEntrySource for FixedSource {
        async fn text_entries(&self, package: &Path) -> crate::Result<Vec<TextEntry>> {
            self.0
                .get(&package.display().to_string())
                .cloned()
                .ok_or_else(|| crate::Error::Other(format!("unreadable: {}", package.display())))
        }
    }

    fn entry(path: &str, contents: &str) -> TextEntry {
        TextEntry {
            path: path.into(),
            contents: contents.into(),
        }
    }

    fn scanner() -> PatternScanner {
        PatternScanner::new(Arc::new(FixedSource(HashMap::new())))
    }

    #[test]
    fn all_default_rules_compile() {
        assert_eq!(scanner().rule_count(), DEFAULT_RULES.len());
    }

    #[test]
    fn discord_webhook_is_malicious() {
        let result = scanner().analyze(&[entry(
            "Assets/Editor/Telemetry.cs",
            "var hook = \"https://discord.com/api/webhooks/123456/abcDEF-_xyz\";",
        )]);

        assert!(result.is_malicious);
        assert_eq!(result.threats.len(), 1);
        let threat = &result.threats[0];
        assert_eq!(threat.kind, ThreatType::DiscordWebhook);
        assert_eq!(threat.severity, Severity::High);
        assert_eq!(threat.matches[0].file_path, "Assets/Editor/Telemetry.cs");
        assert!(threat.matches[0].snippet.starts_with("var hook"));
    }

    #[test]
    fn medium_findings_are_reported_but_not_malicious() {
        let result = scanner().analyze(&[entry(
            "Assets/Scripts/Decode.cs",
            "byte[] data = Convert.FromBase64String(payload);",
        )]);

        assert!(!result.is_malicious);
        assert_eq!(result.threats[0].kind, ThreatType::SuspiciousCodePatterns);
        assert_eq!(result.threats[0].severity, Severity::Medium);
    }

    #[test]
    fn severity_escalates_to_strongest_rule_in_category() {
        let result = scanner().analyze(&[entry(
            "Assets/Scripts/Loader.cs",
            "Convert.FromBase64String(x);\nAssembly.Load(bytes);",
        )]);

        assert_eq!(result.threats.len(), 1);
        assert_eq!(result.threats[0].severity, Severity::High);
        assert_eq!(result.threats[0].matches.len(), 2);
        assert!(result.is_malicious);
    }

    #[test]
    fn binary_and_unknown_assets_are_ignored() {
        let result = scanner().analyze(&[
            entry("Assets/Textures/logo.png", "Process.Start(\"cmd\")"),
            entry("Assets/Plugins/Native", "Process.Start(\"cmd\")"),
        ]);
        assert!(result.threats.is_empty());
    }

    #[test]
    fn threats_are_ordered_by_category() {
        let result = scanner().analyze(&[entry(
            "Assets/a.cs",
            "Process.Start(\"x\");\nvar u = \"http://10.0.0.1/payload\";\nvar d = \"https://discordapp.com/api/webhooks/1/t\";",
        )]);

        let kinds: Vec<ThreatType> = result.threats.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ThreatType::DiscordWebhook,
                ThreatType::UnsafeLinks,
                ThreatType::SuspiciousCodePatterns
            ]
        );
    }

    #[test]
    fn long_lines_are_truncated() {
        let long = format!("{} Process.Start(\"x\") {}", "a".repeat(200), "b".repeat(200));
        let result = scanner().analyze(&[entry("Assets/a.cs", &long)]);
        let snippet = &result.threats[0].matches[0].snippet;
        assert_eq!(snippet.chars().count(), MAX_SNIPPET_CHARS + 1);
        assert!(snippet.ends_with('…'));
    }

    #[test]
    fn invalid_custom_rule_is_skipped() {
        let rules = [
            ThreatRule {
                kind: ThreatType::UnsafeLinks,
                severity: Severity::Low,
                pattern: "(unclosed",
            },
            ThreatRule {
                kind: ThreatType::UnsafeLinks,
                severity: Severity::Low,
                pattern: "evil\\.example",
            },
        ];
        let scanner = PatternScanner::with_rules(Arc::new(FixedSource(HashMap::new())), &rules);
        assert_eq!(scanner.rule_count(), 1);
    }

    #[tokio::test]
    async fn unreadable_package_is_an_error() {
        let result = scanner().scan(Path::new("/packages/missing.unitypackage")).await;
        assert!(result.is_err());
    }
}
