// model.rs - Shared record types passed between stages
// Purpose: URL records, fingerprints, downloaded files, findings, fuzz results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A domain or GitHub org/user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory-safe form of the target name.
    pub fn dir_name(&self) -> String {
        self.0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
            .collect()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// STAGES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Gather,
    Verify,
    Deduplicate,
    Download,
    Analyze,
    Fuzz,
    Report,
}

/// Canonical execution order. Consulted by the orchestrator; never derived
/// from the order stages were requested in.
pub const STAGE_ORDER: [Stage; 7] = [
    Stage::Gather,
    Stage::Verify,
    Stage::Deduplicate,
    Stage::Download,
    Stage::Analyze,
    Stage::Fuzz,
    Stage::Report,
];

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Gather => "gather",
            Stage::Verify => "verify",
            Stage::Deduplicate => "deduplicate",
            Stage::Download => "download",
            Stage::Analyze => "analyze",
            Stage::Fuzz => "fuzz",
            Stage::Report => "report",
        }
    }

    pub fn rank(self) -> usize {
        STAGE_ORDER.iter().position(|s| *s == self).unwrap_or(usize::MAX)
    }

    /// The artifact this stage reads when chained. `None` means the stage
    /// starts from the target itself (gather) or folds every artifact (report).
    pub fn consumes(self) -> Option<Stage> {
        match self {
            Stage::Gather | Stage::Report => None,
            Stage::Verify => Some(Stage::Gather),
            Stage::Deduplicate => Some(Stage::Verify),
            Stage::Download => Some(Stage::Deduplicate),
            Stage::Analyze => Some(Stage::Download),
            Stage::Fuzz => Some(Stage::Verify),
        }
    }

    /// Subdirectory holding this stage's artifact under the target directory.
    pub fn artifact_dir(self) -> &'static str {
        match self {
            Stage::Gather => "urls",
            Stage::Verify => "live",
            Stage::Deduplicate => "deduplicated",
            Stage::Download => "downloads",
            Stage::Analyze => "findings",
            Stage::Fuzz => "fuzz",
            Stage::Report => "report",
        }
    }
}

/// The requested stages in canonical order, duplicates removed.
pub fn in_canonical_order(requested: &[Stage]) -> Vec<Stage> {
    STAGE_ORDER.into_iter().filter(|s| requested.contains(s)).collect()
}

impl std::str::FromStr for Stage {
    type Err = crate::error::ReconError;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        STAGE_ORDER
            .into_iter()
            .find(|stage| stage.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| crate::error::ReconError::Configuration(format!("unknown stage '{}'", s)))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// URL RECORDS & FINGERPRINTS
// ═══════════════════════════════════════════════════════════════════════════

/// A discovered URL. Identity is `normalized`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub raw: String,
    pub normalized: String,
    pub sources: BTreeSet<String>,
    pub discovered_at: DateTime<Utc>,
}

impl UrlRecord {
    pub fn host(&self) -> String {
        url::Url::parse(&self.normalized)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default()
    }
}

/// Cache-validation identity of a response. `Unknown` is never equal to
/// anything for grouping purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheFingerprint {
    Known {
        etag: Option<String>,
        content_length: Option<u64>,
        last_modified: Option<String>,
    },
    Unknown,
}

impl CacheFingerprint {
    pub fn is_known(&self) -> bool {
        matches!(self, CacheFingerprint::Known { .. })
    }
}

/// Cache-relevant response headers as observed by a probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheHeaders {
    pub etag: Option<String>,
    pub content_length: Option<u64>,
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveUrl {
    pub record: UrlRecord,
    pub status: u16,
    pub fingerprint: Option<CacheFingerprint>,
}

/// Hex SHA-256 of downloaded bytes; authoritative file identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedFile {
    pub content_hash: ContentHash,
    pub storage_path: std::path::PathBuf,
    pub size: u64,
    pub urls: BTreeSet<String>,
}

// ═══════════════════════════════════════════════════════════════════════════
// FINDINGS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingCategory {
    Endpoint,
    Secret,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub tool: String,
    /// Content hash or path of the analyzed file.
    pub reference: String,
    pub category: FindingCategory,
    pub payload: String,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FuzzSource {
    Wordlist,
    Permutation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzResult {
    pub url: String,
    pub status: u16,
    pub mode: FuzzSource,
}

/// A secret reported by a repository scanner. Scoped to one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretFinding {
    pub repository: String,
    pub tool: String,
    pub rule: String,
    /// `path:line` relative to the working copy.
    pub location: String,
    pub commit: Option<String>,
    pub redacted: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_is_total() {
        let mut ranks: Vec<usize> = STAGE_ORDER.iter().map(|s| s.rank()).collect();
        ranks.dedup();
        assert_eq!(ranks, vec![0, 1, 2, 3, 4, 5, 6]);
        assert!(Stage::Gather < Stage::Verify);
        assert!(Stage::Fuzz < Stage::Report);
    }

    #[test]
    fn test_consumed_artifacts_precede_consumer() {
        for stage in STAGE_ORDER {
            if let Some(input) = stage.consumes() {
                assert!(input.rank() < stage.rank(), "{} reads {}", stage, input);
            }
        }
    }

    #[test]
    fn test_canonical_order_ignores_request_order() {
        assert_eq!(
            in_canonical_order(&[Stage::Report, Stage::Verify, Stage::Gather, Stage::Verify]),
            vec![Stage::Gather, Stage::Verify, Stage::Report]
        );
        assert!("Dedup".parse::<Stage>().is_err());
        assert_eq!("deduplicate".parse::<Stage>().unwrap(), Stage::Deduplicate);
    }

    #[test]
    fn test_target_dir_name() {
        assert_eq!(Target::new(" example.com ").dir_name(), "example.com");
        assert_eq!(Target::new("acme/widgets").dir_name(), "acme_widgets");
    }
}
