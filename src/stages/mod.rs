// stages/mod.rs - Stage runner contract and registry
// Purpose: One runner per stage kind. Runners only see their resolved input
//          and return the output the orchestrator persists.

pub mod analyze;
pub mod deduplicate;
pub mod download;
pub mod fuzz;
pub mod gather;
pub mod report;
pub mod verify;

use crate::artifact::{Artifact, StageOutput};
use crate::context::RunContext;
use crate::dedup::normalize_url;
use crate::error::{FailureKind, ItemFailure, ReconError, Result};
use crate::model::{LiveUrl, Stage, Target, UrlRecord};
use crate::report::SkippedStage;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What a runner starts from.
#[derive(Debug, Clone)]
pub enum StageInput {
    /// The target name itself (chained gather).
    Target,
    /// The artifact of the stage this one consumes.
    Artifact(Box<Artifact>),
    /// An explicit file or directory given on the command line.
    Override(PathBuf),
    /// Everything the report needs for a chained run.
    Collected {
        artifacts: Vec<Artifact>,
        skipped: Vec<SkippedStage>,
        unreadable: Vec<ItemFailure>,
    },
}

#[async_trait]
pub trait StageRunner: Send + Sync {
    fn stage(&self) -> Stage;

    async fn run(&self, ctx: &RunContext, target: &Target, input: StageInput) -> Result<StageOutput>;
}

/// Runner lookup by stage. Any runner can be replaced without touching the
/// orchestrator.
#[derive(Clone)]
pub struct StageRegistry {
    runners: HashMap<Stage, Arc<dyn StageRunner>>,
}

impl Default for StageRegistry {
    fn default() -> Self {
        let mut registry = Self {
            runners: HashMap::new(),
        };
        registry.register(Arc::new(gather::GatherRunner));
        registry.register(Arc::new(verify::VerifyRunner));
        registry.register(Arc::new(deduplicate::DeduplicateRunner));
        registry.register(Arc::new(download::DownloadRunner));
        registry.register(Arc::new(analyze::AnalyzeRunner));
        registry.register(Arc::new(fuzz::FuzzRunner));
        registry.register(Arc::new(report::ReportRunner));
        registry
    }
}

impl StageRegistry {
    pub fn register(&mut self, runner: Arc<dyn StageRunner>) {
        self.runners.insert(runner.stage(), runner);
    }

    pub fn get(&self, stage: Stage) -> Option<Arc<dyn StageRunner>> {
        self.runners.get(&stage).cloned()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// INPUT HELPERS
// ═══════════════════════════════════════════════════════════════════════════

/// Resolve an override path. A JSON file holding a stage artifact is used as
/// that artifact; anything else is passed through as a plain path.
pub async fn resolve_override(path: &Path) -> Result<StageInput> {
    if path.is_file() && path.extension().is_some_and(|e| e.eq_ignore_ascii_case("json")) {
        let bytes = tokio::fs::read(path).await?;
        if let Ok(artifact) = serde_json::from_slice::<Artifact>(&bytes) {
            return Ok(StageInput::Artifact(Box::new(artifact)));
        }
    }
    if !path.exists() {
        return Err(ReconError::Configuration(format!("input not found: {}", path.display())));
    }
    Ok(StageInput::Override(path.to_path_buf()))
}

/// First whitespace-separated token of every non-empty, non-comment line.
pub async fn read_list_file(path: &Path) -> Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ReconError::Configuration(format!("cannot read {}: {}", path.display(), e)))?;
    Ok(parse_list(&content))
}

pub fn parse_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Turn raw URL strings into records, reporting the ones that do not
/// normalize. Duplicates keep their first occurrence.
pub fn records_from_urls(urls: &[String], source: &str) -> (Vec<UrlRecord>, Vec<ItemFailure>) {
    let now = Utc::now();
    let mut seen = BTreeSet::new();
    let mut records = Vec::new();
    let mut failures = Vec::new();

    for raw in urls {
        match normalize_url(raw) {
            Ok(normalized) => {
                if seen.insert(normalized.clone()) {
                    records.push(UrlRecord {
                        raw: raw.clone(),
                        normalized,
                        sources: [source.to_string()].into_iter().collect(),
                        discovered_at: now,
                    });
                }
            }
            Err(e) => failures.push(ItemFailure::new(raw.clone(), FailureKind::Data, e.to_string())),
        }
    }

    (records, failures)
}

/// Live URLs carried by a verify or deduplicate artifact.
pub fn live_urls_of(artifact: &Artifact) -> Option<&[LiveUrl]> {
    match &artifact.output {
        StageOutput::Verify(o) => Some(&o.live),
        StageOutput::Deduplicate(o) => Some(&o.retained),
        _ => None,
    }
}

pub fn unexpected_input(stage: Stage, input: &StageInput) -> ReconError {
    let found = match input {
        StageInput::Target => "the bare target".to_string(),
        StageInput::Artifact(a) => format!("a {} artifact", a.meta.stage),
        StageInput::Override(p) => p.display().to_string(),
        StageInput::Collected { .. } => "collected artifacts".to_string(),
    };
    ReconError::Data(format!("{} cannot start from {}", stage, found))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_takes_first_token() {
        let content = "https://a.example.com/app.js [200]\n\n# comment\n  https://b.example.com/x.js  \n";
        assert_eq!(
            parse_list(content),
            vec!["https://a.example.com/app.js", "https://b.example.com/x.js"]
        );
    }

    #[test]
    fn test_records_from_urls_reports_bad_lines() {
        let urls = vec![
            "https://Example.com/app.js".to_string(),
            "https://example.com/app.js".to_string(),
            "ftp://example.com/x.js".to_string(),
        ];
        let (records, failures) = records_from_urls(&urls, "input");
        assert_eq!(records.len(), 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::Data);
    }

    #[test]
    fn test_registry_has_every_stage() {
        let registry = StageRegistry::default();
        for stage in crate::model::STAGE_ORDER {
            assert_eq!(registry.get(stage).map(|r| r.stage()), Some(stage));
        }
    }

    #[tokio::test]
    async fn test_resolve_override_reads_artifact_json() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.txt");
        assert!(resolve_override(&missing).await.unwrap_err().is_configuration());

        let list = dir.path().join("urls.txt");
        std::fs::write(&list, "https://example.com/a.js\n").unwrap();
        assert!(matches!(resolve_override(&list).await.unwrap(), StageInput::Override(_)));
    }
}
