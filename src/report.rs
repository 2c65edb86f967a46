// report.rs - Per-target report aggregation
// Purpose: Fold every stage artifact of a target into summary statistics.
//          No network or process work happens here.

use crate::artifact::{Artifact, StageOutput};
use crate::error::ItemFailure;
use crate::model::{FindingCategory, FuzzSource, Stage, Target};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedStage {
    pub stage: Stage,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Option<Stage>,
    #[serde(flatten)]
    pub failure: ItemFailure,
}

/// Which artifact version a report was folded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub stage: Stage,
    pub version: u64,
    pub run_id: String,
    /// Produced by a run other than the one that built the report.
    #[serde(default)]
    pub earlier_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingCounts {
    pub endpoints: usize,
    pub secrets: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReport {
    pub target: Option<Target>,
    pub gathered: usize,
    pub live: usize,
    pub dead: usize,
    pub deduplicated_to: usize,
    pub collapsed: usize,
    pub downloaded: usize,
    pub downloaded_urls: usize,
    pub endpoints: usize,
    pub secrets: usize,
    pub findings_by_tool: BTreeMap<String, FindingCounts>,
    pub fuzz_candidates: usize,
    pub fuzz_hits: BTreeMap<String, usize>,
    pub failures: Vec<StageFailure>,
    pub skipped: Vec<SkippedStage>,
    pub sources: Vec<ArtifactRef>,
}

impl TargetReport {
    /// Flag every source not produced by `run_id`.
    pub fn mark_earlier_runs(&mut self, run_id: &str) {
        for source in &mut self.sources {
            source.earlier_run = source.run_id != run_id;
        }
    }

    fn absorb(&mut self, artifact: &Artifact) {
        if self.target.is_none() {
            self.target = Some(artifact.meta.target.clone());
        }
        self.sources.push(ArtifactRef {
            stage: artifact.meta.stage,
            version: artifact.meta.version,
            run_id: artifact.meta.run_id.clone(),
            earlier_run: false,
        });

        match &artifact.output {
            StageOutput::Gather(o) => self.gathered = o.records.len(),
            StageOutput::Verify(o) => {
                self.live = o.live.len();
                self.dead = o.dead.len();
            }
            StageOutput::Deduplicate(o) => {
                self.deduplicated_to = o.retained.len();
                self.collapsed = o.collapsed.len();
            }
            StageOutput::Download(o) => {
                self.downloaded = o.files.len();
                self.downloaded_urls = o.url_map.len();
            }
            StageOutput::Analyze(o) => {
                for finding in &o.findings {
                    let counts = self.findings_by_tool.entry(finding.tool.clone()).or_default();
                    match finding.category {
                        FindingCategory::Endpoint => {
                            counts.endpoints += 1;
                            self.endpoints += 1;
                        }
                        FindingCategory::Secret => {
                            counts.secrets += 1;
                            self.secrets += 1;
                        }
                    }
                }
            }
            StageOutput::Fuzz(o) => {
                self.fuzz_candidates = o.candidates_probed;
                for result in &o.results {
                    let mode = match result.mode {
                        FuzzSource::Wordlist => "wordlist",
                        FuzzSource::Permutation => "permutation",
                    };
                    *self.fuzz_hits.entry(mode.to_string()).or_insert(0) += 1;
                }
            }
            // A previous report is never folded into the next one
            StageOutput::Report(_) => return,
        }

        let stage = artifact.meta.stage;
        self.failures.extend(artifact.output.failures().iter().cloned().map(|failure| StageFailure {
            stage: Some(stage),
            failure,
        }));
    }
}

/// Fold artifacts (any order) plus the orchestrator's skip records into one
/// report.
pub fn aggregate(
    target: Option<&Target>,
    artifacts: &[Artifact],
    skipped: &[SkippedStage],
    unreadable: &[ItemFailure],
) -> TargetReport {
    let mut report = TargetReport {
        target: target.cloned(),
        ..TargetReport::default()
    };

    let mut ordered: Vec<&Artifact> = artifacts.iter().collect();
    ordered.sort_by_key(|a| a.meta.stage);
    for artifact in ordered {
        report.absorb(artifact);
    }

    report.failures.extend(unreadable.iter().cloned().map(|failure| StageFailure { stage: None, failure }));
    report.skipped = skipped.to_vec();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{AnalyzeOutput, ArtifactMeta, GatherOutput, VerifyOutput};
    use crate::error::FailureKind;
    use crate::model::{Confidence, Finding};
    use chrono::Utc;

    fn artifact(stage: Stage, output: StageOutput) -> Artifact {
        Artifact {
            meta: ArtifactMeta {
                target: Target::new("example.com"),
                stage,
                version: 1,
                run_id: "run".to_string(),
                produced_at: Utc::now(),
            },
            output,
        }
    }

    fn finding(tool: &str, category: FindingCategory) -> Finding {
        Finding {
            tool: tool.to_string(),
            reference: "abc".to_string(),
            category,
            payload: "x".to_string(),
            confidence: Confidence::Low,
        }
    }

    #[test]
    fn test_aggregate_counts_and_failures() {
        let verify = VerifyOutput {
            failures: vec![ItemFailure::new("bad url", FailureKind::Data, "no host")],
            ..VerifyOutput::default()
        };
        let analyze = AnalyzeOutput {
            findings: vec![
                finding("jsluice-urls", FindingCategory::Endpoint),
                finding("jsluice-urls", FindingCategory::Endpoint),
                finding("trufflehog", FindingCategory::Secret),
            ],
            files_analyzed: 1,
            failures: Vec::new(),
        };

        let artifacts = vec![
            artifact(Stage::Analyze, StageOutput::Analyze(analyze)),
            artifact(Stage::Gather, StageOutput::Gather(GatherOutput::default())),
            artifact(Stage::Verify, StageOutput::Verify(verify)),
        ];
        let skipped = vec![SkippedStage {
            stage: Stage::Fuzz,
            reason: "no verify artifact".to_string(),
        }];

        let report = aggregate(Some(&Target::new("example.com")), &artifacts, &skipped, &[]);
        assert_eq!(report.endpoints, 2);
        assert_eq!(report.secrets, 1);
        assert_eq!(report.findings_by_tool["jsluice-urls"].endpoints, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, Some(Stage::Verify));
        assert_eq!(report.skipped, skipped);
        let stages: Vec<Stage> = report.sources.iter().map(|s| s.stage).collect();
        assert_eq!(stages, vec![Stage::Gather, Stage::Verify, Stage::Analyze]);
    }

    #[test]
    fn test_aggregate_is_order_independent() {
        let a = artifact(Stage::Gather, StageOutput::Gather(GatherOutput::default()));
        let b = artifact(Stage::Verify, StageOutput::Verify(VerifyOutput::default()));
        let forward = aggregate(None, &[a.clone(), b.clone()], &[], &[]);
        let backward = aggregate(None, &[b, a], &[], &[]);
        assert_eq!(forward, backward);
    }
}
