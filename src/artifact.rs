// artifact.rs - Stage outputs and artifact envelope
// Purpose: The typed unit each stage writes and the next one reads

use crate::dedup::CollapsedUrl;
use crate::error::ItemFailure;
use crate::model::{ContentHash, DownloadedFile, Finding, FuzzResult, LiveUrl, Stage, Target, UrlRecord};
use crate::report::TargetReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub target: Target,
    pub stage: Stage,
    /// Incremented on every replacement of the (target, stage) artifact.
    pub version: u64,
    pub run_id: String,
    pub produced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub meta: ArtifactMeta,
    pub output: StageOutput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "lowercase")]
pub enum StageOutput {
    Gather(GatherOutput),
    Verify(VerifyOutput),
    Deduplicate(DedupOutput),
    Download(DownloadOutput),
    Analyze(AnalyzeOutput),
    Fuzz(FuzzOutput),
    Report(TargetReport),
}

impl StageOutput {
    pub fn stage(&self) -> Stage {
        match self {
            StageOutput::Gather(_) => Stage::Gather,
            StageOutput::Verify(_) => Stage::Verify,
            StageOutput::Deduplicate(_) => Stage::Deduplicate,
            StageOutput::Download(_) => Stage::Download,
            StageOutput::Analyze(_) => Stage::Analyze,
            StageOutput::Fuzz(_) => Stage::Fuzz,
            StageOutput::Report(_) => Stage::Report,
        }
    }

    pub fn failures(&self) -> &[ItemFailure] {
        match self {
            StageOutput::Gather(o) => &o.failures,
            StageOutput::Verify(o) => &o.failures,
            StageOutput::Deduplicate(o) => &o.failures,
            StageOutput::Download(o) => &o.failures,
            StageOutput::Analyze(o) => &o.failures,
            StageOutput::Fuzz(o) => &o.failures,
            StageOutput::Report(_) => &[],
        }
    }

    /// One-line description for logs and the progress log.
    pub fn summary(&self) -> String {
        match self {
            StageOutput::Gather(o) => format!("{} unique JS URLs", o.records.len()),
            StageOutput::Verify(o) => format!("{} live, {} dead", o.live.len(), o.dead.len()),
            StageOutput::Deduplicate(o) => {
                format!("{} retained, {} collapsed", o.retained.len(), o.collapsed.len())
            }
            StageOutput::Download(o) => {
                format!("{} files from {} URLs", o.files.len(), o.url_map.len())
            }
            StageOutput::Analyze(o) => {
                format!("{} findings in {} files", o.findings.len(), o.files_analyzed)
            }
            StageOutput::Fuzz(o) => {
                format!("{} hits from {} candidates", o.results.len(), o.candidates_probed)
            }
            StageOutput::Report(r) => format!("report with {} failures", r.failures.len()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatherOutput {
    pub records: Vec<UrlRecord>,
    pub sources: Vec<String>,
    pub failures: Vec<ItemFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadUrl {
    pub url: String,
    pub status: Option<u16>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyOutput {
    pub live: Vec<LiveUrl>,
    pub dead: Vec<DeadUrl>,
    pub failures: Vec<ItemFailure>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupOutput {
    pub retained: Vec<LiveUrl>,
    pub collapsed: Vec<CollapsedUrl>,
    pub failures: Vec<ItemFailure>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadOutput {
    pub files: Vec<DownloadedFile>,
    pub url_map: BTreeMap<String, ContentHash>,
    pub failures: Vec<ItemFailure>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzeOutput {
    pub findings: Vec<Finding>,
    pub files_analyzed: usize,
    pub failures: Vec<ItemFailure>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FuzzOutput {
    pub candidates_probed: usize,
    pub results: Vec<FuzzResult>,
    pub failures: Vec<ItemFailure>,
}
