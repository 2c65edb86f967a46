// stages/report.rs - Report stage
// Purpose: Fold the target's artifacts into a TargetReport and render it
//          next to the artifact as Markdown

use super::{unexpected_input, StageInput, StageRunner};
use crate::artifact::StageOutput;
use crate::context::RunContext;
use crate::error::Result;
use crate::model::{Stage, Target};
use crate::report::{aggregate, TargetReport};
use crate::store::read_artifacts_in_dir;
use async_trait::async_trait;
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::{info, warn};

pub struct ReportRunner;

#[async_trait]
impl StageRunner for ReportRunner {
    fn stage(&self) -> Stage {
        Stage::Report
    }

    async fn run(&self, ctx: &RunContext, target: &Target, input: StageInput) -> Result<StageOutput> {
        let mut report = match input {
            StageInput::Collected {
                artifacts,
                skipped,
                unreadable,
            } => aggregate(Some(target), &artifacts, &skipped, &unreadable),
            StageInput::Override(dir) => {
                let (artifacts, unreadable) = read_artifacts_in_dir(&dir).await;
                aggregate(Some(target), &artifacts, &[], &unreadable)
            }
            StageInput::Artifact(artifact) => aggregate(Some(target), &[*artifact], &[], &[]),
            other => return Err(unexpected_input(Stage::Report, &other)),
        };
        report.mark_earlier_runs(&ctx.run_id);
        let earlier = report.sources.iter().filter(|s| s.earlier_run).count();
        if earlier > 0 {
            warn!(target = %target, artifacts = earlier, "report includes artifacts from earlier runs");
        }

        let markdown = render_markdown(&report);
        let path = PathBuf::from(target.dir_name())
            .join(Stage::Report.artifact_dir())
            .join("report.md");
        ctx.store.write_file(path, markdown.as_bytes()).await?;

        info!(
            target = %target,
            gathered = report.gathered,
            live = report.live,
            deduplicated_to = report.deduplicated_to,
            downloaded = report.downloaded,
            "report complete"
        );
        Ok(StageOutput::Report(report))
    }
}

pub fn render_markdown(report: &TargetReport) -> String {
    let mut md = String::new();
    let name = report.target.as_ref().map(|t| t.to_string()).unwrap_or_default();

    let _ = writeln!(md, "# JS Recon Report: {}\n", name);
    let _ = writeln!(md, "| Metric | Count |");
    let _ = writeln!(md, "|--------|-------|");
    for (label, value) in [
        ("Gathered URLs", report.gathered),
        ("Live URLs", report.live),
        ("Dead URLs", report.dead),
        ("After deduplication", report.deduplicated_to),
        ("Downloaded files", report.downloaded),
        ("Downloaded URLs", report.downloaded_urls),
        ("Endpoints", report.endpoints),
        ("Secrets", report.secrets),
        ("Fuzz candidates", report.fuzz_candidates),
    ] {
        let _ = writeln!(md, "| {} | {} |", label, value);
    }

    if !report.findings_by_tool.is_empty() {
        let _ = writeln!(md, "\n## Findings by tool\n");
        for (tool, counts) in &report.findings_by_tool {
            let _ = writeln!(md, "- **{}**: {} endpoints, {} secrets", tool, counts.endpoints, counts.secrets);
        }
    }

    if !report.fuzz_hits.is_empty() {
        let _ = writeln!(md, "\n## Fuzz hits\n");
        for (mode, hits) in &report.fuzz_hits {
            let _ = writeln!(md, "- {}: {}", mode, hits);
        }
    }

    if !report.sources.is_empty() {
        let _ = writeln!(md, "\n## Inputs\n");
        for source in &report.sources {
            let origin = if source.earlier_run { " (earlier run)" } else { "" };
            let _ = writeln!(
                md,
                "- {} v{} from run {}{}",
                source.stage, source.version, source.run_id, origin
            );
        }
    }

    if !report.skipped.is_empty() {
        let _ = writeln!(md, "\n## Skipped stages\n");
        for skip in &report.skipped {
            let _ = writeln!(md, "- {}: {}", skip.stage, skip.reason);
        }
    }

    if !report.failures.is_empty() {
        let _ = writeln!(md, "\n## Failures ({})\n", report.failures.len());
        for f in &report.failures {
            let stage = f.stage.map(|s| s.name()).unwrap_or("artifact");
            let _ = writeln!(md, "- [{}] {}: {}", stage, f.failure.item, f.failure.reason);
        }
    }

    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{Artifact, ArtifactMeta, GatherOutput, VerifyOutput};
    use crate::config::PipelineConfig;
    use crate::report::SkippedStage;
    use crate::testing::{test_context, MockHttp, MockInvoker};
    use chrono::Utc;

    fn artifact(target: &Target, run_id: &str, output: StageOutput) -> Artifact {
        Artifact {
            meta: ArtifactMeta {
                target: target.clone(),
                stage: output.stage(),
                version: 1,
                run_id: run_id.to_string(),
                produced_at: Utc::now(),
            },
            output,
        }
    }

    #[tokio::test]
    async fn test_report_writes_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path(), PipelineConfig::default(), MockInvoker::new(), MockHttp::new());
        let target = Target::new("example.com");

        let input = StageInput::Collected {
            artifacts: Vec::new(),
            skipped: vec![SkippedStage {
                stage: Stage::Verify,
                reason: "no gather artifact".to_string(),
            }],
            unreadable: Vec::new(),
        };
        let StageOutput::Report(report) = ReportRunner.run(&ctx, &target, input).await.unwrap() else {
            panic!("unexpected output");
        };
        assert_eq!(report.skipped.len(), 1);

        let md = std::fs::read_to_string(dir.path().join("example.com/report/report.md")).unwrap();
        assert!(md.contains("# JS Recon Report: example.com"));
        assert!(md.contains("- verify: no gather artifact"));
    }

    #[tokio::test]
    async fn test_inputs_from_earlier_runs_are_labelled() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path(), PipelineConfig::default(), MockInvoker::new(), MockHttp::new());
        let target = Target::new("example.com");

        let input = StageInput::Collected {
            artifacts: vec![
                artifact(&target, "old-run", StageOutput::Gather(GatherOutput::default())),
                artifact(&target, &ctx.run_id, StageOutput::Verify(VerifyOutput::default())),
            ],
            skipped: Vec::new(),
            unreadable: Vec::new(),
        };
        let StageOutput::Report(report) = ReportRunner.run(&ctx, &target, input).await.unwrap() else {
            panic!("unexpected output");
        };
        let earlier: Vec<Stage> = report.sources.iter().filter(|s| s.earlier_run).map(|s| s.stage).collect();
        assert_eq!(earlier, vec![Stage::Gather]);

        let md = std::fs::read_to_string(dir.path().join("example.com/report/report.md")).unwrap();
        assert!(md.contains("- gather v1 from run old-run (earlier run)"));
        assert!(md.contains(&format!("- verify v1 from run {}\n", ctx.run_id)));
    }
}
