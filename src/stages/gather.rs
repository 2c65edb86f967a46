// stages/gather.rs - JavaScript URL discovery
// Purpose: Run every selected discovery source for the target and merge the
//          results by normalized URL

use super::{read_list_file, unexpected_input, StageInput, StageRunner};
use crate::artifact::{GatherOutput, StageOutput};
use crate::context::RunContext;
use crate::dedup::{merge_url_records, normalize_url};
use crate::error::{FailureKind, ItemFailure, ReconError, Result};
use crate::model::{Stage, Target, UrlRecord};
use crate::tools::discovery::sources_for_mode;
use crate::tools::ToolInvoker;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct GatherRunner;

struct Job {
    source: usize,
    seed: String,
}

#[async_trait]
impl StageRunner for GatherRunner {
    fn stage(&self) -> Stage {
        Stage::Gather
    }

    async fn run(&self, ctx: &RunContext, target: &Target, input: StageInput) -> Result<StageOutput> {
        let seeds = match &input {
            StageInput::Target => vec![target.to_string()],
            StageInput::Override(path) if path.is_file() => read_list_file(path).await?,
            StageInput::Override(path) => vec![path.display().to_string()],
            other => return Err(unexpected_input(Stage::Gather, other)),
        };
        if seeds.is_empty() {
            return Err(ReconError::Configuration("no targets to gather from".to_string()));
        }

        let cfg = &ctx.config.gather;
        let sources = sources_for_mode(&cfg.mode, cfg.depth);
        let mut failures = Vec::new();

        let mut available = Vec::new();
        for (idx, source) in sources.iter().enumerate() {
            if ctx.invoker.is_available(source.program()) {
                available.push(idx);
            } else {
                warn!(target = %target, tool = source.tool_id(), "discovery source not installed, skipping");
                failures.push(ItemFailure::new(
                    source.tool_id(),
                    FailureKind::Configuration,
                    format!("{} is not installed or not in PATH", source.program()),
                ));
            }
        }
        if available.is_empty() {
            return Err(ReconError::Configuration(format!(
                "none of the discovery sources for mode '{}' are installed",
                cfg.mode
            )));
        }

        let jobs: Vec<Job> = seeds
            .iter()
            .flat_map(|seed| {
                available.iter().map(move |&source| Job {
                    source,
                    seed: seed.clone(),
                })
            })
            .collect();

        info!(target = %target, seeds = seeds.len(), sources = available.len(), "gathering JS URLs");

        let tasks: Vec<_> = jobs
            .iter()
            .map(|job| {
                let invoker: Arc<dyn ToolInvoker> = Arc::clone(&ctx.invoker);
                let program = sources[job.source].program().to_string();
                let args = sources[job.source].args(&job.seed);
                let stdin = sources[job.source].stdin(&job.seed);
                let timeout = cfg.command_timeout;
                async move {
                    let output = invoker.invoke(&program, &args, stdin.as_deref(), timeout).await?;
                    Ok::<_, ReconError>(output.into_success(&program)?.stdout)
                }
            })
            .collect();

        // The invoker enforces the command timeout itself
        let outcomes = ctx
            .executor(cfg.threads, cfg.command_timeout + Duration::from_secs(5), "gather")
            .run(tasks)
            .await;

        let mut records: Vec<UrlRecord> = Vec::new();
        let mut succeeded = 0usize;
        for (job, outcome) in jobs.iter().zip(outcomes) {
            let source = &sources[job.source];
            let item = format!("{} {}", source.tool_id(), job.seed);
            match outcome.into_result() {
                Ok(stdout) => {
                    succeeded += 1;
                    let discovered_at = Utc::now();
                    let found = source.parse(&stdout);
                    info!(target = %target, tool = source.tool_id(), seed = %job.seed, urls = found.len(), "source finished");
                    for raw in found {
                        match normalize_url(&raw) {
                            Ok(normalized) => records.push(UrlRecord {
                                raw,
                                normalized,
                                sources: [source.tool_id().to_string()].into_iter().collect(),
                                discovered_at,
                            }),
                            Err(e) => failures.push(ItemFailure::from_error(raw, &e)),
                        }
                    }
                }
                Err(ReconError::Cancelled) => return Err(ReconError::Cancelled),
                Err(e) => {
                    warn!(target = %target, item = %item, error = %e, "discovery source failed");
                    failures.push(ItemFailure::from_error(item, &e));
                }
            }
        }

        if succeeded == 0 {
            return Err(ReconError::Transient(format!(
                "every discovery source failed for {}",
                target
            )));
        }

        let records = merge_url_records(records);
        info!(target = %target, urls = records.len(), "gather complete");

        Ok(StageOutput::Gather(GatherOutput {
            records,
            sources: available.iter().map(|&i| sources[i].tool_id().to_string()).collect(),
            failures,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::testing::{test_context, MockInvoker};

    #[tokio::test]
    async fn test_gather_merges_sources() {
        let dir = tempfile::tempdir().unwrap();
        let invoker = MockInvoker::new()
            .with_output("waybackurls", "https://example.com/app.js\nhttps://example.com/a.css\n")
            .with_output("gau", "https://example.com/app.js\nhttps://example.com/vendor.js\n")
            .with_output("katana", "https://EXAMPLE.com/app.js#x\n");
        let ctx = test_context(dir.path(), PipelineConfig::default(), invoker, Default::default());

        let output = GatherRunner
            .run(&ctx, &Target::new("example.com"), StageInput::Target)
            .await
            .unwrap();
        let StageOutput::Gather(gather) = output else {
            panic!("unexpected output");
        };
        assert_eq!(gather.records.len(), 2);
        let app = gather
            .records
            .iter()
            .find(|r| r.normalized == "https://example.com/app.js")
            .unwrap();
        assert_eq!(app.sources.len(), 3);
        assert!(gather.failures.is_empty());
    }

    #[tokio::test]
    async fn test_waybackurls_seed_goes_through_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let invoker = MockInvoker::new().with_output_for("waybackurls", "example.com", "https://example.com/app.js\n");
        let mut config = PipelineConfig::default();
        config.gather.mode = "w".to_string();
        let ctx = test_context(dir.path(), config, invoker.clone(), Default::default());

        let StageOutput::Gather(gather) = GatherRunner
            .run(&ctx, &Target::new("example.com"), StageInput::Target)
            .await
            .unwrap()
        else {
            panic!("unexpected output");
        };
        assert_eq!(gather.records.len(), 1);
        assert_eq!(
            invoker.stdin_inputs(),
            vec![("waybackurls".to_string(), "example.com\n".to_string())]
        );
        assert!(invoker.invocations()[0].1.is_empty());
    }

    #[tokio::test]
    async fn test_gather_tolerates_partial_failure() {
        let dir = tempfile::tempdir().unwrap();
        let invoker = MockInvoker::new()
            .with_output("waybackurls", "https://example.com/app.js\n")
            .with_failure("gau", 1, "rate limited")
            .without_tool("katana");
        let ctx = test_context(dir.path(), PipelineConfig::default(), invoker, Default::default());

        let StageOutput::Gather(gather) = GatherRunner
            .run(&ctx, &Target::new("example.com"), StageInput::Target)
            .await
            .unwrap()
        else {
            panic!("unexpected output");
        };
        assert_eq!(gather.records.len(), 1);
        assert_eq!(gather.failures.len(), 2);
        assert!(gather.failures.iter().any(|f| f.kind == FailureKind::Configuration));
    }

    #[tokio::test]
    async fn test_gather_fails_when_every_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let invoker = MockInvoker::new()
            .with_failure("waybackurls", 1, "boom")
            .with_failure("gau", 1, "boom")
            .with_failure("katana", 2, "boom");
        let ctx = test_context(dir.path(), PipelineConfig::default(), invoker, Default::default());

        let err = GatherRunner
            .run(&ctx, &Target::new("example.com"), StageInput::Target)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
