// stages/deduplicate.rs - Cache-fingerprint dedup before download
// Purpose: Collapse live URLs that share a known fingerprint on the same
//          host. Best-effort: it only saves fetches, content hashing in the
//          download stage remains authoritative.

use super::{live_urls_of, read_list_file, records_from_urls, unexpected_input, StageInput, StageRunner};
use crate::artifact::{DedupOutput, StageOutput};
use crate::context::RunContext;
use crate::dedup::{cache_fingerprint, dedup_by_fingerprint};
use crate::error::{ItemFailure, ReconError, Result};
use crate::executor::TaskOutcome;
use crate::http::HttpProbe;
use crate::model::{CacheFingerprint, LiveUrl, Stage, Target};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub struct DeduplicateRunner;

#[async_trait]
impl StageRunner for DeduplicateRunner {
    fn stage(&self) -> Stage {
        Stage::Deduplicate
    }

    async fn run(&self, ctx: &RunContext, target: &Target, input: StageInput) -> Result<StageOutput> {
        let (mut live, mut failures): (Vec<LiveUrl>, Vec<ItemFailure>) = match &input {
            StageInput::Artifact(artifact) => match live_urls_of(artifact) {
                Some(live) => (live.to_vec(), Vec::new()),
                None => return Err(unexpected_input(Stage::Deduplicate, &input)),
            },
            StageInput::Override(path) => {
                let (records, failures) = records_from_urls(&read_list_file(path).await?, "input");
                let live = records
                    .into_iter()
                    .map(|record| LiveUrl {
                        record,
                        status: 0,
                        fingerprint: None,
                    })
                    .collect();
                (live, failures)
            }
            other => return Err(unexpected_input(Stage::Deduplicate, other)),
        };

        failures.extend(fill_missing_fingerprints(ctx, &mut live).await?);

        let before = live.len();
        let result = dedup_by_fingerprint(live);
        info!(
            target = %target,
            before,
            retained = result.retained.len(),
            collapsed = result.collapsed.len(),
            "deduplicate complete"
        );

        Ok(StageOutput::Deduplicate(DedupOutput {
            retained: result.retained,
            collapsed: result.collapsed,
            failures,
        }))
    }
}

/// HEAD-probe records that arrived without captured headers. A failed probe
/// leaves the fingerprint unknown so the URL is never merged.
async fn fill_missing_fingerprints(ctx: &RunContext, live: &mut [LiveUrl]) -> Result<Vec<ItemFailure>> {
    let missing: Vec<usize> = live
        .iter()
        .enumerate()
        .filter(|(_, l)| l.fingerprint.is_none())
        .map(|(i, _)| i)
        .collect();
    if missing.is_empty() {
        return Ok(Vec::new());
    }

    let cfg = &ctx.config.dedup;
    let tasks: Vec<_> = missing
        .iter()
        .map(|&i| {
            let http: Arc<dyn HttpProbe> = Arc::clone(&ctx.http);
            let url = live[i].record.normalized.clone();
            async move { http.head(&url).await }
        })
        .collect();
    let outcomes = ctx.executor(cfg.threads, cfg.timeout, "fingerprint").run(tasks).await;

    let mut failures = Vec::new();
    for (i, outcome) in missing.into_iter().zip(outcomes) {
        let entry = &mut live[i];
        match outcome {
            TaskOutcome::Completed(resp) => {
                entry.status = resp.status;
                entry.fingerprint = Some(cache_fingerprint(&resp.headers));
            }
            TaskOutcome::Cancelled => return Err(ReconError::Cancelled),
            other => {
                entry.fingerprint = Some(CacheFingerprint::Unknown);
                if let Err(e) = other.into_result() {
                    failures.push(ItemFailure::from_error(entry.record.normalized.clone(), &e));
                }
            }
        }
    }
    Ok(failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{Artifact, ArtifactMeta};
    use crate::config::PipelineConfig;
    use crate::testing::{test_context, MockHttp, MockInvoker};
    use chrono::Utc;

    #[tokio::test]
    async fn test_rerun_on_own_output_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("urls.txt");
        std::fs::write(
            &list,
            "https://example.com/a.js\nhttps://example.com/b.js\nhttps://example.com/c.js\n",
        )
        .unwrap();
        let http = MockHttp::new()
            .with_etag("https://example.com/a.js", 200, "\"v1\"")
            .with_etag("https://example.com/b.js", 200, "\"v1\"")
            .with_status("https://example.com/c.js", 200);
        let ctx = test_context(dir.path(), PipelineConfig::default(), MockInvoker::new(), http);
        let target = Target::new("example.com");

        let StageOutput::Deduplicate(first) = DeduplicateRunner
            .run(&ctx, &target, StageInput::Override(list))
            .await
            .unwrap()
        else {
            panic!("unexpected output");
        };
        assert_eq!(first.retained.len(), 2);
        assert_eq!(first.collapsed.len(), 1);

        let previous = Artifact {
            meta: ArtifactMeta {
                target: target.clone(),
                stage: Stage::Deduplicate,
                version: 1,
                run_id: "run".to_string(),
                produced_at: Utc::now(),
            },
            output: StageOutput::Deduplicate(first.clone()),
        };
        let StageOutput::Deduplicate(second) = DeduplicateRunner
            .run(&ctx, &target, StageInput::Artifact(Box::new(previous)))
            .await
            .unwrap()
        else {
            panic!("unexpected output");
        };
        assert_eq!(second.retained, first.retained);
        assert!(second.collapsed.is_empty());
    }
}
