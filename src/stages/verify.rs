// stages/verify.rs - Liveness probing
// Purpose: Probe every gathered URL with bounded concurrency. Dead URLs and
//          timeouts are recorded, never fatal.

use super::{read_list_file, records_from_urls, unexpected_input, StageInput, StageRunner};
use crate::artifact::{DeadUrl, StageOutput, VerifyOutput};
use crate::context::RunContext;
use crate::dedup::cache_fingerprint;
use crate::error::{ReconError, Result};
use crate::executor::TaskOutcome;
use crate::http::HttpProbe;
use crate::model::{LiveUrl, Stage, Target, UrlRecord};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

pub struct VerifyRunner;

#[async_trait]
impl StageRunner for VerifyRunner {
    fn stage(&self) -> Stage {
        Stage::Verify
    }

    async fn run(&self, ctx: &RunContext, target: &Target, input: StageInput) -> Result<StageOutput> {
        let (records, failures): (Vec<UrlRecord>, _) = match &input {
            StageInput::Artifact(artifact) => match &artifact.output {
                StageOutput::Gather(gather) => (gather.records.clone(), Vec::new()),
                _ => return Err(unexpected_input(Stage::Verify, &input)),
            },
            StageInput::Override(path) => records_from_urls(&read_list_file(path).await?, "input"),
            other => return Err(unexpected_input(Stage::Verify, other)),
        };

        let cfg = &ctx.config.verify;
        info!(target = %target, urls = records.len(), threads = cfg.threads, "verifying liveness");

        let tasks: Vec<_> = records
            .iter()
            .map(|record| {
                let http: Arc<dyn HttpProbe> = Arc::clone(&ctx.http);
                let url = record.normalized.clone();
                async move { http.probe(&url).await }
            })
            .collect();
        let outcomes = ctx.executor(cfg.threads, cfg.timeout, "verify").run(tasks).await;

        let mut live = Vec::new();
        let mut dead = Vec::new();
        for (record, outcome) in records.into_iter().zip(outcomes) {
            let url = record.normalized.clone();
            match outcome {
                TaskOutcome::Completed(resp) if resp.is_live() => live.push(LiveUrl {
                    status: resp.status,
                    fingerprint: Some(cache_fingerprint(&resp.headers)),
                    record,
                }),
                TaskOutcome::Completed(resp) => dead.push(DeadUrl {
                    url,
                    status: Some(resp.status),
                    reason: format!("HTTP {}", resp.status),
                }),
                TaskOutcome::Failed(e) => {
                    debug!(url = %url, error = %e, "probe failed");
                    dead.push(DeadUrl {
                        url,
                        status: None,
                        reason: e.to_string(),
                    });
                }
                TaskOutcome::TimedOut(limit) => dead.push(DeadUrl {
                    url,
                    status: None,
                    reason: ReconError::Timeout(limit).to_string(),
                }),
                TaskOutcome::Cancelled => return Err(ReconError::Cancelled),
            }
        }

        info!(target = %target, live = live.len(), dead = dead.len(), "verify complete");
        Ok(StageOutput::Verify(VerifyOutput { live, dead, failures }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::testing::{test_context, MockHttp, MockInvoker};

    #[tokio::test]
    async fn test_independent_verify_reads_url_list() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("urls.txt");
        std::fs::write(
            &list,
            "https://example.com/a.js\nhttps://example.com/b.js\nhttps://example.com/c.js\nnot a url\n",
        )
        .unwrap();

        let http = MockHttp::new()
            .with_status("https://example.com/a.js", 200)
            .with_status("https://example.com/b.js", 404)
            .with_error("https://example.com/c.js", "connection refused");
        let ctx = test_context(dir.path(), PipelineConfig::default(), MockInvoker::new(), http);

        let StageOutput::Verify(out) = VerifyRunner
            .run(&ctx, &Target::new("example.com"), StageInput::Override(list))
            .await
            .unwrap()
        else {
            panic!("unexpected output");
        };

        assert_eq!(out.live.len(), 1);
        assert_eq!(out.live[0].record.normalized, "https://example.com/a.js");
        assert_eq!(out.dead.len(), 2);
        assert_eq!(out.failures.len(), 1);
        assert!(ctx
            .store
            .read(&Target::new("example.com"), Stage::Gather)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_redirect_status_counts_as_live() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("urls.txt");
        std::fs::write(&list, "https://example.com/moved.js\n").unwrap();
        let http = MockHttp::new().with_status("https://example.com/moved.js", 302);
        let ctx = test_context(dir.path(), PipelineConfig::default(), MockInvoker::new(), http);

        let StageOutput::Verify(out) = VerifyRunner
            .run(&ctx, &Target::new("example.com"), StageInput::Override(list))
            .await
            .unwrap()
        else {
            panic!("unexpected output");
        };
        assert_eq!(out.live.len(), 1);
    }
}
