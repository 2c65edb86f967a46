// stages/download.rs - Content-addressed download
// Purpose: Fetch retained URLs, store one file per distinct body hash and
//          keep the URL -> hash mapping for every URL that contributed,
//          including the ones deduplication collapsed onto a retained URL

use super::{live_urls_of, read_list_file, records_from_urls, unexpected_input, StageInput, StageRunner};
use crate::artifact::{DownloadOutput, StageOutput};
use crate::context::RunContext;
use crate::dedup::{content_hash, group_by_content, CollapsedUrl};
use crate::error::{FailureKind, ItemFailure, ReconError, Result};
use crate::executor::TaskOutcome;
use crate::http::HttpProbe;
use crate::model::{ContentHash, DownloadedFile, Stage, Target};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub struct DownloadRunner;

#[async_trait]
impl StageRunner for DownloadRunner {
    fn stage(&self) -> Stage {
        Stage::Download
    }

    async fn run(&self, ctx: &RunContext, target: &Target, input: StageInput) -> Result<StageOutput> {
        let (urls, collapsed, mut failures): (Vec<String>, Vec<CollapsedUrl>, Vec<ItemFailure>) = match &input {
            StageInput::Artifact(artifact) => {
                let Some(live) = live_urls_of(artifact) else {
                    return Err(unexpected_input(Stage::Download, &input));
                };
                let collapsed = match &artifact.output {
                    StageOutput::Deduplicate(dedup) => dedup.collapsed.clone(),
                    _ => Vec::new(),
                };
                (live.iter().map(|l| l.record.normalized.clone()).collect(), collapsed, Vec::new())
            }
            StageInput::Override(path) => {
                let (records, failures) = records_from_urls(&read_list_file(path).await?, "input");
                (records.into_iter().map(|r| r.normalized).collect(), Vec::new(), failures)
            }
            other => return Err(unexpected_input(Stage::Download, other)),
        };

        let cfg = &ctx.config.download;
        info!(target = %target, urls = urls.len(), threads = cfg.threads, "downloading JS files");

        let tasks: Vec<_> = urls
            .iter()
            .map(|url| {
                let http: Arc<dyn HttpProbe> = Arc::clone(&ctx.http);
                let url = url.clone();
                async move { http.fetch(&url).await }
            })
            .collect();
        let outcomes = ctx.executor(cfg.threads, cfg.timeout, "download").run(tasks).await;

        let mut bodies: BTreeMap<ContentHash, Vec<u8>> = BTreeMap::new();
        let mut url_map: BTreeMap<String, ContentHash> = BTreeMap::new();
        for (url, outcome) in urls.into_iter().zip(outcomes) {
            match outcome {
                TaskOutcome::Completed(body) if body.status == 200 => {
                    let hash = content_hash(&body.bytes);
                    bodies.entry(hash.clone()).or_insert(body.bytes);
                    url_map.insert(url, hash);
                }
                TaskOutcome::Completed(body) => {
                    failures.push(ItemFailure::new(url, FailureKind::Status, format!("HTTP {}", body.status)));
                }
                TaskOutcome::Cancelled => return Err(ReconError::Cancelled),
                other => {
                    if let Err(e) = other.into_result() {
                        warn!(url = %url, error = %e, "download failed");
                        failures.push(ItemFailure::from_error(url, &e));
                    }
                }
            }
        }

        for c in &collapsed {
            if let Some(hash) = url_map.get(&c.kept).cloned() {
                url_map.entry(c.url.clone()).or_insert(hash);
            }
        }

        let files_dir = PathBuf::from(target.dir_name())
            .join(Stage::Download.artifact_dir())
            .join("files");
        let groups = group_by_content(url_map.iter().map(|(u, h)| (u.clone(), h.clone())));

        let mut files = Vec::with_capacity(groups.len());
        for (hash, contributing) in groups {
            let Some(bytes) = bodies.get(&hash) else {
                continue;
            };
            let storage_path = ctx
                .store
                .write_file(files_dir.join(format!("{}.js", hash)), bytes)
                .await?;
            files.push(DownloadedFile {
                content_hash: hash,
                storage_path,
                size: bytes.len() as u64,
                urls: contributing,
            });
        }

        let current: BTreeSet<String> = files.iter().map(|f| format!("{}.js", f.content_hash)).collect();
        match prune_orphans(&ctx.store.root().join(&files_dir), &current).await {
            Ok(0) => {}
            Ok(removed) => info!(target = %target, removed, "removed files no longer referenced"),
            Err(e) => {
                warn!(target = %target, error = %e, "cannot prune stale downloads");
                failures.push(ItemFailure::from_error("prune downloads", &e));
            }
        }

        info!(
            target = %target,
            files = files.len(),
            urls = url_map.len(),
            failed = failures.len(),
            "download complete"
        );
        Ok(StageOutput::Download(DownloadOutput {
            files,
            url_map,
            failures,
        }))
    }
}

/// Delete stored `*.js` bodies that `keep` does not name.
async fn prune_orphans(dir: &Path, keep: &BTreeSet<String>) -> Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".js") && !keep.contains(&name) {
            tokio::fs::remove_file(entry.path()).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::DedupOutput;
    use crate::config::PipelineConfig;
    use crate::model::LiveUrl;
    use crate::testing::{test_context, MockHttp, MockInvoker};

    #[tokio::test]
    async fn test_identical_bodies_stored_once() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("urls.txt");
        std::fs::write(
            &list,
            "https://example.com/a.js\nhttps://cdn.example.com/a.js\nhttps://example.com/b.js\nhttps://example.com/gone.js\n",
        )
        .unwrap();
        let http = MockHttp::new()
            .with_body("https://example.com/a.js", "console.log('a')")
            .with_body("https://cdn.example.com/a.js", "console.log('a')")
            .with_body("https://example.com/b.js", "console.log('b')")
            .with_status("https://example.com/gone.js", 404);
        let ctx = test_context(dir.path(), PipelineConfig::default(), MockInvoker::new(), http);

        let StageOutput::Download(out) = DownloadRunner
            .run(&ctx, &Target::new("example.com"), StageInput::Override(list))
            .await
            .unwrap()
        else {
            panic!("unexpected output");
        };

        assert_eq!(out.files.len(), 2);
        assert_eq!(out.url_map.len(), 3);
        let shared = out.files.iter().find(|f| f.urls.len() == 2).unwrap();
        assert!(shared.urls.contains("https://cdn.example.com/a.js"));
        assert!(shared.storage_path.exists());
        assert_eq!(
            std::fs::read(&shared.storage_path).unwrap(),
            b"console.log('a')".to_vec()
        );
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].kind, FailureKind::Status);

        let stored = std::fs::read_dir(dir.path().join("example.com/downloads/files")).unwrap().count();
        assert_eq!(stored, 2);
    }

    #[tokio::test]
    async fn test_collapsed_urls_share_the_kept_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = Target::new("example.com");
        let http = MockHttp::new().with_body("https://example.com/app.js", "console.log('app')");
        let ctx = test_context(dir.path(), PipelineConfig::default(), MockInvoker::new(), http.clone());

        let (records, _) = records_from_urls(&["https://example.com/app.js".to_string()], "gau");
        let dedup = DedupOutput {
            retained: records
                .into_iter()
                .map(|record| LiveUrl {
                    record,
                    status: 200,
                    fingerprint: None,
                })
                .collect(),
            collapsed: vec![CollapsedUrl {
                url: "https://cdn.example.com/app.js".to_string(),
                kept: "https://example.com/app.js".to_string(),
            }],
            failures: Vec::new(),
        };
        let artifact = ctx
            .store
            .write(&target, &ctx.run_id, StageOutput::Deduplicate(dedup))
            .await
            .unwrap();

        let StageOutput::Download(out) = DownloadRunner
            .run(&ctx, &target, StageInput::Artifact(Box::new(artifact)))
            .await
            .unwrap()
        else {
            panic!("unexpected output");
        };

        assert_eq!(out.url_map.len(), 2);
        assert_eq!(
            out.url_map["https://cdn.example.com/app.js"],
            out.url_map["https://example.com/app.js"]
        );
        assert_eq!(out.files.len(), 1);
        assert!(out.files[0].urls.contains("https://cdn.example.com/app.js"));
        // Collapsed URLs are mapped, never fetched
        assert_eq!(http.requests(), vec!["https://example.com/app.js"]);
    }

    #[tokio::test]
    async fn test_stale_files_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let files_dir = dir.path().join("example.com/downloads/files");
        std::fs::create_dir_all(&files_dir).unwrap();
        std::fs::write(files_dir.join("deadbeef.js"), "old body").unwrap();

        let list = dir.path().join("urls.txt");
        std::fs::write(&list, "https://example.com/a.js\n").unwrap();
        let http = MockHttp::new().with_body("https://example.com/a.js", "console.log('a')");
        let ctx = test_context(dir.path(), PipelineConfig::default(), MockInvoker::new(), http);

        let StageOutput::Download(out) = DownloadRunner
            .run(&ctx, &Target::new("example.com"), StageInput::Override(list))
            .await
            .unwrap()
        else {
            panic!("unexpected output");
        };

        assert!(!files_dir.join("deadbeef.js").exists());
        let stored: Vec<_> = std::fs::read_dir(&files_dir).unwrap().map(|e| e.unwrap().path()).collect();
        assert_eq!(stored, vec![out.files[0].storage_path.clone()]);
        assert!(out.failures.is_empty());
    }
}
