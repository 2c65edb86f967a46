// end_to_end.rs - Full pipeline over mocked tools and HTTP

use jsrecon::artifact::StageOutput;
use jsrecon::config::PipelineConfig;
use jsrecon::pipeline::{Orchestrator, PipelineRequest, StageStatus};
use jsrecon::testing::{test_context, MockHttp, MockInvoker};
use jsrecon::{Stage, Target};
use std::path::Path;

const GATHERED: &str = "\
https://example.com/static/app.js
https://example.com/static/app.bundle.js
https://example.com/static/vendor.js
https://example.com/static/old.js
https://example.com/static/broken.js
";

fn invoker() -> MockInvoker {
    MockInvoker::new().with_output("waybackurls", GATHERED)
}

fn http() -> MockHttp {
    MockHttp::new()
        .with_etag("https://example.com/static/app.js", 200, "\"build-42\"")
        .with_body("https://example.com/static/app.js", "const api = '/api/v1';")
        .with_etag("https://example.com/static/app.bundle.js", 200, "\"build-42\"")
        .with_body("https://example.com/static/app.bundle.js", "const api = '/api/v1';")
        .with_body("https://example.com/static/vendor.js", "/* vendor */")
        .with_status("https://example.com/static/old.js", 404)
        .with_error("https://example.com/static/broken.js", "connection reset")
}

fn config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.gather.mode = "w".to_string();
    config
}

async fn run(root: &Path, stages: Vec<Stage>) -> jsrecon::PipelineOutcome {
    let ctx = test_context(root, config(), invoker(), http());
    Orchestrator::new(ctx)
        .run(&PipelineRequest {
            targets: vec![Target::new("example.com")],
            stages,
            ..PipelineRequest::default()
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_full_pipeline_report_counts() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = run(
        dir.path(),
        vec![Stage::Report, Stage::Download, Stage::Gather, Stage::Deduplicate, Stage::Verify],
    )
    .await;

    assert!(outcome.success());
    assert_eq!(
        outcome.plan,
        vec![Stage::Gather, Stage::Verify, Stage::Deduplicate, Stage::Download, Stage::Report]
    );
    let target = &outcome.targets[0];
    assert!(target.stages.iter().all(|r| r.status.is_completed()), "{:?}", target.stages);

    let report_json = std::fs::read_to_string(dir.path().join("example.com/report/artifact.json")).unwrap();
    let artifact: jsrecon::artifact::Artifact = serde_json::from_str(&report_json).unwrap();
    let StageOutput::Report(report) = artifact.output else {
        panic!("report artifact holds {:?}", artifact.output.stage());
    };
    assert_eq!(report.gathered, 5);
    assert_eq!(report.live, 3);
    assert_eq!(report.dead, 2);
    assert_eq!(report.deduplicated_to, 2);
    assert_eq!(report.collapsed, 1);
    assert_eq!(report.downloaded, 2);
    assert!(report.skipped.is_empty());

    let stored = std::fs::read_dir(dir.path().join("example.com/downloads/files")).unwrap().count();
    assert_eq!(stored, 2);
    assert!(dir.path().join("example.com/report/report.md").exists());
    assert!(dir.path().join("example.com/progress.jsonl").exists());
}

#[tokio::test]
async fn test_stage_order_does_not_change_results() {
    let canonical = tempfile::tempdir().unwrap();
    let shuffled = tempfile::tempdir().unwrap();
    run(canonical.path(), vec![Stage::Gather, Stage::Verify]).await;
    let outcome = run(shuffled.path(), vec![Stage::Verify, Stage::Gather]).await;
    assert_eq!(outcome.plan, vec![Stage::Gather, Stage::Verify]);

    let live = |root: &Path| {
        let json = std::fs::read_to_string(root.join("example.com/live/artifact.json")).unwrap();
        let artifact: jsrecon::artifact::Artifact = serde_json::from_str(&json).unwrap();
        match artifact.output {
            StageOutput::Verify(v) => {
                let mut urls: Vec<String> = v.live.into_iter().map(|l| l.record.normalized).collect();
                urls.sort();
                urls
            }
            other => panic!("unexpected {:?}", other.stage()),
        }
    };
    assert_eq!(live(canonical.path()), live(shuffled.path()));
    assert_eq!(live(canonical.path()).len(), 3);
}

#[tokio::test]
async fn test_independent_verify_needs_no_gather_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let list = dir.path().join("urls.txt");
    std::fs::write(&list, "https://example.com/static/app.js\nhttps://example.com/static/old.js\n").unwrap();
    let ctx = test_context(dir.path(), config(), MockInvoker::new(), http());

    let outcome = Orchestrator::new(ctx)
        .run(&PipelineRequest {
            targets: vec![Target::new("example.com")],
            stages: vec![Stage::Verify],
            input: Some(list),
            independent: true,
        })
        .await
        .unwrap();

    assert!(matches!(
        outcome.targets[0].status_of(Stage::Verify),
        Some(StageStatus::Completed { .. })
    ));
    assert!(!dir.path().join("example.com/urls").exists());
}

#[tokio::test]
async fn test_rerun_bumps_artifact_version() {
    let dir = tempfile::tempdir().unwrap();
    run(dir.path(), vec![Stage::Gather]).await;
    let outcome = run(dir.path(), vec![Stage::Gather]).await;
    match outcome.targets[0].status_of(Stage::Gather) {
        Some(StageStatus::Completed { version, .. }) => assert_eq!(*version, 2),
        other => panic!("unexpected {:?}", other),
    }
}
