// stages/fuzz.rs - Candidate JS file discovery
// Purpose: Derive candidate URLs from known directories with a wordlist
//          and/or permutations of known filenames, probe them, and keep the
//          ones answering with an allow-listed status

use super::{live_urls_of, read_list_file, records_from_urls, unexpected_input, StageInput, StageRunner};
use crate::artifact::{FuzzOutput, StageOutput};
use crate::config::FuzzMode;
use crate::context::RunContext;
use crate::dedup::normalize_url;
use crate::error::{ItemFailure, ReconError, Result};
use crate::executor::TaskOutcome;
use crate::http::HttpProbe;
use crate::model::{FuzzResult, FuzzSource, Stage, Target};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

const PREFIXES: &[&str] = &[
    "app", "lib", "test", "spec", "src", "dist", "build", "vendor", "node", "client", "server", "common",
    "utils", "core", "api", "config", "polyfill", "plugin", "module", "feature", "mock", "temp", "backup", "dev",
    "prod", "stage", "local", "global", "init", "_", "is", "has", "are", "get", "set", "fetch", "calculate",
    "compute", "apply", "push", "post", "render", "start", "stop", "on", "handle", "create", "update", "delete",
];

const SUFFIXES: &[&str] = &[
    "js", "minjs", "bundlejs", "map", "testjs", "specjs", "modulejs", "mjs", "cjs", "nodejs", "v1js", "v2js",
    "debugjs", "prodjs", "devjs", "bak", "backup", "tmp", "temp", "old", "orig", "copy", "save", "gz", "zip",
    "tar", "tgz", "es6js", "jsx", "private", "test", "spec", "min", "dev", "prod", "v1", "v2", "const", "enum",
    "config", "utils", "api", "handler", "module", "cache",
];

const SEPARATORS: &[&str] = &["", "-", "_", "."];

pub struct FuzzRunner;

#[async_trait]
impl StageRunner for FuzzRunner {
    fn stage(&self) -> Stage {
        Stage::Fuzz
    }

    async fn run(&self, ctx: &RunContext, target: &Target, input: StageInput) -> Result<StageOutput> {
        let (urls, mut failures): (Vec<String>, Vec<ItemFailure>) = match &input {
            StageInput::Artifact(artifact) => match live_urls_of(artifact) {
                Some(live) => (live.iter().map(|l| l.record.normalized.clone()).collect(), Vec::new()),
                None => return Err(unexpected_input(Stage::Fuzz, &input)),
            },
            StageInput::Override(path) => {
                let (records, failures) = records_from_urls(&read_list_file(path).await?, "input");
                (records.into_iter().map(|r| r.normalized).collect(), failures)
            }
            other => return Err(unexpected_input(Stage::Fuzz, other)),
        };

        let cfg = &ctx.config.fuzz;
        if cfg.mode == FuzzMode::Off {
            info!(target = %target, "fuzz mode is off");
            return Ok(StageOutput::Fuzz(FuzzOutput {
                failures,
                ..FuzzOutput::default()
            }));
        }

        let wordlist = match (&cfg.wordlist, cfg.mode.uses_wordlist()) {
            (Some(path), true) => read_list_file(path).await?,
            (None, true) => return Err(ReconError::Configuration("fuzzing needs a wordlist".to_string())),
            _ => Vec::new(),
        };
        let permuted = if cfg.mode.uses_permutation() {
            permutations(&js_basenames(&urls))
        } else {
            BTreeSet::new()
        };

        let known: BTreeSet<String> = urls.iter().cloned().collect();
        let groups = directory_groups(&urls);
        let candidates = build_candidates(
            &groups,
            &wordlist,
            &permuted,
            &cfg.extensions,
            &known,
        );
        info!(
            target = %target,
            mode = %cfg.mode,
            directories = groups.len(),
            candidates = candidates.len(),
            "fuzzing for JS files"
        );

        let tasks: Vec<_> = candidates
            .keys()
            .map(|url| {
                let http: Arc<dyn HttpProbe> = Arc::clone(&ctx.http);
                let url = url.clone();
                async move { http.probe(&url).await }
            })
            .collect();
        let outcomes = ctx.executor(cfg.threads, cfg.timeout, "fuzz").run(tasks).await;

        let mut results = Vec::new();
        for ((url, mode), outcome) in candidates.iter().zip(outcomes) {
            match outcome {
                TaskOutcome::Completed(resp) if cfg.status_codes.contains(&resp.status) => {
                    debug!(url = %url, status = resp.status, "fuzz hit");
                    results.push(FuzzResult {
                        url: url.clone(),
                        status: resp.status,
                        mode: *mode,
                    });
                }
                TaskOutcome::Completed(_) => {}
                TaskOutcome::Cancelled => return Err(ReconError::Cancelled),
                other => {
                    if let Err(e) = other.into_result() {
                        failures.push(ItemFailure::from_error(url.clone(), &e));
                    }
                }
            }
        }

        info!(target = %target, hits = results.len(), probed = candidates.len(), "fuzz complete");
        Ok(StageOutput::Fuzz(FuzzOutput {
            candidates_probed: candidates.len(),
            results,
            failures,
        }))
    }
}

/// Unique (origin, directory) pairs. The directory has no trailing slash;
/// the root directory is the empty string.
pub fn directory_groups(urls: &[String]) -> BTreeSet<(String, String)> {
    let mut groups = BTreeSet::new();
    for raw in urls {
        let Ok(url) = url::Url::parse(raw) else {
            continue;
        };
        let path = url.path();
        if path.is_empty() || path == "/" {
            continue;
        }
        let dir = match path.rfind('/') {
            Some(idx) => path[..idx].to_string(),
            None => String::new(),
        };
        groups.insert((url.origin().ascii_serialization(), dir));
    }
    groups
}

/// File names without their final extension, e.g. `main.min` for `main.min.js`.
pub fn js_basenames(urls: &[String]) -> BTreeSet<String> {
    urls.iter()
        .filter_map(|raw| url::Url::parse(raw).ok())
        .filter_map(|url| {
            let name = url.path_segments()?.last()?.to_string();
            let (base, _) = name.rsplit_once('.')?;
            (!base.is_empty()).then(|| base.to_string())
        })
        .collect()
}

pub fn permutations(basenames: &BTreeSet<String>) -> BTreeSet<String> {
    let mut words = BTreeSet::new();
    for base in basenames {
        for affix in PREFIXES {
            for sep in SEPARATORS {
                words.insert(format!("{}{}{}", affix, sep, base));
                words.insert(format!("{}{}{}", base, sep, affix));
            }
        }
        for affix in SUFFIXES {
            for sep in SEPARATORS {
                words.insert(format!("{}{}{}", base, sep, affix));
                words.insert(format!("{}{}{}", affix, sep, base));
            }
        }
        words.insert(base.clone());
    }
    words
}

/// Candidate URL -> the mode that produced it. Wordlist wins when both
/// modes produce the same URL; URLs already known are never probed.
pub fn build_candidates(
    groups: &BTreeSet<(String, String)>,
    wordlist: &[String],
    permuted: &BTreeSet<String>,
    extensions: &[String],
    known: &BTreeSet<String>,
) -> BTreeMap<String, FuzzSource> {
    let mut candidates = BTreeMap::new();
    let sources = [
        (FuzzSource::Wordlist, wordlist.iter().collect::<Vec<_>>()),
        (FuzzSource::Permutation, permuted.iter().collect::<Vec<_>>()),
    ];

    for (origin, dir) in groups {
        for (mode, words) in &sources {
            for word in words {
                for ext in extensions {
                    let candidate = format!("{}{}/{}.{}", origin, dir, word, ext);
                    let Ok(normalized) = normalize_url(&candidate) else {
                        continue;
                    };
                    if known.contains(&normalized) {
                        continue;
                    }
                    candidates.entry(normalized).or_insert(*mode);
                }
            }
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::testing::{test_context, MockHttp, MockInvoker};

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_directory_groups() {
        let groups = directory_groups(&urls(&[
            "https://example.com/static/js/app.js",
            "https://example.com/static/js/vendor.js",
            "https://example.com/main.js",
            "https://example.com/",
        ]));
        let expected: BTreeSet<(String, String)> = [
            ("https://example.com".to_string(), "".to_string()),
            ("https://example.com".to_string(), "/static/js".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(groups, expected);
    }

    #[test]
    fn test_permutations_include_affixes() {
        let bases = js_basenames(&urls(&["https://example.com/js/main.js"]));
        assert_eq!(bases.into_iter().collect::<Vec<_>>(), vec!["main"]);

        let words = permutations(&["main".to_string()].into_iter().collect());
        assert!(words.contains("main"));
        assert!(words.contains("app-main"));
        assert!(words.contains("main.min"));
        assert!(words.contains("main_backup"));
    }

    #[test]
    fn test_known_urls_are_not_candidates() {
        let groups: BTreeSet<(String, String)> =
            [("https://example.com".to_string(), "/js".to_string())].into_iter().collect();
        let known: BTreeSet<String> = ["https://example.com/js/app.js".to_string()].into_iter().collect();
        let candidates = build_candidates(
            &groups,
            &urls(&["app", "admin"]),
            &["admin".to_string()].into_iter().collect(),
            &["js".to_string()],
            &known,
        );
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates["https://example.com/js/admin.js"], FuzzSource::Wordlist);
    }

    #[tokio::test]
    async fn test_fuzz_keeps_allow_listed_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("live.txt");
        std::fs::write(&list, "https://example.com/js/app.js\n").unwrap();
        let wordlist = dir.path().join("words.txt");
        std::fs::write(&wordlist, "admin\ndebug\nmissing\n").unwrap();

        let mut config = PipelineConfig::default();
        config.fuzz.mode = FuzzMode::Wordlist;
        config.fuzz.wordlist = Some(wordlist);
        let http = MockHttp::new()
            .with_status("https://example.com/js/admin.js", 200)
            .with_status("https://example.com/js/debug.js", 403)
            .with_status("https://example.com/js/missing.js", 404);
        let ctx = test_context(dir.path(), config, MockInvoker::new(), http);

        let StageOutput::Fuzz(out) = FuzzRunner
            .run(&ctx, &Target::new("example.com"), StageInput::Override(list))
            .await
            .unwrap()
        else {
            panic!("unexpected output");
        };
        assert_eq!(out.candidates_probed, 3);
        let hits: Vec<(&str, u16)> = out.results.iter().map(|r| (r.url.as_str(), r.status)).collect();
        assert_eq!(
            hits,
            vec![("https://example.com/js/admin.js", 200), ("https://example.com/js/debug.js", 403)]
        );
    }

    #[tokio::test]
    async fn test_fuzz_off_requests_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("live.txt");
        std::fs::write(&list, "https://example.com/js/app.js\n").unwrap();
        let ctx = test_context(dir.path(), PipelineConfig::default(), MockInvoker::new(), MockHttp::new());

        let StageOutput::Fuzz(out) = FuzzRunner
            .run(&ctx, &Target::new("example.com"), StageInput::Override(list))
            .await
            .unwrap()
        else {
            panic!("unexpected output");
        };
        assert_eq!(out.candidates_probed, 0);
        assert!(out.results.is_empty());
    }
}
