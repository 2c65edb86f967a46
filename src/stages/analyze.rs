// stages/analyze.rs - Static analysis of downloaded files
// Purpose: Run every configured analysis tool against every distinct file.
//          Findings keep their tool provenance and are not merged.

use super::{unexpected_input, StageInput, StageRunner};
use crate::artifact::{AnalyzeOutput, StageOutput};
use crate::context::RunContext;
use crate::error::{ItemFailure, ReconError, Result};
use crate::model::{Stage, Target};
use crate::tools::{ensure_tools, ToolInvoker};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct AnalyzeRunner;

/// A file to analyze and the reference recorded on its findings.
struct Subject {
    path: PathBuf,
    reference: String,
}

#[async_trait]
impl StageRunner for AnalyzeRunner {
    fn stage(&self) -> Stage {
        Stage::Analyze
    }

    async fn run(&self, ctx: &RunContext, target: &Target, input: StageInput) -> Result<StageOutput> {
        let subjects: Vec<Subject> = match &input {
            StageInput::Artifact(artifact) => match &artifact.output {
                StageOutput::Download(download) => download
                    .files
                    .iter()
                    .map(|f| Subject {
                        path: f.storage_path.clone(),
                        reference: f.content_hash.to_string(),
                    })
                    .collect(),
                _ => return Err(unexpected_input(Stage::Analyze, &input)),
            },
            StageInput::Override(path) => subjects_from_path(path).await?,
            other => return Err(unexpected_input(Stage::Analyze, other)),
        };

        let cfg = &ctx.config.analyze;
        let tools = cfg.build_tools()?;
        let mut programs: Vec<&str> = tools.iter().map(|t| t.program()).collect();
        programs.sort_unstable();
        programs.dedup();
        ensure_tools(ctx.invoker.as_ref(), programs)?;

        info!(target = %target, files = subjects.len(), tools = tools.len(), "analyzing JS files");

        let mut jobs = Vec::with_capacity(subjects.len() * tools.len());
        for s in 0..subjects.len() {
            for t in 0..tools.len() {
                jobs.push((s, t));
            }
        }

        let tasks: Vec<_> = jobs
            .iter()
            .map(|&(s, t)| {
                let invoker: Arc<dyn ToolInvoker> = Arc::clone(&ctx.invoker);
                let program = tools[t].program().to_string();
                let args = tools[t].args(&subjects[s].path);
                let timeout = cfg.command_timeout;
                async move {
                    let output = invoker.invoke(&program, &args, None, timeout).await?;
                    Ok::<_, ReconError>(output.into_success(&program)?.stdout)
                }
            })
            .collect();
        let outcomes = ctx
            .executor(cfg.threads, cfg.command_timeout + Duration::from_secs(5), "analyze")
            .run(tasks)
            .await;

        let mut findings = Vec::new();
        let mut failures = Vec::new();
        for ((s, t), outcome) in jobs.into_iter().zip(outcomes) {
            let (subject, tool) = (&subjects[s], &tools[t]);
            let item = format!("{} {}", tool.tool_id(), subject.reference);
            let parsed = outcome
                .into_result()
                .and_then(|stdout| tool.parse(&stdout, &subject.reference));
            match parsed {
                Ok(found) => findings.extend(found),
                Err(ReconError::Cancelled) => return Err(ReconError::Cancelled),
                Err(e) => {
                    warn!(item = %item, error = %e, "analysis failed");
                    failures.push(ItemFailure::from_error(item, &e));
                }
            }
        }

        info!(target = %target, findings = findings.len(), failed = failures.len(), "analyze complete");
        Ok(StageOutput::Analyze(AnalyzeOutput {
            findings,
            files_analyzed: subjects.len(),
            failures,
        }))
    }
}

/// A single file, or every `.js` file directly inside a directory.
async fn subjects_from_path(path: &Path) -> Result<Vec<Subject>> {
    let subject = |p: PathBuf| Subject {
        reference: p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        path: p,
    };

    if path.is_file() {
        return Ok(vec![subject(path.to_path_buf())]);
    }

    let mut entries = tokio::fs::read_dir(path).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let p = entry.path();
        if p.is_file() && p.extension().is_some_and(|e| e.eq_ignore_ascii_case("js")) {
            files.push(p);
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(ReconError::Configuration(format!("no .js files in {}", path.display())));
    }
    Ok(files.into_iter().map(subject).collect())
}
