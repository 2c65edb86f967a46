// pipeline.rs - Pipeline orchestrator
// Purpose: Resolve the stage plan and each stage's input per target, drive
//          the runners, persist their artifacts and contain every failure to
//          its (target, stage) pair

use crate::context::RunContext;
use crate::error::{FailureKind, ReconError, Result};
use crate::model::{in_canonical_order, Stage, Target};
use crate::progress::ProgressTracker;
use crate::report::SkippedStage;
use crate::stages::{resolve_override, StageInput, StageRegistry};
use crate::tools::ensure_tools;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default)]
pub struct PipelineRequest {
    pub targets: Vec<Target>,
    pub stages: Vec<Stage>,
    /// Explicit input file or directory.
    pub input: Option<PathBuf>,
    /// Every stage reads `input` and runs in the order given.
    pub independent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Completed { summary: String, failures: usize, version: u64 },
    Skipped { reason: String },
    Failed { kind: FailureKind, error: String },
}

impl StageStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, StageStatus::Completed { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetOutcome {
    pub target: Target,
    pub stages: Vec<StageRecord>,
}

impl TargetOutcome {
    /// The terminal requested stage produced its artifact.
    pub fn succeeded(&self) -> bool {
        self.stages.last().is_some_and(|r| r.status.is_completed())
    }

    pub fn status_of(&self, stage: Stage) -> Option<&StageStatus> {
        self.stages.iter().find(|r| r.stage == stage).map(|r| &r.status)
    }

    fn skipped_so_far(&self) -> Vec<SkippedStage> {
        self.stages
            .iter()
            .filter_map(|r| match &r.status {
                StageStatus::Completed { .. } => None,
                StageStatus::Skipped { reason } => Some(SkippedStage {
                    stage: r.stage,
                    reason: reason.clone(),
                }),
                StageStatus::Failed { error, .. } => Some(SkippedStage {
                    stage: r.stage,
                    reason: format!("failed: {}", error),
                }),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub run_id: String,
    pub plan: Vec<Stage>,
    pub targets: Vec<TargetOutcome>,
}

impl PipelineOutcome {
    pub fn success(&self) -> bool {
        self.targets.iter().all(TargetOutcome::succeeded)
    }
}

pub struct Orchestrator {
    ctx: RunContext,
    registry: StageRegistry,
}

impl Orchestrator {
    pub fn new(ctx: RunContext) -> Self {
        Self::with_registry(ctx, StageRegistry::default())
    }

    pub fn with_registry(ctx: RunContext, registry: StageRegistry) -> Self {
        Self { ctx, registry }
    }

    /// Canonical order when chained; caller order (deduplicated) when
    /// independent.
    pub fn plan(stages: &[Stage], independent: bool) -> Vec<Stage> {
        if independent {
            let mut plan = Vec::new();
            for stage in stages {
                if !plan.contains(stage) {
                    plan.push(*stage);
                }
            }
            plan
        } else {
            in_canonical_order(stages)
        }
    }

    /// Run the request. Errors returned here are configuration problems that
    /// prevent any target from starting; a stage-level configuration problem
    /// only fails that stage.
    pub async fn run(&self, request: &PipelineRequest) -> Result<PipelineOutcome> {
        let plan = Self::plan(&request.stages, request.independent);
        if plan.is_empty() {
            return Err(ReconError::Configuration("no stages requested".to_string()));
        }
        if request.targets.is_empty() {
            return Err(ReconError::Configuration("no targets given".to_string()));
        }
        if request.independent && request.input.is_none() {
            return Err(ReconError::Configuration("--independent requires --input".to_string()));
        }
        self.ctx.config.validate(&[], false)?;
        let misconfigured = self.misconfigured_stages(&plan);

        let override_input = match &request.input {
            Some(path) => Some(resolve_override(path).await?),
            None => None,
        };

        let names: Vec<&str> = plan.iter().map(|s| s.name()).collect();
        info!(
            run_id = %self.ctx.run_id,
            targets = request.targets.len(),
            plan = %names.join(" -> "),
            independent = request.independent,
            "pipeline starting"
        );

        let parallel = self.ctx.config.max_parallel_targets.max(1);
        let mut outcomes: Vec<(usize, TargetOutcome)> = stream::iter(request.targets.iter().enumerate())
            .map(|(idx, target)| {
                let plan = &plan;
                let misconfigured = &misconfigured;
                let override_input = override_input.as_ref();
                async move {
                    let outcome = self
                        .run_target(target, plan, misconfigured, override_input, request.independent)
                        .await;
                    (idx, outcome)
                }
            })
            .buffer_unordered(parallel)
            .collect()
            .await;
        outcomes.sort_by_key(|(idx, _)| *idx);

        let outcome = PipelineOutcome {
            run_id: self.ctx.run_id.clone(),
            plan,
            targets: outcomes.into_iter().map(|(_, o)| o).collect(),
        };

        match serde_json::to_vec_pretty(&outcome) {
            Ok(json) => {
                if let Err(e) = self.ctx.store.write_file("run_summary.json", &json).await {
                    warn!(error = %e, "cannot write run summary");
                }
            }
            Err(e) => warn!(error = %e, "cannot serialize run summary"),
        }

        Ok(outcome)
    }

    /// Stage configuration problems, reported once here rather than once per
    /// target. Missing analysis tools count as one.
    fn misconfigured_stages(&self, plan: &[Stage]) -> HashMap<Stage, String> {
        let mut errors = HashMap::new();
        for &stage in plan {
            let mut check = self.ctx.config.validate(&[stage], false);
            if check.is_ok() && stage == Stage::Analyze {
                check = self
                    .ctx
                    .config
                    .analyze
                    .build_tools()
                    .and_then(|tools| ensure_tools(self.ctx.invoker.as_ref(), tools.iter().map(|t| t.program())));
            }
            if let Err(e) = check {
                error!(stage = %stage, error = %e, "stage misconfigured, it fails for every target");
                errors.insert(stage, e.to_string());
            }
        }
        errors
    }

    async fn run_target(
        &self,
        target: &Target,
        plan: &[Stage],
        misconfigured: &HashMap<Stage, String>,
        override_input: Option<&StageInput>,
        independent: bool,
    ) -> TargetOutcome {
        let mut tracker = ProgressTracker::new(&self.ctx.run_id, target, self.ctx.store.target_dir(target));
        tracker.pipeline_started(plan);

        let mut outcome = TargetOutcome {
            target: target.clone(),
            stages: Vec::with_capacity(plan.len()),
        };

        for (position, &stage) in plan.iter().enumerate() {
            let status = if self.ctx.cancel.is_cancelled() {
                StageStatus::Skipped {
                    reason: "run cancelled".to_string(),
                }
            } else if let Some(error) = misconfigured.get(&stage) {
                StageStatus::Failed {
                    kind: FailureKind::Configuration,
                    error: error.clone(),
                }
            } else {
                match self
                    .resolve_input(target, stage, position, plan, &outcome, override_input, independent)
                    .await
                {
                    Ok(input) => {
                        tracker.stage_started(stage);
                        self.execute(target, stage, input).await
                    }
                    Err(status) => status,
                }
            };

            match &status {
                StageStatus::Completed { summary, failures, .. } => {
                    info!(target = %target, stage = %stage, failures, "{}", summary);
                    tracker.stage_completed(stage, summary, *failures);
                }
                StageStatus::Skipped { reason } => {
                    warn!(target = %target, stage = %stage, reason = %reason, "stage skipped");
                    tracker.stage_skipped(stage, reason);
                }
                StageStatus::Failed { error, .. } => {
                    error!(target = %target, stage = %stage, error = %error, "stage failed");
                    tracker.stage_failed(stage, error);
                }
            }
            outcome.stages.push(StageRecord { stage, status });
        }

        tracker.pipeline_completed();
        outcome
    }

    /// `Err` carries the status to record instead of running the stage.
    #[allow(clippy::too_many_arguments)]
    async fn resolve_input(
        &self,
        target: &Target,
        stage: Stage,
        position: usize,
        plan: &[Stage],
        so_far: &TargetOutcome,
        override_input: Option<&StageInput>,
        independent: bool,
    ) -> std::result::Result<StageInput, StageStatus> {
        if let Some(input) = override_input {
            if independent || position == 0 {
                return Ok(input.clone());
            }
        }

        if stage == Stage::Report {
            let (artifacts, unreadable) = self.ctx.store.read_all(target).await;
            return Ok(StageInput::Collected {
                artifacts,
                skipped: so_far.skipped_so_far(),
                unreadable,
            });
        }

        let Some(producer) = stage.consumes() else {
            return Ok(StageInput::Target);
        };

        if plan.contains(&producer) {
            match so_far.status_of(producer) {
                Some(status) if status.is_completed() => {}
                _ => {
                    return Err(StageStatus::Skipped {
                        reason: format!("upstream {} did not complete", producer),
                    })
                }
            }
        }

        match self.ctx.store.read(target, producer).await {
            Ok(Some(artifact)) => Ok(StageInput::Artifact(Box::new(artifact))),
            Ok(None) => Err(StageStatus::Skipped {
                reason: format!("no {} artifact for {} (run {} first or pass --input)", producer, target, producer),
            }),
            Err(e) => Err(StageStatus::Failed {
                kind: e.kind(),
                error: e.to_string(),
            }),
        }
    }

    async fn execute(&self, target: &Target, stage: Stage, input: StageInput) -> StageStatus {
        let Some(runner) = self.registry.get(stage) else {
            return StageStatus::Failed {
                kind: FailureKind::Configuration,
                error: format!("no runner registered for {}", stage),
            };
        };

        let result = async {
            let output = runner.run(&self.ctx, target, input).await?;
            self.ctx.store.write(target, &self.ctx.run_id, output).await
        }
        .await;

        match result {
            Ok(artifact) => StageStatus::Completed {
                summary: artifact.output.summary(),
                failures: artifact.output.failures().len(),
                version: artifact.meta.version,
            },
            Err(e) => StageStatus::Failed {
                kind: e.kind(),
                error: e.to_string(),
            },
        }
    }
}
