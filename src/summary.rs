// summary.rs - Colored end-of-run summary
// Purpose: Per-target stage status and headline report numbers on stdout

use crate::artifact::StageOutput;
use crate::github::models::GitHubReport;
use crate::model::Stage;
use crate::pipeline::{PipelineOutcome, StageStatus};
use crate::report::TargetReport;
use crate::store::ArtifactStore;
use colored::*;

const RULE: &str = "═══════════════════════════════════════════════════════════════";

pub async fn print_run_summary(outcome: &PipelineOutcome, store: &ArtifactStore) {
    println!("\n{}", RULE.yellow().bold());
    println!("{}", "  RUN SUMMARY".yellow().bold());
    println!("{}", RULE.yellow().bold());

    for target in &outcome.targets {
        let marker = if target.succeeded() { "[+]".green().bold() } else { "[-]".red().bold() };
        println!("{} {}", marker, target.target.as_str().white().bold());

        for record in &target.stages {
            let line = match &record.status {
                StageStatus::Completed { summary, failures, .. } if *failures > 0 => {
                    format!("{:<12} {} ({} item failures)", record.stage.name(), summary, failures).yellow()
                }
                StageStatus::Completed { summary, .. } => {
                    format!("{:<12} {}", record.stage.name(), summary).green()
                }
                StageStatus::Skipped { reason } => {
                    format!("{:<12} skipped: {}", record.stage.name(), reason).bright_black()
                }
                StageStatus::Failed { error, .. } => {
                    format!("{:<12} failed: {}", record.stage.name(), error).red()
                }
            };
            println!("    {}", line);
        }

        let completed_report = target
            .status_of(Stage::Report)
            .is_some_and(StageStatus::is_completed);
        if completed_report {
            if let Ok(Some(artifact)) = store.read(&target.target, Stage::Report).await {
                if let StageOutput::Report(report) = &artifact.output {
                    print_headline(report);
                }
            }
        }
    }

    let succeeded = outcome.targets.iter().filter(|t| t.succeeded()).count();
    let failed = outcome.targets.len() - succeeded;
    println!("{}", RULE.yellow().bold());
    println!("{}", format!("Targets:     {}", outcome.targets.len()).white());
    println!("{}", format!("Successful:  {}", succeeded).green());
    println!("{}", format!("Failed:      {}", failed).red());
    println!("{}", format!("Run id:      {}", outcome.run_id).bright_black());
    println!("{}\n", RULE.yellow().bold());
}

fn print_headline(report: &TargetReport) {
    println!(
        "    {} gathered={} live={} deduplicated_to={} downloaded={} endpoints={} secrets={}",
        "=>".cyan(),
        report.gathered,
        report.live,
        report.deduplicated_to,
        report.downloaded,
        report.endpoints,
        report.secrets.to_string().red().bold(),
    );
}

pub fn print_github_summary(report: &GitHubReport) {
    println!("\n{}", RULE.magenta().bold());
    println!("{}", "  GITHUB RECON SUMMARY".magenta().bold());
    println!("{}", RULE.magenta().bold());
    println!("{}", format!("Repositories:   {}", report.repositories.len()).white());
    println!("{}", format!("Secrets:        {}", report.secrets.len()).red().bold());
    println!("{}", format!("Organizations:  {}", report.organizations.len()).white());
    println!("{}", format!("Users:          {}", report.users.len()).white());
    if !report.failures.is_empty() {
        println!("{}", format!("Failures:       {}", report.failures.len()).yellow());
    }
    if report.interrupted {
        println!("{}", "Interrupted: partial results".yellow().bold());
    }
    println!("{}\n", RULE.magenta().bold());
}
