// github/summary.rs - Human-readable GitHub recon summary

use super::models::GitHubReport;
use chrono::Utc;
use std::fmt::Write as _;

const TOP_REPOSITORIES: usize = 10;

pub fn render_summary(report: &GitHubReport) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# GitHub Reconnaissance Summary Report\n");
    let _ = writeln!(md, "Generated on: {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(md, "Targets: {}\n", report.targets.join(", "));
    if report.interrupted {
        let _ = writeln!(
            md,
            "> **Interrupted**: the run was cancelled. Results below cover the repositories that finished.\n"
        );
    }

    let _ = writeln!(md, "## Overview\n");
    let _ = writeln!(md, "- **Total Repositories Found**: {}", report.repositories.len());
    let _ = writeln!(md, "- **Total Secrets Found**: {}", report.secrets.len());
    let _ = writeln!(md, "- **Organizations Analyzed**: {}", report.organizations.len());
    let _ = writeln!(md, "- **Users Analyzed**: {}", report.users.len());
    let _ = writeln!(md, "- **Failures**: {}\n", report.failures.len());

    if !report.secrets.is_empty() {
        let _ = writeln!(md, "## Secrets Found\n");
        let _ = writeln!(md, "| Tool | Repository | Location | Rule | Value |");
        let _ = writeln!(md, "|------|------------|----------|------|-------|");
        for s in &report.secrets {
            let _ = writeln!(
                md,
                "| {} | {} | {} | {} | `{}` |",
                s.tool, s.repository, s.location, s.rule, s.redacted
            );
        }
        let _ = writeln!(md);
    }

    if !report.repositories.is_empty() {
        let _ = writeln!(md, "## Top Repositories\n");
        let _ = writeln!(md, "| Repository | Stars | Forks | Language | Description |");
        let _ = writeln!(md, "|------------|-------|-------|----------|-------------|");
        let mut repos: Vec<_> = report.repositories.iter().collect();
        repos.sort_by(|a, b| b.stars.cmp(&a.stars).then_with(|| a.full_name.cmp(&b.full_name)));
        for repo in repos.into_iter().take(TOP_REPOSITORIES) {
            let description: String = repo.description.as_deref().unwrap_or("").chars().take(50).collect();
            let _ = writeln!(
                md,
                "| [{}]({}) | {} | {} | {} | {} |",
                repo.full_name,
                repo.url,
                repo.stars,
                repo.forks,
                repo.language.as_deref().unwrap_or("N/A"),
                description.replace('|', "\\|")
            );
        }
        let _ = writeln!(md);
    }

    if !report.failures.is_empty() {
        let _ = writeln!(md, "## Failures\n");
        for f in &report.failures {
            let _ = writeln!(md, "- {}: {}", f.item, f.reason);
        }
    }

    md
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupted_run_is_flagged() {
        let mut report = GitHubReport {
            targets: vec!["acme.com".to_string()],
            ..GitHubReport::default()
        };
        assert!(!render_summary(&report).contains("Interrupted"));

        report.interrupted = true;
        let md = render_summary(&report);
        assert!(md.contains("**Interrupted**"));
        assert!(md.contains("Targets: acme.com"));
    }
}
