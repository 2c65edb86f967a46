// github/mod.rs - GitHub reconnaissance workflow
// Purpose: Discover repositories per target, fetch or clone each one, scan it
//          for secrets, collect useful data and always remove the working
//          copy. Runs independently of the JS pipeline and shares only the
//          artifact store and the bounded executor.

pub mod client;
pub mod models;
pub mod summary;
pub mod workspace;

use crate::config::GitHubConfig;
use crate::context::RunContext;
use crate::error::{FailureKind, ItemFailure, ReconError, Result};
use crate::model::{SecretFinding, Target};
use crate::store::ArtifactStore;
use crate::tools::{ensure_tools, ToolInvoker};
use client::{GitHubClient, GitHubTransport};
use colored::*;
use models::{CloneState, GitHubReport, Profile, Repository, SearchPage, UsefulData};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const OUTPUT_DIR: &str = "github_recon";
const PER_PAGE: usize = 100;
/// The search API stops at 1000 results.
const MAX_SEARCH_PAGES: usize = 10;

/// One repository after Fetch|Clone -> Scan -> Cleanup.
struct RepoScan {
    clone_state: CloneState,
    secrets: Vec<SecretFinding>,
    useful: UsefulData,
    failures: Vec<ItemFailure>,
}

#[derive(Clone)]
pub struct GitHubRecon {
    client: Arc<GitHubClient>,
    invoker: Arc<dyn ToolInvoker>,
    config: Arc<GitHubConfig>,
    store: ArtifactStore,
    ctx: RunContext,
}

impl GitHubRecon {
    pub fn new(ctx: &RunContext, transport: Arc<dyn GitHubTransport>) -> Self {
        let config = ctx.config.github.clone();
        let client = GitHubClient::new(
            transport,
            config.token.clone(),
            &config.api_base,
            config.max_attempts,
            config.backoff_base,
            ctx.cancel.clone(),
        );
        Self {
            client: Arc::new(client),
            invoker: Arc::clone(&ctx.invoker),
            config: Arc::new(config),
            store: ctx.store.clone(),
            ctx: ctx.clone(),
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.store.root().join(OUTPUT_DIR)
    }

    fn clone_parent(&self) -> PathBuf {
        self.output_dir().join("cloned_repos")
    }

    /// Run the workflow for every target and write the `github_recon/` tree.
    pub async fn run(&self, targets: &[Target]) -> Result<GitHubReport> {
        self.ctx.config.validate(&[], true)?;
        let mut programs: Vec<&str> = self.config.scan_tools.iter().map(|t| t.program()).collect();
        if !self.config.skip_clone {
            programs.push("git");
        }
        ensure_tools(self.invoker.as_ref(), programs)?;

        if !self.client.is_authenticated() {
            warn!("no GitHub token set, using unauthenticated rate limits");
        }

        let mut report = GitHubReport::default();
        for target in targets {
            if self.ctx.cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }
            println!("{} {}", "[*] GitHub recon:".cyan().bold(), target.as_str().bold());
            report.targets.push(target.to_string());
            match self.run_target(target, &mut report).await {
                Ok(()) => {}
                Err(ReconError::Cancelled) => report.interrupted = true,
                Err(e) => return Err(e),
            }
            if report.interrupted {
                break;
            }
        }

        // Finished repositories are written even when the run was cancelled
        self.save(&report).await?;
        if report.interrupted {
            warn!(
                repositories = report.repositories.len(),
                "GitHub recon interrupted, partial results saved"
            );
        }
        info!(
            repositories = report.repositories.len(),
            secrets = report.secrets.len(),
            failures = report.failures.len(),
            "GitHub recon complete"
        );
        Ok(report)
    }

    async fn run_target(&self, target: &Target, report: &mut GitHubReport) -> Result<()> {
        let (repos, failures) = self.discover(target.as_str()).await?;
        report.failures.extend(failures);
        info!(target = %target, repositories = repos.len(), "repositories discovered");

        if !target.as_str().contains('/') {
            self.fetch_profiles(target.as_str(), report).await?;
        }

        let scans = self.process_repositories(&repos).await;
        for (mut repo, scan) in repos.into_iter().zip(scans) {
            match scan {
                Ok(scan) => {
                    repo.clone_state = scan.clone_state;
                    report.secrets.extend(scan.secrets);
                    report.useful_data.push(scan.useful);
                    report.failures.extend(scan.failures);
                }
                Err(ReconError::Cancelled) => {
                    repo.clone_state = CloneState::Skipped;
                    report.interrupted = true;
                }
                Err(e) => {
                    warn!(repo = %repo.full_name, error = %e, "repository skipped");
                    repo.clone_state = CloneState::Failed;
                    report.failures.push(ItemFailure::from_error(repo.full_name.clone(), &e));
                }
            }
            report.repositories.push(repo);
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // DISCOVER
    // ═══════════════════════════════════════════════════════════════════════

    /// Paginated repository search, deduplicated by full name and capped at
    /// `max_repos`. A failing query is recorded and the next one runs.
    pub async fn discover(&self, target: &str) -> Result<(Vec<Repository>, Vec<ItemFailure>)> {
        let mut repos: Vec<Repository> = Vec::new();
        let mut seen = HashSet::new();
        let mut failures = Vec::new();
        let cap = self.config.max_repos;

        'queries: for query in search_queries(target) {
            for page in 1..=MAX_SEARCH_PAGES {
                if repos.len() >= cap {
                    break 'queries;
                }
                let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
                let url = self.client.url(&format!(
                    "/search/repositories?q={}&sort=updated&order=desc&per_page={}&page={}",
                    encoded, PER_PAGE, page
                ));

                let result: Result<Option<SearchPage>> = self.client.get_json(&url).await;
                let page_data = match result {
                    Ok(Some(p)) => p,
                    Ok(None) => break,
                    // Unknown org/user qualifiers are a validation failure, not an error
                    Err(ReconError::Api { status: 422, .. }) => {
                        debug!(query = %query, "search query rejected as invalid");
                        break;
                    }
                    Err(ReconError::Cancelled) => return Err(ReconError::Cancelled),
                    Err(e) => {
                        failures.push(ItemFailure::from_error(format!("search {}", query), &e));
                        break;
                    }
                };

                let count = page_data.items.len();
                for item in page_data.items {
                    if repos.len() >= cap {
                        break;
                    }
                    if seen.insert(item.full_name.clone()) {
                        repos.push(Repository::from_api(item, &query, target));
                    }
                }
                if count < PER_PAGE || (page * PER_PAGE) as u64 >= page_data.total_count {
                    break;
                }
            }
        }

        Ok((repos, failures))
    }

    /// 404 means the name is not an organization (or user).
    async fn fetch_profiles(&self, name: &str, report: &mut GitHubReport) -> Result<()> {
        for (kind, path) in [("org", format!("/orgs/{}", name)), ("user", format!("/users/{}", name))] {
            let result: Result<Option<Profile>> = self.client.get_json(&self.client.url(&path)).await;
            match result {
                Ok(Some(profile)) if kind == "org" => report.organizations.push(profile),
                Ok(Some(profile)) => report.users.push(profile),
                Ok(None) => debug!(account = name, kind, "no such GitHub account"),
                Err(ReconError::Cancelled) => return Err(ReconError::Cancelled),
                Err(e) => report.failures.push(ItemFailure::from_error(format!("{} {}", kind, name), &e)),
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // FETCH|CLONE -> SCAN -> CLEANUP
    // ═══════════════════════════════════════════════════════════════════════

    /// One result per repository, in order. Clone, scan and `git log` carry
    /// their own timeouts; the task as a whole has none, so a rate-limit
    /// wait inside an API fetch is never cut short.
    async fn process_repositories(&self, repos: &[Repository]) -> Vec<Result<RepoScan>> {
        let cfg = &self.config;
        let tasks: Vec<_> = repos
            .iter()
            .map(|repo| {
                let this = self.clone();
                let repo = repo.clone();
                async move { Ok::<_, ReconError>(this.process_repository(&repo).await) }
            })
            .collect();
        self.ctx
            .executor(cfg.threads, cfg.clone_timeout, "repositories")
            .without_task_timeout()
            .run(tasks)
            .await
            .into_iter()
            .map(|outcome| outcome.into_result().and_then(|r| r))
            .collect()
    }

    async fn process_repository(&self, repo: &Repository) -> Result<RepoScan> {
        let cfg = &self.config;
        let parent = self.clone_parent();

        let (copy, mut failures, clone_state) = if cfg.skip_clone {
            let (copy, failures) =
                workspace::fetch_repository(&self.client, &parent, repo, cfg.api_max_files, cfg.api_max_file_bytes)
                    .await?;
            (copy, failures, CloneState::Fetched)
        } else {
            let copy = workspace::clone_repository(self.invoker.as_ref(), &parent, repo, cfg.clone_timeout).await?;
            (copy, Vec::new(), CloneState::Cloned)
        };

        let inspected = self.inspect(&copy, repo).await;

        // Cleanup runs before the scan result is looked at
        if let Err(e) = copy.close() {
            warn!(repo = %repo.full_name, error = %e, "failed to remove working copy");
            failures.push(ItemFailure::new(
                format!("cleanup {}", repo.full_name),
                FailureKind::Transient,
                e.to_string(),
            ));
        }

        let (secrets, useful, scan_failures) = inspected?;
        failures.extend(scan_failures);
        if !secrets.is_empty() {
            println!(
                "{} {} secrets in {}",
                "[!]".red().bold(),
                secrets.len(),
                repo.full_name.yellow()
            );
        }
        Ok(RepoScan {
            clone_state,
            secrets,
            useful,
            failures,
        })
    }

    async fn inspect(
        &self,
        copy: &workspace::WorkingCopy,
        repo: &Repository,
    ) -> Result<(Vec<SecretFinding>, UsefulData, Vec<ItemFailure>)> {
        let cfg = &self.config;
        let (secrets, mut failures) = workspace::scan(
            self.invoker.as_ref(),
            copy,
            &cfg.scan_tools,
            &repo.full_name,
            cfg.scan_timeout,
        )
        .await?;

        let content_analysis = workspace::analyze_content(copy.path()).unwrap_or_else(|e| {
            failures.push(ItemFailure::from_error(format!("analyze {}", repo.full_name), &e));
            Default::default()
        });

        let commit_history = if copy.is_git {
            match workspace::commit_history(self.invoker.as_ref(), copy, cfg.max_commits, Duration::from_secs(60)).await
            {
                Ok(commits) => commits,
                Err(e) => {
                    failures.push(ItemFailure::from_error(format!("git log {}", repo.full_name), &e));
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Ok((
            secrets,
            UsefulData {
                repository: repo.full_name.clone(),
                content_analysis,
                commit_history,
            },
            failures,
        ))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // OUTPUT
    // ═══════════════════════════════════════════════════════════════════════

    async fn save(&self, report: &GitHubReport) -> Result<()> {
        let dir = Path::new(OUTPUT_DIR);
        self.write_json(dir.join("repositories.json"), &report.repositories).await?;
        self.write_json(dir.join("secrets_found.json"), &report.secrets).await?;
        self.write_json(dir.join("useful_data.json"), &report.useful_data).await?;
        self.write_json(dir.join("organizations.json"), &report.organizations).await?;
        self.write_json(dir.join("users.json"), &report.users).await?;
        self.write_json(dir.join("failures.json"), &report.failures).await?;
        self.store
            .write_file(dir.join("summary_report.md"), summary::render_summary(report).as_bytes())
            .await?;
        // Working copies are gone by now; drop the empty parent too
        let _ = tokio::fs::remove_dir(self.clone_parent()).await;
        Ok(())
    }

    async fn write_json<T: Serialize + ?Sized>(&self, relative: PathBuf, value: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(value)?;
        self.store.write_file(relative, &json).await?;
        Ok(())
    }
}

/// Qualified `org:`/`user:` searches only make sense for bare account names.
pub fn search_queries(target: &str) -> Vec<String> {
    let quoted = format!("\"{}\"", target);
    if target.contains('.') || target.contains('/') {
        vec![quoted]
    } else {
        vec![format!("org:{}", target), format!("user:{}", target), quoted]
    }
}
