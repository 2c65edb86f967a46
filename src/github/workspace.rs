// github/workspace.rs - Transient repository working copies
// Purpose: Clone or API-fetch a repository into a temporary directory, scan
//          it with the secret scanners, collect useful data, and remove it.
//          The directory is owned by a TempDir so it is released on every
//          path, including timeouts and cancellation.

use super::client::{GitHubClient, RAW_ACCEPT};
use super::models::{CommitInfo, ContentAnalysis, Repository, TreeResponse};
use crate::error::{FailureKind, ItemFailure, ReconError, Result};
use crate::model::SecretFinding;
use crate::tools::secrets::ScanTool;
use crate::tools::ToolInvoker;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};

const CONFIG_MARKERS: &[&str] = &["config", "conf", ".env", "settings"];
const DEPENDENCY_MARKERS: &[&str] = &["package.json", "requirements.txt", "pom.xml", "build.gradle", "go.mod"];
const DOC_MARKERS: &[&str] = &["readme", "docs", "documentation", ".md"];
const SCRIPT_MARKERS: &[&str] = &[".sh", ".py", ".js", ".php", ".rb"];
const INTERESTING_MARKERS: &[&str] = &["backup", "dump", "test", "example", "sample"];

/// Never fetched in API-only mode.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "svg", "woff", "woff2", "ttf", "eot", "pdf", "zip", "gz", "tar", "jar",
    "exe", "dll", "so", "dylib", "mp4", "mp3", "webp",
];

pub struct WorkingCopy {
    dir: TempDir,
    /// Clones carry history; API-fetched content does not.
    pub is_git: bool,
}

impl WorkingCopy {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory, reporting failures instead of swallowing them.
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!(path = %path.display(), "working copy removed");
        Ok(())
    }
}

fn working_dir(parent: &Path, repo: &Repository) -> Result<TempDir> {
    std::fs::create_dir_all(parent)?;
    let prefix = format!("{}.", repo.full_name.replace('/', "_"));
    Ok(tempfile::Builder::new().prefix(&prefix).tempdir_in(parent)?)
}

/// Shallow clone through `git`.
pub async fn clone_repository(
    invoker: &dyn ToolInvoker,
    parent: &Path,
    repo: &Repository,
    timeout: Duration,
) -> Result<WorkingCopy> {
    let dir = working_dir(parent, repo)?;
    let args = vec![
        "clone".to_string(),
        "--depth".to_string(),
        "1".to_string(),
        "--quiet".to_string(),
        repo.clone_url.clone(),
        dir.path().display().to_string(),
    ];
    info!(repo = %repo.full_name, "cloning repository");
    invoker.invoke("git", &args, None, timeout).await?.into_success("git clone")?;
    Ok(WorkingCopy { dir, is_git: true })
}

/// Fetch the default branch's text files through the trees and blobs APIs.
/// Per-file failures are returned next to the working copy.
pub async fn fetch_repository(
    client: &GitHubClient,
    parent: &Path,
    repo: &Repository,
    max_files: usize,
    max_file_bytes: u64,
) -> Result<(WorkingCopy, Vec<ItemFailure>)> {
    let tree_url = client.url(&format!(
        "/repos/{}/git/trees/{}?recursive=1",
        repo.full_name, repo.default_branch
    ));
    let tree: TreeResponse = client.get_json(&tree_url).await?.ok_or_else(|| ReconError::Api {
        status: 404,
        message: format!("no tree for {}@{}", repo.full_name, repo.default_branch),
    })?;
    if tree.truncated {
        warn!(repo = %repo.full_name, "repository tree truncated by the API");
    }

    let dir = working_dir(parent, repo)?;
    let mut failures = Vec::new();
    let blobs = tree
        .tree
        .iter()
        .filter(|e| e.kind == "blob")
        .filter(|e| e.size.unwrap_or(0) <= max_file_bytes)
        .filter(|e| !is_binary_path(&e.path))
        .take(max_files);

    let mut fetched = 0usize;
    for entry in blobs {
        let Some(relative) = safe_relative(&entry.path) else {
            failures.push(ItemFailure::new(&entry.path, FailureKind::Data, "unsafe path in tree"));
            continue;
        };
        let url = client.url(&format!("/repos/{}/git/blobs/{}", repo.full_name, entry.sha));
        let item = format!("{}:{}", repo.full_name, entry.path);
        match client.get(&url, RAW_ACCEPT).await {
            Ok(resp) if resp.is_success() => {
                let dest = dir.path().join(relative);
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&dest, &resp.body).await?;
                fetched += 1;
            }
            Ok(resp) => failures.push(ItemFailure::new(item, FailureKind::Status, format!("HTTP {}", resp.status))),
            Err(ReconError::Cancelled) => return Err(ReconError::Cancelled),
            Err(e) => failures.push(ItemFailure::from_error(item, &e)),
        }
    }

    info!(repo = %repo.full_name, files = fetched, failed = failures.len(), "fetched repository content via API");
    Ok((WorkingCopy { dir, is_git: false }, failures))
}

fn is_binary_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| BINARY_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

/// Tree paths are relative; anything else is rejected.
fn safe_relative(path: &str) -> Option<PathBuf> {
    let p = Path::new(path);
    p.components()
        .all(|c| matches!(c, Component::Normal(_)))
        .then(|| p.to_path_buf())
}

/// Run every scanner. Fails only when every scanner failed.
pub async fn scan(
    invoker: &dyn ToolInvoker,
    copy: &WorkingCopy,
    tools: &[ScanTool],
    repository: &str,
    timeout: Duration,
) -> Result<(Vec<SecretFinding>, Vec<ItemFailure>)> {
    let mut findings = Vec::new();
    let mut failures = Vec::new();
    let mut last_error = None;

    for tool in tools {
        let args = tool.args(copy.path(), copy.is_git);
        let result = async {
            let output = invoker.invoke(tool.program(), &args, None, timeout).await?;
            let output = output.into_success(tool.program())?;
            tool.parse(&output.stdout, repository)
        }
        .await;

        match result {
            Ok(found) => {
                debug!(repo = repository, tool = %tool, findings = found.len(), "scan finished");
                findings.extend(found);
            }
            Err(ReconError::Cancelled) => return Err(ReconError::Cancelled),
            Err(e) => {
                warn!(repo = repository, tool = %tool, error = %e, "scan failed");
                failures.push(ItemFailure::from_error(format!("{} {}", tool, repository), &e));
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if failures.len() == tools.len() => Err(e),
        _ => Ok((findings, failures)),
    }
}

/// Categorise every file below `root` (`.git` excluded).
pub fn analyze_content(root: &Path) -> Result<ContentAnalysis> {
    let mut analysis = ContentAnalysis::default();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if entry.file_name() != ".git" {
                    stack.push(path);
                }
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            analysis.total_files += 1;
            analysis.total_size += entry.metadata()?.len();
            let ext = path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
                .unwrap_or_default();
            *analysis.file_types.entry(ext).or_insert(0) += 1;

            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            let lower = relative.to_lowercase();
            let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

            if has(CONFIG_MARKERS) {
                analysis.config_files.push(relative);
            } else if has(DEPENDENCY_MARKERS) {
                analysis.dependency_files.push(relative);
            } else if has(DOC_MARKERS) {
                analysis.documentation.push(relative);
            } else if has(SCRIPT_MARKERS) {
                analysis.scripts.push(relative);
            } else if has(INTERESTING_MARKERS) {
                analysis.interesting_files.push(relative);
            }
        }
    }

    for list in [
        &mut analysis.config_files,
        &mut analysis.dependency_files,
        &mut analysis.documentation,
        &mut analysis.scripts,
        &mut analysis.interesting_files,
    ] {
        list.sort();
    }
    Ok(analysis)
}

pub async fn commit_history(
    invoker: &dyn ToolInvoker,
    copy: &WorkingCopy,
    max_commits: usize,
    timeout: Duration,
) -> Result<Vec<CommitInfo>> {
    let args = vec![
        "-C".to_string(),
        copy.path().display().to_string(),
        "log".to_string(),
        "--pretty=format:%H|%an|%ae|%ad|%s".to_string(),
        "--date=iso".to_string(),
        "-n".to_string(),
        max_commits.to_string(),
    ];
    let output = invoker.invoke("git", &args, None, timeout).await?.into_success("git log")?;
    Ok(parse_commit_log(&output.stdout))
}

/// `hash|author|email|date|subject` per line; the subject may contain `|`.
pub fn parse_commit_log(stdout: &str) -> Vec<CommitInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(5, '|');
            Some(CommitInfo {
                hash: parts.next()?.to_string(),
                author_name: parts.next()?.to_string(),
                author_email: parts.next()?.to_string(),
                date: parts.next()?.to_string(),
                message: parts.next()?.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_content_categories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join(".env"), "KEY=1").unwrap();
        std::fs::write(root.join("package.json"), "{}").unwrap();
        std::fs::write(root.join("README.md"), "# hi").unwrap();
        std::fs::write(root.join("src/app.js"), "x").unwrap();
        std::fs::write(root.join("db_dump.sql"), "x").unwrap();
        std::fs::write(root.join(".git/HEAD"), "ref").unwrap();

        let analysis = analyze_content(root).unwrap();
        assert_eq!(analysis.total_files, 5);
        assert_eq!(analysis.config_files, vec![".env"]);
        assert_eq!(analysis.dependency_files, vec!["package.json"]);
        assert_eq!(analysis.documentation, vec!["README.md"]);
        assert_eq!(analysis.scripts, vec!["src/app.js"]);
        assert_eq!(analysis.interesting_files, vec!["db_dump.sql"]);
        assert_eq!(analysis.file_types[".js"], 1);
    }

    #[test]
    fn test_parse_commit_log_keeps_pipes_in_subject() {
        let commits = parse_commit_log(
            "abc123|Jane|jane@example.com|2024-01-02 10:00:00 +0000|fix: a | b\nmalformed line\n",
        );
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].message, "fix: a | b");
        assert_eq!(commits[0].author_email, "jane@example.com");
    }

    #[test]
    fn test_unsafe_tree_paths_rejected() {
        assert!(safe_relative("src/app.js").is_some());
        assert!(safe_relative("../etc/passwd").is_none());
        assert!(safe_relative("/abs").is_none());
        assert!(is_binary_path("logo.PNG"));
        assert!(!is_binary_path("app.js"));
    }
}
