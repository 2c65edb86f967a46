// github/models.rs - GitHub API payloads and recon result records

use crate::error::ItemFailure;
use crate::model::SecretFinding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub items: Vec<ApiRepository>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiRepository {
    pub full_name: String,
    pub html_url: String,
    pub clone_url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneState {
    Pending,
    Cloned,
    Fetched,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub url: String,
    pub clone_url: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub stars: u64,
    pub forks: u64,
    pub size_kb: u64,
    pub default_branch: String,
    pub topics: Vec<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    /// Query that first returned this repository.
    pub search_query: String,
    /// Target this repository was discovered for.
    pub target: String,
    pub clone_state: CloneState,
}

impl Repository {
    pub fn from_api(api: ApiRepository, query: &str, target: &str) -> Self {
        let (owner, name) = match api.full_name.split_once('/') {
            Some((o, n)) => (o.to_string(), n.to_string()),
            None => (String::new(), api.full_name.clone()),
        };
        Self {
            owner,
            name,
            url: api.html_url,
            clone_url: api.clone_url,
            description: api.description,
            language: api.language,
            stars: api.stargazers_count,
            forks: api.forks_count,
            size_kb: api.size,
            default_branch: api.default_branch.unwrap_or_else(|| "main".to_string()),
            topics: api.topics,
            created_at: api.created_at,
            updated_at: api.updated_at,
            full_name: api.full_name,
            search_query: query.to_string(),
            target: target.to_string(),
            clone_state: CloneState::Pending,
        }
    }
}

/// `/orgs/<name>` and `/users/<name>` share most fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub blog: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub twitter_username: Option<String>,
    #[serde(default)]
    pub public_repos: u64,
    #[serde(default)]
    pub followers: u64,
    #[serde(default)]
    pub following: u64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TreeResponse {
    #[serde(default)]
    pub tree: Vec<TreeEntry>,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sha: String,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentAnalysis {
    pub config_files: Vec<String>,
    pub dependency_files: Vec<String>,
    pub documentation: Vec<String>,
    pub scripts: Vec<String>,
    pub interesting_files: Vec<String>,
    /// Extension (with dot, lowercase; empty for none) -> count.
    pub file_types: BTreeMap<String, usize>,
    pub total_files: usize,
    pub total_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub author_name: String,
    pub author_email: String,
    pub date: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsefulData {
    pub repository: String,
    pub content_analysis: ContentAnalysis,
    pub commit_history: Vec<CommitInfo>,
}

/// Everything one GitHub recon run produced, across targets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubReport {
    pub targets: Vec<String>,
    pub repositories: Vec<Repository>,
    pub secrets: Vec<SecretFinding>,
    pub useful_data: Vec<UsefulData>,
    pub organizations: Vec<Profile>,
    pub users: Vec<Profile>,
    pub failures: Vec<ItemFailure>,
    /// Set when the run was cancelled; the report holds what finished.
    #[serde(default)]
    pub interrupted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_from_search_item() {
        let api: ApiRepository = serde_json::from_str(
            r#"{
                "full_name": "acme/web",
                "html_url": "https://github.com/acme/web",
                "clone_url": "https://github.com/acme/web.git",
                "stargazers_count": 12,
                "default_branch": "master",
                "description": null
            }"#,
        )
        .unwrap();
        let repo = Repository::from_api(api, "org:acme", "acme");
        assert_eq!(repo.owner, "acme");
        assert_eq!(repo.name, "web");
        assert_eq!(repo.stars, 12);
        assert_eq!(repo.default_branch, "master");
        assert_eq!(repo.clone_state, CloneState::Pending);
    }
}
