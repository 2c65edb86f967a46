// tools/secrets.rs - Repository secret scanners for GitHub recon
// Purpose: trufflehog and gitleaks argument building and report parsing into
//          redacted SecretFinding records

use super::redact;
use crate::error::{ReconError, Result};
use crate::model::SecretFinding;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanTool {
    Trufflehog,
    Gitleaks,
}

impl ScanTool {
    pub const ALL: [ScanTool; 2] = [ScanTool::Trufflehog, ScanTool::Gitleaks];

    pub fn program(self) -> &'static str {
        match self {
            ScanTool::Trufflehog => "trufflehog",
            ScanTool::Gitleaks => "gitleaks",
        }
    }

    /// `is_git` is false for API-fetched content, which has no history.
    pub fn args(self, dir: &Path, is_git: bool) -> Vec<String> {
        let dir = dir.display().to_string();
        match self {
            ScanTool::Trufflehog => vec![
                "filesystem".to_string(),
                dir,
                "--json".to_string(),
                "--no-update".to_string(),
            ],
            ScanTool::Gitleaks => {
                let mut args = vec![
                    "detect".to_string(),
                    "--source".to_string(),
                    dir,
                    "--report-format".to_string(),
                    "json".to_string(),
                    "--report-path".to_string(),
                    "/dev/stdout".to_string(),
                    "--exit-code".to_string(),
                    "0".to_string(),
                ];
                if !is_git {
                    args.push("--no-git".to_string());
                }
                args
            }
        }
    }

    pub fn parse(self, stdout: &str, repository: &str) -> Result<Vec<SecretFinding>> {
        match self {
            ScanTool::Trufflehog => parse_trufflehog(stdout, repository),
            ScanTool::Gitleaks => parse_gitleaks(stdout, repository),
        }
    }
}

impl fmt::Display for ScanTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

impl FromStr for ScanTool {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "trufflehog" => Ok(ScanTool::Trufflehog),
            "gitleaks" => Ok(ScanTool::Gitleaks),
            other => Err(ReconError::Configuration(format!("unknown GitHub scan tool '{}'", other))),
        }
    }
}

/// Parse a comma separated tool list; `all` selects every scanner.
pub fn parse_scan_tools(list: &str) -> Result<Vec<ScanTool>> {
    if list.trim().eq_ignore_ascii_case("all") {
        return Ok(ScanTool::ALL.to_vec());
    }
    let mut tools = Vec::new();
    for part in list.split(',').filter(|p| !p.trim().is_empty()) {
        let tool: ScanTool = part.parse()?;
        if !tools.contains(&tool) {
            tools.push(tool);
        }
    }
    if tools.is_empty() {
        return Err(ReconError::Configuration("no GitHub scan tools selected".to_string()));
    }
    Ok(tools)
}

fn parse_trufflehog(stdout: &str, repository: &str) -> Result<Vec<SecretFinding>> {
    let mut findings = Vec::new();
    let mut lines = 0usize;

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        lines += 1;
        let Ok(v) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        let Some(detector) = v.get("DetectorName").and_then(Value::as_str) else {
            continue;
        };

        // Filesystem and Git sources nest their metadata differently
        let meta = v
            .pointer("/SourceMetadata/Data/Filesystem")
            .or_else(|| v.pointer("/SourceMetadata/Data/Git"));
        let file = meta.and_then(|m| m.get("file")).and_then(Value::as_str).unwrap_or("");
        let line_no = meta.and_then(|m| m.get("line")).and_then(Value::as_u64);
        let commit = meta
            .and_then(|m| m.get("commit"))
            .and_then(Value::as_str)
            .map(str::to_string);

        findings.push(SecretFinding {
            repository: repository.to_string(),
            tool: "trufflehog".to_string(),
            rule: detector.to_string(),
            location: location(file, line_no),
            commit,
            redacted: redact(v.get("Raw").and_then(Value::as_str).unwrap_or("")),
        });
    }

    if lines > 0 && findings.is_empty() && !stdout.contains("DetectorName") {
        return Err(ReconError::Data("trufflehog output contained no findings records".to_string()));
    }
    Ok(findings)
}

fn parse_gitleaks(stdout: &str, repository: &str) -> Result<Vec<SecretFinding>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let leaks: Vec<Value> = serde_json::from_str(trimmed)
        .map_err(|e| ReconError::Data(format!("unparsable gitleaks report: {}", e)))?;

    Ok(leaks
        .into_iter()
        .map(|leak| {
            let text = |keys: &[&str]| {
                keys.iter()
                    .find_map(|k| leak.get(*k).and_then(Value::as_str))
                    .unwrap_or("")
                    .to_string()
            };
            let line_no = ["StartLine", "Line"]
                .iter()
                .find_map(|k| leak.get(*k).and_then(Value::as_u64));
            let commit = text(&["Commit"]);

            SecretFinding {
                repository: repository.to_string(),
                tool: "gitleaks".to_string(),
                rule: text(&["RuleID", "Rule"]),
                location: location(&text(&["File"]), line_no),
                commit: (!commit.is_empty()).then_some(commit),
                redacted: redact(&text(&["Secret"])),
            }
        })
        .collect())
}

fn location(file: &str, line: Option<u64>) -> String {
    match line {
        Some(line) => format!("{}:{}", file, line),
        None => file.to_string(),
    }
}
