// config.rs - Explicit per-stage configuration
// Purpose: Every knob a stage reads lives here, validated once before the
//          orchestrator touches any target

use crate::error::{ReconError, Result};
use crate::model::Stage;
use crate::tools::analysis::{AnalysisTool, JsluiceSecrets, JsluiceUrls, LinkFinder, SecretFinder, TrufflehogFile};
use crate::tools::secrets::ScanTool;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════
// STAGE CONFIGS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatherConfig {
    /// Source letters: `w` waybackurls, `g` gau, `k` katana.
    pub mode: String,
    pub depth: u32,
    pub threads: usize,
    pub command_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyConfig {
    pub threads: usize,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Parallel HEAD probes for records that arrive without cache headers.
    pub threads: usize,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    pub threads: usize,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisToolKind {
    JsluiceUrls,
    JsluiceSecrets,
    Trufflehog,
    Linkfinder,
    Secretfinder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeConfig {
    pub tools: Vec<AnalysisToolKind>,
    pub threads: usize,
    pub command_timeout: Duration,
    pub linkfinder_script: Option<PathBuf>,
    pub secretfinder_script: Option<PathBuf>,
}

impl AnalyzeConfig {
    /// Instantiate the configured tools. Script tools need their script path.
    pub fn build_tools(&self) -> Result<Vec<Box<dyn AnalysisTool>>> {
        let mut tools: Vec<Box<dyn AnalysisTool>> = Vec::new();
        for kind in &self.tools {
            match kind {
                AnalysisToolKind::JsluiceUrls => tools.push(Box::new(JsluiceUrls)),
                AnalysisToolKind::JsluiceSecrets => tools.push(Box::new(JsluiceSecrets)),
                AnalysisToolKind::Trufflehog => tools.push(Box::new(TrufflehogFile)),
                AnalysisToolKind::Linkfinder => {
                    let script = self.linkfinder_script.clone().ok_or_else(|| {
                        ReconError::Configuration("linkfinder selected without --linkfinder-script".to_string())
                    })?;
                    tools.push(Box::new(LinkFinder { script }));
                }
                AnalysisToolKind::Secretfinder => {
                    let script = self.secretfinder_script.clone().ok_or_else(|| {
                        ReconError::Configuration("secretfinder selected without --secretfinder-script".to_string())
                    })?;
                    tools.push(Box::new(SecretFinder { script }));
                }
            }
        }
        Ok(tools)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FuzzMode {
    Off,
    Wordlist,
    Permutation,
    Both,
}

impl FuzzMode {
    pub fn uses_wordlist(self) -> bool {
        matches!(self, FuzzMode::Wordlist | FuzzMode::Both)
    }

    pub fn uses_permutation(self) -> bool {
        matches!(self, FuzzMode::Permutation | FuzzMode::Both)
    }
}

impl fmt::Display for FuzzMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FuzzMode::Off => "off",
            FuzzMode::Wordlist => "wordlist",
            FuzzMode::Permutation => "permutation",
            FuzzMode::Both => "both",
        };
        f.write_str(name)
    }
}

impl FromStr for FuzzMode {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "off" => Ok(FuzzMode::Off),
            "wordlist" => Ok(FuzzMode::Wordlist),
            "permutation" => Ok(FuzzMode::Permutation),
            "both" => Ok(FuzzMode::Both),
            other => Err(ReconError::Configuration(format!(
                "invalid fuzz mode '{}' (expected off, wordlist, permutation or both)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzConfig {
    pub mode: FuzzMode,
    pub wordlist: Option<PathBuf>,
    pub threads: usize,
    pub timeout: Duration,
    pub status_codes: BTreeSet<u16>,
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub api_base: String,
    pub max_repos: usize,
    pub scan_tools: Vec<ScanTool>,
    pub skip_clone: bool,
    pub threads: usize,
    pub request_timeout: Duration,
    pub clone_timeout: Duration,
    pub scan_timeout: Duration,
    /// Attempts for 5xx and network failures. Rate-limit waits never count.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub api_max_files: usize,
    pub api_max_file_bytes: u64,
    pub max_commits: usize,
}

// ═══════════════════════════════════════════════════════════════════════════
// PIPELINE CONFIG
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub gather: GatherConfig,
    pub verify: VerifyConfig,
    pub dedup: DedupConfig,
    pub download: DownloadConfig,
    pub analyze: AnalyzeConfig,
    pub fuzz: FuzzConfig,
    pub github: GitHubConfig,
    pub max_parallel_targets: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            gather: GatherConfig {
                mode: "wgk".to_string(),
                depth: 2,
                threads: 3,
                command_timeout: Duration::from_secs(300),
            },
            verify: VerifyConfig {
                threads: 50,
                timeout: Duration::from_secs(10),
            },
            dedup: DedupConfig {
                threads: 20,
                timeout: Duration::from_secs(10),
            },
            download: DownloadConfig {
                threads: 10,
                timeout: Duration::from_secs(30),
            },
            analyze: AnalyzeConfig {
                tools: vec![
                    AnalysisToolKind::JsluiceUrls,
                    AnalysisToolKind::JsluiceSecrets,
                    AnalysisToolKind::Trufflehog,
                ],
                threads: 5,
                command_timeout: Duration::from_secs(30),
                linkfinder_script: None,
                secretfinder_script: None,
            },
            fuzz: FuzzConfig {
                mode: FuzzMode::Off,
                wordlist: None,
                threads: 20,
                timeout: Duration::from_secs(10),
                status_codes: [200, 403, 401].into_iter().collect(),
                extensions: vec!["js".to_string()],
            },
            github: GitHubConfig {
                token: None,
                api_base: "https://api.github.com".to_string(),
                max_repos: 10,
                scan_tools: ScanTool::ALL.to_vec(),
                skip_clone: false,
                threads: 4,
                request_timeout: Duration::from_secs(30),
                clone_timeout: Duration::from_secs(300),
                scan_timeout: Duration::from_secs(600),
                max_attempts: 3,
                backoff_base: Duration::from_secs(1),
                api_max_files: 200,
                api_max_file_bytes: 1024 * 1024,
                max_commits: 100,
            },
            max_parallel_targets: 2,
        }
    }
}

impl PipelineConfig {
    /// Faster scanning, more pressure on the target.
    pub fn aggressive() -> Self {
        let mut config = Self::default();
        config.verify.threads = 100;
        config.verify.timeout = Duration::from_secs(5);
        config.dedup.threads = 50;
        config.download.threads = 25;
        config.download.timeout = Duration::from_secs(15);
        config.analyze.threads = 10;
        config.fuzz.threads = 50;
        config.fuzz.timeout = Duration::from_secs(5);
        config.github.threads = 8;
        config.max_parallel_targets = 4;
        config
    }

    /// Fewer connections, longer timeouts.
    pub fn respectful() -> Self {
        let mut config = Self::default();
        config.verify.threads = 10;
        config.verify.timeout = Duration::from_secs(20);
        config.dedup.threads = 5;
        config.download.threads = 3;
        config.download.timeout = Duration::from_secs(60);
        config.analyze.threads = 2;
        config.fuzz.threads = 5;
        config.fuzz.timeout = Duration::from_secs(20);
        config.github.threads = 2;
        config.max_parallel_targets = 1;
        config
    }

    /// Reject configurations the requested stages cannot run with.
    pub fn validate(&self, stages: &[Stage], github: bool) -> Result<()> {
        if self.max_parallel_targets == 0 {
            return Err(invalid("max parallel targets must be at least 1"));
        }

        for stage in stages {
            match stage {
                Stage::Gather => {
                    let mode = &self.gather.mode;
                    if mode.is_empty() || mode.chars().any(|c| !matches!(c, 'w' | 'g' | 'k')) {
                        return Err(invalid(&format!(
                            "gather mode '{}' must combine the letters w, g and k",
                            mode
                        )));
                    }
                    non_zero("gather threads", self.gather.threads)?;
                    non_zero_duration("gather command timeout", self.gather.command_timeout)?;
                }
                Stage::Verify => {
                    non_zero("verify threads", self.verify.threads)?;
                    non_zero_duration("verify timeout", self.verify.timeout)?;
                }
                Stage::Deduplicate => {
                    non_zero("dedup threads", self.dedup.threads)?;
                    non_zero_duration("dedup timeout", self.dedup.timeout)?;
                }
                Stage::Download => {
                    non_zero("download threads", self.download.threads)?;
                    non_zero_duration("download timeout", self.download.timeout)?;
                }
                Stage::Analyze => {
                    if self.analyze.tools.is_empty() {
                        return Err(invalid("no analysis tools selected"));
                    }
                    non_zero("analysis threads", self.analyze.threads)?;
                    non_zero_duration("analysis timeout", self.analyze.command_timeout)?;
                    self.analyze.build_tools()?;
                }
                Stage::Fuzz => self.validate_fuzz()?,
                Stage::Report => {}
            }
        }

        if github {
            let gh = &self.github;
            if gh.scan_tools.is_empty() {
                return Err(invalid("no GitHub scan tools selected"));
            }
            non_zero("github max repos", gh.max_repos)?;
            non_zero("github threads", gh.threads)?;
            if gh.max_attempts == 0 {
                return Err(invalid("github max attempts must be at least 1"));
            }
            url::Url::parse(&gh.api_base)
                .map_err(|e| invalid(&format!("invalid GitHub API base '{}': {}", gh.api_base, e)))?;
        }

        Ok(())
    }

    fn validate_fuzz(&self) -> Result<()> {
        let fuzz = &self.fuzz;
        if fuzz.mode == FuzzMode::Off {
            return Ok(());
        }
        non_zero("fuzz threads", fuzz.threads)?;
        non_zero_duration("fuzz timeout", fuzz.timeout)?;
        if fuzz.status_codes.is_empty() {
            return Err(invalid("fuzz status code allow-list is empty"));
        }
        if fuzz.extensions.is_empty() {
            return Err(invalid("no fuzz extensions configured"));
        }
        if fuzz.mode.uses_wordlist() {
            match &fuzz.wordlist {
                None => return Err(invalid(&format!("fuzz mode '{}' requires --fuzz-wordlist", fuzz.mode))),
                Some(path) if !path.is_file() => {
                    return Err(invalid(&format!("fuzz wordlist not found: {}", path.display())));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ReconError {
    ReconError::Configuration(message.to_string())
}

fn non_zero(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(invalid(&format!("{} must be at least 1", name)));
    }
    Ok(())
}

fn non_zero_duration(name: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(invalid(&format!("{} must be greater than zero", name)));
    }
    Ok(())
}

/// Parse `200,403,401` into an allow-list.
pub fn parse_status_codes(spec: &str) -> Result<BTreeSet<u16>> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<u16>() {
            Ok(code) if (100..=599).contains(&code) => Ok(code),
            _ => Err(invalid(&format!("invalid HTTP status code '{}'", s))),
        })
        .collect()
}

/// Parse `js,mjs` (leading dots tolerated).
pub fn parse_extensions(spec: &str) -> Vec<String> {
    let mut extensions = Vec::new();
    for ext in spec.split(',').map(|e| e.trim().trim_start_matches('.').to_lowercase()) {
        if !ext.is_empty() && !extensions.contains(&ext) {
            extensions.push(ext);
        }
    }
    extensions
}

pub fn parse_analysis_tools(spec: &str) -> Result<Vec<AnalysisToolKind>> {
    let mut tools = Vec::new();
    for name in spec.split(',').map(|t| t.trim().to_lowercase()).filter(|t| !t.is_empty()) {
        let tool = match name.as_str() {
            "jsluice" => {
                for kind in [AnalysisToolKind::JsluiceUrls, AnalysisToolKind::JsluiceSecrets] {
                    if !tools.contains(&kind) {
                        tools.push(kind);
                    }
                }
                continue;
            }
            "jsluice-urls" => AnalysisToolKind::JsluiceUrls,
            "jsluice-secrets" => AnalysisToolKind::JsluiceSecrets,
            "trufflehog" => AnalysisToolKind::Trufflehog,
            "linkfinder" => AnalysisToolKind::Linkfinder,
            "secretfinder" => AnalysisToolKind::Secretfinder,
            other => return Err(invalid(&format!("unknown analysis tool '{}'", other))),
        };
        if !tools.contains(&tool) {
            tools.push(tool);
        }
    }
    Ok(tools)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config
            .validate(&[Stage::Gather, Stage::Verify, Stage::Deduplicate, Stage::Download, Stage::Report], true)
            .is_ok());
        assert!(PipelineConfig::aggressive().validate(&[Stage::Verify], false).is_ok());
        assert!(PipelineConfig::respectful().validate(&[Stage::Verify], false).is_ok());
    }

    #[test]
    fn test_fuzz_wordlist_required() {
        let mut config = PipelineConfig::default();
        config.fuzz.mode = FuzzMode::Both;
        let err = config.validate(&[Stage::Fuzz], false).unwrap_err();
        assert!(err.is_configuration());

        config.fuzz.mode = FuzzMode::Permutation;
        assert!(config.validate(&[Stage::Fuzz], false).is_ok());

        // Not requested, not checked
        config.fuzz.mode = FuzzMode::Wordlist;
        assert!(config.validate(&[Stage::Gather], false).is_ok());
    }

    #[test]
    fn test_invalid_gather_mode() {
        let mut config = PipelineConfig::default();
        config.gather.mode = "wx".to_string();
        assert!(config.validate(&[Stage::Gather], false).is_err());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let mut config = PipelineConfig::default();
        config.download.threads = 0;
        assert!(config.validate(&[Stage::Download], false).is_err());
        assert!(config.validate(&[Stage::Verify], false).is_ok());
    }

    #[test]
    fn test_parse_status_codes() {
        let codes = parse_status_codes("200, 403,401").unwrap();
        assert_eq!(codes.into_iter().collect::<Vec<_>>(), vec![200, 401, 403]);
        assert!(parse_status_codes("200,abc").is_err());
        assert!(parse_status_codes("99").is_err());
    }

    #[test]
    fn test_parse_extensions_and_tools() {
        assert_eq!(parse_extensions(".js, mjs,js"), vec!["js", "mjs"]);
        let tools = parse_analysis_tools("jsluice,trufflehog").unwrap();
        assert_eq!(
            tools,
            vec![AnalysisToolKind::JsluiceUrls, AnalysisToolKind::JsluiceSecrets, AnalysisToolKind::Trufflehog]
        );
        assert!(parse_analysis_tools("nuclei").is_err());
    }

    #[test]
    fn test_script_tools_need_paths() {
        let mut config = PipelineConfig::default();
        config.analyze.tools = vec![AnalysisToolKind::Linkfinder];
        assert!(config.validate(&[Stage::Analyze], false).is_err());
        config.analyze.linkfinder_script = Some(PathBuf::from("/opt/linkfinder.py"));
        assert!(config.validate(&[Stage::Analyze], false).is_ok());
    }

    #[test]
    fn test_fuzz_mode_parse() {
        assert_eq!("BOTH".parse::<FuzzMode>().unwrap(), FuzzMode::Both);
        assert!("fuzz".parse::<FuzzMode>().is_err());
        assert!(FuzzMode::Both.uses_wordlist() && FuzzMode::Both.uses_permutation());
    }
}
