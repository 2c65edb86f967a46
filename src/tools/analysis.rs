// tools/analysis.rs - JavaScript analysis tools for the analyze stage
// Purpose: jsluice, trufflehog, linkfinder and secretfinder invocation and
//          output parsing into Finding records

use crate::error::{ReconError, Result};
use crate::model::{Confidence, Finding, FindingCategory};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub trait AnalysisTool: Send + Sync {
    /// Provenance label stored on every finding.
    fn tool_id(&self) -> &str;

    fn program(&self) -> &str;

    fn args(&self, file: &Path) -> Vec<String>;

    fn parse(&self, stdout: &str, reference: &str) -> Result<Vec<Finding>>;
}

fn finding(tool: &str, reference: &str, category: FindingCategory, payload: String, confidence: Confidence) -> Finding {
    Finding {
        tool: tool.to_string(),
        reference: reference.to_string(),
        category,
        payload,
        confidence,
    }
}

/// Parse JSON-lines output. Unparsable lines are skipped, but output with
/// content and no parsable line at all is a data error.
fn json_lines(tool: &str, stdout: &str) -> Result<Vec<Value>> {
    let mut values = Vec::new();
    let mut non_empty = 0usize;

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        non_empty += 1;
        if let Ok(value) = serde_json::from_str::<Value>(line) {
            values.push(value);
        }
    }

    if non_empty > 0 && values.is_empty() {
        return Err(ReconError::Data(format!("{} produced no parsable JSON lines", tool)));
    }
    Ok(values)
}

// ═══════════════════════════════════════════════════════════════════════════
// JSLUICE
// ═══════════════════════════════════════════════════════════════════════════

pub struct JsluiceUrls;

impl AnalysisTool for JsluiceUrls {
    fn tool_id(&self) -> &str {
        "jsluice-urls"
    }

    fn program(&self) -> &str {
        "jsluice"
    }

    fn args(&self, file: &Path) -> Vec<String> {
        vec!["urls".to_string(), file.display().to_string()]
    }

    fn parse(&self, stdout: &str, reference: &str) -> Result<Vec<Finding>> {
        Ok(json_lines(self.tool_id(), stdout)?
            .into_iter()
            .filter_map(|v| {
                let url = v.get("url")?.as_str()?.to_string();
                let method = v.get("method").and_then(Value::as_str).unwrap_or("");
                let payload = if method.is_empty() { url } else { format!("{} {}", method, url) };
                Some(finding(self.tool_id(), reference, FindingCategory::Endpoint, payload, Confidence::Medium))
            })
            .collect())
    }
}

pub struct JsluiceSecrets;

impl AnalysisTool for JsluiceSecrets {
    fn tool_id(&self) -> &str {
        "jsluice-secrets"
    }

    fn program(&self) -> &str {
        "jsluice"
    }

    fn args(&self, file: &Path) -> Vec<String> {
        vec!["secrets".to_string(), file.display().to_string()]
    }

    fn parse(&self, stdout: &str, reference: &str) -> Result<Vec<Finding>> {
        Ok(json_lines(self.tool_id(), stdout)?
            .into_iter()
            .filter_map(|v| {
                let kind = v.get("kind")?.as_str()?.to_string();
                let data = v.get("data").map(Value::to_string).unwrap_or_default();
                let confidence = match v.get("severity").and_then(Value::as_str) {
                    Some("high") => Confidence::High,
                    Some("low") | Some("info") => Confidence::Low,
                    _ => Confidence::Medium,
                };
                Some(finding(
                    self.tool_id(),
                    reference,
                    FindingCategory::Secret,
                    format!("{}: {}", kind, data),
                    confidence,
                ))
            })
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TRUFFLEHOG
// ═══════════════════════════════════════════════════════════════════════════

pub struct TrufflehogFile;

impl AnalysisTool for TrufflehogFile {
    fn tool_id(&self) -> &str {
        "trufflehog"
    }

    fn program(&self) -> &str {
        "trufflehog"
    }

    fn args(&self, file: &Path) -> Vec<String> {
        vec![
            "filesystem".to_string(),
            file.display().to_string(),
            "--json".to_string(),
            "--no-update".to_string(),
        ]
    }

    fn parse(&self, stdout: &str, reference: &str) -> Result<Vec<Finding>> {
        Ok(json_lines(self.tool_id(), stdout)?
            .into_iter()
            .filter_map(|v| {
                let detector = v.get("DetectorName")?.as_str()?.to_string();
                let raw = v.get("Raw").and_then(Value::as_str).unwrap_or("");
                let verified = v.get("Verified").and_then(Value::as_bool).unwrap_or(false);
                Some(finding(
                    self.tool_id(),
                    reference,
                    FindingCategory::Secret,
                    format!("{}: {}", detector, raw),
                    if verified { Confidence::High } else { Confidence::Medium },
                ))
            })
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// AUXILIARY SCRIPTS
// ═══════════════════════════════════════════════════════════════════════════

/// LinkFinder in CLI mode prints one endpoint per line.
pub struct LinkFinder {
    pub script: PathBuf,
}

impl AnalysisTool for LinkFinder {
    fn tool_id(&self) -> &str {
        "linkfinder"
    }

    fn program(&self) -> &str {
        "python3"
    }

    fn args(&self, file: &Path) -> Vec<String> {
        vec![
            self.script.display().to_string(),
            "-i".to_string(),
            file.display().to_string(),
            "-o".to_string(),
            "cli".to_string(),
        ]
    }

    fn parse(&self, stdout: &str, reference: &str) -> Result<Vec<Finding>> {
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('['))
            .map(|l| finding(self.tool_id(), reference, FindingCategory::Endpoint, l.to_string(), Confidence::Low))
            .collect())
    }
}

/// SecretFinder in CLI mode prints `name -> value` pairs.
pub struct SecretFinder {
    pub script: PathBuf,
}

impl AnalysisTool for SecretFinder {
    fn tool_id(&self) -> &str {
        "secretfinder"
    }

    fn program(&self) -> &str {
        "python3"
    }

    fn args(&self, file: &Path) -> Vec<String> {
        vec![
            self.script.display().to_string(),
            "-i".to_string(),
            file.display().to_string(),
            "-o".to_string(),
            "cli".to_string(),
        ]
    }

    fn parse(&self, stdout: &str, reference: &str) -> Result<Vec<Finding>> {
        Ok(stdout
            .lines()
            .filter_map(|line| {
                let (name, value) = line.split_once("->")?;
                let (name, value) = (name.trim(), value.trim());
                if name.is_empty() || value.is_empty() {
                    return None;
                }
                Some(finding(
                    self.tool_id(),
                    reference,
                    FindingCategory::Secret,
                    format!("{}: {}", name, value),
                    Confidence::Low,
                ))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsluice_urls_parse() {
        let stdout = r#"{"url":"/api/v1/users","method":"GET","type":"fetch"}
{"url":"https://example.com/graphql","type":"xhr"}
"#;
        let findings = JsluiceUrls.parse(stdout, "abc").unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].payload, "GET /api/v1/users");
        assert_eq!(findings[1].payload, "https://example.com/graphql");
        assert!(findings.iter().all(|f| f.category == FindingCategory::Endpoint));
    }

    #[test]
    fn test_jsluice_secrets_confidence() {
        let stdout = r#"{"kind":"AWSAccessKey","data":{"key":"AKIA..."},"severity":"high"}"#;
        let findings = JsluiceSecrets.parse(stdout, "abc").unwrap();
        assert_eq!(findings[0].confidence, Confidence::High);
        assert!(findings[0].payload.starts_with("AWSAccessKey"));
    }

    #[test]
    fn test_trufflehog_parse_and_garbage() {
        let stdout = r#"{"DetectorName":"Github","Raw":"ghp_xxx","Verified":true}"#;
        let findings = TrufflehogFile.parse(stdout, "abc").unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].confidence, Confidence::High);

        assert!(TrufflehogFile.parse("this is not json", "abc").is_err());
        assert!(TrufflehogFile.parse("", "abc").unwrap().is_empty());
    }

    #[test]
    fn test_secretfinder_parse() {
        let script = PathBuf::from("/opt/SecretFinder.py");
        let stdout = "google_api\t->\tAIzaSyA-example\nnoise line\n";
        let findings = SecretFinder { script }.parse(stdout, "abc").unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].payload, "google_api: AIzaSyA-example");
    }
}
