// tools/mod.rs - External tool invocation
// Purpose: Uniform contract for driving discovery, analysis and secret
//          scanning executables. Output parsing lives next to each tool.

pub mod analysis;
pub mod discovery;
pub mod secrets;

use crate::error::{ReconError, Result};
use async_trait::async_trait;
use dashmap::DashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Non-zero exit becomes a recoverable per-task failure.
    pub fn into_success(self, tool: &str) -> Result<ToolOutput> {
        if self.success() {
            Ok(self)
        } else {
            let stderr = self.stderr.trim();
            let stderr: String = stderr.chars().take(300).collect();
            Err(ReconError::Transient(format!(
                "{} exited with status {}: {}",
                tool, self.exit_code, stderr
            )))
        }
    }
}

#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Run `tool` with `args`, feeding `stdin` when given. A missing
    /// executable is `MissingTool`; a non-zero exit is returned as output,
    /// not as an error.
    async fn invoke(&self, tool: &str, args: &[String], stdin: Option<&str>, timeout: Duration)
        -> Result<ToolOutput>;

    fn is_available(&self, tool: &str) -> bool;
}

/// Fails with a configuration error naming every unavailable tool.
pub fn ensure_tools<'a, I>(invoker: &dyn ToolInvoker, tools: I) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut missing: Vec<&str> = tools.into_iter().filter(|t| !invoker.is_available(t)).collect();
    missing.sort_unstable();
    missing.dedup();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ReconError::Configuration(format!(
            "required tools not installed or not in PATH: {}",
            missing.join(", ")
        )))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PROCESS INVOKER
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct ProcessInvoker {
    reported_missing: DashSet<String>,
}

impl ProcessInvoker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ToolInvoker for ProcessInvoker {
    async fn invoke(
        &self,
        tool: &str,
        args: &[String],
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<ToolOutput> {
        debug!(tool, ?args, stdin_bytes = stdin.map(str::len), "invoking external tool");

        let child = Command::new(tool)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.reported_missing.insert(tool.to_string()) {
                    error!(tool, "required tool is not installed or not in PATH");
                }
                return Err(ReconError::MissingTool(tool.to_string()));
            }
            Err(e) => return Err(ReconError::Io(e)),
        };

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            let input = input.as_bytes().to_vec();
            // The pipe is dropped after the write, which closes the tool's stdin
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&input).await {
                    debug!(error = %e, "tool closed stdin early");
                }
            });
        }

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ReconError::Timeout(timeout))??;

        Ok(ToolOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn is_available(&self, tool: &str) -> bool {
        find_in_path(tool).is_some()
    }
}

/// Resolve an executable the way a shell would: paths are checked directly,
/// bare names are searched in `PATH`.
pub fn find_in_path(tool: &str) -> Option<PathBuf> {
    let candidate = Path::new(tool);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(tool))
        .find(|full| full.is_file())
}

/// Mask all but a short prefix of a secret.
pub fn redact(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars.iter().take(4).collect();
    format!("{}{} ({} chars)", visible, "*".repeat(8), chars.len())
}
