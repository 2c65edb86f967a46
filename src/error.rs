// error.rs - Error taxonomy for the recon pipeline
// Purpose: One error type for stages, tools and the GitHub workflow

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = ReconError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum ReconError {
    /// Missing or invalid configuration. Aborts the affected stage or workflow.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// External executable not found on PATH.
    #[error("required tool '{0}' is not installed or not in PATH")]
    MissingTool(String),

    /// Network failure, 5xx, or a process that exited abnormally.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Unparsable tool output or a corrupt artifact.
    #[error("data error: {0}")]
    Data(String),

    /// Non-retryable API response (4xx other than rate limiting).
    #[error("API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReconError {
    /// Whether a bounded retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ReconError::Transient(_) | ReconError::Timeout(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, ReconError::Configuration(_) | ReconError::MissingTool(_))
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ReconError::Configuration(_) | ReconError::MissingTool(_) => FailureKind::Configuration,
            ReconError::Transient(_) | ReconError::Io(_) => FailureKind::Transient,
            ReconError::Timeout(_) => FailureKind::Timeout,
            ReconError::Data(_) | ReconError::Json(_) => FailureKind::Data,
            ReconError::Api { .. } => FailureKind::Api,
            ReconError::Cancelled => FailureKind::Cancelled,
        }
    }
}

impl From<reqwest::Error> for ReconError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ReconError::Transient(format!("request timed out: {}", err))
        } else {
            ReconError::Transient(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Transient,
    Timeout,
    Data,
    Api,
    Status,
    Cancelled,
}

/// A unit of work that did not contribute a result. Stored inside artifacts
/// so the run summary can enumerate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub item: String,
    pub kind: FailureKind,
    pub reason: String,
}

impl ItemFailure {
    pub fn new(item: impl Into<String>, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            kind,
            reason: reason.into(),
        }
    }

    pub fn from_error(item: impl Into<String>, err: &ReconError) -> Self {
        Self::new(item, err.kind(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ReconError::Transient("503".into()).is_transient());
        assert!(ReconError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!ReconError::Data("bad json".into()).is_transient());
        assert!(!ReconError::Api { status: 404, message: "Not Found".into() }.is_transient());
    }

    #[test]
    fn test_item_failure_from_error() {
        let err = ReconError::MissingTool("gau".into());
        let failure = ItemFailure::from_error("gau", &err);
        assert_eq!(failure.kind, FailureKind::Configuration);
        assert!(failure.reason.contains("gau"));
    }
}
