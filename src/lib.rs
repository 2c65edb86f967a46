// lib.rs - jsrecon library root
// Purpose: JavaScript reconnaissance pipeline (gather, verify, deduplicate,
//          download, analyze, fuzz, report) and GitHub secret reconnaissance

pub mod artifact;
pub mod config;
pub mod context;
pub mod dedup;
pub mod error;
pub mod executor;
pub mod github;
pub mod http;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod stages;
pub mod store;
pub mod summary;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tools;

pub use error::{ReconError, Result};
pub use model::{Stage, Target};
pub use pipeline::{Orchestrator, PipelineOutcome, PipelineRequest};
