// context.rs - Run context threaded through orchestrator, runners and invokers
// Purpose: Carries run identity, output root, cancellation and the shared
//          collaborators in place of global state

use crate::config::PipelineConfig;
use crate::executor::BoundedExecutor;
use crate::http::HttpProbe;
use crate::store::ArtifactStore;
use crate::tools::ToolInvoker;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub cancel: CancellationToken,
    pub config: Arc<PipelineConfig>,
    pub store: ArtifactStore,
    pub invoker: Arc<dyn ToolInvoker>,
    pub http: Arc<dyn HttpProbe>,
    /// Render indicatif bars for fan-outs.
    pub show_progress: bool,
}

impl RunContext {
    pub fn new(
        output_root: impl Into<PathBuf>,
        config: PipelineConfig,
        invoker: Arc<dyn ToolInvoker>,
        http: Arc<dyn HttpProbe>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            cancel,
            config: Arc::new(config),
            store: ArtifactStore::new(output_root),
            invoker,
            http,
            show_progress: false,
        }
    }

    pub fn with_progress_bars(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    /// Executor bound to this run's cancellation signal.
    pub fn executor(&self, max_parallel: usize, task_timeout: Duration, label: &str) -> BoundedExecutor {
        let executor = BoundedExecutor::new(max_parallel, task_timeout, self.cancel.clone());
        if self.show_progress {
            executor.with_progress(label)
        } else {
            executor
        }
    }
}
