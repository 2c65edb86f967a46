// testing.rs - In-memory collaborators for tests
// Purpose: Scriptable ToolInvoker, HttpProbe and GitHubTransport so stages,
//          the orchestrator and the GitHub workflow run without network or
//          installed tools

use crate::config::PipelineConfig;
use crate::context::RunContext;
use crate::error::{ReconError, Result};
use crate::github::client::{ApiResponse, GitHubTransport};
use crate::http::{FetchedBody, HttpProbe, ProbeResponse};
use crate::model::CacheHeaders;
use crate::tools::{ToolInvoker, ToolOutput};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run context over a temp output root with progress bars off.
pub fn test_context(root: &Path, config: PipelineConfig, invoker: MockInvoker, http: MockHttp) -> RunContext {
    RunContext::new(
        root,
        config,
        Arc::new(invoker),
        Arc::new(http),
        CancellationToken::new(),
    )
}

// ═══════════════════════════════════════════════════════════════════════════
// TOOL INVOKER
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct InvokerState {
    replies: HashMap<(String, Option<String>), ToolOutput>,
    missing: HashSet<String>,
    delays: HashMap<String, Duration>,
    calls: Vec<(String, Vec<String>)>,
    inputs: Vec<(String, String)>,
}

/// Every tool is installed and prints nothing unless told otherwise.
/// Replies keyed on (tool, first argument) win over tool-wide replies; a
/// tool called without arguments is keyed on its first stdin line.
/// `git clone` creates the destination directory with a README.
#[derive(Clone, Default)]
pub struct MockInvoker {
    state: Arc<Mutex<InvokerState>>,
}

impl MockInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    fn reply(self, tool: &str, first_arg: Option<&str>, exit_code: i32, stdout: &str, stderr: &str) -> Self {
        lock(&self.state).replies.insert(
            (tool.to_string(), first_arg.map(str::to_string)),
            ToolOutput {
                exit_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        );
        self
    }

    pub fn with_output(self, tool: &str, stdout: &str) -> Self {
        self.reply(tool, None, 0, stdout, "")
    }

    pub fn with_output_for(self, tool: &str, first_arg: &str, stdout: &str) -> Self {
        self.reply(tool, Some(first_arg), 0, stdout, "")
    }

    pub fn with_failure(self, tool: &str, exit_code: i32, stderr: &str) -> Self {
        self.reply(tool, None, exit_code, "", stderr)
    }

    pub fn with_failure_for(self, tool: &str, first_arg: &str, exit_code: i32, stderr: &str) -> Self {
        self.reply(tool, Some(first_arg), exit_code, "", stderr)
    }

    pub fn without_tool(self, tool: &str) -> Self {
        lock(&self.state).missing.insert(tool.to_string());
        self
    }

    /// The tool runs for `delay` on tokio's clock. A delay past the call's
    /// timeout ends in `Timeout`, the way a killed process would.
    pub fn with_delay(self, tool: &str, delay: Duration) -> Self {
        lock(&self.state).delays.insert(tool.to_string(), delay);
        self
    }

    pub fn invocations(&self) -> Vec<(String, Vec<String>)> {
        lock(&self.state).calls.clone()
    }

    /// (tool, stdin) for every call that fed standard input.
    pub fn stdin_inputs(&self) -> Vec<(String, String)> {
        lock(&self.state).inputs.clone()
    }
}

#[async_trait]
impl ToolInvoker for MockInvoker {
    async fn invoke(
        &self,
        tool: &str,
        args: &[String],
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<ToolOutput> {
        let (reply, delay) = {
            let mut state = lock(&self.state);
            state.calls.push((tool.to_string(), args.to_vec()));
            if let Some(input) = stdin {
                state.inputs.push((tool.to_string(), input.to_string()));
            }
            if state.missing.contains(tool) {
                return Err(ReconError::MissingTool(tool.to_string()));
            }
            let key = args
                .first()
                .map(String::as_str)
                .or_else(|| stdin.and_then(|s| s.lines().next()));
            let specific = key.and_then(|k| state.replies.get(&(tool.to_string(), Some(k.to_string()))));
            let reply = specific
                .or_else(|| state.replies.get(&(tool.to_string(), None)))
                .cloned()
                .unwrap_or(ToolOutput {
                    exit_code: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                });
            (reply, state.delays.get(tool).copied())
        };

        if let Some(delay) = delay {
            if delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(ReconError::Timeout(timeout));
            }
            tokio::time::sleep(delay).await;
        }

        if tool == "git" && args.first().map(String::as_str) == Some("clone") && reply.success() {
            if let Some(dest) = args.last() {
                let dest = Path::new(dest);
                tokio::fs::create_dir_all(dest).await?;
                tokio::fs::write(dest.join("README.md"), "# mock repository\n").await?;
            }
        }
        Ok(reply)
    }

    fn is_available(&self, tool: &str) -> bool {
        !lock(&self.state).missing.contains(tool)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HTTP
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum MockResponse {
    Reply {
        status: u16,
        headers: CacheHeaders,
        body: Vec<u8>,
    },
    Error(String),
}

impl Default for MockResponse {
    fn default() -> Self {
        MockResponse::Reply {
            status: 200,
            headers: CacheHeaders::default(),
            body: Vec::new(),
        }
    }
}

/// Unknown URLs answer 404. Builders for the same URL compose.
#[derive(Clone, Default)]
pub struct MockHttp {
    responses: Arc<Mutex<HashMap<String, MockResponse>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockHttp {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(self, url: &str, f: impl FnOnce(&mut u16, &mut CacheHeaders, &mut Vec<u8>)) -> Self {
        {
            let mut responses = lock(&self.responses);
            let entry = responses.entry(url.to_string()).or_default();
            if matches!(entry, MockResponse::Error(_)) {
                *entry = MockResponse::default();
            }
            if let MockResponse::Reply { status, headers, body } = entry {
                f(status, headers, body);
            }
        }
        self
    }

    pub fn with_status(self, url: &str, code: u16) -> Self {
        self.update(url, |status, _, _| *status = code)
    }

    pub fn with_etag(self, url: &str, code: u16, etag: &str) -> Self {
        self.update(url, |status, headers, _| {
            *status = code;
            headers.etag = Some(etag.to_string());
        })
    }

    pub fn with_body(self, url: &str, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        self.update(url, |status, _, body| {
            *status = 200;
            *body = content;
        })
    }

    pub fn with_error(self, url: &str, message: &str) -> Self {
        lock(&self.responses).insert(url.to_string(), MockResponse::Error(message.to_string()));
        self
    }

    /// Every URL requested, in order, across probe/head/fetch.
    pub fn requests(&self) -> Vec<String> {
        lock(&self.requests).clone()
    }

    fn respond(&self, url: &str) -> Result<(u16, CacheHeaders, Vec<u8>)> {
        lock(&self.requests).push(url.to_string());
        match lock(&self.responses).get(url).cloned() {
            Some(MockResponse::Reply { status, headers, body }) => Ok((status, headers, body)),
            Some(MockResponse::Error(message)) => Err(ReconError::Transient(message)),
            None => Ok((404, CacheHeaders::default(), Vec::new())),
        }
    }
}

#[async_trait]
impl HttpProbe for MockHttp {
    async fn probe(&self, url: &str) -> Result<ProbeResponse> {
        let (status, headers, _) = self.respond(url)?;
        Ok(ProbeResponse { status, headers })
    }

    async fn head(&self, url: &str) -> Result<ProbeResponse> {
        self.probe(url).await
    }

    async fn fetch(&self, url: &str) -> Result<FetchedBody> {
        let (status, _, bytes) = self.respond(url)?;
        Ok(FetchedBody { status, bytes })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// GITHUB TRANSPORT
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct TransportState {
    script: VecDeque<ApiResponse>,
    repeat_last: bool,
    requests: Vec<(String, Instant)>,
}

/// Routed responses (first URL substring match) are served repeatedly;
/// otherwise scripted responses are served in order; otherwise 404.
/// Request instants use tokio's clock so paused-time tests can measure waits.
#[derive(Default)]
pub struct MockGitHubTransport {
    routes: Vec<(String, ApiResponse)>,
    state: Mutex<TransportState>,
}

fn json_response(status: u16, body: &str) -> ApiResponse {
    ApiResponse {
        status,
        body: body.as_bytes().to_vec(),
        ..ApiResponse::default()
    }
}

impl MockGitHubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_json(self, url_contains: &str, status: u16, body: &str) -> Self {
        self.with_response(url_contains, json_response(status, body))
    }

    pub fn with_response(mut self, url_contains: &str, response: ApiResponse) -> Self {
        self.routes.push((url_contains.to_string(), response));
        self
    }

    pub fn then(self, response: ApiResponse) -> Self {
        lock(&self.state).script.push_back(response);
        self
    }

    pub fn then_json(self, status: u16, body: &str) -> Self {
        self.then(json_response(status, body))
    }

    /// 403 with an exhausted budget and `Retry-After: secs`.
    pub fn then_retry_after(self, secs: u64) -> Self {
        self.then(ApiResponse {
            status: 403,
            remaining: Some(0),
            retry_after: Some(secs),
            body: br#"{"message":"API rate limit exceeded"}"#.to_vec(),
            ..ApiResponse::default()
        })
    }

    /// Keep serving the final scripted response.
    pub fn repeat_last(self) -> Self {
        lock(&self.state).repeat_last = true;
        self
    }

    pub fn request_times(&self) -> Vec<Instant> {
        lock(&self.state).requests.iter().map(|(_, t)| *t).collect()
    }

    /// When the first request whose URL contains `url_contains` was made.
    pub fn first_request_to(&self, url_contains: &str) -> Option<Instant> {
        lock(&self.state)
            .requests
            .iter()
            .find(|(url, _)| url.contains(url_contains))
            .map(|(_, t)| *t)
    }
}

#[async_trait]
impl GitHubTransport for MockGitHubTransport {
    async fn get(&self, url: &str, _accept: &str, _token: Option<&str>) -> Result<ApiResponse> {
        let mut state = lock(&self.state);
        state.requests.push((url.to_string(), Instant::now()));

        if let Some((_, resp)) = self.routes.iter().find(|(pattern, _)| url.contains(pattern.as_str())) {
            return Ok(resp.clone());
        }
        let resp = if state.repeat_last && state.script.len() == 1 {
            state.script.front().cloned()
        } else {
            state.script.pop_front()
        };
        Ok(resp.unwrap_or_else(|| json_response(404, r#"{"message":"Not Found"}"#)))
    }
}
