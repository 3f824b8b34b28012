//! In-memory tool server for tests

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use super::protocol::{ToolInfo, ToolOutput};
use super::{ServerState, ToolServer};
use crate::error::{Result, RunError};

/// Scripted tool server that answers every call with `"<tool> ok"`
pub struct MockToolServer {
    name: String,
    tools: Vec<ToolInfo>,
    state: Mutex<ServerState>,
    fail_start: bool,
    crash_after: Option<usize>,
    failing_tools: Vec<String>,
    calls: AtomicUsize,
    invoked: Mutex<Vec<(String, Value)>>,
    stops: AtomicUsize,
}

impl MockToolServer {
    pub fn new(name: impl Into<String>, tools: &[&str]) -> Self {
        Self {
            name: name.into(),
            tools: tools
                .iter()
                .map(|t| ToolInfo {
                    name: t.to_string(),
                    description: format!("{} tool", t),
                    input_schema: json!({ "type": "object", "properties": {} }),
                })
                .collect(),
            state: Mutex::new(ServerState::NotStarted),
            fail_start: false,
            crash_after: None,
            failing_tools: Vec::new(),
            calls: AtomicUsize::new(0),
            invoked: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
        }
    }

    /// `start()` fails with a launch error
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// After `n` successful calls the server behaves as if its process died
    pub fn crash_after(mut self, n: usize) -> Self {
        self.crash_after = Some(n);
        self
    }

    /// Calls to `tool` return a tool-level error result
    pub fn failing_tool(mut self, tool: impl Into<String>) -> Self {
        self.failing_tools.push(tool.into());
        self
    }

    /// Number of `invoke` calls received, including failed ones
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn invoked(&self) -> Vec<(String, Value)> {
        self.invoked.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ServerState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }
}

#[async_trait]
impl ToolServer for MockToolServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ServerState {
        self.state.lock().map(|s| *s).unwrap_or(ServerState::Failed)
    }

    async fn start(&self) -> Result<()> {
        if self.fail_start {
            self.set_state(ServerState::Failed);
            return Err(RunError::launch(&self.name, "scripted start failure"));
        }
        self.set_state(ServerState::Ready);
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        match self.state() {
            ServerState::Ready => Ok(self.tools.clone()),
            other => Err(RunError::invocation(&self.name, format!("server is {}", other))),
        }
    }

    async fn invoke(&self, tool: &str, arguments: Value) -> Result<ToolOutput> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut invoked) = self.invoked.lock() {
            invoked.push((tool.to_string(), arguments));
        }

        if self.crash_after.is_some_and(|limit| n >= limit) {
            self.set_state(ServerState::Failed);
        }
        if self.state() != ServerState::Ready {
            return Err(RunError::invocation(&self.name, "server closed its output"));
        }

        if self.failing_tools.iter().any(|t| t == tool) {
            return Ok(ToolOutput::error(format!("{} failed", tool)));
        }
        Ok(ToolOutput::text(format!("{} ok", tool)))
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.set_state(ServerState::Stopped);
    }
}
