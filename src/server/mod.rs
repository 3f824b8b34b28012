//! Tool servers - external MCP processes reached over stdio
//!
//! - `protocol`: JSON-RPC line framing and MCP payload parsing
//! - `handle`: one supervised subprocess per configured server
//! - `scope`: start a set of servers, run a body, always stop them
//! - `mock`: in-memory server for tests

pub mod handle;
pub mod mock;
pub mod protocol;
pub mod scope;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub use handle::ToolServerHandle;
pub use mock::MockToolServer;
pub use protocol::{ToolInfo, ToolOutput};
pub use scope::with_servers;

/// How to launch a tool server
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    /// Reuse the first tool listing for the life of the process.
    /// Only valid for servers whose tool set never changes mid-run.
    pub cache_tools_list: bool,
    pub start_timeout: Duration,
    pub call_timeout: Duration,
}

impl ServerSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            cache_tools_list: true,
            start_timeout: Duration::from_secs(120),
            call_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeouts(mut self, start: Duration, call: Duration) -> Self {
        self.start_timeout = start;
        self.call_timeout = call;
        self
    }

    /// Command line as a single display string
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Process state of a tool server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    NotStarted,
    Starting,
    Ready,
    Failed,
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerState::NotStarted => "not started",
            ServerState::Starting => "starting",
            ServerState::Ready => "ready",
            ServerState::Failed => "failed",
            ServerState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// A running source of tools
///
/// Implementations use interior mutability so a server can be shared behind
/// an `Arc` while calls are dispatched concurrently.
#[async_trait]
pub trait ToolServer: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> ServerState;

    /// Launch and wait for readiness
    async fn start(&self) -> Result<()>;

    /// Tools currently exposed; requires `Ready`
    async fn list_tools(&self) -> Result<Vec<ToolInfo>>;

    /// Call one tool. Tool-level failures are `Ok` with `is_error` set.
    async fn invoke(&self, tool: &str, arguments: Value) -> Result<ToolOutput>;

    /// Release the server. Idempotent.
    async fn stop(&self);
}
