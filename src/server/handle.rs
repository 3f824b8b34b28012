//! Supervised stdio tool server process
//!
//! One reader task owns the child's stdout and routes each response to the
//! caller waiting on its JSON-RPC id, so several `tools/call` requests can be
//! in flight on one process at once. Writes to stdin are serialized.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

use super::protocol::{self, Incoming, Reply, ToolInfo, ToolOutput};
use super::{ServerSpec, ServerState, ToolServer};
use crate::error::{Result, RunError};
use crate::id::RequestSeq;

/// How long a ready server gets to exit after stdin closes before it is killed
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Longest stdout line accepted from a server; longer output is a protocol fault
pub const MAX_LINE_LENGTH: usize = 64 * 1024 * 1024;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Connection {
    child: Mutex<Child>,
    writer: Mutex<Option<FramedWrite<ChildStdin, LinesCodec>>>,
    pending: Pending,
    /// Set by the reader once stdout is gone
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    stderr: Option<JoinHandle<()>>,
}

impl Connection {
    async fn send(&self, message: Value) -> std::result::Result<(), String> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(w) => w.send(message.to_string()).await.map_err(|e| e.to_string()),
            None => Err("stdin is closed".to_string()),
        }
    }
}

/// A tool server launched as a child process speaking MCP over stdio
pub struct ToolServerHandle {
    spec: ServerSpec,
    state: Arc<StdMutex<ServerState>>,
    conn: StdMutex<Option<Arc<Connection>>>,
    seq: RequestSeq,
    tools: StdMutex<Option<Vec<ToolInfo>>>,
    max_line_length: usize,
}

impl ToolServerHandle {
    pub fn new(spec: ServerSpec) -> Self {
        Self {
            spec,
            state: Arc::new(StdMutex::new(ServerState::NotStarted)),
            conn: StdMutex::new(None),
            seq: RequestSeq::new(),
            tools: StdMutex::new(None),
            max_line_length: MAX_LINE_LENGTH,
        }
    }

    /// Override the stdout line limit
    pub fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }

    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    fn set_state(&self, state: ServerState) {
        *lock(&self.state) = state;
    }

    fn connection(&self) -> Option<Arc<Connection>> {
        lock(&self.conn).clone()
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            ServerState::Ready => Ok(()),
            other => Err(RunError::invocation(&self.spec.name, format!("server is {}", other))),
        }
    }

    async fn launch(&self) -> Result<()> {
        let name = &self.spec.name;
        let mut command = Command::new(&self.spec.command);
        command
            .args(&self.spec.args)
            .envs(&self.spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command
            .spawn()
            .map_err(|e| RunError::launch(name, format!("failed to spawn '{}': {}", self.spec.command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RunError::launch(name, "stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunError::launch(name, "stdout was not captured"))?;
        let stderr = child.stderr.take();

        let pending = Pending::default();
        let closed = Arc::new(AtomicBool::new(false));
        let reader = spawn_reader(
            name.clone(),
            FramedRead::new(stdout, LinesCodec::new_with_max_length(self.max_line_length)),
            pending.clone(),
            closed.clone(),
            self.state.clone(),
        );
        let stderr = stderr.map(|s| spawn_stderr_forwarder(name.clone(), s));

        *lock(&self.conn) = Some(Arc::new(Connection {
            child: Mutex::new(child),
            writer: Mutex::new(Some(FramedWrite::new(stdin, LinesCodec::new()))),
            pending,
            closed,
            reader,
            stderr,
        }));

        let reply = self
            .request("initialize", protocol::initialize_params(), self.spec.start_timeout)
            .await
            .map_err(|e| match e {
                RunError::Invocation { message, .. } => {
                    RunError::launch(name, format!("no readiness signal: {}", message))
                }
                other => other,
            })?;

        match reply {
            Reply::Result(result) => {
                log::debug!(
                    "[{}] initialized: {}",
                    name,
                    result["serverInfo"]["name"].as_str().unwrap_or("unnamed server")
                );
            }
            Reply::Error(err) => return Err(RunError::launch(name, format!("initialize failed: {}", err))),
            Reply::Malformed(msg) => return Err(RunError::launch(name, msg)),
        }

        let conn = self
            .connection()
            .ok_or_else(|| RunError::launch(name, "connection closed during start"))?;
        conn.send(protocol::notification("notifications/initialized"))
            .await
            .map_err(|e| RunError::launch(name, format!("failed to confirm initialization: {}", e)))
    }

    async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<Reply> {
        let name = &self.spec.name;
        let conn = self
            .connection()
            .ok_or_else(|| RunError::invocation(name, "server is not running"))?;

        let id = self.seq.next();
        let (tx, rx) = oneshot::channel();
        conn.pending.lock().await.insert(id, tx);
        if conn.closed.load(Ordering::SeqCst) {
            conn.pending.lock().await.remove(&id);
            return Err(RunError::invocation(name, "server closed its output"));
        }

        let exchange = async {
            conn.send(protocol::request(id, method, params))
                .await
                .map_err(|e| format!("failed to send '{}': {}", method, e))?;
            rx.await
                .map_err(|_| format!("server closed its output before answering '{}'", method))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(message)) => {
                conn.pending.lock().await.remove(&id);
                Err(RunError::invocation(name, message))
            }
            Err(_) => {
                conn.pending.lock().await.remove(&id);
                Err(RunError::invocation(
                    name,
                    format!("'{}' timed out after {}ms", method, timeout.as_millis()),
                ))
            }
        }
    }

    fn expect_result(&self, method: &str, reply: Reply) -> Result<Value> {
        match reply {
            Reply::Result(result) => Ok(result),
            Reply::Error(err) => Err(RunError::invocation(&self.spec.name, format!("{} failed: {}", method, err))),
            Reply::Malformed(msg) => Err(RunError::invocation(&self.spec.name, msg)),
        }
    }

    /// Close stdin, wait up to `grace`, then kill. Fails every pending call.
    async fn teardown(&self, grace: Duration) {
        let Some(conn) = lock(&self.conn).take() else {
            return;
        };
        let name = &self.spec.name;

        // a write stuck on a full pipe holds the writer until the child dies
        match tokio::time::timeout(grace, conn.writer.lock()).await {
            Ok(mut writer) => {
                writer.take();
            }
            Err(_) => log::debug!("[{}] stdin is busy, not closing it first", name),
        }

        {
            let mut child = conn.child.lock().await;
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => log::debug!("[{}] exited with {}", name, status),
                Ok(Err(e)) => log::warn!("[{}] failed to wait for exit: {}", name, e),
                Err(_) => {
                    log::debug!("[{}] still running after {:?}, killing", name, grace);
                    if let Err(e) = child.kill().await {
                        log::warn!("[{}] failed to kill: {}", name, e);
                    }
                }
            }
        }

        conn.reader.abort();
        if let Some(task) = &conn.stderr {
            task.abort();
        }
        conn.pending.lock().await.clear();
    }
}

#[async_trait]
impl ToolServer for ToolServerHandle {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn state(&self) -> ServerState {
        *lock(&self.state)
    }

    async fn start(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            match *state {
                ServerState::NotStarted => *state = ServerState::Starting,
                ServerState::Ready => return Ok(()),
                other => {
                    return Err(RunError::launch(
                        &self.spec.name,
                        format!("cannot start a server that is {}", other),
                    ));
                }
            }
        }

        log::info!("Starting tool server '{}': {}", self.spec.name, self.spec.command_line());
        match self.launch().await {
            Ok(()) => {
                self.set_state(ServerState::Ready);
                log::info!("Tool server '{}' is ready", self.spec.name);
                Ok(())
            }
            Err(e) => {
                self.teardown(Duration::ZERO).await;
                self.set_state(ServerState::Failed);
                log::error!("Tool server '{}' failed to start: {}", self.spec.name, e);
                Err(e)
            }
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        self.ensure_ready()?;

        if self.spec.cache_tools_list {
            let cached = lock(&self.tools).clone();
            if let Some(tools) = cached {
                return Ok(tools);
            }
        }

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let reply = self
                .request(
                    "tools/list",
                    protocol::tools_list_params(cursor.as_deref()),
                    self.spec.call_timeout,
                )
                .await?;
            let result = self.expect_result("tools/list", reply)?;
            let (page, next) =
                protocol::parse_tools_page(&result).map_err(|e| RunError::invocation(&self.spec.name, e))?;
            tools.extend(page);
            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        log::debug!("[{}] lists {} tools", self.spec.name, tools.len());
        if self.spec.cache_tools_list {
            *lock(&self.tools) = Some(tools.clone());
        }
        Ok(tools)
    }

    async fn invoke(&self, tool: &str, arguments: Value) -> Result<ToolOutput> {
        self.ensure_ready()?;
        log::debug!("[{}] tools/call {}", self.spec.name, tool);

        let reply = self
            .request(
                "tools/call",
                protocol::tools_call_params(tool, arguments),
                self.spec.call_timeout,
            )
            .await?;

        match reply {
            Reply::Result(result) => {
                protocol::parse_call_result(&result).map_err(|e| RunError::invocation(&self.spec.name, e))
            }
            // A live server rejecting the call is the tool's failure, not the channel's
            Reply::Error(err) => Ok(ToolOutput::error(err.to_string())),
            Reply::Malformed(msg) => Err(RunError::invocation(&self.spec.name, msg)),
        }
    }

    async fn stop(&self) {
        let previous = std::mem::replace(&mut *lock(&self.state), ServerState::Stopped);
        // only a server that reached Ready is owed a clean shutdown
        let grace = if previous == ServerState::Ready { STOP_GRACE } else { Duration::ZERO };
        self.teardown(grace).await;
        lock(&self.tools).take();
        if previous != ServerState::Stopped {
            log::info!("Stopped tool server '{}'", self.spec.name);
        }
    }
}

impl std::fmt::Debug for ToolServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolServerHandle")
            .field("name", &self.spec.name)
            .field("state", &self.state())
            .finish()
    }
}

fn spawn_reader(
    name: String,
    mut lines: FramedRead<ChildStdout, LinesCodec>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    state: Arc<StdMutex<ServerState>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    log::warn!("[{}] sent a line longer than {} bytes", name, lines.decoder().max_length());
                    break;
                }
                Err(e) => {
                    log::warn!("[{}] failed to read stdout: {}", name, e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match protocol::parse_line(&line) {
                Ok(Incoming::Response { id, reply }) => match pending.lock().await.remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(reply);
                    }
                    None => log::debug!("[{}] response for unknown request {}", name, id),
                },
                Ok(Incoming::Notification { method }) => log::debug!("[{}] notification: {}", name, method),
                Ok(Incoming::Request { method }) => log::debug!("[{}] ignoring server request: {}", name, method),
                Err(e) => log::debug!("[{}] ignoring non-protocol output ({}): {}", name, e, line),
            }
        }

        {
            let mut state = lock(&state);
            if *state == ServerState::Ready {
                log::warn!("[{}] closed its output while ready", name);
                *state = ServerState::Failed;
            }
        }
        closed.store(true, Ordering::SeqCst);
        pending.lock().await.clear();
    })
}

fn spawn_stderr_forwarder(name: String, stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            log::debug!("[{}] stderr: {}", name, line);
        }
    })
}
