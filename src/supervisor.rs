//! Per-server process lifecycle.
//!
//! One `ServerSupervisor` owns one tool server: its configuration, child
//! process, connection, discovered tools, and status. A supervisor is the
//! unit of failure isolation — nothing that happens to one server may affect
//! another's state.

use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{HostTimeouts, ServerConfig};
use crate::connection::Connection;
use crate::errors::HostError;
use crate::handshake::{discover_tools, Handshake};
use crate::protocol::ServerNotification;
use crate::registry::{ToolDescriptor, ToolRegistry};

/// Notification method a server sends when its tool list changes.
const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";

// ─── Status ──────────────────────────────────────────────────────────────────

/// Where a server currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

/// Point-in-time copy of a server's externally visible state. Returned by
/// `list_servers`; never a reference to live state.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSnapshot {
    pub id: String,
    pub name: String,
    pub status: ServerStatus,
    pub tool_count: usize,
    pub last_error: Option<String>,
}

/// State shared with the exit-watch task: the watcher flips `Running` to
/// `Error` on unexpected connection loss and refreshes tools on
/// `tools/list_changed`.
struct SharedState {
    status: ServerStatus,
    tools: ToolRegistry,
    last_error: Option<String>,
}

// ─── Supervisor ──────────────────────────────────────────────────────────────

pub struct ServerSupervisor {
    config: ServerConfig,
    timeouts: HostTimeouts,
    shared: Arc<Mutex<SharedState>>,
    connection: Option<Arc<Connection>>,
    child: Option<Child>,
    watcher: Option<JoinHandle<()>>,
}

impl ServerSupervisor {
    pub fn new(config: ServerConfig, timeouts: HostTimeouts) -> Self {
        Self {
            config,
            timeouts,
            shared: Arc::new(Mutex::new(SharedState {
                status: ServerStatus::Stopped,
                tools: ToolRegistry::new(),
                last_error: None,
            })),
            connection: None,
            child: None,
            watcher: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn status(&self) -> ServerStatus {
        self.lock_shared().status
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock_shared().last_error.clone()
    }

    /// Cloned view of the server's current tools.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.lock_shared().tools.snapshot()
    }

    pub fn find_tool(&self, name: &str) -> Option<ToolDescriptor> {
        self.lock_shared().tools.get(name).cloned()
    }

    pub fn snapshot(&self) -> ServerSnapshot {
        let state = self.lock_shared();
        ServerSnapshot {
            id: self.config.id.clone(),
            name: self.config.display_name().to_string(),
            status: state.status,
            tool_count: state.tools.len(),
            last_error: state.last_error.clone(),
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Spawn the process, run the handshake, and discover tools. A no-op on
    /// a server that is already `Running`. Spawn failure, handshake failure,
    /// or exceeding the overall startup timeout all land in `Error` with
    /// `last_error` recorded and the child terminated.
    pub async fn start(&mut self) -> Result<(), HostError> {
        if self.status() == ServerStatus::Running {
            return Ok(());
        }
        self.teardown_runtime().await;

        {
            let mut state = self.lock_shared();
            state.status = ServerStatus::Starting;
            state.last_error = None;
        }
        tracing::info!(server = %self.config.id, command = %self.config.command, "starting server");

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                let reason = err.to_string();
                self.fail(&reason);
                return Err(HostError::SpawnFailure {
                    server: self.config.id.clone(),
                    reason,
                });
            }
        };

        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill().await;
            return Err(self.fail_spawn("failed to capture stdin"));
        };
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill().await;
            return Err(self.fail_spawn("failed to capture stdout"));
        };
        let stderr = child.stderr.take();

        let (note_tx, note_rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection::open(
            self.config.id.clone(),
            stdin,
            stdout,
            Some(note_tx),
        ));

        let mut handshake = Handshake::new();
        let outcome = match tokio::time::timeout(
            self.timeouts.startup,
            handshake.run(&conn, self.timeouts.handshake),
        )
        .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                let _ = child.kill().await;
                let reason = match err {
                    HostError::HandshakeFailure { reason, .. } => reason,
                    other => other.to_string(),
                };
                let reason = format!("{reason}{}", stderr_suffix(&read_stderr(stderr).await));
                self.fail(&reason);
                return Err(HostError::HandshakeFailure {
                    server: self.config.id.clone(),
                    reason,
                });
            }
            Err(_) => {
                let _ = child.kill().await;
                let reason = format!(
                    "startup timed out after {}s{}",
                    self.timeouts.startup.as_secs(),
                    stderr_suffix(&read_stderr(stderr).await)
                );
                self.fail(&reason);
                return Err(HostError::HandshakeFailure {
                    server: self.config.id.clone(),
                    reason,
                });
            }
        };

        {
            let mut state = self.lock_shared();
            state.status = ServerStatus::Running;
            state.tools.replace(&self.config.id, outcome.tools);
            state.last_error = None;
        }
        tracing::info!(
            server = %self.config.id,
            tools = self.lock_shared().tools.len(),
            server_name = outcome.server_info.as_ref().map(|i| i.name.as_str()),
            "server running"
        );

        // Keep stderr drained so a chatty provider cannot fill the pipe and
        // stall; its output goes to the log at debug.
        if let Some(stderr) = stderr {
            tokio::spawn(drain_stderr(self.config.id.clone(), stderr));
        }

        self.watcher = Some(tokio::spawn(watch_server(
            self.config.id.clone(),
            Arc::clone(&conn),
            note_rx,
            Arc::clone(&self.shared),
            self.timeouts.handshake,
        )));
        self.connection = Some(conn);
        self.child = Some(child);
        Ok(())
    }

    /// Stop the server: graceful shutdown notification and stdin close, a
    /// grace period to exit, then force kill. Transitions to `Stopped`
    /// whichever path was taken. A no-op on a server that is already
    /// `Stopped`.
    pub async fn stop(&mut self) -> Result<(), HostError> {
        if self.status() == ServerStatus::Stopped {
            return Ok(());
        }
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }

        if let Some(conn) = self.connection.take() {
            let _ = conn.send("shutdown", None).await;
        }

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(self.timeouts.shutdown_grace, child.wait()).await {
                Ok(_) => {
                    tracing::info!(server = %self.config.id, "server exited gracefully");
                }
                Err(_) => {
                    let _ = child.kill().await;
                    tracing::warn!(
                        server = %self.config.id,
                        grace_ms = self.timeouts.shutdown_grace.as_millis() as u64,
                        "server did not exit within grace period, killed"
                    );
                }
            }
        }

        let mut state = self.lock_shared();
        state.status = ServerStatus::Stopped;
        state.tools.clear();
        Ok(())
    }

    /// Stop if necessary; the host discards the supervisor afterwards.
    pub async fn shutdown(&mut self) {
        let _ = self.stop().await;
    }

    // ─── Execution ───────────────────────────────────────────────────────

    /// Execute one tool call. Fails fast — without sending anything to the
    /// child — when the server is not `Running`, the tool is unknown, or
    /// the arguments miss a required field.
    pub async fn execute(&self, tool: &str, arguments: Value) -> Result<Value, HostError> {
        {
            let state = self.lock_shared();
            if state.status != ServerStatus::Running {
                return Err(HostError::NotRunning {
                    server: self.config.id.clone(),
                });
            }
            if !state.tools.contains(tool) {
                return Err(HostError::ToolNotFound {
                    server: self.config.id.clone(),
                    tool: tool.to_string(),
                });
            }
            state.tools.validate_arguments(tool, &arguments)?;
        }

        let conn = match &self.connection {
            Some(conn) => Arc::clone(conn),
            None => {
                return Err(HostError::NotRunning {
                    server: self.config.id.clone(),
                })
            }
        };

        let params = serde_json::json!({"name": tool, "arguments": arguments});
        tracing::debug!(server = %self.config.id, tool, "executing tool");
        conn.request("tools/call", Some(params), self.timeouts.tool_call)
            .await
    }

    /// Re-run discovery on a `Running` server, replacing the registry
    /// wholesale. The initialize steps are not repeated.
    pub async fn refresh_tools(&self) -> Result<usize, HostError> {
        if self.status() != ServerStatus::Running {
            return Err(HostError::NotRunning {
                server: self.config.id.clone(),
            });
        }
        let conn = match &self.connection {
            Some(conn) => Arc::clone(conn),
            None => {
                return Err(HostError::NotRunning {
                    server: self.config.id.clone(),
                })
            }
        };

        let defs = discover_tools(&conn, self.timeouts.handshake).await?;
        let count = defs.len();
        self.lock_shared().tools.replace(&self.config.id, defs);
        tracing::info!(server = %self.config.id, count, "tool registry refreshed");
        Ok(count)
    }

    // ─── Internals ───────────────────────────────────────────────────────

    fn lock_shared(&self) -> MutexGuard<'_, SharedState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fail(&self, reason: &str) {
        let mut state = self.lock_shared();
        state.status = ServerStatus::Error;
        state.last_error = Some(reason.to_string());
        state.tools.clear();
        tracing::error!(server = %self.config.id, reason, "server failed");
    }

    fn fail_spawn(&self, reason: &str) -> HostError {
        self.fail(reason);
        HostError::SpawnFailure {
            server: self.config.id.clone(),
            reason: reason.to_string(),
        }
    }

    /// Clear remains of a previous run before a fresh start.
    async fn teardown_runtime(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        self.connection = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
    }
}

impl Drop for ServerSupervisor {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

// ─── Exit Watch ──────────────────────────────────────────────────────────────

/// Watches one running server: flips `Running` to `Error` when the
/// connection is lost (unexpected process exit or pipe closure), and
/// refreshes the tool registry on `tools/list_changed` notifications.
async fn watch_server(
    server: String,
    conn: Arc<Connection>,
    mut notifications: mpsc::UnboundedReceiver<ServerNotification>,
    shared: Arc<Mutex<SharedState>>,
    discovery_timeout: Duration,
) {
    let mut closed = conn.closed_signal();
    loop {
        tokio::select! {
            // Checked first: when the reader task ends it fires the close
            // signal and then drops the notification sender, so both arms
            // become ready at once and the loss must win.
            biased;

            changed = closed.changed() => {
                let lost = changed.is_err() || *closed.borrow();
                if lost {
                    mark_lost(&server, &shared);
                    break;
                }
            }
            note = notifications.recv() => {
                match note {
                    Some(note) if note.method == TOOLS_LIST_CHANGED => {
                        match discover_tools(&conn, discovery_timeout).await {
                            Ok(defs) => {
                                let count = defs.len();
                                shared
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .tools
                                    .replace(&server, defs);
                                tracing::info!(server = %server, count, "tool registry refreshed after list_changed");
                            }
                            Err(err) => {
                                tracing::warn!(server = %server, error = %err, "re-discovery after list_changed failed");
                            }
                        }
                    }
                    Some(note) => {
                        tracing::debug!(server = %server, method = %note.method, "unhandled notification");
                    }
                    None => {
                        mark_lost(&server, &shared);
                        break;
                    }
                }
            }
        }
    }
}

/// Transition a server that was `Running` to `Error` after its connection
/// went away. Stopped/stopping servers are left alone — an expected exit
/// must not be reported as a failure.
fn mark_lost(server: &str, shared: &Arc<Mutex<SharedState>>) {
    let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
    if state.status == ServerStatus::Running {
        state.status = ServerStatus::Error;
        state.last_error = Some("process exited unexpectedly".to_string());
        state.tools.clear();
        drop(state);
        tracing::error!(server = %server, "server connection lost while running");
    }
}

// ─── Stderr Capture ──────────────────────────────────────────────────────────

/// Read whatever the failed child wrote to stderr, bounded so an unclosed
/// pipe cannot stall startup error reporting. Truncated to keep log and
/// error strings readable.
async fn read_stderr(stderr: Option<ChildStderr>) -> String {
    use tokio::io::AsyncReadExt;

    let Some(mut stderr) = stderr else {
        return String::new();
    };

    let mut buf = String::new();
    match tokio::time::timeout(Duration::from_millis(500), stderr.read_to_string(&mut buf)).await {
        Ok(Ok(_)) => {
            if buf.len() > 2000 {
                buf.truncate(2000);
                buf.push_str("...(truncated)");
            }
            buf
        }
        _ => String::new(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.trim().is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

/// Forward a running server's stderr lines to the log.
async fn drain_stderr(server: String, stderr: ChildStderr) {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(server = %server, line = %line, "server stderr");
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
