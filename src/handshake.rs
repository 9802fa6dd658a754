//! Initialize/initialized/discovery handshake.
//!
//! The fixed three-step exchange every tool server must complete before it
//! is eligible for tool execution:
//!
//! 1. `initialize` request (protocol version + client capabilities) → response
//! 2. `notifications/initialized` notification (no reply)
//! 3. `tools/list` request → tool descriptors
//!
//! A server may legitimately expose zero tools — that is success with an
//! empty registry, not failure.

use std::time::Duration;

use crate::connection::Connection;
use crate::errors::HostError;
use crate::protocol::{
    InitializeParams, InitializeResult, ServerCapabilities, ServerInfo, ToolDef, ToolsListResult,
};

/// Where a handshake currently stands. `Failed` is terminal and reachable
/// from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    NotStarted,
    Initializing,
    Initialized,
    Discovering,
    Ready,
    Failed,
}

/// Everything a successful handshake yields.
#[derive(Debug)]
pub struct HandshakeOutcome {
    pub server_info: Option<ServerInfo>,
    pub capabilities: ServerCapabilities,
    pub tools: Vec<ToolDef>,
}

/// Drives the handshake state machine over an open connection.
#[derive(Debug)]
pub struct Handshake {
    phase: HandshakePhase,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            phase: HandshakePhase::NotStarted,
        }
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Run all three steps. `timeout` bounds each individual request; it is
    /// deliberately short compared to tool calls because the handshake gates
    /// usability. Any failure lands in `Failed` and surfaces as
    /// `HandshakeFailure` with the step's context in the reason.
    pub async fn run(
        &mut self,
        conn: &Connection,
        timeout: Duration,
    ) -> Result<HandshakeOutcome, HostError> {
        let server = conn.server().to_string();

        self.phase = HandshakePhase::Initializing;
        let params = serde_json::to_value(InitializeParams::default())
            .map_err(|err| self.fail(&server, format!("initialize params: {err}")))?;
        let result = conn
            .request("initialize", Some(params), timeout)
            .await
            .map_err(|err| self.fail(&server, format!("initialize request failed: {err}")))?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|err| self.fail(&server, format!("malformed initialize response: {err}")))?;
        tracing::debug!(
            server = %server,
            protocol_version = %init.protocol_version,
            server_name = init.server_info.as_ref().map(|i| i.name.as_str()),
            "initialize accepted"
        );

        self.phase = HandshakePhase::Initialized;
        conn.send("notifications/initialized", None)
            .await
            .map_err(|err| self.fail(&server, format!("initialized notification failed: {err}")))?;

        self.phase = HandshakePhase::Discovering;
        let tools = discover_tools(conn, timeout)
            .await
            .map_err(|err| self.fail(&server, err.to_string()))?;
        tracing::debug!(server = %server, tool_count = tools.len(), "tool discovery complete");

        self.phase = HandshakePhase::Ready;
        Ok(HandshakeOutcome {
            server_info: init.server_info,
            capabilities: init.capabilities,
            tools,
        })
    }

    fn fail(&mut self, server: &str, reason: String) -> HostError {
        self.phase = HandshakePhase::Failed;
        HostError::HandshakeFailure {
            server: server.to_string(),
            reason,
        }
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Fetch the server's current tool list. Also used for re-discovery after a
/// `tools/list_changed` notification, which does not repeat the initialize
/// steps.
pub async fn discover_tools(
    conn: &Connection,
    timeout: Duration,
) -> Result<Vec<ToolDef>, HostError> {
    let result = conn.request("tools/list", None, timeout).await?;
    let list: ToolsListResult =
        serde_json::from_value(result).map_err(|err| HostError::HandshakeFailure {
            server: conn.server().to_string(),
            reason: format!("malformed tools/list response: {err}"),
        })?;
    Ok(list.tools)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
