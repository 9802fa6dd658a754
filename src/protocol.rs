//! JSON-RPC 2.0 wire types for the stdio tool-server protocol.
//!
//! Every line on a server's stdio is one JSON object: a request (`id`,
//! `method`, `params`), a response (`id` and exactly one of `result` or
//! `error`), or a notification (`method`, `params`, no `id`). Incoming
//! values are classified into [`ServerMessage`] once, at parse time, so the
//! rest of the crate matches on a tagged enum instead of re-probing fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version sent in the initialize request.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ─── Outgoing Messages ───────────────────────────────────────────────────────

/// JSON-RPC 2.0 request (client → server, expects a response).
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (client → server, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

// ─── Incoming Messages ───────────────────────────────────────────────────────

/// A decoded message from a server's stdout, classified by field shape.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    /// Carries an `id` and no `method`: the answer to one of our requests.
    Response(Response),
    /// Carries a `method` and no `id`: unsolicited server event
    /// (e.g. `notifications/tools/list_changed`).
    Notification(ServerNotification),
    /// Carries both `id` and `method`: a server-initiated request. The host
    /// does not service these; they are logged and discarded.
    Request(ServerRequest),
}

impl ServerMessage {
    /// Classify a parsed JSON value. Returns `None` for objects that are
    /// none of the three shapes (schema-violating noise, recovered by
    /// discarding upstream).
    pub fn classify(value: Value) -> Option<ServerMessage> {
        let obj = value.as_object()?;
        let has_id = obj.get("id").and_then(Value::as_u64).is_some();
        let has_method = obj.contains_key("method");

        match (has_id, has_method) {
            (true, true) => serde_json::from_value(value).ok().map(ServerMessage::Request),
            (true, false) => serde_json::from_value(value).ok().map(ServerMessage::Response),
            (false, true) => serde_json::from_value(value)
                .ok()
                .map(ServerMessage::Notification),
            (false, false) => None,
        }
    }
}

/// Response to one of our requests: `result` on success, `error` on failure.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object carried in an error response.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Unsolicited notification from a server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerNotification {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Server-initiated request (unsupported; decoded only for logging).
#[derive(Debug, Clone, Deserialize)]
pub struct ServerRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

// ─── Initialize ──────────────────────────────────────────────────────────────

/// Params for the `initialize` request.
#[derive(Debug, Clone, Serialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

/// Capabilities we declare to the server. Currently empty — the host
/// consumes tools only.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ClientCapabilities {}

#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Payload of a successful `initialize` response.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo", default)]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged", default)]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

// ─── Tool Discovery & Invocation ─────────────────────────────────────────────

/// Tool definition as it appears on the wire in a `tools/list` response.
/// The owning server id is stamped on at registration (see
/// [`crate::registry::ToolDescriptor`]).
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// Payload of a `tools/list` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<ToolDef>,
}

/// Params for a `tools/call` request.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: Value,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
