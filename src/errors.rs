//! Host error types.

use thiserror::Error;

/// Errors that can occur while supervising tool servers or executing tools.
///
/// Expected failure modes are values, not panics: every public API call
/// returns `Result<_, HostError>` and the caller decides whether to retry,
/// surface, or fall back.
#[derive(Debug, Error)]
pub enum HostError {
    /// A server process failed to start (executable missing or unrunnable).
    #[error("failed to spawn server '{server}': {reason}")]
    SpawnFailure {
        server: String,
        reason: String,
    },

    /// The initialize/initialized/discovery exchange failed.
    #[error("server '{server}' handshake failed: {reason}")]
    HandshakeFailure {
        server: String,
        reason: String,
    },

    /// No response arrived within the deadline (handshake or tool call).
    #[error("request '{method}' to server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    /// The process's pipes closed or errored while requests were in flight,
    /// or an operation was attempted on a connection already lost.
    #[error("connection to server '{server}' lost")]
    ConnectionLost {
        server: String,
    },

    /// An operation that requires a `Running` server was attempted on one
    /// that is stopped, starting, or errored.
    #[error("server '{server}' is not running")]
    NotRunning {
        server: String,
    },

    /// The named tool is absent from the server's discovered registry.
    #[error("tool '{tool}' not found on server '{server}'")]
    ToolNotFound {
        server: String,
        tool: String,
    },

    /// Tool call arguments failed the structural schema check.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments {
        tool: String,
        reason: String,
    },

    /// A server with this id has already been added.
    #[error("server '{server}' already exists")]
    AlreadyExists {
        server: String,
    },

    /// No server with this id has been added.
    #[error("no server '{server}'")]
    NotFound {
        server: String,
    },

    /// The server answered a request with a JSON-RPC error payload.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_server() {
        let err = HostError::SpawnFailure {
            server: "echo".into(),
            reason: "no such file".into(),
        };
        assert!(err.to_string().contains("echo"));
        assert!(err.to_string().contains("no such file"));
    }

    #[test]
    fn test_timeout_message_includes_deadline() {
        let err = HostError::Timeout {
            server: "echo".into(),
            method: "tools/call".into(),
            timeout_ms: 30_000,
        };
        assert!(err.to_string().contains("30000ms"));
        assert!(err.to_string().contains("tools/call"));
    }

    #[test]
    fn test_server_error_carries_code() {
        let err = HostError::ServerError {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        };
        assert!(err.to_string().contains("-32601"));
    }
}
