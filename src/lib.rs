//! toolhost — launches, supervises, and talks to external tool-provider
//! processes over line-delimited JSON-RPC on stdio.
//!
//! This crate handles:
//! - Spawning and supervising tool server child processes
//! - JSON-RPC 2.0 framing and request/response correlation over stdio
//! - The initialize/initialized/discovery handshake
//! - Tool discovery, per-server registries, and tool call execution with
//!   timeouts
//! - Failure isolation: one server's crash never affects another's state
//!
//! The embedding application owns a [`ToolHost`], adds [`ServerConfig`]s,
//! and routes tool calls through it. Everything above that — deciding which
//! tool to call, rendering results, persisting configuration — belongs to
//! the application, not this crate.
//!
//! ```no_run
//! use toolhost::{ServerConfig, ToolCall, ToolHost};
//!
//! # async fn example() -> Result<(), toolhost::HostError> {
//! let mut host = ToolHost::new();
//! host.add_server(ServerConfig::new("echo", "echo-tool-server"))?;
//! host.start_server("echo").await?;
//!
//! let result = host
//!     .execute_tool(ToolCall {
//!         server: "echo".into(),
//!         tool: "ping".into(),
//!         arguments: serde_json::json!({}),
//!     })
//!     .await?;
//! println!("{result}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod errors;
pub mod framing;
pub mod handshake;
pub mod host;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod supervisor;

// Re-exports for convenience
pub use config::{load_servers_file, merge_configs, HostTimeouts, ServerConfig};
pub use connection::Connection;
pub use errors::HostError;
pub use framing::MessageFramer;
pub use handshake::{Handshake, HandshakePhase};
pub use host::{ToolCall, ToolHost};
pub use registry::{ToolDescriptor, ToolRegistry};
pub use supervisor::{ServerSnapshot, ServerStatus, ServerSupervisor};
