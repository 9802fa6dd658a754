//! Top-level host registry.
//!
//! Owns every [`ServerSupervisor`] and routes list/find/execute requests to
//! the right one. The host is a single-owner value: the embedding
//! application typically wraps it in one async mutex and drives all
//! operations through that, so no internal locking is needed at this level.

use std::collections::HashMap;

use serde_json::Value;

use crate::config::{HostTimeouts, ServerConfig};
use crate::errors::HostError;
use crate::registry::ToolDescriptor;
use crate::supervisor::{ServerSnapshot, ServerStatus, ServerSupervisor};

/// One tool invocation, addressed to a specific server.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub server: String,
    pub tool: String,
    pub arguments: Value,
}

/// The host: every added server, keyed by id.
pub struct ToolHost {
    servers: HashMap<String, ServerSupervisor>,
    timeouts: HostTimeouts,
}

impl Default for ToolHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolHost {
    pub fn new() -> Self {
        Self::with_timeouts(HostTimeouts::default())
    }

    pub fn with_timeouts(timeouts: HostTimeouts) -> Self {
        Self {
            servers: HashMap::new(),
            timeouts,
        }
    }

    // ─── Server Management ───────────────────────────────────────────────

    /// Register a server. Fails with `AlreadyExists` when the id is taken —
    /// callers wanting ensure-present semantics should check first, not
    /// rely on implicit tolerance.
    pub fn add_server(&mut self, config: ServerConfig) -> Result<(), HostError> {
        if self.servers.contains_key(&config.id) {
            return Err(HostError::AlreadyExists {
                server: config.id.clone(),
            });
        }
        tracing::info!(server = %config.id, command = %config.command, "server added");
        self.servers.insert(
            config.id.clone(),
            ServerSupervisor::new(config, self.timeouts),
        );
        Ok(())
    }

    pub async fn start_server(&mut self, id: &str) -> Result<(), HostError> {
        self.supervisor_mut(id)?.start().await
    }

    pub async fn stop_server(&mut self, id: &str) -> Result<(), HostError> {
        self.supervisor_mut(id)?.stop().await
    }

    /// Stop-if-needed, then start fresh.
    pub async fn restart_server(&mut self, id: &str) -> Result<(), HostError> {
        let supervisor = self.supervisor_mut(id)?;
        supervisor.stop().await?;
        supervisor.start().await
    }

    /// Stop the server if necessary and discard its record entirely.
    pub async fn remove_server(&mut self, id: &str) -> Result<(), HostError> {
        let mut supervisor = self.servers.remove(id).ok_or(HostError::NotFound {
            server: id.to_string(),
        })?;
        supervisor.shutdown().await;
        tracing::info!(server = %id, "server removed");
        Ok(())
    }

    /// Start every server whose config opts into `auto_start`. Partial
    /// startup is fine: failures are collected per server, never raised for
    /// the batch.
    pub async fn start_all(&mut self) -> Vec<(String, HostError)> {
        let mut failures = Vec::new();
        for id in self.sorted_ids() {
            let supervisor = match self.servers.get_mut(&id) {
                Some(s) => s,
                None => continue,
            };
            if !supervisor.config().auto_start {
                continue;
            }
            if let Err(err) = supervisor.start().await {
                tracing::warn!(server = %id, error = %err, "server failed to start (non-fatal)");
                failures.push((id, err));
            }
        }
        failures
    }

    /// Stop every server. Used at application shutdown.
    pub async fn stop_all(&mut self) {
        for id in self.sorted_ids() {
            if let Some(supervisor) = self.servers.get_mut(&id) {
                let _ = supervisor.stop().await;
            }
        }
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    pub fn contains_server(&self, id: &str) -> bool {
        self.servers.contains_key(id)
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn server_status(&self, id: &str) -> Result<ServerStatus, HostError> {
        Ok(self.supervisor(id)?.status())
    }

    /// Point-in-time snapshots of every server, ordered by id.
    pub fn list_servers(&self) -> Vec<ServerSnapshot> {
        self.sorted_ids()
            .into_iter()
            .filter_map(|id| self.servers.get(&id).map(ServerSupervisor::snapshot))
            .collect()
    }

    /// Flattened tool snapshots across one server or all of them, ordered
    /// by server id and then by each server's discovery order.
    pub fn list_tools(&self, server: Option<&str>) -> Result<Vec<ToolDescriptor>, HostError> {
        match server {
            Some(id) => Ok(self.supervisor(id)?.tools()),
            None => Ok(self
                .sorted_ids()
                .into_iter()
                .flat_map(|id| {
                    self.servers
                        .get(&id)
                        .map(|s| s.tools())
                        .unwrap_or_default()
                })
                .collect()),
        }
    }

    /// First tool with the given name. Tool names are only unique within a
    /// server, so an unscoped lookup is best-effort: servers are scanned in
    /// id order and the first match wins.
    pub fn find_tool(
        &self,
        name: &str,
        server: Option<&str>,
    ) -> Result<Option<ToolDescriptor>, HostError> {
        match server {
            Some(id) => Ok(self.supervisor(id)?.find_tool(name)),
            None => Ok(self
                .sorted_ids()
                .into_iter()
                .find_map(|id| self.servers.get(&id).and_then(|s| s.find_tool(name)))),
        }
    }

    // ─── Execution ───────────────────────────────────────────────────────

    /// Route a tool call to its server and execute it.
    pub async fn execute_tool(&self, call: ToolCall) -> Result<Value, HostError> {
        self.supervisor(&call.server)?
            .execute(&call.tool, call.arguments)
            .await
    }

    /// Re-run tool discovery on one `Running` server.
    pub async fn refresh_tools(&self, id: &str) -> Result<usize, HostError> {
        self.supervisor(id)?.refresh_tools().await
    }

    // ─── Internals ───────────────────────────────────────────────────────

    fn supervisor(&self, id: &str) -> Result<&ServerSupervisor, HostError> {
        self.servers.get(id).ok_or(HostError::NotFound {
            server: id.to_string(),
        })
    }

    fn supervisor_mut(&mut self, id: &str) -> Result<&mut ServerSupervisor, HostError> {
        self.servers.get_mut(id).ok_or(HostError::NotFound {
            server: id.to_string(),
        })
    }

    fn sorted_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.servers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
