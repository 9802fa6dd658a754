//! Server configuration and host timeouts.
//!
//! A [`ServerConfig`] is an immutable description of how to launch one tool
//! provider. The configuration collaborator produces it — commonly from a
//! `servers.json` file — and passes it in verbatim; the host never mutates
//! it.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

// ─── ServerConfig ────────────────────────────────────────────────────────────

/// How to launch one tool server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Unique id; also the routing key for every host operation.
    pub id: String,
    /// Display name. Defaults to the id when omitted.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides, merged over the host's inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Whether `start_all` should launch this server.
    #[serde(default)]
    pub auto_start: bool,
}

impl ServerConfig {
    /// Minimal config for a command with no arguments.
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            auto_start: false,
        }
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

// ─── Servers File ────────────────────────────────────────────────────────────

/// Shape of a `servers.json` document: `{"servers": {"<id>": {...}}}`.
/// Entries omit `id`; the map key supplies it.
#[derive(Debug, Clone, Deserialize)]
struct ServersFile {
    #[serde(default)]
    servers: HashMap<String, ServerFileEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ServerFileEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    auto_start: bool,
}

/// Load server configs from a JSON file. A missing or unparsable file is an
/// empty set, not an error — configuration is optional and a bad file must
/// not take the host down.
pub fn load_servers_file(path: &Path) -> HashMap<String, ServerConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "no servers file");
            return HashMap::new();
        }
    };

    let file: ServersFile = match serde_json::from_str(&content) {
        Ok(file) => file,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to parse servers file");
            return HashMap::new();
        }
    };

    let count = file.servers.len();
    let configs = file
        .servers
        .into_iter()
        .map(|(id, entry)| {
            let config = ServerConfig {
                name: if entry.name.is_empty() {
                    id.clone()
                } else {
                    entry.name
                },
                id: id.clone(),
                description: entry.description,
                command: entry.command,
                args: entry.args,
                env: entry.env,
                auto_start: entry.auto_start,
            };
            (id, config)
        })
        .collect();

    tracing::info!(path = %path.display(), count, "loaded servers file");
    configs
}

/// Merge two config sets. Override entries fully replace base entries with
/// the same id; override-only entries are added as-is.
pub fn merge_configs(
    mut base: HashMap<String, ServerConfig>,
    overrides: HashMap<String, ServerConfig>,
) -> HashMap<String, ServerConfig> {
    for (id, config) in overrides {
        base.insert(id, config);
    }
    base
}

// ─── Timeouts ────────────────────────────────────────────────────────────────

/// Deadlines for the host's suspension points. Handshake is short because
/// it gates usability; tool calls are longer because tool work may be slow.
#[derive(Debug, Clone, Copy)]
pub struct HostTimeouts {
    /// Per-request deadline during initialize and discovery.
    pub handshake: Duration,
    /// Deadline for a `tools/call` request.
    pub tool_call: Duration,
    /// Overall bound on start: spawn + handshake + discovery.
    pub startup: Duration,
    /// Grace period between asking a process to stop and force-killing it.
    pub shutdown_grace: Duration,
}

impl Default for HostTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(10),
            tool_call: Duration::from_secs(30),
            startup: Duration::from_secs(20),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
