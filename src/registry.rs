//! Per-server tool registry.
//!
//! Holds the tools a server reported during discovery. The registry is
//! replaced wholesale on every successful (re)discovery and cleared when the
//! server stops; external callers only ever see cloned snapshots, never the
//! live state.

use serde::Serialize;
use serde_json::Value;

use crate::errors::HostError;
use crate::protocol::ToolDef;

/// One callable tool, as discovered from its owning server.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// Structural description of accepted parameters (JSON Schema shaped).
    pub input_schema: Value,
    /// Owning server id. Tool names are unique within a server, not globally.
    pub server: String,
}

/// The tools one server currently exposes, in the order the server listed
/// them.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registry with a fresh discovery result, stamping each
    /// tool with its owning server id.
    pub fn replace(&mut self, server: &str, defs: Vec<ToolDef>) {
        self.tools = defs
            .into_iter()
            .map(|def| ToolDescriptor {
                name: def.name,
                description: def.description.unwrap_or_default(),
                input_schema: def.input_schema,
                server: server.to_string(),
            })
            .collect();
    }

    /// Drop all tools. Called when the server stops or errors.
    pub fn clear(&mut self) {
        self.tools.clear();
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Cloned view of every tool, preserving discovery order.
    pub fn snapshot(&self) -> Vec<ToolDescriptor> {
        self.tools.clone()
    }

    /// Structural check that `arguments` satisfies the tool's schema:
    /// every `required` field must be present. Full JSON Schema validation
    /// is the server's job — this only catches calls that could never
    /// succeed.
    pub fn validate_arguments(&self, name: &str, arguments: &Value) -> Result<(), HostError> {
        let Some(tool) = self.get(name) else {
            return Ok(());
        };

        let required = tool
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for field in required.iter().filter_map(Value::as_str) {
            let present = arguments
                .as_object()
                .map(|obj| obj.contains_key(field))
                .unwrap_or(false);
            if !present {
                return Err(HostError::InvalidArguments {
                    tool: name.to_string(),
                    reason: format!("missing required field: '{field}'"),
                });
            }
        }

        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
