//! In-process tool servers (config transport `internal`).
//!
//! Used by the test configs and for builtin toolsets that need no wire
//! protocol. Handlers run inline and return plain text.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use cleverchatty_core::types::{Tool, ToolSchema};
use cleverchatty_protocol::mcp::CallToolResult;

use crate::error::{Result, ToolsError};

pub type InternalHandler = Arc<dyn Fn(Value) -> std::result::Result<String, String> + Send + Sync>;

pub struct InternalServer {
    name: String,
    tools: Vec<(Tool, InternalHandler)>,
}

impl InternalServer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn register(&mut self, tool: Tool, handler: InternalHandler) {
        self.tools.push((tool, handler));
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.tools.iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn call(&self, tool: &str, args: Value) -> Result<CallToolResult> {
        let handler = self
            .tools
            .iter()
            .find(|(t, _)| t.name == tool)
            .map(|(_, h)| Arc::clone(h))
            .ok_or_else(|| ToolsError::NotFound {
                name: format!("{}__{}", self.name, tool),
            })?;
        match handler(args) {
            Ok(text) => Ok(CallToolResult::text(text)),
            Err(e) => Ok(CallToolResult::error(e)),
        }
    }

    /// The scripted server behind the test configs: `tool<N>` echoes its
    /// `message` argument behind a recognizable prefix.
    pub fn scripted(name: impl Into<String>) -> Self {
        let mut server = Self::new(name);
        for n in 1..=3 {
            let mut properties = serde_json::Map::new();
            properties.insert(
                "message".to_string(),
                serde_json::json!({ "type": "string", "description": "Echo payload" }),
            );
            server.register(
                Tool {
                    name: format!("tool{n}"),
                    description: format!("Scripted echo tool {n}"),
                    input_schema: ToolSchema {
                        schema_type: "object".to_string(),
                        properties,
                        required: vec!["message".to_string()],
                    },
                },
                Arc::new(|args: Value| {
                    let message = args
                        .get("message")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    Ok(format!("FAKE_TOOL_RESPONSE:{message}"))
                }),
            );
        }
        server
    }
}

/// Build the internal server registered under `name` in the config.
pub fn build(name: &str, _options: &HashMap<String, String>) -> InternalServer {
    // Only the scripted test server exists today; future builtin servers
    // dispatch on the name here.
    InternalServer::scripted(name)
}
