use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message author role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Finer-grained origin tag used by the engine to find and replace
/// injected messages (memory notes, RAG context) without touching the
/// actual conversation turns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubRole {
    Prompt,
    Instruction,
    MemoryNote,
    RagContext,
    ToolResponse,
}

/// One content block inside a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        structured: Option<Value>,
    },
}

/// A single message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_role: Option<SubRole>,
    pub blocks: Vec<ContentBlock>,
}

impl Message {
    pub fn text(role: Role, sub_role: Option<SubRole>, text: impl Into<String>) -> Self {
        Self {
            role,
            sub_role,
            blocks: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn user_prompt(text: impl Into<String>) -> Self {
        Self::text(Role::User, Some(SubRole::Prompt), text)
    }

    pub fn instruction(text: impl Into<String>) -> Self {
        Self::text(Role::System, Some(SubRole::Instruction), text)
    }

    pub fn memory_note(text: impl Into<String>) -> Self {
        Self::text(Role::System, Some(SubRole::MemoryNote), text)
    }

    pub fn rag_context(text: impl Into<String>) -> Self {
        Self::text(Role::User, Some(SubRole::RagContext), text)
    }

    /// Concatenated text of all plain-text blocks.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    pub fn has_text_block(&self) -> bool {
        self.blocks
            .iter()
            .any(|b| matches!(b, ContentBlock::Text { .. }))
    }
}

/// JSON-schema descriptor for a tool's input. Reverse-MCP servers
/// sometimes omit `properties`; the defaults fill the gaps so every
/// provider receives a complete object schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    #[serde(rename = "type", default = "default_schema_type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, Value>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl Default for ToolSchema {
    fn default() -> Self {
        Self {
            schema_type: default_schema_type(),
            properties: serde_json::Map::new(),
            required: Vec::new(),
        }
    }
}

fn default_schema_type() -> String {
    "object".to_string()
}

/// An LLM-visible tool. `name` is fully qualified as `server__tool`
/// once it leaves the tools host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: ToolSchema,
}

/// Token accounting returned with every assistant turn.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Whether a notification's method has monitoring instructions configured.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringStatus {
    #[default]
    None,
    Monitored,
}

/// Lifecycle of a monitored notification in the processor queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    #[default]
    None,
    Pending,
    Processing,
    Processed,
    Failed,
}

impl MonitoringStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitoringStatus::None => "none",
            MonitoringStatus::Monitored => "monitored",
        }
    }
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::None => "none",
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Processed => "processed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

/// An out-of-band message pushed by a tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub server: String,
    pub method: String,
    pub description: String,
    pub monitoring_status: MonitoringStatus,
    pub processing_status: ProcessingStatus,
    pub params: HashMap<String, Value>,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

impl Notification {
    pub fn new(server: impl Into<String>, method: impl Into<String>, params: HashMap<String, Value>) -> Self {
        let method = method.into();
        let description = describe(&method, &params);
        Self {
            server: server.into(),
            method,
            description,
            monitoring_status: MonitoringStatus::None,
            processing_status: ProcessingStatus::None,
            params,
            received_at: chrono::Utc::now(),
        }
    }
}

/// Derive a human-readable description from notification params.
/// Preference order: `title`, `description`, `message`, then a cleaned-up
/// form of the method's last path segment.
fn describe(method: &str, params: &HashMap<String, Value>) -> String {
    for key in ["title", "description", "message"] {
        if let Some(Value::String(s)) = params.get(key) {
            if !s.is_empty() {
                return s.clone();
            }
        }
    }
    let suffix = method.rsplit('/').next().unwrap_or(method);
    suffix.replace('_', " ")
}
