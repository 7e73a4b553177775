//! A2A wire types: agent card, messages, tasks, status-update events.
//!
//! The front-end emits positional text parts; the constants in [`codes`]
//! are the part-zero discriminators clients switch on.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const AGENT_CARD_PATH: &str = "/.well-known/agent.json";

pub const METHOD_SEND_MESSAGE: &str = "message/send";
pub const METHOD_STREAM_MESSAGE: &str = "message/stream";
pub const METHOD_GET_TASK: &str = "tasks/get";

/// Literal message text that opens a persistent notification stream
/// instead of a chat turn.
pub const SUBSCRIBE_NOTIFICATIONS: &str = "__subscribe_notifications__";

/// Part-zero codes carried in status-update events.
pub mod codes {
    pub const PROMPT_ACCEPTED: &str = "prompt_accepted";
    pub const THINKING: &str = "thinking";
    pub const RESPONSE_RECEIVED: &str = "response_received";
    pub const TOOL_CALLING: &str = "tool_calling";
    pub const TOOL_ERROR: &str = "tool_error";
    pub const MEMORY_RETRIEVAL: &str = "memory_retrieval";
    pub const RAG_RETRIEVAL: &str = "rag_retrieval";

    pub const MCP_NOTIFICATION: &str = "mcp_notification";
    pub const AGENT_MESSAGE: &str = "agent_message";
    pub const NOTIFICATION_SUBSCRIBED: &str = "notification_subscribed";
    pub const KEEPALIVE: &str = "keepalive";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub capabilities: AgentCapabilities,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<AgentProvider>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentCapabilities {
    pub streaming: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProvider {
    pub organization: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Part {
    Text { text: String },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn as_text(&self) -> &str {
        match self {
            Part::Text { text } => text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct A2aMessage {
    pub role: String,
    pub parts: Vec<Part>,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl A2aMessage {
    pub fn agent_text(parts: Vec<Part>, context_id: Option<String>, task_id: Option<String>) -> Self {
        Self {
            role: "agent".to_string(),
            parts,
            message_id: uuid::Uuid::new_v4().to_string(),
            context_id,
            task_id,
            metadata: None,
        }
    }

    /// First text part, or "".
    pub fn text(&self) -> String {
        self.parts
            .first()
            .map(|p| p.as_text().to_string())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSendParams {
    pub message: A2aMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    Completed,
    Failed,
    Canceled,
}

impl TaskState {
    /// Whether a polling client can stop waiting.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<A2aMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub context_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub kind: String,
}

impl Task {
    pub fn new(context_id: impl Into<String>, state: TaskState) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            context_id: context_id.into(),
            status: TaskStatus {
                state,
                message: None,
                timestamp: Some(chrono::Utc::now().to_rfc3339()),
            },
            kind: "task".to_string(),
        }
    }
}

/// Streaming event pushed while a task is live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusUpdateEvent {
    pub task_id: String,
    #[serde(default)]
    pub context_id: String,
    pub status: TaskStatus,
    #[serde(rename = "final", default)]
    pub is_final: bool,
    #[serde(default)]
    pub kind: String,
}

impl TaskStatusUpdateEvent {
    /// A non-terminal Working update carrying positional text parts.
    pub fn working(task_id: &str, context_id: &str, parts: Vec<Part>) -> Self {
        Self {
            task_id: task_id.to_string(),
            context_id: context_id.to_string(),
            status: TaskStatus {
                state: TaskState::Working,
                message: Some(A2aMessage::agent_text(
                    parts,
                    Some(context_id.to_string()),
                    Some(task_id.to_string()),
                )),
                timestamp: Some(chrono::Utc::now().to_rfc3339()),
            },
            is_final: false,
            kind: "status-update".to_string(),
        }
    }

    /// A terminal update closing the task stream.
    pub fn terminal(task_id: &str, context_id: &str, state: TaskState, text: Option<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            context_id: context_id.to_string(),
            status: TaskStatus {
                state,
                message: text.map(|t| {
                    A2aMessage::agent_text(
                        vec![Part::text(t)],
                        Some(context_id.to_string()),
                        Some(task_id.to_string()),
                    )
                }),
                timestamp: Some(chrono::Utc::now().to_rfc3339()),
            },
            is_final: true,
            kind: "status-update".to_string(),
        }
    }
}
