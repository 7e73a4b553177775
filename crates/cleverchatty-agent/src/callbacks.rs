//! Status events emitted while a prompt is processed.
//!
//! Front-ends relay these to clients as `[code, message, extra]` triples;
//! the codes are wire constants shared with `cleverchatty-protocol`.

use std::sync::Arc;

use cleverchatty_core::types::Notification;
use cleverchatty_protocol::a2a::codes;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    PromptAccepted,
    Thinking,
    ResponseReceived { text: String },
    ToolCalling { tool: String },
    ToolError { tool: String, error: String },
    MemoryRetrieval,
    RagRetrieval,
}

impl EngineEvent {
    /// The positional `[code, message, extra]` parts of a status update.
    pub fn parts(&self) -> (&'static str, String, String) {
        match self {
            EngineEvent::PromptAccepted => {
                (codes::PROMPT_ACCEPTED, "Prompt accepted".to_string(), String::new())
            }
            EngineEvent::Thinking => (codes::THINKING, "Thinking...".to_string(), String::new()),
            EngineEvent::ResponseReceived { text } => {
                (codes::RESPONSE_RECEIVED, text.clone(), String::new())
            }
            EngineEvent::ToolCalling { tool } => {
                (codes::TOOL_CALLING, "Calling tool".to_string(), tool.clone())
            }
            EngineEvent::ToolError { tool, error } => {
                (codes::TOOL_ERROR, error.clone(), tool.clone())
            }
            EngineEvent::MemoryRetrieval => (
                codes::MEMORY_RETRIEVAL,
                "Retrieving memories".to_string(),
                String::new(),
            ),
            EngineEvent::RagRetrieval => (
                codes::RAG_RETRIEVAL,
                "Searching knowledge base".to_string(),
                String::new(),
            ),
        }
    }
}

pub type EngineCallback = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// Fired for every server notification after normalisation.
pub type NotificationCallback = Arc<dyn Fn(Notification) + Send + Sync>;

/// Fired when the notification processor's subagent wants to tell the user
/// something (via its `notification_feedback` tool).
pub type AgentMessageCallback = Arc<dyn Fn(String) + Send + Sync>;
