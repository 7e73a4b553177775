use async_trait::async_trait;
use serde_json::Value;

use cleverchatty_core::types::{Message, Tool, Usage};

/// Request to an LLM provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    /// Extra system text prepended ahead of any system messages in history.
    pub system: Option<String>,
    /// Full conversation window, latest user prompt included.
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub max_tokens: u32,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>, tools: Vec<Tool>) -> Self {
        Self {
            model: model.into(),
            system: None,
            messages,
            tools,
            max_tokens: 4096,
        }
    }
}

/// One tool invocation requested by the LLM.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// The assistant turn produced by one provider call.
#[derive(Debug, Clone, Default)]
pub struct AssistantTurn {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Usage,
    pub stop_reason: String,
}

/// Common interface for all LLM providers (Anthropic, OpenAI, Ollama,
/// Google, and the scripted mock).
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Whether the provider accepts tool definitions at all.
    fn supports_tools(&self) -> bool {
        true
    }

    /// Produce the next assistant turn for the given history and tools.
    async fn create_message(&self, req: &ChatRequest) -> Result<AssistantTurn, ProviderError>;
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider").field("name", &self.name()).finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("provider overloaded after retries")]
    Overloaded,

    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("provider '{vendor}' requires credentials in config")]
    MissingCredentials { vendor: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Transient-overload check: the engine retries with backoff when the
    /// error text carries the vendors' overload marker.
    pub fn is_overloaded(&self) -> bool {
        match self {
            ProviderError::Api { message, .. } => message.contains("overloaded_error"),
            ProviderError::Http(e) => e.to_string().contains("overloaded_error"),
            _ => false,
        }
    }
}
