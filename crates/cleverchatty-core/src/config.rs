use std::collections::HashMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Protocol deadlines shared across the tools host and the reverse listener.
pub const INITIALIZE_TIMEOUT_SECS: u64 = 30;
pub const LIST_TOOLS_TIMEOUT_SECS: u64 = 10;
pub const KEEPALIVE_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_MESSAGE_WINDOW: usize = 10;

/// Top-level config (cleverchatty.toml + CLEVERCHATTY_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleverChattyConfig {
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    /// Model spec in `provider:model` form (e.g. "anthropic:claude-sonnet-4-6").
    pub model: String,
    #[serde(default)]
    pub system_instruction: String,
    /// Number of history messages kept per conversation window.
    #[serde(default = "default_message_window")]
    pub message_window: usize,
    /// "" = discard, "stdout", "stderr", or a file path to append to.
    #[serde(default)]
    pub log_file_path: String,
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub rag_settings: RagSettings,
    #[serde(default)]
    pub a2a_settings: A2aSettings,
    #[serde(default)]
    pub reverse_mcp_settings: ReverseMcpSettings,
    #[serde(default)]
    pub tools_servers: HashMap<String, ToolServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Seconds of idleness before a session is reaped.
    #[serde(default = "default_session_timeout")]
    pub session_timeout: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            session_timeout: default_session_timeout(),
        }
    }
}

/// Per-vendor credentials. Only the vendor named in `model` is consulted.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub anthropic: Option<ApiKeyConfig>,
    pub openai: Option<ApiKeyConfig>,
    pub ollama: Option<BaseUrlConfig>,
    pub google: Option<ApiKeyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub api_key: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseUrlConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagSettings {
    /// Prefixed to every injected context paragraph.
    #[serde(default = "default_context_prefix")]
    pub context_prefix: String,
    /// When true, the prompt is rewritten by an extra LLM call before search.
    #[serde(default)]
    pub require_preprocessing: bool,
    #[serde(default)]
    pub preprocessing_prompt: String,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            context_prefix: default_context_prefix(),
            require_preprocessing: false,
            preprocessing_prompt: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct A2aSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_a2a_listen_host")]
    pub listen_host: String,
    /// Public base URL advertised in the agent card.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub organization: String,
    /// When true, inbound messages without a client agent id are rejected.
    #[serde(default)]
    pub agent_id_required: bool,
    #[serde(default = "default_chat_skill_name")]
    pub chat_skill_name: String,
    #[serde(default = "default_chat_skill_description")]
    pub chat_skill_description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReverseMcpSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_reverse_listen_host")]
    pub listen_host: String,
    #[serde(default)]
    pub tls: TlsSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TlsSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cert_file: String,
    #[serde(default)]
    pub key_file: String,
}

/// Transport protocol of a configured tool server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Stdio,
    Sse,
    HttpStreaming,
    A2a,
    ReverseMcp,
    Internal,
}

/// Which internal interface a server fulfils. Interface tools are hidden
/// from the LLM and invoked by the engine directly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerInterface {
    #[default]
    None,
    Memory,
    Rag,
}

/// A single entry under `[tools_servers.<name>]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub transport: TransportKind,
    /// Stdio transport: child process command.
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// SSE / HTTP-streaming / A2A transports: remote base URL.
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Reverse-MCP: bearer token the connecting server must present.
    pub auth_token: Option<String>,
    #[serde(default)]
    pub interface: ServerInterface,
    #[serde(default)]
    pub disabled: bool,
    /// When true a failed startup is fatal instead of logged-and-skipped.
    #[serde(default)]
    pub required: bool,
    /// Notification method -> user instructions routed to the processor.
    #[serde(default)]
    pub notification_instructions: HashMap<String, Vec<String>>,
    /// Extra metadata attached to A2A send_message calls.
    #[serde(default)]
    pub a2a_metadata: HashMap<String, String>,
}

fn default_agent_id() -> String {
    "cleverchatty".to_string()
}
fn default_message_window() -> usize {
    DEFAULT_MESSAGE_WINDOW
}
fn default_session_timeout() -> u64 {
    DEFAULT_SESSION_TIMEOUT_SECS
}
fn default_context_prefix() -> String {
    "Context:".to_string()
}
fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_a2a_listen_host() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_reverse_listen_host() -> String {
    "127.0.0.1:8090".to_string()
}
fn default_chat_skill_name() -> String {
    "ai_chat".to_string()
}
fn default_chat_skill_description() -> String {
    "General AI chat".to_string()
}

impl CleverChattyConfig {
    /// Load config from a TOML file with CLEVERCHATTY_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CleverChattyConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CLEVERCHATTY_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configs the rest of the system cannot act on.
    pub fn validate(&self) -> crate::error::Result<()> {
        if !self.model.contains(':') {
            return Err(crate::error::CoreError::Config(format!(
                "model '{}' must be in provider:model form",
                self.model
            )));
        }
        for (name, server) in &self.tools_servers {
            match server.transport {
                TransportKind::Stdio if server.command.is_none() => {
                    return Err(crate::error::CoreError::Config(format!(
                        "tools server '{name}': stdio transport requires `command`"
                    )));
                }
                TransportKind::Sse | TransportKind::HttpStreaming | TransportKind::A2a
                    if server.url.is_none() =>
                {
                    return Err(crate::error::CoreError::Config(format!(
                        "tools server '{name}': {:?} transport requires `url`",
                        server.transport
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Split `model` into its provider and model halves (first colon only).
    pub fn model_parts(&self) -> (&str, &str) {
        match self.model.split_once(':') {
            Some((p, m)) => (p, m),
            None => (self.model.as_str(), ""),
        }
    }

    /// The configured memory server name, if any.
    pub fn memory_server(&self) -> Option<&str> {
        self.tools_servers
            .iter()
            .find(|(_, s)| !s.disabled && s.interface == ServerInterface::Memory)
            .map(|(name, _)| name.as_str())
    }

    /// The configured RAG server name, if any.
    pub fn rag_server(&self) -> Option<&str> {
        self.tools_servers
            .iter()
            .find(|(_, s)| !s.disabled && s.interface == ServerInterface::Rag)
            .map(|(name, _)| name.as_str())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cleverchatty/cleverchatty.toml", home)
}
