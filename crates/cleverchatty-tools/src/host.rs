//! Tools host: one façade over every configured tool server.
//!
//! Tools are exposed to the LLM under `server__tool` composite names.
//! Interface servers (memory, RAG) keep their canonical tools hidden;
//! the engine invokes those through the dedicated helpers below.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use tracing::{debug, info, warn};

use cleverchatty_core::config::{
    CleverChattyConfig, ServerInterface, ToolServerConfig, TransportKind,
};
use cleverchatty_core::filecache::FileCache;
use cleverchatty_core::placeholders;
use cleverchatty_core::types::{MonitoringStatus, Notification, ProcessingStatus, Tool};
use cleverchatty_protocol::mcp::{CallToolResult, McpContent};

use crate::a2a_client::A2aClient;
use crate::error::{Result, ToolsError};
use crate::internal::{InternalHandler, InternalServer};
use crate::mcp::{McpClient, TransportConfig};
use crate::reverse::ReverseCapability;

/// Separator between the server and tool halves of an LLM-visible name.
pub const NAME_SEPARATOR: &str = "__";

/// Canonical tools hidden from the LLM on interface servers.
const MEMORY_TOOLS: [&str; 2] = ["remember", "recall"];
const RAG_TOOLS: [&str; 1] = ["knowledge_search"];

/// Fired for every server notification, with the configured instructions
/// for its method (empty when unmonitored).
pub type NotificationCallback = Arc<dyn Fn(Notification, Vec<String>) + Send + Sync>;

pub struct CustomTool {
    pub tool: Tool,
    pub handler: InternalHandler,
}

enum ServerClient {
    Mcp(McpClient),
    A2a(A2aClient),
    Internal(InternalServer),
}

pub struct ToolsHost {
    agent_id: String,
    client_agent_id: Option<String>,
    server_configs: HashMap<String, ToolServerConfig>,
    clients: HashMap<String, ServerClient>,
    /// Namespaced tools discovered at startup, interface tools excluded.
    static_tools: RwLock<Vec<Tool>>,
    custom_tools: RwLock<Vec<CustomTool>>,
    reverse: RwLock<Option<Arc<dyn ReverseCapability>>>,
    file_cache: Arc<FileCache>,
    notification_cb: Arc<RwLock<Option<NotificationCallback>>>,
    memory_server: Option<String>,
    rag_server: Option<String>,
}

impl ToolsHost {
    /// Connect and interrogate every enabled server. A failing server is
    /// skipped with a warning unless it is marked `required`.
    pub async fn start(
        config: &CleverChattyConfig,
        client_agent_id: Option<String>,
    ) -> Result<Self> {
        let file_cache = Arc::new(FileCache::new()?);
        let mut host = Self {
            agent_id: config.agent_id.clone(),
            client_agent_id,
            server_configs: config.tools_servers.clone(),
            clients: HashMap::new(),
            static_tools: RwLock::new(Vec::new()),
            custom_tools: RwLock::new(Vec::new()),
            reverse: RwLock::new(None),
            file_cache,
            notification_cb: Arc::new(RwLock::new(None)),
            memory_server: config.memory_server().map(String::from),
            rag_server: config.rag_server().map(String::from),
        };

        for (name, server) in &config.tools_servers {
            if server.disabled {
                debug!(server = %name, "server disabled, skipping");
                continue;
            }
            if server.transport == TransportKind::ReverseMcp {
                // Reverse servers dial in; nothing to start here.
                continue;
            }
            match host.start_server(name, server).await {
                Ok(client) => {
                    host.clients.insert(name.clone(), client);
                }
                Err(e) if server.required => {
                    return Err(ToolsError::Init {
                        server: name.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(server = %name, error = %e, "tool server unavailable, skipping");
                }
            }
        }

        host.discover_tools().await;
        Ok(host)
    }

    async fn start_server(&self, name: &str, server: &ToolServerConfig) -> Result<ServerClient> {
        let expand = |v: &str| {
            placeholders::expand(v, &self.agent_id, self.client_agent_id.as_deref())
        };
        match server.transport {
            TransportKind::Stdio => {
                let command = server.command.clone().ok_or_else(|| ToolsError::Init {
                    server: name.to_string(),
                    reason: "stdio transport requires `command`".to_string(),
                })?;
                let args = server.args.iter().map(|a| expand(a)).collect();
                let env = server
                    .env
                    .iter()
                    .map(|(k, v)| (k.clone(), expand(v)))
                    .collect();
                let client =
                    McpClient::start(name, TransportConfig::Stdio { command, args, env }).await?;
                client
                    .initialize(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
                    .await?;
                Ok(ServerClient::Mcp(client))
            }
            TransportKind::Sse | TransportKind::HttpStreaming => {
                let url = server.url.clone().ok_or_else(|| ToolsError::Init {
                    server: name.to_string(),
                    reason: "transport requires `url`".to_string(),
                })?;
                let headers = server
                    .headers
                    .iter()
                    .map(|(k, v)| (k.clone(), expand(v)))
                    .collect();
                let transport = if server.transport == TransportKind::Sse {
                    TransportConfig::Sse { url, headers }
                } else {
                    TransportConfig::HttpStreaming { url, headers }
                };
                let client = McpClient::start(name, transport).await?;
                client
                    .initialize(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
                    .await?;
                Ok(ServerClient::Mcp(client))
            }
            TransportKind::A2a => {
                let url = server.url.clone().ok_or_else(|| ToolsError::Init {
                    server: name.to_string(),
                    reason: "a2a transport requires `url`".to_string(),
                })?;
                let headers = server
                    .headers
                    .iter()
                    .map(|(k, v)| (k.clone(), expand(v)))
                    .collect();
                let client = A2aClient::new(url, headers, server.a2a_metadata.clone());
                client.initialize().await?;
                Ok(ServerClient::A2a(client))
            }
            TransportKind::Internal => Ok(ServerClient::Internal(crate::internal::build(
                name,
                &server.headers,
            ))),
            TransportKind::ReverseMcp => unreachable!("reverse servers are not started here"),
        }
    }

    /// Query each live client for its tools and build the static list.
    async fn discover_tools(&mut self) {
        let mut tools = Vec::new();
        for (name, client) in &self.clients {
            let interface = self
                .server_configs
                .get(name)
                .map(|s| s.interface)
                .unwrap_or_default();
            let discovered: Vec<Tool> = match client {
                ServerClient::Mcp(mcp) => match mcp.list_tools().await {
                    Ok(list) => list
                        .into_iter()
                        .map(|t| Tool {
                            name: t.name,
                            description: t.description,
                            input_schema: t.input_schema,
                        })
                        .collect(),
                    Err(e) => {
                        warn!(server = %name, error = %e, "tools/list failed");
                        Vec::new()
                    }
                },
                ServerClient::A2a(a2a) => a2a.skills_as_tools().await,
                ServerClient::Internal(internal) => internal.tools(),
            };

            for tool in discovered {
                if suppressed(interface, &tool.name) {
                    debug!(server = %name, tool = %tool.name, "interface tool hidden from LLM");
                    continue;
                }
                tools.push(namespaced(name, tool));
            }
        }
        info!(count = tools.len(), "tool discovery complete");
        *self.static_tools.write().unwrap() = tools;
    }

    pub fn set_reverse_capability(&self, capability: Arc<dyn ReverseCapability>) {
        *self.reverse.write().unwrap() = Some(capability);
    }

    /// Register the single notification callback and install the low-level
    /// per-client handlers that normalise server notifications.
    pub async fn set_notification_callback(&self, cb: NotificationCallback) {
        *self.notification_cb.write().unwrap() = Some(cb);

        for (name, client) in &self.clients {
            let ServerClient::Mcp(mcp) = client else {
                continue;
            };
            let server = name.clone();
            let instructions_by_method = self
                .server_configs
                .get(name)
                .map(|s| s.notification_instructions.clone())
                .unwrap_or_default();
            let cb_slot = Arc::clone(&self.notification_cb);

            mcp.set_notification_handler(Arc::new(move |method, params| {
                let (notification, instructions) =
                    normalise_notification(&server, method, params, &instructions_by_method);
                let cb = cb_slot.read().unwrap().clone();
                if let Some(cb) = cb {
                    cb(notification, instructions);
                }
            }))
            .await;
        }
    }

    /// Register an in-process custom tool (addressed by its plain name).
    pub fn set_tool(&self, tool: Tool, handler: InternalHandler) {
        self.custom_tools
            .write()
            .unwrap()
            .push(CustomTool { tool, handler });
    }

    /// Fresh snapshot of the LLM-visible tool set: static + custom +
    /// currently connected reverse servers.
    pub fn all_tools_for_llm(&self) -> Vec<Tool> {
        let mut tools = self.static_tools.read().unwrap().clone();
        for custom in self.custom_tools.read().unwrap().iter() {
            tools.push(custom.tool.clone());
        }
        let reverse = self.reverse.read().unwrap().clone();
        if let Some(reverse) = reverse {
            for (server, server_tools) in reverse.get_all_tools() {
                for tool in server_tools {
                    tools.push(namespaced(&server, tool));
                }
            }
        }
        tools
    }

    /// `(name, transport, interface, tool-count)` rows for `/servers`.
    pub fn list_servers(&self) -> Vec<(String, TransportKind, ServerInterface, usize)> {
        let static_tools = self.static_tools.read().unwrap();
        let mut rows: Vec<(String, TransportKind, ServerInterface, usize)> = self
            .clients
            .keys()
            .map(|name| {
                let cfg = &self.server_configs[name];
                let prefix = format!("{name}{NAME_SEPARATOR}");
                let count = static_tools
                    .iter()
                    .filter(|t| t.name.starts_with(&prefix))
                    .count();
                (name.clone(), cfg.transport, cfg.interface, count)
            })
            .collect();
        let reverse = self.reverse.read().unwrap().clone();
        if let Some(reverse) = reverse {
            for (server, tools) in reverse.get_all_tools() {
                rows.push((
                    server,
                    TransportKind::ReverseMcp,
                    ServerInterface::None,
                    tools.len(),
                ));
            }
        }
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    /// Whether `server` has notification instructions configured; such
    /// servers get their request/response pairs remembered.
    pub fn is_notification_producer(&self, server: &str) -> bool {
        self.server_configs
            .get(server)
            .map(|s| !s.notification_instructions.is_empty())
            .unwrap_or(false)
    }

    /// Whether a call to `name` has somewhere to go: a custom tool, a
    /// connected server, or a live reverse connection.
    pub fn is_routable(&self, name: &str) -> bool {
        if self
            .custom_tools
            .read()
            .unwrap()
            .iter()
            .any(|c| c.tool.name == name)
        {
            return true;
        }
        match Self::server_of(name) {
            Some((server, _)) => {
                if self.clients.contains_key(server) {
                    return true;
                }
                let reverse = self.reverse.read().unwrap().clone();
                reverse
                    .map(|r| !r.get_tools(server).is_empty())
                    .unwrap_or(false)
            }
            None => false,
        }
    }

    /// The server half of a fully-qualified tool name, when valid.
    pub fn server_of(name: &str) -> Option<(&str, &str)> {
        let mut parts = name.split(NAME_SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(server), Some(tool), None) if !server.is_empty() && !tool.is_empty() => {
                Some((server, tool))
            }
            _ => None,
        }
    }

    /// Dispatch one LLM-emitted tool call.
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<CallToolResult> {
        // Custom tools are in-process and addressed by their plain name.
        let custom = self
            .custom_tools
            .read()
            .unwrap()
            .iter()
            .find(|c| c.tool.name == name)
            .map(|c| Arc::clone(&c.handler));
        if let Some(handler) = custom {
            return match handler(args) {
                Ok(text) => Ok(CallToolResult::text(text)),
                Err(e) => Ok(CallToolResult::error(e)),
            };
        }

        let Some((server, tool)) = Self::server_of(name) else {
            return Err(ToolsError::InvalidName {
                name: name.to_string(),
            });
        };

        let args = self.resolve_file_handles(args)?;

        let result = match self.clients.get(server) {
            Some(ServerClient::Mcp(mcp)) => mcp.call_tool(tool, args).await?,
            Some(ServerClient::A2a(a2a)) => {
                let message = args
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let metadata = self.expanded_a2a_metadata(server);
                let text = a2a.call_skill(tool, &message, &metadata).await?;
                CallToolResult::text(text)
            }
            Some(ServerClient::Internal(internal)) => internal.call(tool, args)?,
            None => {
                let reverse = self.reverse.read().unwrap().clone();
                match reverse {
                    Some(reverse) if !reverse.get_tools(server).is_empty() => {
                        reverse.call_tool(server, tool, args).await?
                    }
                    _ => {
                        return Err(ToolsError::NotFound {
                            name: name.to_string(),
                        })
                    }
                }
            }
        };

        self.divert_binary_content(result)
    }

    /// Call an interface tool directly (memory/RAG); bypasses namespacing.
    async fn call_interface_tool(
        &self,
        server: &str,
        tool: &str,
        args: Value,
    ) -> Result<CallToolResult> {
        match self.clients.get(server) {
            Some(ServerClient::Mcp(mcp)) => mcp.call_tool(tool, args).await,
            Some(ServerClient::Internal(internal)) => internal.call(tool, args),
            Some(ServerClient::A2a(_)) | None => Err(ToolsError::NotFound {
                name: format!("{server}{NAME_SEPARATOR}{tool}"),
            }),
        }
    }

    /// Push one conversation line to the memory server. No-op without one.
    pub async fn memory_remember(&self, role: &str, content: &str) -> Result<()> {
        let Some(server) = self.memory_server.clone() else {
            return Ok(());
        };
        self.call_interface_tool(
            &server,
            "remember",
            serde_json::json!({ "role": role, "content": content }),
        )
        .await?;
        Ok(())
    }

    /// Recall memories relevant to `query`. `None` without a memory server
    /// or when the server has nothing to say.
    pub async fn memory_recall(&self, query: &str) -> Result<Option<String>> {
        let Some(server) = self.memory_server.clone() else {
            return Ok(None);
        };
        let result = self
            .call_interface_tool(&server, "recall", serde_json::json!({ "query": query }))
            .await?;
        let text = result.text_content();
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            return Ok(None);
        }
        Ok(Some(text))
    }

    pub fn has_memory_server(&self) -> bool {
        self.memory_server.is_some()
    }

    pub fn has_rag_server(&self) -> bool {
        self.rag_server.is_some()
    }

    /// Query the knowledge base. `None` without a RAG server.
    pub async fn rag_search(&self, query: &str, num: u32) -> Result<Option<String>> {
        let Some(server) = self.rag_server.clone() else {
            return Ok(None);
        };
        let result = self
            .call_interface_tool(
                &server,
                "knowledge_search",
                serde_json::json!({ "query": query, "num": num }),
            )
            .await?;
        let text = result.text_content();
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(text))
    }

    pub fn file_cache(&self) -> &Arc<FileCache> {
        &self.file_cache
    }

    /// Shut down every owned client and drop cached files.
    pub async fn finish(&self) {
        for client in self.clients.values() {
            if let ServerClient::Mcp(mcp) = client {
                mcp.shutdown().await;
            }
        }
        self.file_cache.cleanup();
    }

    fn expanded_a2a_metadata(&self, server: &str) -> HashMap<String, String> {
        self.server_configs
            .get(server)
            .map(|s| {
                s.a2a_metadata
                    .iter()
                    .map(|(k, v)| {
                        (
                            k.clone(),
                            placeholders::expand(v, &self.agent_id, self.client_agent_id.as_deref()),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Swap any file-handle string arguments for the cached file content.
    fn resolve_file_handles(&self, args: Value) -> Result<Value> {
        Ok(match args {
            Value::String(s) => {
                if FileCache::handle_file_name(&s).is_some() {
                    match self.file_cache.resolve(&s)? {
                        Some(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
                        None => Value::String(s),
                    }
                } else {
                    Value::String(s)
                }
            }
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k, self.resolve_file_handles(v)?);
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|v| self.resolve_file_handles(v))
                    .collect::<Result<_>>()?,
            ),
            other => other,
        })
    }

    /// Replace binary content items with text blocks holding file handles.
    fn divert_binary_content(&self, result: CallToolResult) -> Result<CallToolResult> {
        let mut content = Vec::with_capacity(result.content.len());
        for item in result.content {
            match item {
                McpContent::Text { .. } => content.push(item),
                McpContent::Image { data, mime_type } => {
                    let bytes = BASE64
                        .decode(&data)
                        .map_err(|e| ToolsError::Transport(format!("image decode: {e}")))?;
                    let handle = self.file_cache.save_content(&bytes, &mime_type)?;
                    content.push(McpContent::Text { text: handle });
                }
                McpContent::Resource { resource } => {
                    if let Some(blob) = resource.blob {
                        let bytes = BASE64
                            .decode(&blob)
                            .map_err(|e| ToolsError::Transport(format!("resource decode: {e}")))?;
                        let handle = self.file_cache.save_content(&bytes, &resource.mime_type)?;
                        content.push(McpContent::Text { text: handle });
                    } else if let Some(text) = resource.text {
                        content.push(McpContent::Text { text });
                    }
                }
            }
        }
        Ok(CallToolResult {
            content,
            is_error: result.is_error,
            structured_content: result.structured_content,
        })
    }
}

/// Build the unified notification for a raw server push and look up the
/// monitoring instructions for its method.
fn normalise_notification(
    server: &str,
    method: String,
    params: HashMap<String, serde_json::Value>,
    instructions_by_method: &HashMap<String, Vec<String>>,
) -> (Notification, Vec<String>) {
    let instructions = instructions_by_method
        .get(&method)
        .cloned()
        .unwrap_or_default();
    let mut notification = Notification::new(server, method, params);
    if !instructions.is_empty() {
        notification.monitoring_status = MonitoringStatus::Monitored;
        notification.processing_status = ProcessingStatus::Pending;
    }
    (notification, instructions)
}

fn suppressed(interface: ServerInterface, tool: &str) -> bool {
    match interface {
        ServerInterface::Memory => MEMORY_TOOLS.contains(&tool),
        ServerInterface::Rag => RAG_TOOLS.contains(&tool),
        ServerInterface::None => false,
    }
}

fn namespaced(server: &str, mut tool: Tool) -> Tool {
    tool.name = format!("{server}{NAME_SEPARATOR}{}", tool.name);
    tool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_split_requires_exactly_one_separator() {
        assert_eq!(ToolsHost::server_of("srv__tool"), Some(("srv", "tool")));
        assert_eq!(ToolsHost::server_of("plainname"), None);
        assert_eq!(ToolsHost::server_of("a__b__c"), None);
        assert_eq!(ToolsHost::server_of("__tool"), None);
        assert_eq!(ToolsHost::server_of("srv__"), None);
    }

    #[test]
    fn notifications_with_instructions_are_monitored() {
        let mut by_method = HashMap::new();
        by_method.insert(
            "notifications/new_email".to_string(),
            vec!["Tell me if urgent".to_string()],
        );
        let mut params = HashMap::new();
        params.insert(
            "subject".to_string(),
            serde_json::json!("URGENT: server down"),
        );

        let (n, instructions) = normalise_notification(
            "email",
            "notifications/new_email".to_string(),
            params,
            &by_method,
        );
        assert_eq!(n.monitoring_status, MonitoringStatus::Monitored);
        assert_eq!(n.processing_status, ProcessingStatus::Pending);
        assert_eq!(instructions, vec!["Tell me if urgent".to_string()]);
    }

    #[test]
    fn notifications_without_instructions_stay_unmonitored() {
        let by_method = HashMap::new();
        let (n, instructions) = normalise_notification(
            "email",
            "notifications/other".to_string(),
            HashMap::new(),
            &by_method,
        );
        assert_eq!(n.monitoring_status, MonitoringStatus::None);
        assert_eq!(n.processing_status, ProcessingStatus::None);
        assert!(instructions.is_empty());
    }

    #[test]
    fn interface_tools_are_suppressed() {
        assert!(suppressed(ServerInterface::Memory, "remember"));
        assert!(suppressed(ServerInterface::Memory, "recall"));
        assert!(!suppressed(ServerInterface::Memory, "search"));
        assert!(suppressed(ServerInterface::Rag, "knowledge_search"));
        assert!(!suppressed(ServerInterface::None, "remember"));
    }

    fn scripted_host() -> ToolsHost {
        let mut clients = HashMap::new();
        clients.insert(
            "test".to_string(),
            ServerClient::Internal(InternalServer::scripted("test")),
        );
        let mut server_configs = HashMap::new();
        server_configs.insert(
            "test".to_string(),
            ToolServerConfig {
                transport: TransportKind::Internal,
                command: None,
                args: Vec::new(),
                env: HashMap::new(),
                url: None,
                headers: HashMap::new(),
                auth_token: None,
                interface: ServerInterface::None,
                disabled: false,
                required: false,
                notification_instructions: HashMap::new(),
                a2a_metadata: HashMap::new(),
            },
        );
        ToolsHost {
            agent_id: "test-agent".to_string(),
            client_agent_id: None,
            server_configs,
            clients,
            static_tools: RwLock::new(Vec::new()),
            custom_tools: RwLock::new(Vec::new()),
            reverse: RwLock::new(None),
            file_cache: Arc::new(FileCache::new().unwrap()),
            notification_cb: Arc::new(RwLock::new(None)),
            memory_server: None,
            rag_server: None,
        }
    }

    #[tokio::test]
    async fn dispatch_routes_to_internal_server() {
        let host = scripted_host();
        let result = host
            .call_tool("test__tool1", serde_json::json!({ "message": "hi" }))
            .await
            .unwrap();
        assert_eq!(result.text_content(), "FAKE_TOOL_RESPONSE:hi");
    }

    #[tokio::test]
    async fn invalid_names_are_rejected_not_routed() {
        let host = scripted_host();
        let err = host
            .call_tool("test__tool1__extra", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolsError::InvalidName { .. }));
    }

    #[tokio::test]
    async fn unknown_server_is_not_found() {
        let host = scripted_host();
        let err = host.call_tool("ghost__tool", Value::Null).await.unwrap_err();
        assert!(matches!(err, ToolsError::NotFound { .. }));
    }

    #[tokio::test]
    async fn custom_tools_resolve_before_namespacing() {
        let host = scripted_host();
        host.set_tool(
            Tool {
                name: "notification_feedback".to_string(),
                description: "Send feedback".to_string(),
                input_schema: Default::default(),
            },
            Arc::new(|args| {
                Ok(format!(
                    "ack:{}",
                    args.get("message").and_then(|v| v.as_str()).unwrap_or("")
                ))
            }),
        );
        let result = host
            .call_tool(
                "notification_feedback",
                serde_json::json!({ "message": "urgent" }),
            )
            .await
            .unwrap();
        assert_eq!(result.text_content(), "ack:urgent");
    }

    #[tokio::test]
    async fn file_handle_arguments_are_substituted() {
        let host = scripted_host();
        let handle = host
            .file_cache
            .save_content(b"file payload", "text/plain")
            .unwrap();
        let result = host
            .call_tool("test__tool1", serde_json::json!({ "message": handle }))
            .await
            .unwrap();
        assert_eq!(result.text_content(), "FAKE_TOOL_RESPONSE:file payload");
    }
}
