//! Conversation engine: the prompt/tool-call loop.
//!
//! One engine owns one tools host and one history window. `prompt` drives
//! the configured provider over the history, dispatches the tool calls it
//! asks for, feeds results back, and recurses until the model answers in
//! plain text. Engines are serial per session; callers do not overlap
//! `prompt` invocations.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cleverchatty_core::config::CleverChattyConfig;
use cleverchatty_core::placeholders;
use cleverchatty_core::types::{
    ContentBlock, Message, MonitoringStatus, Role, SubRole, Tool, Usage,
};
use cleverchatty_llm::{factory, retry, ChatRequest, Provider};
use cleverchatty_tools::internal::InternalHandler;
use cleverchatty_tools::{ReverseCapability, ToolsError, ToolsHost};

use crate::callbacks::{AgentMessageCallback, EngineCallback, EngineEvent, NotificationCallback};
use crate::error::{EngineError, Result};
use crate::history::HistoryStore;
use crate::processor::NotificationProcessor;

/// Paragraphs of RAG context fetched per prompt.
const RAG_RESULT_COUNT: u32 = 3;

type SubagentMap = Arc<StdMutex<HashMap<String, Arc<ConversationEngine>>>>;
type AgentMessageSlot = Arc<StdRwLock<Option<AgentMessageCallback>>>;

pub struct ConversationEngine {
    config: CleverChattyConfig,
    client_agent_id: Option<String>,
    provider: Arc<dyn Provider>,
    model: String,
    tools: Arc<ToolsHost>,
    history: Mutex<HistoryStore>,
    callback: StdRwLock<Option<EngineCallback>>,
    cancel: CancellationToken,
    subagents: SubagentMap,
    on_finish: StdMutex<Option<Box<dyn FnOnce() + Send>>>,
    process_notifications: bool,
    processor: Mutex<Option<Arc<NotificationProcessor>>>,
    agent_message_cb: AgentMessageSlot,
    usage: StdMutex<Usage>,
    finished: AtomicBool,
}

impl ConversationEngine {
    /// Boot an engine: validate config, resolve the provider, connect the
    /// tools host. Fatal on invalid config or a failing `required` server.
    pub async fn start(
        config: CleverChattyConfig,
        client_agent_id: Option<String>,
    ) -> Result<Arc<Self>> {
        Self::start_inner(config, client_agent_id, true).await
    }

    async fn start_inner(
        config: CleverChattyConfig,
        client_agent_id: Option<String>,
        process_notifications: bool,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let provider = factory::build_provider(&config)?;
        let model = factory::model_name(&config);
        let tools = Arc::new(ToolsHost::start(&config, client_agent_id.clone()).await?);
        let window = config.message_window;

        Ok(Arc::new(Self {
            config,
            client_agent_id,
            provider,
            model,
            tools,
            history: Mutex::new(HistoryStore::new(window)),
            callback: StdRwLock::new(None),
            cancel: CancellationToken::new(),
            subagents: Arc::new(StdMutex::new(HashMap::new())),
            on_finish: StdMutex::new(None),
            process_notifications,
            processor: Mutex::new(None),
            agent_message_cb: Arc::new(StdRwLock::new(None)),
            usage: StdMutex::new(Usage::default()),
            finished: AtomicBool::new(false),
        }))
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn set_callback(&self, cb: EngineCallback) {
        *self.callback.write().unwrap() = Some(cb);
    }

    pub fn clear_callback(&self) {
        *self.callback.write().unwrap() = None;
    }

    /// Register an in-process custom tool on the engine's tools host.
    pub fn set_tool(&self, tool: Tool, handler: InternalHandler) {
        self.tools.set_tool(tool, handler);
    }

    pub fn set_reverse_capability(&self, capability: Arc<dyn ReverseCapability>) {
        self.tools.set_reverse_capability(capability);
    }

    pub fn set_agent_message_callback(&self, cb: AgentMessageCallback) {
        *self.agent_message_cb.write().unwrap() = Some(cb);
    }

    pub(crate) fn agent_message_slot(&self) -> AgentMessageSlot {
        Arc::clone(&self.agent_message_cb)
    }

    /// Wire the notification pipeline: every server notification reaches
    /// `cb`; monitored ones are also queued for the processor subagent.
    pub async fn set_notification_callback(self: &Arc<Self>, cb: NotificationCallback) -> Result<()> {
        let wants_processor = self.process_notifications
            && self
                .config
                .tools_servers
                .values()
                .any(|s| !s.disabled && !s.notification_instructions.is_empty());

        let processor = if wants_processor {
            let p = NotificationProcessor::start(self).await?;
            *self.processor.lock().await = Some(Arc::clone(&p));
            Some(p)
        } else {
            None
        };

        let host_cb: cleverchatty_tools::NotificationCallback =
            Arc::new(move |notification, instructions| {
                let monitored = notification.monitoring_status == MonitoringStatus::Monitored;
                cb(notification.clone());
                if monitored {
                    if let Some(p) = &processor {
                        p.enqueue(notification, instructions);
                    }
                }
            });
        self.tools.set_notification_callback(host_cb).await;
        Ok(())
    }

    pub async fn history(&self) -> Vec<Message> {
        self.history.lock().await.snapshot()
    }

    pub fn usage(&self) -> Usage {
        *self.usage.lock().unwrap()
    }

    pub fn tools_for_llm(&self) -> Vec<Tool> {
        self.tools.all_tools_for_llm()
    }

    pub fn tools_host(&self) -> &Arc<ToolsHost> {
        &self.tools
    }

    /// Run one full conversational turn.
    pub async fn prompt(&self, text: &str) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(String::new());
        }

        match text {
            "/tools" => return Ok(self.render_tools()),
            "/servers" => return Ok(self.render_servers()),
            "/history" => return Ok(self.history.lock().await.render()),
            _ => {}
        }

        let mut history = self.history.lock().await;

        if history.is_empty()
            && (!self.config.system_instruction.is_empty() || self.client_agent_id.is_some())
        {
            let instruction = placeholders::expand(
                &self.config.system_instruction,
                &self.config.agent_id,
                self.client_agent_id.as_deref(),
            );
            if !instruction.is_empty() {
                history.push(Message::instruction(instruction));
            }
        }

        history.prune();
        self.emit(EngineEvent::PromptAccepted);

        self.inject_memory(&mut history, text).await;
        self.inject_rag_context(&mut history, text).await;

        history.push(Message::user_prompt(text));
        self.remember_async("user", text.to_string());

        self.process_prompt(&mut history).await
    }

    /// The provider ⇄ tools loop. Runs until a turn produces no tool
    /// results, then returns its text.
    async fn process_prompt(&self, history: &mut HistoryStore) -> Result<String> {
        loop {
            self.emit(EngineEvent::Thinking);

            // Fresh snapshot every turn so dynamically registered reverse
            // and custom tools show up mid-conversation.
            let tools = if self.provider.supports_tools() {
                self.tools.all_tools_for_llm()
            } else {
                Vec::new()
            };
            let req = ChatRequest {
                model: self.model.clone(),
                system: None,
                messages: history.snapshot(),
                tools,
                max_tokens: 4096,
            };
            let turn = retry::create_with_retry(self.provider.as_ref(), &req, &self.cancel).await?;

            {
                let mut usage = self.usage.lock().unwrap();
                usage.input_tokens += turn.usage.input_tokens;
                usage.output_tokens += turn.usage.output_tokens;
            }

            if let Some(ref text) = turn.text {
                self.emit(EngineEvent::ResponseReceived { text: text.clone() });
                self.remember_async("assistant", text.clone());
            }

            let mut assistant = Message {
                role: Role::Assistant,
                sub_role: None,
                blocks: Vec::new(),
            };
            if let Some(ref text) = turn.text {
                assistant.blocks.push(ContentBlock::Text { text: text.clone() });
            }

            let mut results: Vec<ContentBlock> = Vec::new();
            for call in &turn.tool_calls {
                if !self.tools.is_routable(&call.name) {
                    // Malformed or unknown names are skipped; the loop
                    // continues with the remaining calls.
                    warn!(tool = %call.name, "unroutable tool call skipped");
                    continue;
                }

                self.emit(EngineEvent::ToolCalling {
                    tool: call.name.clone(),
                });
                assistant.blocks.push(ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                });

                match self.dispatch_tool_call(&call.name, call.input.clone()).await {
                    Ok(result) => {
                        let text = result.text_content();
                        if result.is_error {
                            self.emit(EngineEvent::ToolError {
                                tool: call.name.clone(),
                                error: text.clone(),
                            });
                        } else if let Some((server, _)) = ToolsHost::server_of(&call.name) {
                            if self.tools.is_notification_producer(server) {
                                self.remember_async(
                                    "tool_request",
                                    format!("{}({})", call.name, call.input),
                                );
                                self.remember_async("tool_response", text.clone());
                            }
                        }
                        results.push(ContentBlock::ToolResult {
                            tool_use_id: call.id.clone(),
                            text,
                            structured: result.structured_content,
                        });
                    }
                    Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                    Err(e) => {
                        // Failures become observable tool results so the
                        // LLM can react instead of the turn dying.
                        let message = e.to_string();
                        self.emit(EngineEvent::ToolError {
                            tool: call.name.clone(),
                            error: message.clone(),
                        });
                        results.push(ContentBlock::ToolResult {
                            tool_use_id: call.id.clone(),
                            text: message,
                            structured: None,
                        });
                    }
                }
            }

            if !assistant.blocks.is_empty() {
                history.push(assistant);
            }

            if results.is_empty() {
                return Ok(turn.text.unwrap_or_default());
            }
            history.push(Message {
                role: Role::User,
                sub_role: Some(SubRole::ToolResponse),
                blocks: results,
            });
        }
    }

    /// Run one tool call on a fresh task, raced against cancellation.
    async fn dispatch_tool_call(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> Result<cleverchatty_protocol::mcp::CallToolResult> {
        let host = Arc::clone(&self.tools);
        let tool_name = name.to_string();
        let handle = tokio::spawn(async move { host.call_tool(&tool_name, input).await });

        let outcome = tokio::select! {
            joined = handle => joined
                .map_err(|e| ToolsError::Transport(format!("tool task panicked: {e}")))?,
            _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
        };
        outcome.map_err(EngineError::from)
    }

    /// Recall memories for the prompt and refresh the single memory note.
    async fn inject_memory(&self, history: &mut HistoryStore, prompt: &str) {
        if !self.tools.has_memory_server() {
            return;
        }
        self.emit(EngineEvent::MemoryRetrieval);
        match self.tools.memory_recall(prompt).await {
            Ok(Some(note)) => {
                history.remove_memory_notes();
                history.push(Message::memory_note(note));
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "memory recall failed"),
        }
    }

    /// Query the knowledge base and append context paragraphs.
    async fn inject_rag_context(&self, history: &mut HistoryStore, prompt: &str) {
        if !self.tools.has_rag_server() {
            return;
        }
        self.emit(EngineEvent::RagRetrieval);

        let query = self.preprocess_rag_query(prompt).await;
        match self.tools.rag_search(&query, RAG_RESULT_COUNT).await {
            Ok(Some(context)) => {
                let prefix = &self.config.rag_settings.context_prefix;
                for paragraph in context.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
                    history.push(Message::rag_context(format!("{prefix} {paragraph}")));
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "knowledge search failed"),
        }
    }

    /// Optionally rewrite the prompt into a search query via an extra
    /// LLM call, gated by the configured preprocessing prompt.
    async fn preprocess_rag_query(&self, prompt: &str) -> String {
        let rag = &self.config.rag_settings;
        if !rag.require_preprocessing || rag.preprocessing_prompt.is_empty() {
            return prompt.to_string();
        }
        let req = ChatRequest {
            model: self.model.clone(),
            system: None,
            messages: vec![Message::user_prompt(format!(
                "{}\n\n{}",
                rag.preprocessing_prompt, prompt
            ))],
            tools: Vec::new(),
            max_tokens: 4096,
        };
        match retry::create_with_retry(self.provider.as_ref(), &req, &self.cancel).await {
            Ok(turn) => turn
                .text
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| prompt.to_string()),
            Err(e) => {
                warn!(error = %e, "RAG query preprocessing failed, using raw prompt");
                prompt.to_string()
            }
        }
    }

    /// Push one line to the memory server off the prompt path.
    fn remember_async(&self, role: &'static str, content: String) {
        if !self.tools.has_memory_server() {
            return;
        }
        let host = Arc::clone(&self.tools);
        tokio::spawn(async move {
            if let Err(e) = host.memory_remember(role, &content).await {
                debug!(error = %e, "memory remember failed");
            }
        });
    }

    /// Spawn a child engine sharing this engine's provider config.
    /// Children never process notifications, which keeps a subagent from
    /// spawning its own subagents.
    pub async fn spawn_subagent(
        self: &Arc<Self>,
        name: &str,
        instruction: &str,
    ) -> Result<Arc<ConversationEngine>> {
        let mut config = self.config.clone();
        config.system_instruction = instruction.to_string();

        let child = Self::start_inner(config, None, false).await?;

        let map_weak = Arc::downgrade(&self.subagents);
        let child_name = name.to_string();
        child.set_on_finish(Box::new(move || {
            if let Some(map) = map_weak.upgrade() {
                map.lock().unwrap().remove(&child_name);
            }
        }));

        self.subagents
            .lock()
            .unwrap()
            .insert(name.to_string(), Arc::clone(&child));
        info!(subagent = %name, "subagent spawned");
        Ok(child)
    }

    /// Detach and finish a child. The parent clears the child's finish
    /// callback first so the removal cannot re-enter the map.
    pub async fn remove_subagent(&self, name: &str) {
        let child = self.subagents.lock().unwrap().remove(name);
        if let Some(child) = child {
            child.clear_on_finish();
            child.finish().await;
        }
    }

    fn set_on_finish(&self, cb: Box<dyn FnOnce() + Send>) {
        *self.on_finish.lock().unwrap() = Some(cb);
    }

    fn clear_on_finish(&self) {
        self.on_finish.lock().unwrap().take();
    }

    /// Terminate the engine: cancel in-flight work, stop the processor,
    /// finish subagents, shut down tool clients. Idempotent.
    pub fn finish(self: &Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let this = Arc::clone(self);
        Box::pin(async move {
            if this.finished.swap(true, Ordering::SeqCst) {
                return;
            }
            this.cancel.cancel();

            let processor = this.processor.lock().await.take();
            if let Some(processor) = processor {
                processor.stop().await;
            }

            // Never hold the map lock across a child's finish.
            let children: Vec<Arc<ConversationEngine>> = {
                let mut map = this.subagents.lock().unwrap();
                map.drain().map(|(_, child)| child).collect()
            };
            for child in children {
                child.clear_on_finish();
                child.finish().await;
            }

            this.tools.finish().await;

            let cb = this.on_finish.lock().unwrap().take();
            if let Some(cb) = cb {
                cb();
            }
            info!("conversation engine finished");
        })
    }

    fn emit(&self, event: EngineEvent) {
        let cb = self.callback.read().unwrap().clone();
        if let Some(cb) = cb {
            cb(event);
        }
    }

    fn render_tools(&self) -> String {
        let tools = self.tools.all_tools_for_llm();
        if tools.is_empty() {
            return "No tools available.".to_string();
        }
        let mut out = String::from("**Available tools**\n");
        for tool in &tools {
            let desc = tool.description.lines().next().unwrap_or("");
            out.push_str(&format!("- `{}` — {}\n", tool.name, desc));
        }
        out
    }

    fn render_servers(&self) -> String {
        let rows = self.tools.list_servers();
        if rows.is_empty() {
            return "No tool servers configured.".to_string();
        }
        let mut out = String::from("**Tool servers**\n");
        for (name, transport, interface, tool_count) in rows {
            out.push_str(&format!(
                "- `{}` — {:?} transport, interface {:?}, {} tool(s)\n",
                name, transport, interface, tool_count
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use cleverchatty_core::config::*;

    use super::*;

    fn test_config(with_tools: bool) -> CleverChattyConfig {
        let mut tools_servers = HashMap::new();
        if with_tools {
            tools_servers.insert(
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
        }
        CleverChattyConfig {
            agent_id: "tester".to_string(),
            model: "mock:mock".to_string(),
            system_instruction: String::new(),
            message_window: 10,
            log_file_path: String::new(),
            debug_mode: false,
            providers: ProvidersConfig::default(),
            server: ServerSettings::default(),
            rag_settings: RagSettings::default(),
            a2a_settings: A2aSettings::default(),
            reverse_mcp_settings: ReverseMcpSettings::default(),
            tools_servers,
        }
    }

    fn record_events(engine: &ConversationEngine) -> Arc<StdMutex<Vec<(String, String, String)>>> {
        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        engine.set_callback(Arc::new(move |event| {
            let (code, message, extra) = event.parts();
            sink.lock()
                .unwrap()
                .push((code.to_string(), message, extra));
        }));
        events
    }

    #[tokio::test]
    async fn basic_chat_round_trip() {
        let engine = ConversationEngine::start(test_config(false), None)
            .await
            .unwrap();
        let events = record_events(&engine);

        let response = engine.prompt("Hello, how are you?").await.unwrap();
        assert_eq!(response, "FAKE_RESPONSE:Hello, how are you?");

        // exactly two messages: user prompt and assistant reply
        let history = engine.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);

        let events = events.lock().unwrap();
        assert!(events
            .iter()
            .any(|(code, message, _)| code == "response_received"
                && message == "FAKE_RESPONSE:Hello, how are you?"));

        engine.finish().await;
    }

    #[tokio::test]
    async fn single_tool_round_trip() {
        let engine = ConversationEngine::start(test_config(true), None)
            .await
            .unwrap();
        let events = record_events(&engine);

        let response = engine.prompt("tool:1:Hello, how are you?").await.unwrap();
        assert_eq!(
            response,
            "FAKE_ANALYSED_RESPONSE:FAKE_TOOL_RESPONSE:Hello, how are you?"
        );

        let events_snapshot = events.lock().unwrap().clone();
        assert!(events_snapshot
            .iter()
            .any(|(code, _, extra)| code == "tool_calling" && extra == "test__tool1"));
        assert!(events_snapshot
            .iter()
            .any(|(code, message, _)| code == "response_received"
                && message == "FAKE_ANALYSED_RESPONSE:FAKE_TOOL_RESPONSE:Hello, how are you?"));

        // history pairing invariant holds
        let history = engine.history().await;
        let uses = history
            .iter()
            .flat_map(|m| &m.blocks)
            .filter(|b| matches!(b, ContentBlock::ToolUse { .. }))
            .count();
        let results = history
            .iter()
            .flat_map(|m| &m.blocks)
            .filter(|b| matches!(b, ContentBlock::ToolResult { .. }))
            .count();
        assert_eq!(uses, 1);
        assert_eq!(results, 1);

        engine.finish().await;
    }

    #[tokio::test]
    async fn empty_prompt_is_a_noop() {
        let engine = ConversationEngine::start(test_config(false), None)
            .await
            .unwrap();
        let response = engine.prompt("   ").await.unwrap();
        assert_eq!(response, "");
        assert!(engine.history().await.is_empty());
        engine.finish().await;
    }

    #[tokio::test]
    async fn slash_commands_render_without_touching_history() {
        let engine = ConversationEngine::start(test_config(true), None)
            .await
            .unwrap();

        let tools = engine.prompt("/tools").await.unwrap();
        assert!(tools.contains("test__tool1"));

        let servers = engine.prompt("/servers").await.unwrap();
        assert!(servers.contains("test"));

        let history = engine.prompt("/history").await.unwrap();
        assert!(history.contains("empty"));

        assert!(engine.history().await.is_empty());
        engine.finish().await;
    }

    #[tokio::test]
    async fn instruction_is_injected_once_with_placeholders() {
        let mut config = test_config(false);
        config.system_instruction = "You are {AGENT_ID} serving {CLIENT_AGENT_ID}.".to_string();
        let engine = ConversationEngine::start(config, Some("client-7".to_string()))
            .await
            .unwrap();

        engine.prompt("one").await.unwrap();
        engine.prompt("two").await.unwrap();

        let history = engine.history().await;
        let instructions: Vec<_> = history
            .iter()
            .filter(|m| m.sub_role == Some(SubRole::Instruction))
            .collect();
        assert_eq!(instructions.len(), 1);
        assert_eq!(
            instructions[0].text_content(),
            "You are tester serving client-7."
        );
        engine.finish().await;
    }

    #[tokio::test]
    async fn subagent_removal_runs_on_finish_exactly_once() {
        let engine = ConversationEngine::start(test_config(false), None)
            .await
            .unwrap();
        let child = engine
            .spawn_subagent("helper", "You are a helper.")
            .await
            .unwrap();

        assert_eq!(engine.subagents.lock().unwrap().len(), 1);

        // child-initiated finish removes it from the parent
        child.finish().await;
        assert!(engine.subagents.lock().unwrap().is_empty());

        // finishing again is harmless
        child.finish().await;
        engine.finish().await;
    }

    #[tokio::test]
    async fn parent_finish_reaps_children() {
        let engine = ConversationEngine::start(test_config(false), None)
            .await
            .unwrap();
        let child = engine
            .spawn_subagent("helper", "You are a helper.")
            .await
            .unwrap();

        engine.finish().await;
        assert!(child.finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn notification_callback_wires_up_a_processor() {
        let mut config = test_config(false);
        let mut instructions = HashMap::new();
        instructions.insert(
            "notifications/new_email".to_string(),
            vec!["Tell me if urgent".to_string()],
        );
        config.tools_servers.insert(
            "email".to_string(),
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
                notification_instructions: instructions,
                a2a_metadata: HashMap::new(),
            },
        );

        let engine = ConversationEngine::start(config, None).await.unwrap();
        engine
            .set_notification_callback(Arc::new(|_notification| {}))
            .await
            .unwrap();
        assert!(engine.processor.lock().await.is_some());
        engine.finish().await;
    }

    #[tokio::test]
    async fn subagents_do_not_spawn_processors() {
        let engine = ConversationEngine::start(test_config(false), None)
            .await
            .unwrap();
        let child = engine
            .spawn_subagent("helper", "You are a helper.")
            .await
            .unwrap();
        child
            .set_notification_callback(Arc::new(|_notification| {}))
            .await
            .unwrap();
        assert!(child.processor.lock().await.is_none());
        engine.finish().await;
    }

    #[tokio::test]
    async fn history_stays_within_the_window() {
        let mut config = test_config(false);
        config.message_window = 4;
        let engine = ConversationEngine::start(config, None).await.unwrap();

        for i in 0..8 {
            engine.prompt(&format!("message {i}")).await.unwrap();
        }

        // each turn adds at most user + assistant after pruning to the window
        assert!(engine.history().await.len() <= 4 + 2);
        engine.finish().await;
    }

    #[tokio::test]
    async fn usage_accumulates_across_turns() {
        let engine = ConversationEngine::start(test_config(false), None)
            .await
            .unwrap();
        engine.prompt("Hello, how are you?").await.unwrap();
        let usage = engine.usage();
        assert!(usage.output_tokens > 0);
        engine.finish().await;
    }
}
