//! Reverse-MCP listener: inbound WebSocket tool servers.
//!
//! Firewalled MCP servers dial us at `/ws`, authenticate with a server
//! name from the config allowlist (plus an optional bearer token), and
//! are then driven as ordinary MCP peers: newline-terminated JSON-RPC in
//! WebSocket text frames, `initialize` + `tools/list` on registration,
//! ping keepalive afterwards. Connected servers surface to every tools
//! host through the [`ReverseCapability`] seam.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cleverchatty_core::config::{CleverChattyConfig, ToolServerConfig, TransportKind};
use cleverchatty_core::types::Tool;
use cleverchatty_protocol::jsonrpc::{RpcMessage, RpcRequest, RpcResponse, METHOD_NOT_FOUND};
use cleverchatty_protocol::mcp::{
    CallToolParams, CallToolResult, InitializeParams, ListToolsResult, METHOD_CALL_TOOL,
    METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_LIST_TOOLS,
};
use cleverchatty_tools::{ReverseCapability, ToolsError};

const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(30);
const LIST_TOOLS_TIMEOUT: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(30);
const READ_DEADLINE: Duration = Duration::from_secs(60);

const SERVER_NAME_HEADER: &str = "x-mcp-server-name";

enum Outbound {
    Frame(String),
    Ping,
}

pub struct ReverseListener {
    /// Reverse-MCP entries of the tools-server table.
    allowlist: HashMap<String, ToolServerConfig>,
    connections: DashMap<String, Arc<ReverseConnection>>,
    shutdown: CancellationToken,
}

struct ReverseConnection {
    server_name: String,
    tools: StdRwLock<Vec<Tool>>,
    outbound: mpsc::Sender<Outbound>,
    pending: Mutex<HashMap<i64, oneshot::Sender<RpcResponse>>>,
    next_id: AtomicI64,
    cancel: CancellationToken,
}

impl ReverseConnection {
    fn new(server_name: &str, outbound: mpsc::Sender<Outbound>, cancel: CancellationToken) -> Self {
        Self {
            server_name: server_name.to_string(),
            tools: StdRwLock::new(Vec::new()),
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            cancel,
        }
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, ToolsError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = serde_json::to_string(&RpcRequest::new(id, method, params))
            .map_err(ToolsError::Serialization)?;
        if self.outbound.send(Outbound::Frame(frame)).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(ToolsError::Transport(format!(
                "reverse connection '{}' closed",
                self.server_name
            )));
        }

        let wait = async {
            tokio::select! {
                res = rx => res.map_err(|_| ToolsError::Transport(format!(
                    "reverse connection '{}' closed mid-request",
                    self.server_name
                ))),
                _ = self.cancel.cancelled() => Err(ToolsError::Cancelled),
            }
        };

        let response = match timeout {
            Some(t) => match tokio::time::timeout(t, wait).await {
                Ok(r) => r?,
                Err(_) => {
                    self.pending.lock().await.remove(&id);
                    return Err(ToolsError::Timeout {
                        what: format!("{} on reverse '{}'", method, self.server_name),
                    });
                }
            },
            None => wait.await?,
        };

        if let Some(err) = response.error {
            return Err(ToolsError::CallFailed {
                server: self.server_name.clone(),
                tool: method.to_string(),
                reason: err.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn notify(&self, method: &str) -> Result<(), ToolsError> {
        let frame = serde_json::to_string(&RpcRequest::notification(method, None))
            .map_err(ToolsError::Serialization)?;
        self.outbound
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| ToolsError::Transport("reverse connection closed".to_string()))
    }
}

impl ReverseListener {
    pub fn new(config: &CleverChattyConfig, shutdown: CancellationToken) -> Arc<Self> {
        let allowlist = config
            .tools_servers
            .iter()
            .filter(|(_, s)| s.transport == TransportKind::ReverseMcp && !s.disabled)
            .map(|(name, s)| (name.clone(), s.clone()))
            .collect();
        Arc::new(Self {
            allowlist,
            connections: DashMap::new(),
            shutdown,
        })
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler))
            .with_state(Arc::clone(self))
    }

    /// Validate the handshake before the WebSocket upgrade.
    /// Returns the server name, or the HTTP status to reject with.
    fn authenticate(
        &self,
        headers: &HeaderMap,
        query: &HashMap<String, String>,
    ) -> Result<String, StatusCode> {
        let name = headers
            .get(SERVER_NAME_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .or_else(|| query.get("server_name").cloned())
            .ok_or(StatusCode::BAD_REQUEST)?;

        let entry = self.allowlist.get(&name).ok_or(StatusCode::UNAUTHORIZED)?;

        if let Some(expected) = &entry.auth_token {
            let presented = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(String::from)
                .or_else(|| query.get("token").cloned());
            if presented.as_deref() != Some(expected.as_str()) {
                return Err(StatusCode::UNAUTHORIZED);
            }
        }
        Ok(name)
    }

    /// Register a fresh connection, displacing any prior one by the same
    /// name (its context is cancelled, closing its socket).
    fn register(&self, connection: Arc<ReverseConnection>) {
        if let Some(old) = self
            .connections
            .insert(connection.server_name.clone(), Arc::clone(&connection))
        {
            info!(server = %old.server_name, "displacing previous reverse connection");
            old.cancel.cancel();
        }
    }

    fn evict(&self, server_name: &str, connection: &Arc<ReverseConnection>) {
        // Only evict our own entry; a displacing connection may already
        // have taken the slot.
        self.connections
            .remove_if(server_name, |_, current| Arc::ptr_eq(current, connection));
        connection.cancel.cancel();
    }
}

#[async_trait]
impl ReverseCapability for ReverseListener {
    fn get_tools(&self, server: &str) -> Vec<Tool> {
        self.connections
            .get(server)
            .map(|c| c.tools.read().unwrap().clone())
            .unwrap_or_default()
    }

    fn get_all_tools(&self) -> HashMap<String, Vec<Tool>> {
        self.connections
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().tools.read().unwrap().clone()))
            .collect()
    }

    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        args: Value,
    ) -> Result<CallToolResult, ToolsError> {
        let connection = self
            .connections
            .get(server)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| ToolsError::NotFound {
                name: format!("{server}__{tool}"),
            })?;
        let params = serde_json::to_value(CallToolParams {
            name: tool.to_string(),
            arguments: args,
        })?;
        let result = connection.request(METHOD_CALL_TOOL, Some(params), None).await?;
        Ok(serde_json::from_value(result)?)
    }
}

async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(listener): State<Arc<ReverseListener>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    match listener.authenticate(&headers, &query) {
        Ok(server_name) => ws
            .on_upgrade(move |socket| handle_connection(socket, server_name, listener))
            .into_response(),
        Err(status) => {
            warn!(status = %status, "reverse handshake rejected");
            status.into_response()
        }
    }
}

/// Per-connection task — owns the socket for its whole lifetime.
async fn handle_connection(socket: WebSocket, server_name: String, listener: Arc<ReverseListener>) {
    info!(server = %server_name, "reverse MCP server connected");

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(64);
    let cancel = listener.shutdown.child_token();
    let connection = Arc::new(ReverseConnection::new(&server_name, out_tx, cancel.clone()));

    listener.register(Arc::clone(&connection));

    // Writer: one WebSocket text message per JSON-RPC frame, newline
    // terminated. The single writer task serialises frame boundaries.
    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                out = out_rx.recv() => match out {
                    Some(Outbound::Frame(frame)) => {
                        let framed = format!("{frame}\n");
                        if sink.send(Message::Text(framed.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Ping) => {
                        if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = writer_cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Handshake on the live connection.
    let registrar = Arc::clone(&connection);
    let registrar_listener = Arc::clone(&listener);
    let registrar_name = server_name.clone();
    tokio::spawn(async move {
        if let Err(e) = register_peer(&registrar).await {
            warn!(server = %registrar_name, error = %e, "reverse registration failed");
            registrar_listener.evict(&registrar_name, &registrar);
        }
    });

    // Reader: buffer partial text, split on newlines, dispatch frames.
    let mut buffer = String::new();
    let mut ping_ticker = tokio::time::interval(PING_INTERVAL);
    ping_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut read_deadline = Box::pin(tokio::time::sleep(READ_DEADLINE));

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        buffer.push_str(&text);
                        for frame in split_frames(&mut buffer) {
                            dispatch_frame(&connection, &frame).await;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        read_deadline
                            .as_mut()
                            .reset(tokio::time::Instant::now() + READ_DEADLINE);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        // axum answers pings automatically; just extend.
                        let _ = data;
                        read_deadline
                            .as_mut()
                            .reset(tokio::time::Instant::now() + READ_DEADLINE);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(server = %server_name, error = %e, "reverse read error");
                        break;
                    }
                }
            }
            _ = ping_ticker.tick() => {
                if connection.outbound.send(Outbound::Ping).await.is_err() {
                    break;
                }
            }
            _ = &mut read_deadline => {
                warn!(server = %server_name, "reverse connection read deadline expired");
                break;
            }
            _ = cancel.cancelled() => break,
        }
    }

    listener.evict(&server_name, &connection);
    writer.abort();
    info!(server = %server_name, "reverse MCP server disconnected");
}

/// MCP handshake with the connected server: initialize, initialized,
/// tools/list; discovered tools are stored on the connection.
async fn register_peer(connection: &Arc<ReverseConnection>) -> Result<(), ToolsError> {
    let params = serde_json::to_value(InitializeParams::new(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
    ))?;
    connection
        .request(METHOD_INITIALIZE, Some(params), Some(INITIALIZE_TIMEOUT))
        .await?;
    connection.notify(METHOD_INITIALIZED).await?;

    let result = connection
        .request(METHOD_LIST_TOOLS, None, Some(LIST_TOOLS_TIMEOUT))
        .await?;
    let parsed: ListToolsResult = serde_json::from_value(result)?;
    let tools: Vec<Tool> = parsed
        .tools
        .into_iter()
        .map(|t| Tool {
            name: t.name,
            description: t.description,
            input_schema: t.input_schema,
        })
        .collect();

    info!(
        server = %connection.server_name,
        tools = tools.len(),
        "reverse MCP server registered"
    );
    *connection.tools.write().unwrap() = tools;
    Ok(())
}

/// Remove complete newline-terminated frames from the buffer, leaving any
/// partial tail for the next read.
fn split_frames(buffer: &mut String) -> Vec<String> {
    let mut frames = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let frame: String = buffer.drain(..=pos).collect();
        let trimmed = frame.trim();
        if !trimmed.is_empty() {
            frames.push(trimmed.to_string());
        }
    }
    frames
}

async fn dispatch_frame(connection: &Arc<ReverseConnection>, frame: &str) {
    match RpcMessage::parse(frame) {
        Ok(RpcMessage::Response(res)) => {
            let id = res.id.as_i64().unwrap_or(-1);
            let sender = connection.pending.lock().await.remove(&id);
            match sender {
                Some(tx) => {
                    let _ = tx.send(res);
                }
                None => debug!(server = %connection.server_name, id, "response for unknown id"),
            }
        }
        Ok(RpcMessage::Notification(n)) => {
            debug!(server = %connection.server_name, method = %n.method, "reverse notification");
        }
        Ok(RpcMessage::Request(req)) => {
            let id = req.id.unwrap_or(Value::Null);
            let res = RpcResponse::err(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", req.method),
            );
            if let Ok(frame) = serde_json::to_string(&res) {
                let _ = connection.outbound.send(Outbound::Frame(frame)).await;
            }
        }
        Err(e) => {
            warn!(server = %connection.server_name, error = %e, "malformed reverse frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use cleverchatty_core::config::*;

    use super::*;

    fn config_with_reverse(auth_token: Option<&str>) -> CleverChattyConfig {
        let mut tools_servers = HashMap::new();
        tools_servers.insert(
            "remote1".to_string(),
            ToolServerConfig {
                transport: TransportKind::ReverseMcp,
                command: None,
                args: Vec::new(),
                env: HashMap::new(),
                url: None,
                headers: HashMap::new(),
                auth_token: auth_token.map(String::from),
                interface: ServerInterface::None,
                disabled: false,
                required: false,
                notification_instructions: HashMap::new(),
                a2a_metadata: HashMap::new(),
            },
        );
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
            reverse_mcp_settings: ReverseMcpSettings {
                enabled: true,
                listen_host: "127.0.0.1:0".to_string(),
                tls: TlsSettings::default(),
            },
            tools_servers,
        }
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn handshake_accepts_query_name_and_token() {
        let listener =
            ReverseListener::new(&config_with_reverse(Some("t")), CancellationToken::new());
        let name = listener
            .authenticate(
                &HeaderMap::new(),
                &query(&[("server_name", "remote1"), ("token", "t")]),
            )
            .unwrap();
        assert_eq!(name, "remote1");
    }

    #[test]
    fn handshake_accepts_header_name_and_bearer() {
        let listener =
            ReverseListener::new(&config_with_reverse(Some("t")), CancellationToken::new());
        let mut headers = HeaderMap::new();
        headers.insert(SERVER_NAME_HEADER, "remote1".parse().unwrap());
        headers.insert("authorization", "Bearer t".parse().unwrap());
        let name = listener.authenticate(&headers, &HashMap::new()).unwrap();
        assert_eq!(name, "remote1");
    }

    #[test]
    fn handshake_rejects_bad_token_and_unknown_server() {
        let listener =
            ReverseListener::new(&config_with_reverse(Some("t")), CancellationToken::new());

        let err = listener
            .authenticate(
                &HeaderMap::new(),
                &query(&[("server_name", "remote1"), ("token", "wrong")]),
            )
            .unwrap_err();
        assert_eq!(err, StatusCode::UNAUTHORIZED);

        let err = listener
            .authenticate(&HeaderMap::new(), &query(&[("server_name", "ghost")]))
            .unwrap_err();
        assert_eq!(err, StatusCode::UNAUTHORIZED);

        let err = listener
            .authenticate(&HeaderMap::new(), &HashMap::new())
            .unwrap_err();
        assert_eq!(err, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn token_is_optional_when_not_configured() {
        let listener = ReverseListener::new(&config_with_reverse(None), CancellationToken::new());
        let name = listener
            .authenticate(&HeaderMap::new(), &query(&[("server_name", "remote1")]))
            .unwrap();
        assert_eq!(name, "remote1");
    }

    #[test]
    fn frame_splitting_buffers_partials() {
        let mut buffer = String::from("{\"a\":1}\n{\"b\":");
        let frames = split_frames(&mut buffer);
        assert_eq!(frames, vec!["{\"a\":1}".to_string()]);
        assert_eq!(buffer, "{\"b\":");

        buffer.push_str("2}\n");
        let frames = split_frames(&mut buffer);
        assert_eq!(frames, vec!["{\"b\":2}".to_string()]);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn displacement_cancels_the_prior_connection() {
        let listener =
            ReverseListener::new(&config_with_reverse(None), CancellationToken::new());

        let (tx1, _rx1) = mpsc::channel(4);
        let first = Arc::new(ReverseConnection::new(
            "remote1",
            tx1,
            CancellationToken::new(),
        ));
        listener.register(Arc::clone(&first));

        let (tx2, _rx2) = mpsc::channel(4);
        let second = Arc::new(ReverseConnection::new(
            "remote1",
            tx2,
            CancellationToken::new(),
        ));
        listener.register(Arc::clone(&second));

        assert!(first.cancel.is_cancelled());
        assert!(!second.cancel.is_cancelled());

        // eviction of the displaced connection must not remove the winner
        listener.evict("remote1", &first);
        assert!(listener.connections.contains_key("remote1"));

        listener.evict("remote1", &second);
        assert!(!listener.connections.contains_key("remote1"));
    }

    #[tokio::test]
    async fn requests_resolve_when_the_response_frame_arrives() {
        let (tx, mut rx) = mpsc::channel(4);
        let conn = Arc::new(ReverseConnection::new(
            "remote1",
            tx,
            CancellationToken::new(),
        ));

        let caller = Arc::clone(&conn);
        let task =
            tokio::spawn(async move { caller.request(METHOD_LIST_TOOLS, None, None).await });

        // pick the request id off the outbound frame and answer it
        let Some(Outbound::Frame(frame)) = rx.recv().await else {
            panic!("expected an outbound frame");
        };
        let sent: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(sent["method"], METHOD_LIST_TOOLS);
        let response = serde_json::to_string(&RpcResponse::ok(
            sent["id"].clone(),
            serde_json::json!({ "tools": [] }),
        ))
        .unwrap();
        dispatch_frame(&conn, &response).await;

        let result = task.await.unwrap().unwrap();
        assert!(result["tools"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancellation_unblocks_pending_requests() {
        let (tx, _rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let conn = Arc::new(ReverseConnection::new("remote1", tx, cancel.clone()));

        let caller = Arc::clone(&conn);
        let task =
            tokio::spawn(async move { caller.request(METHOD_CALL_TOOL, None, None).await });
        tokio::task::yield_now().await;
        cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, ToolsError::Cancelled));
    }

    #[tokio::test]
    async fn tools_snapshots_are_copies() {
        let listener =
            ReverseListener::new(&config_with_reverse(None), CancellationToken::new());
        let (tx, _rx) = mpsc::channel(4);
        let conn = Arc::new(ReverseConnection::new(
            "remote1",
            tx,
            CancellationToken::new(),
        ));
        *conn.tools.write().unwrap() = vec![Tool {
            name: "tool1".to_string(),
            description: "d".to_string(),
            input_schema: Default::default(),
        }];
        listener.register(conn);

        let all = listener.get_all_tools();
        assert_eq!(all["remote1"].len(), 1);
        assert_eq!(listener.get_tools("remote1")[0].name, "tool1");
        assert!(listener.get_tools("ghost").is_empty());
    }
}
