//! MCP client: request/response correlation over any transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, warn};

use cleverchatty_protocol::jsonrpc::{RpcMessage, RpcRequest, RpcResponse};
use cleverchatty_protocol::mcp::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, ListToolsResult, McpTool,
    METHOD_CALL_TOOL, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_LIST_TOOLS,
};

use crate::error::{Result, ToolsError};
use crate::mcp::transport::{self, McpTransport, TransportConfig};

pub const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(30);
pub const LIST_TOOLS_TIMEOUT: Duration = Duration::from_secs(10);

/// Invoked for every server-initiated notification: `(method, params)`.
pub type NotificationHandler = Arc<dyn Fn(String, HashMap<String, Value>) + Send + Sync>;

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<RpcResponse>>>>;

pub struct McpClient {
    server_name: String,
    transport: Box<dyn McpTransport>,
    next_id: AtomicI64,
    pending: PendingMap,
    notification_handler: Arc<RwLock<Option<NotificationHandler>>>,
}

impl McpClient {
    /// Connect the transport and spawn the inbound dispatch loop.
    /// Does not issue `initialize`; callers do that with its own deadline.
    pub async fn start(server_name: &str, config: TransportConfig) -> Result<Self> {
        let (transport, inbound) = transport::start(config).await?;
        Ok(Self::from_parts(server_name, transport, inbound))
    }

    /// Wire up a client over an already-started transport.
    fn from_parts(
        server_name: &str,
        transport: Box<dyn McpTransport>,
        mut inbound: mpsc::Receiver<String>,
    ) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let handler: Arc<RwLock<Option<NotificationHandler>>> = Arc::new(RwLock::new(None));

        {
            let pending = Arc::clone(&pending);
            let handler = Arc::clone(&handler);
            let server = server_name.to_string();
            tokio::spawn(async move {
                while let Some(line) = inbound.recv().await {
                    match RpcMessage::parse(&line) {
                        Ok(RpcMessage::Response(res)) => {
                            let id = res.id.as_i64().unwrap_or(-1);
                            let sender = pending.lock().await.remove(&id);
                            match sender {
                                Some(tx) => {
                                    let _ = tx.send(res);
                                }
                                None => {
                                    debug!(server = %server, id, "response for unknown request id")
                                }
                            }
                        }
                        Ok(RpcMessage::Notification(n)) => {
                            let params = params_to_map(n.params);
                            let guard = handler.read().await;
                            if let Some(cb) = guard.as_ref() {
                                cb(n.method, params);
                            } else {
                                debug!(server = %server, method = %n.method, "notification dropped, no handler");
                            }
                        }
                        Ok(RpcMessage::Request(req)) => {
                            // Servers asking us things is out of protocol here.
                            debug!(server = %server, method = %req.method, "ignoring server request");
                        }
                        Err(e) => {
                            warn!(server = %server, error = %e, "malformed inbound frame");
                        }
                    }
                }
                debug!(server = %server, "inbound dispatch loop finished");
            });
        }

        Self {
            server_name: server_name.to_string(),
            transport,
            next_id: AtomicI64::new(1),
            pending,
            notification_handler: handler,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub async fn set_notification_handler(&self, handler: NotificationHandler) {
        *self.notification_handler.write().await = Some(handler);
    }

    /// MCP handshake: `initialize` then the `initialized` notification.
    pub async fn initialize(&self, client_name: &str, client_version: &str) -> Result<InitializeResult> {
        let params = serde_json::to_value(InitializeParams::new(client_name, client_version))?;
        let result = self
            .request(METHOD_INITIALIZE, Some(params), Some(INITIALIZE_TIMEOUT))
            .await?;
        let init: InitializeResult = serde_json::from_value(result)?;

        let notif = RpcRequest::notification(METHOD_INITIALIZED, None);
        self.transport.send(serde_json::to_string(&notif)?).await?;

        debug!(
            server = %self.server_name,
            peer = %init.server_info.name,
            "MCP handshake complete"
        );
        Ok(init)
    }

    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let result = self
            .request(METHOD_LIST_TOOLS, None, Some(LIST_TOOLS_TIMEOUT))
            .await?;
        let parsed: ListToolsResult = serde_json::from_value(result)?;
        Ok(parsed.tools)
    }

    /// Invoke one tool. No deadline here — the engine races the call
    /// against its own cancellation.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<CallToolResult> {
        let params = serde_json::to_value(CallToolParams {
            name: tool.to_string(),
            arguments,
        })?;
        let result = self.request(METHOD_CALL_TOOL, Some(params), None).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn shutdown(&self) {
        self.transport.shutdown().await;
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let req = RpcRequest::new(id, method, params);
        if let Err(e) = self.transport.send(serde_json::to_string(&req)?).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = match timeout {
            Some(t) => match tokio::time::timeout(t, rx).await {
                Ok(r) => r,
                Err(_) => {
                    self.pending.lock().await.remove(&id);
                    return Err(ToolsError::Timeout {
                        what: format!("{} on '{}'", method, self.server_name),
                    });
                }
            },
            None => rx.await,
        };

        let response = response.map_err(|_| {
            ToolsError::Transport(format!("'{}' closed mid-request", self.server_name))
        })?;

        if let Some(err) = response.error {
            return Err(ToolsError::CallFailed {
                server: self.server_name.clone(),
                tool: method.to_string(),
                reason: err.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }
}

fn params_to_map(params: Option<Value>) -> HashMap<String, Value> {
    match params {
        Some(Value::Object(map)) => map.into_iter().collect(),
        _ => HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;
    use crate::mcp::transport::McpTransport;

    /// Loopback transport: outbound frames are parsed and answered by a
    /// scripted responder feeding the inbound channel.
    struct Loopback {
        inbound: mpsc::Sender<String>,
        respond: bool,
    }

    #[async_trait]
    impl McpTransport for Loopback {
        async fn send(&self, message: String) -> Result<()> {
            if !self.respond {
                return Ok(());
            }
            let value: Value = serde_json::from_str(&message).unwrap();
            let Some(id) = value.get("id").cloned() else {
                return Ok(()); // notification, no reply
            };
            let method = value.get("method").and_then(|m| m.as_str()).unwrap_or("");
            let result = match method {
                METHOD_INITIALIZE => serde_json::json!({
                    "protocolVersion": "2025-06-18",
                    "capabilities": {},
                    "serverInfo": { "name": "loopback", "version": "1.0" }
                }),
                METHOD_LIST_TOOLS => serde_json::json!({
                    "tools": [{ "name": "echo", "description": "Echo" }]
                }),
                METHOD_CALL_TOOL => serde_json::json!({
                    "content": [{ "type": "text", "text": "echoed" }],
                    "isError": false
                }),
                _ => Value::Null,
            };
            let response = serde_json::to_string(&RpcResponse::ok(id, result)).unwrap();
            let _ = self.inbound.send(response).await;
            Ok(())
        }

        async fn shutdown(&self) {}
    }

    fn loopback_client(respond: bool) -> McpClient {
        let (inbound_tx, inbound_rx) = mpsc::channel::<String>(16);
        let transport = Box::new(Loopback {
            inbound: inbound_tx,
            respond,
        });
        McpClient::from_parts("loop", transport, inbound_rx)
    }

    #[tokio::test]
    async fn handshake_then_discovery_and_calls() {
        let client = loopback_client(true);

        let init = client.initialize("cleverchatty", "0.1.0").await.unwrap();
        assert_eq!(init.server_info.name, "loopback");

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        assert_eq!(tools[0].input_schema.schema_type, "object");

        let result = client
            .call_tool("echo", serde_json::json!({ "message": "hi" }))
            .await
            .unwrap();
        assert_eq!(result.text_content(), "echoed");
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_requests_time_out() {
        let client = loopback_client(false);
        let err = client.list_tools().await.unwrap_err();
        assert!(matches!(err, ToolsError::Timeout { .. }));
    }

    #[tokio::test]
    async fn notifications_reach_the_installed_handler() {
        let (tx, inbound_rx) = mpsc::channel::<String>(16);
        let transport = Box::new(Loopback {
            inbound: tx.clone(),
            respond: false,
        });
        let client = McpClient::from_parts("loop", transport, inbound_rx);

        let seen = Arc::new(StdMutex::new(Vec::<(String, HashMap<String, Value>)>::new()));
        let sink = Arc::clone(&seen);
        client
            .set_notification_handler(Arc::new(move |method, params| {
                sink.lock().unwrap().push((method, params));
            }))
            .await;

        tx.send(
            r#"{"jsonrpc":"2.0","method":"notifications/new_email","params":{"subject":"hi"}}"#
                .to_string(),
        )
        .await
        .unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "notifications/new_email");
        assert_eq!(seen[0].1["subject"], "hi");
    }
}
