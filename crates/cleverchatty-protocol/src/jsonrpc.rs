//! JSON-RPC 2.0 framing shared by every MCP transport.
//!
//! All MCP traffic — stdio pipes, SSE bodies, and reverse WebSocket text
//! frames — is one JSON object per line/frame in this shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Request (has `id`) or notification (no `id`).
/// Wire: `{ "jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {...} }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Value::from(id)),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }
}

/// Response to a request.
/// Wire: `{ "jsonrpc": "2.0", "id": 1, "result": {...} }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// A decoded inbound frame, classified by shape.
#[derive(Debug, Clone)]
pub enum RpcMessage {
    /// Has `method` and `id` — the peer expects a response.
    Request(RpcRequest),
    /// Has `method` but no `id`.
    Notification(RpcRequest),
    /// Has `id` but no `method` — answers one of our requests.
    Response(RpcResponse),
}

impl RpcMessage {
    /// Classify one line of wire text.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        let has_method = value.get("method").is_some();
        let has_id = value.get("id").map(|v| !v.is_null()).unwrap_or(false);
        if has_method {
            let req: RpcRequest = serde_json::from_value(value)?;
            if has_id {
                Ok(RpcMessage::Request(req))
            } else {
                Ok(RpcMessage::Notification(req))
            }
        } else {
            let res: RpcResponse = serde_json::from_value(value)?;
            Ok(RpcMessage::Response(res))
        }
    }
}

// Standard JSON-RPC error codes used on the reverse listener side.
pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INTERNAL_ERROR: i64 = -32603;
