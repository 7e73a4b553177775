//! Capability seam between the tools host and the reverse-MCP listener.
//!
//! Reverse servers connect *inbound* at runtime, so their tools cannot be
//! discovered at host startup. The listener implements this trait and every
//! tools host holds it as a shared lookup-only handle; tool snapshots are
//! returned by copy, never by reference into the listener's state.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use cleverchatty_core::types::Tool;
use cleverchatty_protocol::mcp::CallToolResult;

use crate::error::Result;

#[async_trait]
pub trait ReverseCapability: Send + Sync {
    /// Tools of one connected server (unqualified names). Empty when the
    /// server is not currently connected.
    fn get_tools(&self, server: &str) -> Vec<Tool>;

    /// Snapshot of every connected server's tools.
    fn get_all_tools(&self) -> HashMap<String, Vec<Tool>>;

    /// Invoke a tool on a connected server.
    async fn call_tool(&self, server: &str, tool: &str, args: Value) -> Result<CallToolResult>;
}
