//! A2A client: talks to a remote agent published via an agent card.
//!
//! Skills become LLM-visible tools with a single free-text `message`
//! property. A send may answer directly with a message, or hand back an
//! in-progress task that is polled to completion.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use cleverchatty_core::types::{Tool, ToolSchema};
use cleverchatty_protocol::a2a::{
    A2aMessage, AgentCard, MessageSendParams, Part, Task, AGENT_CARD_PATH, METHOD_GET_TASK,
    METHOD_SEND_MESSAGE,
};
use cleverchatty_protocol::jsonrpc::{RpcRequest, RpcResponse};

use crate::error::{Result, ToolsError};

const TASK_POLL_ATTEMPTS: u32 = 5;
const TASK_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct A2aClient {
    client: reqwest::Client,
    base_url: String,
    headers: HashMap<String, String>,
    metadata: HashMap<String, String>,
    card: RwLock<Option<AgentCard>>,
    next_id: std::sync::atomic::AtomicI64,
}

impl A2aClient {
    pub fn new(
        base_url: String,
        headers: HashMap<String, String>,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            headers,
            metadata,
            card: RwLock::new(None),
            next_id: std::sync::atomic::AtomicI64::new(1),
        }
    }

    /// Fetch and cache the remote agent card.
    pub async fn initialize(&self) -> Result<()> {
        let url = format!("{}{}", self.base_url, AGENT_CARD_PATH);
        let mut builder = self.client.get(&url);
        for (k, v) in &self.headers {
            builder = builder.header(k.as_str(), v);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| ToolsError::Transport(format!("agent card fetch: {e}")))?;
        if !resp.status().is_success() {
            return Err(ToolsError::Transport(format!(
                "agent card fetch returned {}",
                resp.status()
            )));
        }
        let card: AgentCard = resp
            .json()
            .await
            .map_err(|e| ToolsError::Transport(format!("agent card parse: {e}")))?;
        debug!(agent = %card.name, skills = card.skills.len(), "fetched agent card");
        *self.card.write().await = Some(card);
        Ok(())
    }

    /// Remote skills exposed as tools: one free-text `message` property.
    pub async fn skills_as_tools(&self) -> Vec<Tool> {
        let guard = self.card.read().await;
        let Some(card) = guard.as_ref() else {
            return Vec::new();
        };
        card.skills
            .iter()
            .map(|skill| {
                let mut properties = serde_json::Map::new();
                properties.insert(
                    "message".to_string(),
                    serde_json::json!({
                        "type": "string",
                        "description": "Message to send to the agent",
                    }),
                );
                Tool {
                    name: skill.id.clone(),
                    description: skill.description.clone(),
                    input_schema: ToolSchema {
                        schema_type: "object".to_string(),
                        properties,
                        required: vec!["message".to_string()],
                    },
                }
            })
            .collect()
    }

    /// Send `message` to the remote agent addressed at `skill`.
    /// In-progress tasks are polled up to five times, one second apart;
    /// any terminal state is accepted.
    pub async fn call_skill(
        &self,
        skill: &str,
        message: &str,
        extra_metadata: &HashMap<String, String>,
    ) -> Result<String> {
        let mut metadata = serde_json::Map::new();
        metadata.insert("skill".to_string(), Value::String(skill.to_string()));
        for (k, v) in &self.metadata {
            metadata.insert(k.clone(), Value::String(v.clone()));
        }
        for (k, v) in extra_metadata {
            metadata.insert(k.clone(), Value::String(v.clone()));
        }

        let params = MessageSendParams {
            message: A2aMessage {
                role: "user".to_string(),
                parts: vec![Part::text(message)],
                message_id: uuid::Uuid::new_v4().to_string(),
                context_id: None,
                task_id: None,
                metadata: Some(Value::Object(metadata.clone())),
            },
            metadata: Some(Value::Object(metadata)),
        };

        let result = self
            .rpc(METHOD_SEND_MESSAGE, serde_json::to_value(params)?)
            .await?;

        // Direct message response?
        if result.get("kind").and_then(|k| k.as_str()) == Some("message") {
            let msg: A2aMessage = serde_json::from_value(result)?;
            return Ok(join_parts(&msg));
        }

        // Otherwise it's a task; poll until it settles.
        let mut task: Task = serde_json::from_value(result)?;
        let mut attempts = 0;
        while !task.status.state.is_terminal() {
            attempts += 1;
            if attempts > TASK_POLL_ATTEMPTS {
                warn!(task = %task.id, "task still running after poll budget");
                break;
            }
            tokio::time::sleep(TASK_POLL_INTERVAL).await;
            let result = self
                .rpc(METHOD_GET_TASK, serde_json::json!({ "id": task.id }))
                .await?;
            task = serde_json::from_value(result)?;
        }

        Ok(task
            .status
            .message
            .as_ref()
            .map(join_parts)
            .unwrap_or_default())
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let req = RpcRequest::new(id, method, Some(params));

        let mut builder = self
            .client
            .post(&self.base_url)
            .header("content-type", "application/json")
            .json(&req);
        for (k, v) in &self.headers {
            builder = builder.header(k.as_str(), v);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| ToolsError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ToolsError::Transport(format!(
                "A2A rpc returned {}",
                resp.status()
            )));
        }
        let rpc: RpcResponse = resp
            .json()
            .await
            .map_err(|e| ToolsError::Transport(format!("A2A rpc parse: {e}")))?;
        if let Some(err) = rpc.error {
            return Err(ToolsError::Transport(err.message));
        }
        Ok(rpc.result.unwrap_or(Value::Null))
    }
}

fn join_parts(msg: &A2aMessage) -> String {
    msg.parts
        .iter()
        .map(|p| p.as_text())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skills_become_single_message_tools() {
        let client = A2aClient::new(
            "http://remote".to_string(),
            HashMap::new(),
            HashMap::new(),
        );
        let card: AgentCard = serde_json::from_str(
            r#"{
                "name": "Remote",
                "capabilities": { "streaming": true },
                "skills": [
                    { "id": "summarize", "name": "Summarize", "description": "Summarize text" }
                ]
            }"#,
        )
        .unwrap();
        *client.card.write().await = Some(card);

        let tools = client.skills_as_tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "summarize");
        assert_eq!(tools[0].input_schema.required, vec!["message".to_string()]);
        assert!(tools[0].input_schema.properties.contains_key("message"));
    }

    #[tokio::test]
    async fn no_card_means_no_tools() {
        let client = A2aClient::new("http://remote".to_string(), HashMap::new(), HashMap::new());
        assert!(client.skills_as_tools().await.is_empty());
    }
}
