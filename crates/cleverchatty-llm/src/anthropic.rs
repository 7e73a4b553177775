use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use cleverchatty_core::types::{ContentBlock, Message, Role, Usage};

use crate::provider::{AssistantTurn, ChatRequest, Provider, ProviderError, ToolCallRequest};

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn create_message(&self, req: &ChatRequest) -> Result<AssistantTurn, ProviderError> {
        let body = build_request_body(req);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, "sending request to Anthropic");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }
}

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let mut system = String::new();
    if let Some(ref s) = req.system {
        system.push_str(s);
    }

    let mut messages: Vec<serde_json::Value> = Vec::new();
    for msg in &req.messages {
        if msg.role == Role::System {
            // Anthropic takes system text as a top-level parameter.
            let text = msg.text_content();
            if !text.is_empty() {
                if !system.is_empty() {
                    system.push_str("\n\n");
                }
                system.push_str(&text);
            }
            continue;
        }
        let content: Vec<serde_json::Value> = msg.blocks.iter().map(block_to_json).collect();
        if content.is_empty() {
            continue;
        }
        messages.push(serde_json::json!({
            "role": match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => unreachable!(),
            },
            "content": content,
        }));
    }

    let mut body = serde_json::json!({
        "model": req.model,
        "max_tokens": req.max_tokens,
        "messages": messages,
    });

    if !system.is_empty() {
        body["system"] = serde_json::json!(system);
    }
    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
        body["tools"] = serde_json::json!(tools);
    }

    body
}

fn block_to_json(block: &ContentBlock) -> serde_json::Value {
    match block {
        ContentBlock::Text { text } => serde_json::json!({
            "type": "text",
            "text": text,
        }),
        ContentBlock::ToolUse { id, name, input } => serde_json::json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input,
        }),
        ContentBlock::ToolResult {
            tool_use_id, text, ..
        } => serde_json::json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": [{ "type": "text", "text": text }],
        }),
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ApiContent>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: ApiUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ApiContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

fn parse_response(resp: ApiResponse) -> AssistantTurn {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for item in resp.content {
        match item {
            ApiContent::Text { text: t } => text.push_str(&t),
            ApiContent::ToolUse { id, name, input } => {
                tool_calls.push(ToolCallRequest { id, name, input })
            }
            ApiContent::Other => {}
        }
    }

    AssistantTurn {
        text: if text.is_empty() { None } else { Some(text) },
        tool_calls,
        usage: Usage {
            input_tokens: resp.usage.input_tokens,
            output_tokens: resp.usage.output_tokens,
        },
        stop_reason: resp.stop_reason.unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use cleverchatty_core::types::{SubRole, Tool, ToolSchema};

    use super::*;

    #[test]
    fn system_messages_move_to_top_level() {
        let req = ChatRequest::new(
            "claude-sonnet-4-6",
            vec![
                Message::instruction("be brief"),
                Message::user_prompt("hi"),
            ],
            Vec::new(),
        );
        let body = build_request_body(&req);

        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn tool_blocks_serialize_as_anthropic_shapes() {
        let mut assistant = Message::text(Role::Assistant, None, "checking");
        assistant.blocks.push(ContentBlock::ToolUse {
            id: "call_1".into(),
            name: "files__read".into(),
            input: serde_json::json!({"path": "/tmp/x"}),
        });
        let results = Message {
            role: Role::User,
            sub_role: Some(SubRole::ToolResponse),
            blocks: vec![ContentBlock::ToolResult {
                tool_use_id: "call_1".into(),
                text: "contents".into(),
                structured: None,
            }],
        };
        let req = ChatRequest::new("m", vec![assistant, results], Vec::new());
        let body = build_request_body(&req);

        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs[0]["content"][1]["type"], "tool_use");
        assert_eq!(msgs[1]["content"][0]["type"], "tool_result");
        assert_eq!(msgs[1]["content"][0]["tool_use_id"], "call_1");
    }

    #[test]
    fn tools_carry_full_schema() {
        let req = ChatRequest::new(
            "m",
            vec![Message::user_prompt("hi")],
            vec![Tool {
                name: "srv__echo".into(),
                description: "echo".into(),
                input_schema: ToolSchema::default(),
            }],
        );
        let body = build_request_body(&req);
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        // providers reject tool specs without a properties object
        assert!(body["tools"][0]["input_schema"]["properties"].is_object());
    }
}
