use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use cleverchatty_core::types::{ContentBlock, Message, Role, Usage};

use crate::provider::{AssistantTurn, ChatRequest, Provider, ProviderError, ToolCallRequest};

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn create_message(&self, req: &ChatRequest) -> Result<AssistantTurn, ProviderError> {
        let body = build_request_body(req);
        let url = format!("{}/v1/chat/completions", self.base_url);

        debug!(model = %req.model, "sending request to OpenAI");

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "OpenAI API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        parse_response(api_resp)
    }
}

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let mut messages: Vec<serde_json::Value> = Vec::new();

    if let Some(ref s) = req.system {
        messages.push(serde_json::json!({ "role": "system", "content": s }));
    }

    for msg in &req.messages {
        match msg.role {
            Role::System => {
                let text = msg.text_content();
                if !text.is_empty() {
                    messages.push(serde_json::json!({ "role": "system", "content": text }));
                }
            }
            Role::Assistant => {
                let text = msg.text_content();
                let tool_calls: Vec<serde_json::Value> = msg
                    .blocks
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::ToolUse { id, name, input } => Some(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            },
                        })),
                        _ => None,
                    })
                    .collect();
                let mut m = serde_json::json!({ "role": "assistant" });
                m["content"] = if text.is_empty() {
                    serde_json::Value::Null
                } else {
                    serde_json::json!(text)
                };
                if !tool_calls.is_empty() {
                    m["tool_calls"] = serde_json::json!(tool_calls);
                }
                messages.push(m);
            }
            Role::User => {
                // Tool results become individual `tool` role messages;
                // remaining text stays a plain user message.
                let mut text = String::new();
                for block in &msg.blocks {
                    match block {
                        ContentBlock::Text { text: t } => {
                            if !text.is_empty() {
                                text.push('\n');
                            }
                            text.push_str(t);
                        }
                        ContentBlock::ToolResult {
                            tool_use_id,
                            text: t,
                            ..
                        } => {
                            messages.push(serde_json::json!({
                                "role": "tool",
                                "tool_call_id": tool_use_id,
                                "content": t,
                            }));
                        }
                        ContentBlock::ToolUse { .. } => {}
                    }
                }
                if !text.is_empty() {
                    messages.push(serde_json::json!({ "role": "user", "content": text }));
                }
            }
        }
    }

    let mut body = serde_json::json!({
        "model": req.model,
        "max_tokens": req.max_tokens,
        "messages": messages,
    });

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    },
                })
            })
            .collect();
        body["tools"] = serde_json::json!(tools);
    }

    body
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    id: String,
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    /// JSON-encoded string per the chat completions wire format.
    arguments: String,
}

#[derive(Deserialize, Default)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn parse_response(resp: ApiResponse) -> Result<AssistantTurn, ProviderError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Parse("response has no choices".to_string()))?;

    let mut tool_calls = Vec::new();
    for call in choice.message.tool_calls {
        let input: serde_json::Value = serde_json::from_str(&call.function.arguments)
            .unwrap_or(serde_json::Value::Object(Default::default()));
        tool_calls.push(ToolCallRequest {
            id: call.id,
            name: call.function.name,
            input,
        });
    }

    let usage = resp.usage.unwrap_or_default();
    Ok(AssistantTurn {
        text: choice.message.content.filter(|c| !c.is_empty()),
        tool_calls,
        usage: Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
        stop_reason: choice.finish_reason.unwrap_or_default(),
    })
}
