use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use cleverchatty_core::types::{ContentBlock, Message, Role, Usage};

use crate::provider::{AssistantTurn, ChatRequest, Provider, ProviderError, ToolCallRequest};

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn create_message(&self, req: &ChatRequest) -> Result<AssistantTurn, ProviderError> {
        let body = build_request_body(req);
        let url = format!("{}/api/chat", self.base_url);

        debug!(model = %req.model, "sending request to Ollama");

        let resp = self.client.post(&url).json(&body).send().await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Ollama API error");
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
                        ContentBlock::ToolUse { name, input, .. } => Some(serde_json::json!({
                            "function": { "name": name, "arguments": input },
                        })),
                        _ => None,
                    })
                    .collect();
                let mut m = serde_json::json!({ "role": "assistant", "content": text });
                if !tool_calls.is_empty() {
                    m["tool_calls"] = serde_json::json!(tool_calls);
                }
                messages.push(m);
            }
            Role::User => {
                for block in &msg.blocks {
                    match block {
                        ContentBlock::Text { text } => {
                            messages
                                .push(serde_json::json!({ "role": "user", "content": text }));
                        }
                        ContentBlock::ToolResult { text, .. } => {
                            messages
                                .push(serde_json::json!({ "role": "tool", "content": text }));
                        }
                        ContentBlock::ToolUse { .. } => {}
                    }
                }
            }
        }
    }

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "stream": false,
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
    message: ApiMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

fn parse_response(resp: ApiResponse) -> AssistantTurn {
    // Ollama tool calls carry no id; mint one so result pairing works.
    let tool_calls = resp
        .message
        .tool_calls
        .into_iter()
        .map(|c| ToolCallRequest {
            id: format!("call_{}", uuid::Uuid::new_v4()),
            name: c.function.name,
            input: c.function.arguments,
        })
        .collect();

    AssistantTurn {
        text: if resp.message.content.is_empty() {
            None
        } else {
            Some(resp.message.content)
        },
        tool_calls,
        usage: Usage {
            input_tokens: resp.prompt_eval_count,
            output_tokens: resp.eval_count,
        },
        stop_reason: resp.done_reason.unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_tool_call_ids_are_unique() {
        let resp = ApiResponse {
            message: ApiMessage {
                content: String::new(),
                tool_calls: vec![
                    ApiToolCall {
                        function: ApiFunction {
                            name: "a__x".into(),
                            arguments: serde_json::json!({}),
                        },
                    },
                    ApiToolCall {
                        function: ApiFunction {
                            name: "a__y".into(),
                            arguments: serde_json::json!({}),
                        },
                    },
                ],
            },
            done_reason: None,
            prompt_eval_count: 0,
            eval_count: 0,
        };
        let turn = parse_response(resp);
        assert_ne!(turn.tool_calls[0].id, turn.tool_calls[1].id);
    }

    #[test]
    fn request_is_non_streaming() {
        let req = ChatRequest::new("llama3.3", vec![Message::user_prompt("hi")], Vec::new());
        let body = build_request_body(&req);
        assert_eq!(body["stream"], false);
    }
}
