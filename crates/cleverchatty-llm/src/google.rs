use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use cleverchatty_core::types::{ContentBlock, Message, Role, Usage};

use crate::provider::{AssistantTurn, ChatRequest, Provider, ProviderError, ToolCallRequest};

pub struct GoogleProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GoogleProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
        }
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    async fn create_message(&self, req: &ChatRequest) -> Result<AssistantTurn, ProviderError> {
        let body = build_request_body(req);
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, req.model
        );

        debug!(model = %req.model, "sending request to Google");

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Google API error");
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
    // functionResponse parts need the tool *name*; map ids back to names
    // from the tool_use blocks earlier in the window.
    let mut call_names: HashMap<&str, &str> = HashMap::new();
    for msg in &req.messages {
        for block in &msg.blocks {
            if let ContentBlock::ToolUse { id, name, .. } = block {
                call_names.insert(id.as_str(), name.as_str());
            }
        }
    }

    let mut system = String::new();
    if let Some(ref s) = req.system {
        system.push_str(s);
    }

    let mut contents: Vec<serde_json::Value> = Vec::new();
    for msg in &req.messages {
        if msg.role == Role::System {
            let text = msg.text_content();
            if !text.is_empty() {
                if !system.is_empty() {
                    system.push_str("\n\n");
                }
                system.push_str(&text);
            }
            continue;
        }

        let mut parts: Vec<serde_json::Value> = Vec::new();
        for block in &msg.blocks {
            match block {
                ContentBlock::Text { text } => {
                    parts.push(serde_json::json!({ "text": text }));
                }
                ContentBlock::ToolUse { name, input, .. } => {
                    parts.push(serde_json::json!({
                        "functionCall": { "name": name, "args": input },
                    }));
                }
                ContentBlock::ToolResult {
                    tool_use_id, text, ..
                } => {
                    let name = call_names.get(tool_use_id.as_str()).copied().unwrap_or("");
                    parts.push(serde_json::json!({
                        "functionResponse": {
                            "name": name,
                            "response": { "content": text },
                        },
                    }));
                }
            }
        }
        if parts.is_empty() {
            continue;
        }
        contents.push(serde_json::json!({
            "role": match msg.role {
                Role::User => "user",
                Role::Assistant => "model",
                Role::System => unreachable!(),
            },
            "parts": parts,
        }));
    }

    let mut body = serde_json::json!({ "contents": contents });

    if !system.is_empty() {
        body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": system }] });
    }
    if !req.tools.is_empty() {
        let declarations: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                })
            })
            .collect();
        body["tools"] = serde_json::json!([{ "functionDeclarations": declarations }]);
    }

    body
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata", default)]
    usage: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(rename = "functionCall", default)]
    function_call: Option<FunctionCall>,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Deserialize, Default)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_tokens: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidate_tokens: u32,
}

fn parse_response(resp: ApiResponse) -> AssistantTurn {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut stop_reason = String::new();

    if let Some(candidate) = resp.candidates.into_iter().next() {
        stop_reason = candidate.finish_reason.unwrap_or_default();
        for part in candidate.content.parts {
            if let Some(t) = part.text {
                text.push_str(&t);
            }
            if let Some(call) = part.function_call {
                // Gemini calls carry no id; mint one for result pairing.
                tool_calls.push(ToolCallRequest {
                    id: format!("call_{}", uuid::Uuid::new_v4()),
                    name: call.name,
                    input: call.args,
                });
            }
        }
    }

    let usage = resp.usage.unwrap_or_default();
    AssistantTurn {
        text: if text.is_empty() { None } else { Some(text) },
        tool_calls,
        usage: Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.candidate_tokens,
        },
        stop_reason,
    }
}

#[cfg(test)]
mod tests {
    use cleverchatty_core::types::SubRole;

    use super::*;

    #[test]
    fn function_response_resolves_tool_name_from_call_id() {
        let mut assistant = Message::text(Role::Assistant, None, "");
        assistant.blocks.clear();
        assistant.blocks.push(ContentBlock::ToolUse {
            id: "call_7".into(),
            name: "srv__lookup".into(),
            input: serde_json::json!({}),
        });
        let results = Message {
            role: Role::User,
            sub_role: Some(SubRole::ToolResponse),
            blocks: vec![ContentBlock::ToolResult {
                tool_use_id: "call_7".into(),
                text: "found".into(),
                structured: None,
            }],
        };
        let req = ChatRequest::new("gemini-2.0-flash", vec![assistant, results], Vec::new());
        let body = build_request_body(&req);

        assert_eq!(
            body["contents"][1]["parts"][0]["functionResponse"]["name"],
            "srv__lookup"
        );
    }

    #[test]
    fn assistant_maps_to_model_role() {
        let req = ChatRequest::new(
            "gemini-2.0-flash",
            vec![Message::text(Role::Assistant, None, "hi")],
            Vec::new(),
        );
        let body = build_request_body(&req);
        assert_eq!(body["contents"][0]["role"], "model");
    }
}
