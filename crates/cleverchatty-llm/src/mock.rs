//! Scripted provider used by the test configs (`model = "mock:mock"`).
//!
//! Responses are deterministic functions of the prompt:
//! - `tool:<n>:<text>` — requests a call to `test__tool<n>` carrying `<text>`,
//!   then answers the tool result with `FAKE_ANALYSED_RESPONSE:<result>`.
//! - anything else — answers `FAKE_RESPONSE:<text>`.

use async_trait::async_trait;

use cleverchatty_core::types::{ContentBlock, Role, SubRole, Usage};

use crate::provider::{AssistantTurn, ChatRequest, Provider, ProviderError, ToolCallRequest};

pub const RESPONSE_PREFIX: &str = "FAKE_RESPONSE:";
pub const ANALYSED_PREFIX: &str = "FAKE_ANALYSED_RESPONSE:";

pub struct MockProvider;

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create_message(&self, req: &ChatRequest) -> Result<AssistantTurn, ProviderError> {
        // A trailing tool-result turn means the previous round called a
        // tool; "analyse" its output.
        if let Some(last) = req.messages.last() {
            let results: Vec<&str> = last
                .blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolResult { text, .. } => Some(text.as_str()),
                    _ => None,
                })
                .collect();
            if !results.is_empty() {
                return Ok(turn_with_text(format!(
                    "{ANALYSED_PREFIX}{}",
                    results.join("\n")
                )));
            }
        }

        let prompt = last_prompt_text(req);

        if let Some(rest) = prompt.strip_prefix("tool:") {
            if let Some((n, message)) = rest.split_once(':') {
                return Ok(AssistantTurn {
                    text: None,
                    tool_calls: vec![ToolCallRequest {
                        id: format!("toolu_{}", uuid::Uuid::new_v4()),
                        name: format!("test__tool{n}"),
                        input: serde_json::json!({ "message": message }),
                    }],
                    usage: usage_for(&prompt),
                    stop_reason: "tool_use".to_string(),
                });
            }
        }

        Ok(turn_with_text(format!("{RESPONSE_PREFIX}{prompt}")))
    }
}

/// The latest user prompt, ignoring injected context messages.
fn last_prompt_text(req: &ChatRequest) -> String {
    req.messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User && m.sub_role == Some(SubRole::Prompt))
        .or_else(|| {
            req.messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User && m.has_text_block())
        })
        .map(|m| m.text_content())
        .unwrap_or_default()
}

fn turn_with_text(text: String) -> AssistantTurn {
    let usage = usage_for(&text);
    AssistantTurn {
        text: Some(text),
        tool_calls: Vec::new(),
        usage,
        stop_reason: "end_turn".to_string(),
    }
}

fn usage_for(text: &str) -> Usage {
    Usage {
        input_tokens: (text.len() / 4) as u32,
        output_tokens: (text.len() / 4) as u32,
    }
}

#[cfg(test)]
mod tests {
    use cleverchatty_core::types::Message;

    use super::*;

    #[tokio::test]
    async fn echoes_prompt_with_fake_prefix() {
        let req = ChatRequest::new(
            "mock",
            vec![Message::user_prompt("Hello, how are you?")],
            Vec::new(),
        );
        let turn = MockProvider.create_message(&req).await.unwrap();
        assert_eq!(turn.text.as_deref(), Some("FAKE_RESPONSE:Hello, how are you?"));
        assert!(turn.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn tool_prefix_requests_namespaced_tool() {
        let req = ChatRequest::new(
            "mock",
            vec![Message::user_prompt("tool:1:Hello, how are you?")],
            Vec::new(),
        );
        let turn = MockProvider.create_message(&req).await.unwrap();
        assert!(turn.text.is_none());
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].name, "test__tool1");
        assert_eq!(turn.tool_calls[0].input["message"], "Hello, how are you?");
    }

    #[tokio::test]
    async fn tool_result_turn_is_analysed() {
        let result_msg = Message {
            role: Role::User,
            sub_role: Some(SubRole::ToolResponse),
            blocks: vec![ContentBlock::ToolResult {
                tool_use_id: "toolu_1".into(),
                text: "FAKE_TOOL_RESPONSE:Hello, how are you?".into(),
                structured: None,
            }],
        };
        let req = ChatRequest::new(
            "mock",
            vec![Message::user_prompt("tool:1:Hello, how are you?"), result_msg],
            Vec::new(),
        );
        let turn = MockProvider.create_message(&req).await.unwrap();
        assert_eq!(
            turn.text.as_deref(),
            Some("FAKE_ANALYSED_RESPONSE:FAKE_TOOL_RESPONSE:Hello, how are you?")
        );
    }

    #[tokio::test]
    async fn injected_context_is_not_mistaken_for_the_prompt() {
        let req = ChatRequest::new(
            "mock",
            vec![
                Message::user_prompt("real question"),
                Message::rag_context("Context: background paragraph"),
            ],
            Vec::new(),
        );
        let turn = MockProvider.create_message(&req).await.unwrap();
        assert_eq!(turn.text.as_deref(), Some("FAKE_RESPONSE:real question"));
    }
}
