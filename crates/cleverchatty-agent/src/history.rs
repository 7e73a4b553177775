//! Windowed conversation history with tool-call pairing invariants.

use std::collections::HashSet;

use cleverchatty_core::types::{ContentBlock, Message, Role, SubRole};

pub struct HistoryStore {
    messages: Vec<Message>,
    window: usize,
}

impl HistoryStore {
    pub fn new(window: usize) -> Self {
        Self {
            messages: Vec::new(),
            window,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Drop any previously injected memory note.
    pub fn remove_memory_notes(&mut self) {
        self.messages
            .retain(|m| m.sub_role != Some(SubRole::MemoryNote));
    }

    /// Truncate to the window, then drop orphaned tool blocks atomically:
    /// a `tool_use` whose result fell off the window, or a `tool_result`
    /// whose request did. Assistant messages reduced to nothing disappear.
    pub fn prune(&mut self) {
        if self.messages.len() > self.window {
            let cut = self.messages.len() - self.window;
            self.messages.drain(..cut);
        }

        let mut used: HashSet<String> = HashSet::new();
        let mut resulted: HashSet<String> = HashSet::new();
        for msg in &self.messages {
            for block in &msg.blocks {
                match block {
                    ContentBlock::ToolUse { id, .. } => {
                        used.insert(id.clone());
                    }
                    ContentBlock::ToolResult { tool_use_id, .. } => {
                        resulted.insert(tool_use_id.clone());
                    }
                    ContentBlock::Text { .. } => {}
                }
            }
        }

        self.messages.retain_mut(|msg| {
            let had_text = msg.has_text_block();
            msg.blocks.retain(|block| match block {
                ContentBlock::ToolUse { id, .. } => resulted.contains(id),
                ContentBlock::ToolResult { tool_use_id, .. } => used.contains(tool_use_id),
                ContentBlock::Text { .. } => true,
            });
            if msg.blocks.is_empty() {
                // A turn that only carried now-orphaned tool traffic is gone;
                // an originally empty text turn was empty to begin with.
                return had_text;
            }
            true
        });
    }

    /// Render for the `/history` command.
    pub fn render(&self) -> String {
        if self.messages.is_empty() {
            return "History is empty.".to_string();
        }
        let mut out = String::from("**Conversation history**\n");
        for msg in &self.messages {
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
            };
            let tag = match msg.sub_role {
                Some(SubRole::Prompt) => "/prompt",
                Some(SubRole::Instruction) => "/instruction",
                Some(SubRole::MemoryNote) => "/memory-note",
                Some(SubRole::RagContext) => "/rag-context",
                Some(SubRole::ToolResponse) => "/tool-response",
                None => "",
            };
            let text = msg.text_content();
            let first_line = text.lines().next().unwrap_or("");
            let tool_blocks = msg
                .blocks
                .iter()
                .filter(|b| !matches!(b, ContentBlock::Text { .. }))
                .count();
            if tool_blocks > 0 {
                out.push_str(&format!(
                    "- `{role}{tag}` {first_line} ({tool_blocks} tool block(s))\n"
                ));
            } else {
                out.push_str(&format!("- `{role}{tag}` {first_line}\n"));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    fn tool_use(id: &str) -> ContentBlock {
        ContentBlock::ToolUse {
            id: id.to_string(),
            name: "srv__t".to_string(),
            input: Value::Null,
        }
    }

    fn tool_result(id: &str) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: id.to_string(),
            text: "ok".to_string(),
            structured: None,
        }
    }

    #[test]
    fn prune_is_noop_at_exact_window() {
        let mut h = HistoryStore::new(4);
        h.push(Message::user_prompt("u1"));
        let mut a1 = Message::text(Role::Assistant, None, "calling");
        a1.blocks.push(tool_use("x"));
        h.push(a1);
        h.push(Message {
            role: Role::User,
            sub_role: Some(SubRole::ToolResponse),
            blocks: vec![tool_result("x")],
        });
        h.push(Message::text(Role::Assistant, None, "done"));

        h.prune();
        assert_eq!(h.len(), 4);
        // intact pair survives untouched
        assert_eq!(h.messages()[1].blocks.len(), 2);
    }

    #[test]
    fn orphan_tool_use_is_dropped_but_text_survives() {
        // U1, A1(text + tool_use X with no result), U2, A2(text)
        let mut h = HistoryStore::new(4);
        h.push(Message::user_prompt("u1"));
        let mut a1 = Message::text(Role::Assistant, None, "let me check");
        a1.blocks.push(tool_use("x"));
        h.push(a1);
        h.push(Message::user_prompt("u2"));
        h.push(Message::text(Role::Assistant, None, "answer"));

        h.prune();
        assert_eq!(h.len(), 4);
        let a1 = &h.messages()[1];
        assert_eq!(a1.blocks.len(), 1);
        assert!(a1.has_text_block());
    }

    #[test]
    fn orphan_result_is_dropped_when_use_fell_off_window() {
        // window 2: the assistant tool_use turn is truncated away, leaving
        // an orphan tool_result that must also go.
        let mut h = HistoryStore::new(2);
        let mut a1 = Message::text(Role::Assistant, None, "");
        a1.blocks = vec![tool_use("x")];
        h.push(a1);
        h.push(Message {
            role: Role::User,
            sub_role: Some(SubRole::ToolResponse),
            blocks: vec![tool_result("x")],
        });
        h.push(Message::text(Role::Assistant, None, "final"));

        h.prune();
        let has_result = h
            .messages()
            .iter()
            .flat_map(|m| &m.blocks)
            .any(|b| matches!(b, ContentBlock::ToolResult { .. }));
        assert!(!has_result);
    }

    #[test]
    fn assistant_reduced_to_nothing_is_removed() {
        let mut h = HistoryStore::new(4);
        let mut a1 = Message::text(Role::Assistant, None, "");
        a1.blocks = vec![tool_use("x")]; // no text block, orphan use
        h.push(a1);
        h.push(Message::user_prompt("u"));

        h.prune();
        assert_eq!(h.len(), 1);
        assert_eq!(h.messages()[0].role, Role::User);
    }

    #[test]
    fn use_and_result_counts_balance_after_prune() {
        let mut h = HistoryStore::new(6);
        for i in 0..5 {
            h.push(Message::user_prompt(format!("u{i}")));
            let mut a = Message::text(Role::Assistant, None, "t");
            a.blocks.push(tool_use(&format!("id{i}")));
            h.push(a);
            h.push(Message {
                role: Role::User,
                sub_role: Some(SubRole::ToolResponse),
                blocks: vec![tool_result(&format!("id{i}"))],
            });
        }
        h.prune();

        let uses = h
            .messages()
            .iter()
            .flat_map(|m| &m.blocks)
            .filter(|b| matches!(b, ContentBlock::ToolUse { .. }))
            .count();
        let results = h
            .messages()
            .iter()
            .flat_map(|m| &m.blocks)
            .filter(|b| matches!(b, ContentBlock::ToolResult { .. }))
            .count();
        assert_eq!(uses, results);
    }

    #[test]
    fn memory_notes_are_replaceable() {
        let mut h = HistoryStore::new(10);
        h.push(Message::memory_note("old note"));
        h.push(Message::user_prompt("hi"));
        h.remove_memory_notes();
        h.push(Message::memory_note("fresh note"));

        let notes: Vec<_> = h
            .messages()
            .iter()
            .filter(|m| m.sub_role == Some(SubRole::MemoryNote))
            .collect();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].text_content(), "fresh note");
    }
}
