use crate::types::{ChatCompletionChunk, Message, ToolCall, Usage};
use std::collections::BTreeMap;

/// Displayable pieces emitted while a response streams in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPiece {
    ThinkStart,
    Thinking(String),
    ThinkEnd,
    Content(String),
}

#[derive(Debug, Default)]
struct ToolCallState {
    id: String,
    name: String,
    arguments: String,
}

/// Builds one assistant message from streamed chunks.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    reasoning: String,
    in_think: bool,
    tool_calls: BTreeMap<usize, ToolCallState>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    model: Option<String>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds content that is already displayed, such as a completion prefix.
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn push_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamPiece> {
        let mut pieces = Vec::new();
        if self.model.is_none() {
            self.model = chunk.model.clone();
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage.clone();
        }

        for choice in chunk.choices.iter().filter(|choice| choice.index == 0) {
            let delta = &choice.delta;

            if let Some(reasoning) = delta.reasoning_content.as_deref().filter(|r| !r.is_empty()) {
                self.reasoning.push_str(reasoning);
                if self.content.is_empty() || self.in_think {
                    if !self.in_think {
                        self.in_think = true;
                        pieces.push(StreamPiece::ThinkStart);
                    }
                    pieces.push(StreamPiece::Thinking(reasoning.to_string()));
                }
            }

            if let Some(content) = delta.content.as_deref().filter(|c| !c.is_empty()) {
                if self.in_think {
                    self.in_think = false;
                    pieces.push(StreamPiece::ThinkEnd);
                }
                self.content.push_str(content);
                pieces.push(StreamPiece::Content(content.to_string()));
            }

            for fragment in &delta.tool_calls {
                let state = self.tool_calls.entry(fragment.index).or_default();
                if let Some(id) = fragment.id.as_deref().filter(|id| !id.is_empty()) {
                    state.id = id.to_string();
                }
                if let Some(function) = &fragment.function {
                    if let Some(name) = function.name.as_deref().filter(|n| !n.is_empty()) {
                        if state.name.is_empty() {
                            state.name = name.to_string();
                        }
                    }
                    if let Some(arguments) = function.arguments.as_deref() {
                        state.arguments.push_str(arguments);
                    }
                }
            }

            if let Some(reason) = &choice.finish_reason {
                self.finish_reason = Some(reason.clone());
            }
        }
        pieces
    }

    /// Closes any open think block.
    pub fn finish(&mut self) -> Vec<StreamPiece> {
        if self.in_think {
            self.in_think = false;
            vec![StreamPiece::ThinkEnd]
        } else {
            Vec::new()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.values().any(|call| !call.name.is_empty())
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    pub fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }

    /// Finalizes into an assistant message. Calls that never received a
    /// function name are dropped.
    pub fn into_message(self) -> Message {
        let mut message = Message::assistant(self.content);
        if !self.reasoning.is_empty() {
            message.reasoning_content = Some(self.reasoning);
        }
        message.model = self.model;
        for (index, call) in self.tool_calls {
            if call.name.is_empty() {
                tracing::warn!(index, "dropping streamed tool call without a function name");
                continue;
            }
            let id = if call.id.is_empty() {
                format!("call_{index}")
            } else {
                call.id
            };
            message.tool_calls.push(ToolCall {
                id,
                name: call.name,
                arguments: call.arguments,
            });
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(json: serde_json::Value) -> ChatCompletionChunk {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn reasoning_before_content_is_framed_as_think_block() {
        let mut acc = StreamAccumulator::new();
        let mut pieces = Vec::new();
        pieces.extend(acc.push_chunk(&chunk(serde_json::json!({
            "choices": [{"index": 0, "delta": {"reasoning_content": "hmm"}}]
        }))));
        pieces.extend(acc.push_chunk(&chunk(serde_json::json!({
            "choices": [{"index": 0, "delta": {"content": "Hi"}}]
        }))));
        pieces.extend(acc.finish());

        assert_eq!(
            pieces,
            vec![
                StreamPiece::ThinkStart,
                StreamPiece::Thinking("hmm".to_string()),
                StreamPiece::ThinkEnd,
                StreamPiece::Content("Hi".to_string()),
            ]
        );
        let message = acc.into_message();
        assert_eq!(message.content, "Hi");
        assert_eq!(message.reasoning_content.as_deref(), Some("hmm"));
    }

    #[test]
    fn tool_call_fragments_accumulate_by_index() {
        let mut acc = StreamAccumulator::new();
        for value in [
            serde_json::json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "id": "a", "function": {"name": "read_file", "arguments": ""}},
                {"index": 1, "id": "b", "function": {"name": "list_files", "arguments": "{"}}
            ]}}]}),
            serde_json::json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "function": {"name": "ignored", "arguments": "{\"path\":"}},
                {"index": 1, "function": {"arguments": "}"}}
            ]}}]}),
            serde_json::json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "\"a.txt\"}"}},
                {"index": 2, "function": {"arguments": "{}"}}
            ]}, "finish_reason": "tool_calls"}]}),
        ] {
            acc.push_chunk(&chunk(value));
        }

        assert!(acc.has_tool_calls());
        assert_eq!(acc.finish_reason(), Some("tool_calls"));
        let message = acc.into_message();
        assert_eq!(
            message.tool_calls,
            vec![
                ToolCall {
                    id: "a".to_string(),
                    name: "read_file".to_string(),
                    arguments: "{\"path\":\"a.txt\"}".to_string(),
                },
                ToolCall {
                    id: "b".to_string(),
                    name: "list_files".to_string(),
                    arguments: "{}".to_string(),
                },
            ]
        );
    }

    #[test]
    fn seeded_content_is_kept() {
        let mut acc = StreamAccumulator::with_content("```rust\n");
        acc.push_chunk(&chunk(serde_json::json!({
            "choices": [{"index": 0, "delta": {"content": "fn main() {}"}}]
        })));
        assert_eq!(acc.into_message().content, "```rust\nfn main() {}");
    }
}
