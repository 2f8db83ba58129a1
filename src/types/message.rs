use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    /// Header label used by the transcript format.
    pub fn title(self) -> &'static str {
        match self {
            Self::System => "System",
            Self::User => "User",
            Self::Assistant => "Assistant",
            Self::Tool => "Tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A text file attached to a user request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedFile {
    pub path: String,
    pub abs_path: PathBuf,
    pub encoding: String,
    pub content: String,
}

/// One function call requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn to_wire(&self) -> Value {
        json!({
            "id": self.id,
            "type": "function",
            "function": {
                "name": self.name,
                "arguments": self.arguments,
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageKind {
    #[default]
    Normal,
    ApiError,
    UnknownError,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::ApiError => "api_error",
            Self::UnknownError => "unknown_error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "normal" => Some(Self::Normal),
            "api_error" => Some(Self::ApiError),
            "unknown_error" => Some(Self::UnknownError),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub files: Vec<AttachedFile>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
    pub name: Option<String>,
    pub kind: MessageKind,
    /// Marks a synthetic assistant message as a continuation anchor.
    pub prefix: bool,
    pub timestamp: Option<DateTime<Local>>,
    pub elapsed_secs: Option<f64>,
    pub tokens: Option<usize>,
    pub reasoning_content: Option<String>,
    pub reasoning_tokens: Option<usize>,
    pub tokenizer: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            files: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            kind: MessageKind::Normal,
            prefix: false,
            timestamp: Some(Local::now()),
            elapsed_secs: None,
            tokens: None,
            reasoning_content: None,
            reasoning_tokens: None,
            tokenizer: None,
            base_url: None,
            model: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut message = Self::new(Role::Tool, content);
        message.tool_call_id = Some(tool_call_id.into());
        message.name = Some(name.into());
        message
    }

    /// Assistant message standing in for a failed generation.
    pub fn error(kind: MessageKind, type_name: &str, detail: &str) -> Self {
        let mut message = Self::assistant(format!("{type_name}: {detail}"));
        message.kind = kind;
        message.elapsed_secs = Some(0.0);
        message
    }

    pub fn is_error(&self) -> bool {
        self.kind != MessageKind::Normal
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn is_empty_assistant(&self) -> bool {
        self.role == Role::Assistant && self.content.is_empty() && self.tool_calls.is_empty()
    }

    /// Text content with attached files inlined as an `[attachments]` section.
    pub fn content_with_attachments(&self) -> String {
        if self.files.is_empty() {
            return self.content.clone();
        }

        let mut out = self.content.clone();
        out.push_str("\n\n[attachments]\n");
        for file in &self.files {
            out.push_str(&format!(
                "--- {path} ---\n{content}\n--- end {path} ---\n",
                path = file.path,
                content = file.content.trim_end_matches('\n'),
            ));
        }
        out
    }

    /// Chat-completions representation of this message.
    pub fn to_wire(&self, include_reasoning: bool) -> Value {
        let mut object = Map::new();
        object.insert("role".to_string(), json!(self.role.as_str()));

        let content = self.content_with_attachments();
        if self.role == Role::Assistant && content.is_empty() && self.has_tool_calls() {
            object.insert("content".to_string(), Value::Null);
        } else {
            object.insert("content".to_string(), Value::String(content));
        }

        if self.role == Role::Assistant {
            if include_reasoning {
                if let Some(reasoning) = self.reasoning_content.as_deref() {
                    object.insert("reasoning_content".to_string(), json!(reasoning));
                }
            }
            if self.has_tool_calls() {
                object.insert(
                    "tool_calls".to_string(),
                    Value::Array(self.tool_calls.iter().map(ToolCall::to_wire).collect()),
                );
            }
            if self.prefix {
                object.insert("prefix".to_string(), Value::Bool(true));
            }
        }

        if self.role == Role::Tool {
            if let Some(id) = &self.tool_call_id {
                object.insert("tool_call_id".to_string(), json!(id));
            }
            if let Some(name) = &self.name {
                object.insert("name".to_string(), json!(name));
            }
        }

        Value::Object(object)
    }
}
