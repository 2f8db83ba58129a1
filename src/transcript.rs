//! Markdown conversation log.
//!
//! Each message is a `**Role:**` header followed by its text. Optional tagged
//! sections carry reasoning (`<think>`), tool calls (`<tool-calls>`), tool
//! results (`<tool-result>`) and attachments (`<attachment>`). A trailing
//! `<small>` block holds `- key: value` metadata; multi-line values use a
//! `<<EOF ... EOF` sentinel.
//!
//! Body lines that would read as a header or tag get one leading backslash,
//! which is stripped again on load.

use crate::types::{AttachedFile, Message, MessageKind, Role, ToolCall};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub trait ConversationLogger: Send {
    fn log(&mut self, message: &Message) -> Result<()>;
    fn set_enabled(&mut self, enabled: bool);
    fn is_enabled(&self) -> bool;
    fn location(&self) -> Option<&Path>;
}

/// Appends rendered messages to one markdown file.
pub struct MarkdownLog {
    path: PathBuf,
    enabled: bool,
}

impl MarkdownLog {
    pub fn new(path: PathBuf, enabled: bool) -> Self {
        Self { path, enabled }
    }
}

impl ConversationLogger for MarkdownLog {
    fn log(&mut self, message: &Message) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.write_all(render_message(message).as_bytes())
            .with_context(|| format!("failed to write {}", self.path.display()))
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

pub fn render_message(message: &Message) -> String {
    let header_role = match message.role {
        Role::Tool => Role::Assistant,
        role => role,
    };
    let mut out = format!("**{}:**\n\n", header_role.title());

    if let Some(reasoning) = message.reasoning_content.as_deref() {
        out.push_str("<think>\n");
        push_body(&mut out, reasoning);
        out.push_str("</think>\n\n");
    }

    if message.role == Role::Tool {
        out.push_str(&format!(
            "<tool-result id=\"{}\" name=\"{}\">\n",
            escape_attr(message.tool_call_id.as_deref().unwrap_or_default()),
            escape_attr(message.name.as_deref().unwrap_or_default()),
        ));
        push_body(&mut out, &message.content);
        out.push_str("</tool-result>\n\n");
    } else if !message.content.is_empty() {
        push_body(&mut out, &message.content);
        out.push('\n');
    }

    for file in &message.files {
        out.push_str(&format!(
            "<attachment path=\"{}\" abs_path=\"{}\" encoding=\"{}\">\n",
            escape_attr(&file.path),
            escape_attr(&file.abs_path.to_string_lossy()),
            escape_attr(&file.encoding),
        ));
        push_body(&mut out, &file.content);
        out.push_str("</attachment>\n\n");
    }

    if message.has_tool_calls() {
        let calls = serde_json::to_string(&message.tool_calls).unwrap_or_else(|_| "[]".into());
        out.push_str("<tool-calls>\n");
        out.push_str(&calls);
        out.push_str("\n</tool-calls>\n\n");
    }

    let metadata = metadata_entries(message);
    if !metadata.is_empty() {
        out.push_str("<small>\n");
        for (key, value) in metadata {
            if value.contains('\n') {
                out.push_str(&format!("- {key}: <<EOF\n{}\nEOF\n", escape_body(&value)));
            } else {
                out.push_str(&format!("- {key}: {value}\n"));
            }
        }
        out.push_str("</small>\n\n");
    }
    out
}

fn push_body(out: &mut String, text: &str) {
    out.push_str(&escape_body(text));
    if !text.ends_with('\n') {
        out.push('\n');
    }
}

fn escape_body(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        if is_markup(line.trim_end().trim_start_matches('\\')) {
            out.push('\\');
        }
        out.push_str(line);
    }
    out
}

fn unescape_line(line: &str) -> &str {
    match line.strip_prefix('\\') {
        Some(rest) if is_markup(rest.trim_end().trim_start_matches('\\')) => rest,
        _ => line,
    }
}

/// Whether a line, with trailing whitespace removed, reads as log structure.
fn is_markup(line: &str) -> bool {
    header_role(line).is_some()
        || matches!(
            line,
            "<think>"
                | "</think>"
                | "<tool-calls>"
                | "</tool-calls>"
                | "</tool-result>"
                | "</attachment>"
                | "<small>"
                | "</small>"
                | "EOF"
        )
        || ((line.starts_with("<tool-result ") || line.starts_with("<attachment "))
            && line.ends_with('>'))
}

fn metadata_entries(message: &Message) -> Vec<(&'static str, String)> {
    let mut entries = Vec::new();
    if let Some(timestamp) = message.timestamp {
        entries.push(("timestamp", timestamp.to_rfc3339()));
    }
    if let Some(elapsed) = message.elapsed_secs {
        entries.push(("elapsed", format!("{elapsed:.3}")));
    }
    if let Some(tokens) = message.tokens {
        entries.push(("tokens", tokens.to_string()));
    }
    if let Some(tokens) = message.reasoning_tokens {
        entries.push(("reasoning_tokens", tokens.to_string()));
    }
    if let Some(tokenizer) = &message.tokenizer {
        entries.push(("tokenizer", tokenizer.clone()));
    }
    if let Some(model) = &message.model {
        entries.push(("model", model.clone()));
    }
    if let Some(base_url) = &message.base_url {
        entries.push(("base_url", base_url.clone()));
    }
    if message.kind != MessageKind::Normal {
        entries.push(("kind", message.kind.as_str().to_string()));
    }
    entries
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

fn unescape_attr(value: &str) -> String {
    value.replace("&quot;", "\"").replace("&amp;", "&")
}

pub fn load_transcript(path: &Path) -> Result<Vec<Message>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_transcript(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn header_role(line: &str) -> Option<Role> {
    match line.trim_end() {
        "**System:**" => Some(Role::System),
        "**User:**" => Some(Role::User),
        "**Assistant:**" => Some(Role::Assistant),
        "**Tool:**" => Some(Role::Tool),
        _ => None,
    }
}

pub fn parse_transcript(text: &str) -> Result<Vec<Message>> {
    let mut sections: Vec<(Role, Vec<&str>)> = Vec::new();
    for line in text.lines() {
        if let Some(role) = header_role(line) {
            sections.push((role, Vec::new()));
        } else if let Some((_, lines)) = sections.last_mut() {
            lines.push(line);
        } else if !line.trim().is_empty() {
            bail!("text before the first role header: {line:?}");
        }
    }

    let mut messages = Vec::new();
    for (role, lines) in sections {
        messages.extend(parse_section(role, &lines)?);
    }
    Ok(messages)
}

/// Lines between `open` (already consumed) and the matching `close` line.
fn take_until<'a>(lines: &mut std::slice::Iter<'_, &'a str>, close: &str) -> Result<String> {
    let mut body = Vec::new();
    for line in lines.by_ref() {
        if line.trim_end() == close {
            return Ok(body.join("\n"));
        }
        body.push(unescape_line(line));
    }
    bail!("missing {close}")
}

fn attr(tag: &str, key: &str) -> Option<String> {
    let needle = format!(" {key}=\"");
    let start = tag.find(&needle)? + needle.len();
    let end = tag[start..].find('"')?;
    Some(unescape_attr(&tag[start..start + end]))
}

fn parse_section(role: Role, lines: &[&str]) -> Result<Vec<Message>> {
    let mut content: Vec<&str> = Vec::new();
    let mut reasoning = None;
    let mut tool_calls = Vec::new();
    let mut tool_results = Vec::new();
    let mut files = Vec::new();
    let mut metadata: Vec<(String, String)> = Vec::new();

    let mut iter = lines.iter();
    while let Some(line) = iter.next() {
        let trimmed = line.trim_end();
        if trimmed == "<think>" {
            reasoning = Some(take_until(&mut iter, "</think>")?);
        } else if trimmed == "<tool-calls>" {
            let json = take_until(&mut iter, "</tool-calls>")?;
            let calls: Vec<ToolCall> =
                serde_json::from_str(&json).context("malformed <tool-calls> section")?;
            tool_calls.extend(calls);
        } else if trimmed.starts_with("<tool-result ") && trimmed.ends_with('>') {
            let body = take_until(&mut iter, "</tool-result>")?;
            tool_results.push(Message::tool(
                attr(trimmed, "id").unwrap_or_default(),
                attr(trimmed, "name").unwrap_or_default(),
                body,
            ));
        } else if trimmed.starts_with("<attachment ") && trimmed.ends_with('>') {
            let body = take_until(&mut iter, "</attachment>")?;
            let path = attr(trimmed, "path").unwrap_or_default();
            files.push(AttachedFile {
                abs_path: attr(trimmed, "abs_path")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(&path)),
                encoding: attr(trimmed, "encoding").unwrap_or_else(|| "utf-8".to_string()),
                path,
                content: body,
            });
        } else if trimmed == "<small>" {
            metadata = parse_metadata(&mut iter)?;
        } else {
            content.push(unescape_line(line));
        }
    }

    let content = content.join("\n").trim_matches('\n').to_string();
    let mut messages = Vec::new();

    if !tool_results.is_empty() {
        for message in &mut tool_results {
            apply_metadata(message, &metadata);
        }
        messages.extend(tool_results);
        if content.is_empty() && tool_calls.is_empty() {
            return Ok(messages);
        }
    }

    let mut message = Message::new(role, content);
    message.reasoning_content = reasoning;
    message.tool_calls = tool_calls;
    message.files = files;
    apply_metadata(&mut message, &metadata);
    messages.insert(0, message);
    Ok(messages)
}

fn parse_metadata(lines: &mut std::slice::Iter<'_, &str>) -> Result<Vec<(String, String)>> {
    let mut entries = Vec::new();
    while let Some(line) = lines.next() {
        let line = line.trim_end();
        if line == "</small>" {
            return Ok(entries);
        }
        let Some(entry) = line.strip_prefix("- ") else {
            continue;
        };
        let Some((key, value)) = entry.split_once(": ") else {
            continue;
        };
        let value = if value == "<<EOF" {
            take_until(lines, "EOF")?
        } else {
            value.to_string()
        };
        entries.push((key.to_string(), value));
    }
    bail!("missing </small>")
}

fn apply_metadata(message: &mut Message, metadata: &[(String, String)]) {
    message.timestamp = None;
    for (key, value) in metadata {
        match key.as_str() {
            "timestamp" => {
                message.timestamp = DateTime::parse_from_rfc3339(value)
                    .ok()
                    .map(|ts| ts.with_timezone(&Local));
            }
            "elapsed" => message.elapsed_secs = value.parse().ok(),
            "tokens" => message.tokens = value.parse().ok(),
            "reasoning_tokens" => message.reasoning_tokens = value.parse().ok(),
            "tokenizer" => message.tokenizer = Some(value.clone()),
            "model" => message.model = Some(value.clone()),
            "base_url" => message.base_url = Some(value.clone()),
            "kind" => message.kind = MessageKind::parse(value).unwrap_or_default(),
            other => tracing::debug!(key = other, "ignoring unknown transcript metadata"),
        }
    }
}
