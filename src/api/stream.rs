use super::logging::emit_sse_parse_error;
use crate::types::ChatCompletionChunk;
use anyhow::Result;

#[derive(Debug, Clone)]
pub enum SseEvent {
    Chunk(ChatCompletionChunk),
    Done,
}

/// Incremental parser for chat-completions server-sent events.
///
/// Bytes are buffered until a full event has arrived, so a multi-byte
/// character split across network chunks decodes intact.
#[derive(Default)]
pub struct StreamParser {
    buffer: Vec<u8>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;

        while let Some(len) = event_len(&self.buffer[start..]) {
            let event_end = start + len;
            let event_text = String::from_utf8_lossy(&self.buffer[start..event_end]);

            let mut data = String::new();
            for line in event_text.lines() {
                if line.starts_with(':') {
                    continue;
                }
                if let Some(rest) = line.strip_prefix("data:") {
                    if !data.is_empty() {
                        data.push('\n');
                    }
                    data.push_str(rest.trim());
                }
            }

            if data == "[DONE]" {
                events.push(SseEvent::Done);
            } else if !data.is_empty() {
                match serde_json::from_str::<ChatCompletionChunk>(&data) {
                    Ok(chunk) => events.push(SseEvent::Chunk(chunk)),
                    Err(error) => emit_sse_parse_error(&data, &error),
                }
            }

            start = event_end;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }

        Ok(events)
    }

    /// Returns whatever partial event is still buffered.
    pub fn flush(&mut self) -> String {
        let rest = std::mem::take(&mut self.buffer);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

/// Length of the first complete event, including the blank line that ends it.
/// Accepts both `\n\n` and `\r\n\r\n` framing.
fn event_len(buf: &[u8]) -> Option<usize> {
    let mut idx = 0;
    while let Some(pos) = buf[idx..].iter().position(|b| *b == b'\n') {
        let newline = idx + pos;
        match buf.get(newline + 1) {
            Some(b'\n') => return Some(newline + 2),
            Some(b'\r') if buf.get(newline + 2) == Some(&b'\n') => return Some(newline + 3),
            _ => idx = newline + 1,
        }
    }
    None
}
