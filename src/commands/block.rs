//! Multi-line capture blocks opened by `<<SIGNATURE` and closed by a line
//! equal to the signature.

#[derive(Debug, Clone, PartialEq, Eq)]
struct BlockContext {
    /// Raw command receiving the content; empty for a bare block.
    tag: String,
    signature: String,
    content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockEvent {
    Captured,
    Closed { tag: String, content: String },
}

#[derive(Debug, Default)]
pub struct BlockStack {
    stack: Vec<BlockContext>,
}

/// Returns the signature when `text` is exactly `<<` followed by word characters.
///
/// Anything carrying `<<<` or a second `<<` is rejected, as is a signature
/// starting with the command prefix.
pub fn parse_signature(text: &str, prefix: char) -> Option<&str> {
    let signature = text.strip_prefix("<<")?;
    if signature.is_empty() || signature.starts_with(prefix) {
        return None;
    }
    if !signature.chars().all(is_word_char) {
        return None;
    }
    Some(signature)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

impl BlockStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_capturing(&self) -> bool {
        !self.stack.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn signature(&self) -> Option<&str> {
        self.stack.last().map(|ctx| ctx.signature.as_str())
    }

    pub fn open(&mut self, tag: impl Into<String>, signature: impl Into<String>) {
        self.stack.push(BlockContext {
            tag: tag.into(),
            signature: signature.into(),
            content: String::new(),
        });
    }

    /// Feeds one input line into the innermost open block.
    pub fn feed(&mut self, line: &str, prefix: char) -> BlockEvent {
        let Some(top) = self.stack.last_mut() else {
            return BlockEvent::Captured;
        };

        if line == top.signature {
            let Some(closed) = self.stack.pop() else {
                return BlockEvent::Captured;
            };
            if let Some(parent) = self.stack.last_mut() {
                parent.content.push_str("<<");
                parent.content.push_str(&closed.signature);
                parent.content.push('\n');
                parent.content.push_str(&closed.content);
                parent.content.push_str(&closed.signature);
                parent.content.push('\n');
                return BlockEvent::Captured;
            }
            let mut content = closed.content;
            if content.ends_with('\n') {
                content.pop();
            }
            return BlockEvent::Closed {
                tag: closed.tag,
                content,
            };
        }

        if let Some(signature) = parse_signature(line, prefix) {
            let signature = signature.to_string();
            self.open("", signature);
            return BlockEvent::Captured;
        }

        top.content.push_str(line);
        top.content.push('\n');
        BlockEvent::Captured
    }

    /// Drops every open block, returning how many were discarded.
    pub fn abandon(&mut self) -> usize {
        let count = self.stack.len();
        self.stack.clear();
        count
    }
}
