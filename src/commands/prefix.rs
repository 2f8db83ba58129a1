use anyhow::{bail, Result};

pub const DEFAULT_PREFIX: char = ':';

/// Characters that may serve as the command prefix.
pub const PREFIX_CHARS: &str = ":/\\!@#$%^&*+=~.,;?|";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandPrefix(char);

impl Default for CommandPrefix {
    fn default() -> Self {
        Self(DEFAULT_PREFIX)
    }
}

impl CommandPrefix {
    pub fn get(self) -> char {
        self.0
    }

    pub fn is_allowed(c: char) -> bool {
        PREFIX_CHARS.contains(c)
    }

    pub fn set(&mut self, c: char) -> Result<()> {
        if !Self::is_allowed(c) {
            bail!("'{c}' cannot be used as a command prefix (allowed: {PREFIX_CHARS})");
        }
        self.0 = c;
        Ok(())
    }
}

/// Recognizes the `->X` prefix-change word.
///
/// Returns `None` when the word is not a prefix change at all, and an error
/// when it starts like one but names an unusable character.
pub fn parse_prefix_change(word: &str) -> Option<Result<char>> {
    let rest = word.strip_prefix("->")?;
    let mut chars = rest.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if CommandPrefix::is_allowed(c) => Some(Ok(c)),
        (Some(c), None) => Some(Err(anyhow::anyhow!(
            "'{c}' cannot be used as a command prefix (allowed: {PREFIX_CHARS})"
        ))),
        _ => Some(Err(anyhow::anyhow!(
            "prefix change expects exactly one character after '->'"
        ))),
    }
}
