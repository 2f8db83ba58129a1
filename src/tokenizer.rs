/// Counts tokens for budget estimates. `id` identifies cached counts.
pub trait Tokenizer: Send + Sync {
    fn id(&self) -> &str;
    fn count(&self, text: &str) -> usize;
}

const CHARS_PER_TOKEN: usize = 4;

/// Roughly four characters per token, rounded up.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharRatioTokenizer;

impl Tokenizer for CharRatioTokenizer {
    fn id(&self) -> &str {
        "chars/4"
    }

    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }
}
