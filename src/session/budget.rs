use crate::tokenizer::Tokenizer;
use crate::types::Message;
use std::fmt;

pub const DEFAULT_CONTEXT_WINDOW: usize = 65_536;

/// Share of the window available to history once room for a reply is kept.
const HISTORY_SAFETY_FACTOR: f64 = 0.9;
const SUBMISSION_WARN_RATIO: f64 = 0.7;
const PRECALL_WARN_RATIO: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetWarning {
    pub tokens: usize,
    pub limit: usize,
    pub percent: u8,
}

impl fmt::Display for BudgetWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "conversation is ~{} tokens, over {}% of the {}-token budget; consider `clear`",
            self.tokens, self.percent, self.limit
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    pub context_window: usize,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_WINDOW)
    }
}

impl TokenBudget {
    pub fn new(context_window: usize) -> Self {
        Self { context_window }
    }

    pub fn history_limit(&self) -> usize {
        (self.context_window as f64 * HISTORY_SAFETY_FACTOR) as usize
    }

    /// Checked when a request is submitted.
    pub fn submission_warning(&self, tokens: usize) -> Option<BudgetWarning> {
        let limit = self.history_limit();
        (tokens as f64 >= limit as f64 * SUBMISSION_WARN_RATIO).then_some(BudgetWarning {
            tokens,
            limit,
            percent: 70,
        })
    }

    /// Checked right before each model call.
    pub fn precall_warning(&self, tokens: usize) -> Option<BudgetWarning> {
        (tokens as f64 > self.context_window as f64 * PRECALL_WARN_RATIO).then_some(
            BudgetWarning {
                tokens,
                limit: self.context_window,
                percent: 90,
            },
        )
    }
}

/// Token count for a message, reusing the cached value when it was produced by
/// the same tokenizer.
pub fn cached_tokens(message: &Message, tokenizer: &dyn Tokenizer) -> usize {
    let same_tokenizer = message.tokenizer.as_deref() == Some(tokenizer.id());
    let content = match message.tokens {
        Some(tokens) if same_tokenizer => tokens,
        _ => tokenizer.count(&message.content_with_attachments()),
    };
    let reasoning = match (message.reasoning_content.as_deref(), message.reasoning_tokens) {
        (None, _) => 0,
        (Some(_), Some(tokens)) if same_tokenizer => tokens,
        (Some(text), _) => tokenizer.count(text),
    };
    content + reasoning
}

/// Fills in missing or stale token counts.
pub fn cache_tokens(message: &mut Message, tokenizer: &dyn Tokenizer) {
    if message.tokenizer.as_deref() == Some(tokenizer.id()) && message.tokens.is_some() {
        return;
    }
    message.tokens = Some(tokenizer.count(&message.content_with_attachments()));
    message.reasoning_tokens = message
        .reasoning_content
        .as_deref()
        .map(|text| tokenizer.count(text));
    message.tokenizer = Some(tokenizer.id().to_string());
}

pub fn estimate_tokens<'a>(
    messages: impl IntoIterator<Item = &'a Message>,
    tokenizer: &dyn Tokenizer,
) -> usize {
    messages
        .into_iter()
        .map(|message| cached_tokens(message, tokenizer))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::CharRatioTokenizer;

    #[test]
    fn warnings_follow_both_thresholds() {
        let budget = TokenBudget::new(1000);

        assert!(budget.submission_warning(650).is_some());
        assert!(budget.precall_warning(650).is_none());

        assert!(budget.submission_warning(960).is_some());
        assert!(budget.precall_warning(960).is_some());

        assert!(budget.submission_warning(600).is_none());
        assert!(budget.precall_warning(600).is_none());
    }

    struct FixedTokenizer;

    impl Tokenizer for FixedTokenizer {
        fn id(&self) -> &str {
            "fixed"
        }

        fn count(&self, _text: &str) -> usize {
            7
        }
    }

    #[test]
    fn cached_count_is_used_only_for_matching_tokenizer() {
        let mut message = Message::user("hello world");
        message.tokens = Some(100);
        message.tokenizer = Some("fixed".to_string());

        assert_eq!(cached_tokens(&message, &FixedTokenizer), 100);
        assert_eq!(cached_tokens(&message, &CharRatioTokenizer), 3);

        cache_tokens(&mut message, &CharRatioTokenizer);
        assert_eq!(message.tokens, Some(3));
        assert_eq!(message.tokenizer.as_deref(), Some("chars/4"));
    }

    #[test]
    fn reasoning_tokens_are_added() {
        let mut message = Message::assistant("abc");
        message.reasoning_content = Some("thinking".to_string());
        assert_eq!(estimate_tokens([&message], &FixedTokenizer), 14);
    }
}
