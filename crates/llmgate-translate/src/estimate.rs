//! Token estimation used when an upstream response omits usage counts
//! (§4.B "Token estimation"). A real chat tokenizer is preferred when one
//! is wired in; the fallback is `ceil(chars/4)` with a floor of 1 whenever
//! any text is present, matching the spec's stated fallback exactly.

use llmgate_protocol::{CanonicalMessage, MessageContent};

/// Pluggable exact tokenizer. Providers that ship a real tokenizer (e.g. a
/// `tiktoken`-style BPE) can implement this; the gateway falls back to the
/// character heuristic when none is configured for the target model.
pub trait Tokenizer: Send + Sync {
    fn count(&self, text: &str) -> i64;
}

fn char_heuristic(text: &str) -> i64 {
    if text.is_empty() {
        return 0;
    }
    let len = text.chars().count() as i64;
    std::cmp::max(1, len.div_ceil(4))
}

fn count_text(tokenizer: Option<&dyn Tokenizer>, text: &str) -> i64 {
    match tokenizer {
        Some(t) if !text.is_empty() => t.count(text),
        _ => char_heuristic(text),
    }
}

/// Estimated prompt tokens across every message, never below 1 when any
/// message carries text.
pub fn estimate_prompt_tokens(messages: &[CanonicalMessage], tokenizer: Option<&dyn Tokenizer>) -> i64 {
    let mut total = 0i64;
    let mut saw_text = false;
    for message in messages {
        let text = match &message.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(_) => message.content.as_text(),
        };
        if !text.is_empty() {
            saw_text = true;
        }
        total += count_text(tokenizer, &text);
    }
    if saw_text {
        std::cmp::max(total, 1)
    } else {
        total
    }
}

/// Estimated completion tokens for a single block of generated text.
pub fn estimate_completion_tokens(text: &str, tokenizer: Option<&dyn Tokenizer>) -> i64 {
    if text.is_empty() {
        return 0;
    }
    std::cmp::max(1, count_text(tokenizer, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_heuristic_rounds_up_with_floor_of_one() {
        assert_eq!(char_heuristic(""), 0);
        assert_eq!(char_heuristic("a"), 1);
        assert_eq!(char_heuristic("abcd"), 1);
        assert_eq!(char_heuristic("abcde"), 2);
    }

    #[test]
    fn prompt_estimate_is_at_least_one_when_any_text_present() {
        let messages = vec![CanonicalMessage::user("hi")];
        assert!(estimate_prompt_tokens(&messages, None) >= 1);
    }

    #[test]
    fn prompt_estimate_is_zero_for_empty_conversation() {
        assert_eq!(estimate_prompt_tokens(&[], None), 0);
    }
}
