//! Prompt size estimation and token-budget truncation.
//!
//! Tokens are approximated as `words × 1.3`. The arithmetic is done in
//! integers (`words × 13 / 10`) so the cut point never depends on float
//! rounding.

use std::borrow::Cow;

/// Appended to a prompt that was cut to fit its budget. A single word, so it
/// is counted against the budget like any other word.
pub const TRUNCATION_MARKER: &str = "[...truncated]";

/// Approximate token count of `text`, rounded up.
pub fn approx_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    (words * 13).div_ceil(10)
}

/// Largest word count whose estimate fits within `budget` tokens.
pub fn max_words_for_budget(budget: usize) -> usize {
    budget.saturating_mul(10) / 13
}

/// Cut `text` to the longest whole-word prefix that fits `budget`.
///
/// Words are cut on whitespace, never mid-word, and the whitespace inside
/// the kept prefix is preserved.
///
/// # Arguments
///
/// * `text` - The prompt to fit
/// * `budget` - Approximate token ceiling (see [`approx_tokens`])
///
/// # Returns
///
/// The input untouched when it already fits. Otherwise the kept prefix
/// followed by [`TRUNCATION_MARKER`]; the two together fit the budget, so
/// truncating the result again is a no-op. A budget too small for even the
/// marker yields an empty string.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_to_budget("one two", 100), "one two");
/// assert_eq!(truncate_to_budget("a b c d e f g h", 5), "a b\n\n[...truncated]");
/// ```
pub fn truncate_to_budget(text: &str, budget: usize) -> Cow<'_, str> {
    if approx_tokens(text) <= budget {
        return Cow::Borrowed(text);
    }

    let max_words = max_words_for_budget(budget);
    if max_words == 0 {
        return Cow::Owned(String::new());
    }

    let keep = max_words - 1;
    let prefix = text[..word_prefix_end(text, keep)].trim_end();
    if prefix.is_empty() {
        Cow::Owned(TRUNCATION_MARKER.to_string())
    } else {
        Cow::Owned(format!("{prefix}\n\n{TRUNCATION_MARKER}"))
    }
}

/// Byte offset just past the `words`-th whitespace-separated word.
fn word_prefix_end(text: &str, words: usize) -> usize {
    if words == 0 {
        return 0;
    }
    let mut seen = 0;
    let mut in_word = false;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if in_word {
                seen += 1;
                in_word = false;
                if seen == words {
                    return i;
                }
            }
        } else {
            in_word = true;
        }
    }
    text.len()
}
