//! Token cost estimation.
//!
//! A budget heuristic, not a tokenizer: word count plus a quarter of the
//! character count. Over-counts short technical strings, under-counts dense
//! prose. It only has to be monotonic in text length and O(length) cheap.

use super::history::History;

/// Approximate characters per model token.
const APPROX_CHARS_PER_TOKEN: usize = 4;

/// Estimate the token cost of a piece of text.
pub fn estimate(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let words = text.split_whitespace().count();
    words + text.chars().count() / APPROX_CHARS_PER_TOKEN
}

/// Estimate the total token cost of a history, system turn included.
pub fn estimate_history(history: &History) -> usize {
    history.turns().iter().map(|t| estimate(&t.content)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::turn::Turn;

    #[test]
    fn test_estimate_empty() {
        assert_eq!(estimate(""), 0);
    }

    #[test]
    fn test_estimate_counts_words_and_chars() {
        // 2 words + 11 chars / 4 = 2 + 2
        assert_eq!(estimate("hello world"), 4);
    }

    #[test]
    fn test_estimate_monotonic_in_length() {
        let short = "once upon a time";
        let long = "once upon a time there was a fox";
        assert!(estimate(long) > estimate(short));
    }

    #[test]
    fn test_estimate_history_sums_all_turns() {
        let history = History::from_turns(vec![
            Turn::system("hello world"),
            Turn::user("hello world"),
        ]);
        assert_eq!(estimate_history(&history), 2 * estimate("hello world"));
    }
}
