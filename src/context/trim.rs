//! Budget trimming.
//!
//! Enforces a hard turn-count ceiling and an optional token ceiling on a
//! history. The leading system turn always survives and recency wins: the
//! kept non-system turns are always a contiguous suffix of the originals.

use tracing::warn;

use super::history::History;
use super::tokens;
use super::turn::{Role, Turn};

/// Characters granted per token when the system turn alone must be cut down.
const APPROX_CHARS_PER_TOKEN: usize = 4;

/// Trim a history to fit `max_turns` non-system turns and, when given, a
/// `max_tokens` budget. Token trimming walks newest to oldest and stops at
/// the first turn that would overflow; it never skips ahead to smaller
/// older turns.
pub fn trim(history: &History, max_tokens: Option<usize>, max_turns: usize) -> History {
    if history.is_empty() {
        return History::default();
    }

    let mut turns: Vec<Turn> = history.turns().to_vec();
    let system = if turns.first().map(|t| t.role) == Some(Role::System) {
        Some(turns.remove(0))
    } else {
        None
    };

    // Hard cap on turn count first, oldest dropped.
    if turns.len() > max_turns {
        turns.drain(..turns.len() - max_turns);
    }

    if let (Some(max_tokens), Some(system)) = (max_tokens, system.as_ref()) {
        let system_tokens = tokens::estimate(&system.content);

        if system_tokens >= max_tokens {
            // The system turn alone does not fit. Truncating it destroys
            // information, so say so loudly.
            warn!(
                "System turn exceeds the whole token budget ({} >= {}), truncating",
                system_tokens, max_tokens
            );
            let mut truncated = system.clone();
            truncated.content =
                clip_chars(&truncated.content, max_tokens * APPROX_CHARS_PER_TOKEN).to_string();
            return History::from_turns(vec![truncated]);
        }

        let budget = max_tokens - system_tokens;
        let mut kept: Vec<Turn> = Vec::with_capacity(turns.len());
        let mut total = 0;

        for turn in turns.iter().rev() {
            let cost = tokens::estimate(&turn.content);
            if total + cost > budget {
                break;
            }
            total += cost;
            kept.push(turn.clone());
        }
        kept.reverse();
        turns = kept;
    }

    let mut result = Vec::with_capacity(turns.len() + 1);
    if let Some(system) = system {
        result.push(system);
    }
    result.extend(turns);
    History::from_turns(result)
}

/// Slice off a prefix of at most `max_chars` characters, respecting char
/// boundaries.
fn clip_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_history() -> History {
        History::from_turns(vec![
            Turn::system("narrate the story"),
            Turn::user("u1"),
            Turn::assistant("a1"),
            Turn::user("u2"),
            Turn::assistant("a2"),
            Turn::user("u3"),
            Turn::assistant("a3"),
        ])
    }

    #[test]
    fn test_trim_empty_history() {
        assert!(trim(&History::default(), Some(100), 10).is_empty());
    }

    #[test]
    fn test_trim_respects_turn_ceiling() {
        let trimmed = trim(&sample_history(), None, 4);
        assert_eq!(trimmed.exchange_len(), 4);
        assert!(trimmed.has_system());
        // Suffix retention, oldest exchanges dropped.
        assert_eq!(trimmed.turns()[1].content, "u2");
        assert_eq!(trimmed.turns()[4].content, "a3");
    }

    #[test]
    fn test_trim_keeps_contiguous_suffix() {
        let history = sample_history();
        let trimmed = trim(&history, Some(tokens::estimate("narrate the story") + 8), 100);
        let original: Vec<&str> = history.turns()[1..]
            .iter()
            .map(|t| t.content.as_str())
            .collect();
        let kept: Vec<&str> = trimmed.turns()[1..]
            .iter()
            .map(|t| t.content.as_str())
            .collect();
        assert!(original.ends_with(&kept));
    }

    #[test]
    fn test_trim_token_budget_newest_first() {
        // Each short turn costs 1 word + 0 chars/4 = 1 token; system is 3
        // words + 17/4 chars = 7 tokens. Budget of 9 leaves room for two.
        let trimmed = trim(&sample_history(), Some(9), 100);
        assert_eq!(trimmed.len(), 3);
        assert_eq!(trimmed.turns()[1].content, "u3");
        assert_eq!(trimmed.turns()[2].content, "a3");
        assert!(tokens::estimate_history(&trimmed) <= 9);
    }

    #[test]
    fn test_trim_system_alone_over_budget() {
        let big_system = "word ".repeat(500);
        let history = History::from_turns(vec![
            Turn::system(big_system),
            Turn::user("u"),
            Turn::assistant("a"),
        ]);
        let trimmed = trim(&history, Some(100), 100);
        assert_eq!(trimmed.len(), 1);
        assert!(trimmed.has_system());
        assert!(trimmed.turns()[0].content.chars().count() <= 400);
    }

    #[test]
    fn test_trim_without_token_ceiling() {
        let trimmed = trim(&sample_history(), None, 100);
        assert_eq!(trimmed, sample_history());
    }

    #[test]
    fn test_trim_no_system_turn_skips_token_pass() {
        let history = History::from_turns(vec![Turn::user("u"), Turn::assistant("a")]);
        let trimmed = trim(&history, Some(1), 10);
        // No system turn, so only the count ceiling applies.
        assert_eq!(trimmed.len(), 2);
    }
}
