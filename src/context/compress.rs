//! Lossy compression of older history.
//!
//! Collapses old user/assistant exchanges into terse synthetic digests so a
//! long-running story keeps a readable trace without paying full token cost.
//! Irreversible, so callers show the token savings and ask before applying
//! the result; nothing here touches the live history on its own.

use super::history::History;
use super::turn::{Role, Turn};

/// Characters of user content quoted in a digest.
const USER_DIGEST_CHARS: usize = 100;

/// Characters of assistant content quoted in a digest.
const ASSISTANT_DIGEST_CHARS: usize = 150;

/// Marker used when a quoted side had to be cut.
const ELLIPSIS: &str = "...";

/// Compress a history, preserving the leading system turn and the most
/// recent `threshold` turns verbatim. Among the older turns, each user turn
/// immediately followed by an assistant turn becomes one synthetic system
/// digest; anything that does not pair up (leftovers of prior corruption)
/// is kept as-is.
pub fn compress(history: &History, threshold: usize) -> History {
    if history.len() <= threshold {
        return history.clone();
    }

    let mut turns: Vec<Turn> = history.turns().to_vec();
    let system = if turns.first().map(|t| t.role) == Some(Role::System) {
        Some(turns.remove(0))
    } else {
        None
    };

    if turns.len() <= threshold {
        let mut result = Vec::with_capacity(turns.len() + 1);
        result.extend(system);
        result.extend(turns);
        return History::from_turns(result);
    }

    let recent = turns.split_off(turns.len() - threshold);
    let older = turns;

    let mut compressed = Vec::with_capacity(older.len());
    let mut i = 0;
    while i < older.len() {
        if i + 1 < older.len()
            && older[i].role == Role::User
            && older[i + 1].role == Role::Assistant
        {
            compressed.push(Turn::system(digest(
                &older[i].content,
                &older[i + 1].content,
            )));
            i += 2;
        } else {
            compressed.push(older[i].clone());
            i += 1;
        }
    }

    let mut result = Vec::with_capacity(compressed.len() + recent.len() + 1);
    result.extend(system);
    result.extend(compressed);
    result.extend(recent);
    History::from_turns(result)
}

/// Replace everything between the system turn and the `keep_recent` newest
/// turns with a single synthetic summary turn. Used after an LLM-generated
/// story recap; same confirm-before-commit contract as `compress`.
pub fn fold_into_summary(history: &History, summary: &str, keep_recent: usize) -> History {
    let mut turns: Vec<Turn> = history.turns().to_vec();
    let system = if turns.first().map(|t| t.role) == Some(Role::System) {
        Some(turns.remove(0))
    } else {
        None
    };

    let keep = keep_recent.min(turns.len());
    let recent = turns.split_off(turns.len() - keep);

    let mut result = Vec::with_capacity(recent.len() + 2);
    result.extend(system);
    result.push(Turn::system(format!(
        "STORY SUMMARY (earlier exchanges compressed): {summary}"
    )));
    result.extend(recent);
    History::from_turns(result)
}

fn digest(user: &str, assistant: &str) -> String {
    format!(
        "[COMPRESSED EXCHANGE] User: {}\nAssistant: {}",
        clip(user, USER_DIGEST_CHARS),
        clip(assistant, ASSISTANT_DIGEST_CHARS),
    )
}

fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}{}", &text[..idx], ELLIPSIS),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange_history(pairs: usize) -> History {
        let mut turns = vec![Turn::system("sys")];
        for i in 0..pairs {
            turns.push(Turn::user(format!("user {i}")));
            turns.push(Turn::assistant(format!("assistant {i}")));
        }
        History::from_turns(turns)
    }

    #[test]
    fn test_compress_below_threshold_unchanged() {
        let history = exchange_history(3);
        assert_eq!(compress(&history, 20), history);
    }

    #[test]
    fn test_compress_preserves_recent_window() {
        let history = exchange_history(10);
        let compressed = compress(&history, 4);
        let n = history.len();
        let m = compressed.len();
        assert_eq!(&compressed.turns()[m - 4..], &history.turns()[n - 4..]);
    }

    #[test]
    fn test_compress_pairs_become_system_digests() {
        let history = exchange_history(10);
        let compressed = compress(&history, 4);
        // 20 turns minus the recent window of 4 leaves 16 older turns,
        // which pair up into 8 digests.
        assert_eq!(compressed.len(), 1 + 8 + 4);
        let digest_turn = &compressed.turns()[1];
        assert_eq!(digest_turn.role, Role::System);
        assert!(digest_turn.content.starts_with("[COMPRESSED EXCHANGE] User: user 0"));
        assert!(digest_turn.content.contains("\nAssistant: assistant 0"));
    }

    #[test]
    fn test_compress_truncates_long_content() {
        let long_user = "u".repeat(300);
        let long_assistant = "a".repeat(300);
        let mut turns = vec![Turn::system("sys")];
        turns.push(Turn::user(long_user));
        turns.push(Turn::assistant(long_assistant));
        for i in 0..4 {
            turns.push(Turn::user(format!("u{i}")));
            turns.push(Turn::assistant(format!("a{i}")));
        }
        let compressed = compress(&History::from_turns(turns), 2);

        let digest_turn = &compressed.turns()[1];
        assert!(digest_turn.content.contains(&format!("{}...", "u".repeat(100))));
        assert!(digest_turn.content.contains(&format!("{}...", "a".repeat(150))));
    }

    #[test]
    fn test_compress_keeps_unpaired_turns() {
        // Two consecutive user turns from prior corruption do not pair up.
        let turns = vec![
            Turn::system("sys"),
            Turn::user("orphan 1"),
            Turn::user("orphan 2"),
            Turn::user("u"),
            Turn::assistant("a"),
        ];
        let compressed = compress(&History::from_turns(turns), 2);
        assert_eq!(compressed.turns()[1].content, "orphan 1");
        assert_eq!(compressed.turns()[1].role, Role::User);
        assert_eq!(compressed.turns()[2].content, "orphan 2");
    }

    #[test]
    fn test_fold_into_summary() {
        let history = exchange_history(6);
        let folded = fold_into_summary(&history, "the fox won", 4);
        assert_eq!(folded.len(), 1 + 1 + 4);
        assert!(folded.turns()[1].content.contains("the fox won"));
        assert_eq!(
            &folded.turns()[2..],
            &history.turns()[history.len() - 4..]
        );
    }
}
