//! Structural integrity checking and repair.
//!
//! `verify` is a pure check of the well-formedness invariant: system turn
//! first, strict user/assistant alternation after it, no blank content.
//! `repair` rebuilds a legal history out of whatever it is handed. It never
//! fails; the worst case is a history holding only a synthesized system
//! turn.

use tracing::{info, warn};

use crate::prompt;

use super::history::History;
use super::turn::{Role, Turn};

/// Check a history against the well-formedness invariant without touching it.
pub fn verify(history: &History) -> bool {
    let turns = history.turns();
    if turns.is_empty() {
        return false;
    }
    if turns[0].role != Role::System {
        return false;
    }
    for i in 1..turns.len().saturating_sub(1) {
        if turns[i].role == turns[i + 1].role {
            return false;
        }
    }
    turns.iter().all(|t| !t.is_blank())
}

/// Best-effort repair. `fallback_system` is the composed system prompt
/// (story prompt with facts appended) used when a system turn has to be
/// synthesized.
///
/// Passes run in a fixed order: ensure a leading system turn, merge
/// consecutive same-role runs, drop turns that break alternation, drop
/// blank turns, dedupe repeated sections in the system prompt. Dropping a
/// blank turn can bring two same-role turns back together, so the middle
/// passes repeat until the sequence is stable.
pub fn repair(history: History, fallback_system: &str) -> History {
    let mut turns = history.into_turns();

    if turns.first().map(|t| t.role) != Some(Role::System) {
        info!("Repair: inserting missing system turn");
        turns.insert(0, Turn::system(fallback_system));
    }

    loop {
        let before = turns.len();
        merge_same_role_runs(&mut turns);
        enforce_alternation(&mut turns);
        drop_blank_turns(&mut turns);

        // Blank removal may have emptied the history or eaten the system
        // turn; restore the minimal legal form.
        if turns.first().map(|t| t.role) != Some(Role::System) {
            turns.insert(0, Turn::system(fallback_system));
        }

        if turns.len() == before && verify_turns(&turns) {
            break;
        }
        if turns.len() == before {
            // No progress and still not legal: nothing left to remove
            // except the offenders themselves.
            warn!("Repair could not converge, keeping system turn only");
            turns.truncate(1);
            break;
        }
    }

    if let Some(first) = turns.first_mut() {
        first.content = prompt::dedupe_default_section(&first.content);
    }

    History::from_turns(turns)
}

fn verify_turns(turns: &[Turn]) -> bool {
    verify(&History::from_turns(turns.to_vec()))
}

/// Collapse runs of same-role turns into one turn per role change, joining
/// content with a blank line. The scan restarts at the merge point so a
/// three-in-a-row run collapses fully.
fn merge_same_role_runs(turns: &mut Vec<Turn>) {
    let mut i = 1;
    while i + 1 < turns.len() {
        if turns[i].role == turns[i + 1].role {
            let merged = turns.remove(i + 1);
            turns[i].content.push_str("\n\n");
            turns[i].content.push_str(&merged.content);
            info!("Repair: merged consecutive {} turns at position {}", turns[i].role, i);
        } else {
            i += 1;
        }
    }
}

/// Walk from index 1 with an expected-role cursor seeded from the second
/// turn's role. Turns that do not match the cursor are dropped; the cursor
/// flips only when a turn is kept.
fn enforce_alternation(turns: &mut Vec<Turn>) {
    if turns.len() < 2 {
        return;
    }

    let mut expected = turns[1].role;
    let mut kept: Vec<Turn> = Vec::with_capacity(turns.len());
    let mut dropped = 0;

    let mut drained = turns.drain(..);
    if let Some(system) = drained.next() {
        kept.push(system);
    }
    for turn in drained {
        if turn.role == expected {
            expected = flip(expected);
            kept.push(turn);
        } else {
            dropped += 1;
        }
    }

    if dropped > 0 {
        warn!("Repair: dropped {} turns that broke alternation", dropped);
    }
    *turns = kept;
}

fn flip(role: Role) -> Role {
    match role {
        Role::Assistant => Role::User,
        _ => Role::Assistant,
    }
}

fn drop_blank_turns(turns: &mut Vec<Turn>) {
    let before = turns.len();
    turns.retain(|t| !t.is_blank());
    if turns.len() != before {
        warn!("Repair: removed {} blank turns", before - turns.len());
    }
}
