//! Established story facts and consistency checking.
//!
//! Facts are short natural-language statements the narrative is supposed to
//! honor. The list is capacity-bounded and conflicts are detected with
//! lexical heuristics. Detection is advisory: a flagged fact is reported to
//! the user, never rejected automatically.

use serde::{Deserialize, Serialize};

/// Maximum number of tracked facts.
pub const MAX_FACTS: usize = 15;

/// Relationship vocabulary for the collision heuristic. Two facts using the
/// same term about the same named character probably disagree. Different
/// terms ("married" vs "single") deliberately do not collide; that blind
/// spot is part of the heuristic.
const RELATIONSHIP_TERMS: &[&str] = &[
    "married", "divorced", "single", "dating", "engaged", "husband", "wife", "spouse",
];

/// Ordered, capacity-bounded list of facts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactList {
    facts: Vec<String>,
}

impl FactList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(facts: Vec<String>) -> Self {
        Self { facts }
    }

    pub fn facts(&self) -> &[String] {
        &self.facts
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.facts.len() >= MAX_FACTS
    }

    /// Append a fact. Returns false when the list is at capacity.
    pub fn add(&mut self, fact: String) -> bool {
        if self.is_full() {
            return false;
        }
        self.facts.push(fact);
        true
    }

    /// Replace the fact at `index`. Returns false on a bad index.
    pub fn edit(&mut self, index: usize, fact: String) -> bool {
        match self.facts.get_mut(index) {
            Some(slot) => {
                *slot = fact;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<String> {
        if index < self.facts.len() {
            Some(self.facts.remove(index))
        } else {
            None
        }
    }

    /// First existing fact that plausibly contradicts `new_fact`, if any.
    pub fn conflicts_with(&self, new_fact: &str) -> Option<&str> {
        conflicts(new_fact, &self.facts)
    }

    /// Every conflicting (i, j) pair with i < j. Used for whole-list audits.
    pub fn pairwise_conflicts(&self) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for i in 0..self.facts.len() {
            for j in (i + 1)..self.facts.len() {
                if conflict_between(&self.facts[i], &self.facts[j]) {
                    pairs.push((i, j));
                }
            }
        }
        pairs
    }
}

/// First member of `existing` that plausibly contradicts `new_fact`.
pub fn conflicts<'a>(new_fact: &str, existing: &'a [String]) -> Option<&'a str> {
    existing
        .iter()
        .find(|fact| conflict_between(new_fact, fact))
        .map(|s| s.as_str())
}

/// Two lexical heuristics, both intentionally approximate.
fn conflict_between(a: &str, b: &str) -> bool {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();

    // Negation: one fact contains "not " and the other contains the same
    // statement with the "not " removed.
    if (a_lower.contains("not ") && b_lower.contains(&a_lower.replace("not ", "")))
        || (b_lower.contains("not ") && a_lower.contains(&b_lower.replace("not ", "")))
    {
        return true;
    }

    // Relationship-term collision: same term in both facts, at least one
    // shared capitalized name, and the facts are not literally identical.
    for term in RELATIONSHIP_TERMS {
        if a_lower.contains(term) && b_lower.contains(term) {
            if a_lower == b_lower {
                continue;
            }
            let names_a = proper_nouns(a);
            if names_a.is_empty() {
                continue;
            }
            let names_b = proper_nouns(b);
            if names_a.iter().any(|name| names_b.contains(name)) {
                return true;
            }
        }
    }

    false
}

/// Capitalized tokens as a cheap proxy for character names.
fn proper_nouns(text: &str) -> Vec<String> {
    let pattern = regex::Regex::new(r"\b[A-Z][A-Za-z]*\b").unwrap();
    pattern
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_enforced() {
        let mut list = FactList::new();
        for i in 0..MAX_FACTS {
            assert!(list.add(format!("fact {i}")));
        }
        assert!(list.is_full());
        assert!(!list.add("one too many".to_string()));
        assert_eq!(list.len(), MAX_FACTS);
    }

    #[test]
    fn test_negation_heuristic() {
        let existing = vec!["The castle is not abandoned".to_string()];
        assert!(conflicts("The castle is abandoned", &existing).is_some());
        assert!(conflicts("The castle is haunted", &existing).is_none());
    }

    #[test]
    fn test_negation_heuristic_symmetric() {
        let existing = vec!["Mira is happy".to_string()];
        assert!(conflicts("Mira is not happy", &existing).is_some());
    }

    #[test]
    fn test_relationship_collision_same_term_shared_name() {
        let existing = vec!["Mary is married to Tom".to_string()];
        assert!(conflicts("Mary is married to Henry", &existing).is_some());
    }

    #[test]
    fn test_relationship_no_conflict_on_different_terms() {
        // Known blind spot: "married" and "single" are different terms, so
        // the heuristic stays quiet.
        let existing = vec!["Mary is single".to_string()];
        assert!(conflicts("Mary is married to Tom", &existing).is_none());
    }

    #[test]
    fn test_relationship_no_conflict_without_shared_name() {
        let existing = vec!["Alice is engaged".to_string()];
        assert!(conflicts("Bridget is engaged", &existing).is_none());
    }

    #[test]
    fn test_identical_facts_do_not_conflict() {
        let existing = vec!["Tom is married".to_string()];
        assert!(conflicts("Tom is married", &existing).is_none());
    }

    #[test]
    fn test_pairwise_conflicts_indices() {
        let list = FactList::from_vec(vec![
            "Elena is married to Rolf".to_string(),
            "The moon is full".to_string(),
            "Elena is married to Gregor".to_string(),
        ]);
        assert_eq!(list.pairwise_conflicts(), vec![(0, 2)]);
    }

    #[test]
    fn test_edit_and_remove() {
        let mut list = FactList::from_vec(vec!["a".to_string(), "b".to_string()]);
        assert!(list.edit(1, "c".to_string()));
        assert!(!list.edit(5, "x".to_string()));
        assert_eq!(list.remove(0).as_deref(), Some("a"));
        assert_eq!(list.facts(), &["c".to_string()]);
        assert!(list.remove(7).is_none());
    }
}
