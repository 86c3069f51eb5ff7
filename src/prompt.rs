//! System prompt construction and housekeeping.
//!
//! The system turn carries the storytelling guidelines, the active story
//! setting, and the established facts. Re-applying settings or facts must
//! never stack duplicate sections, so both the guideline block and the
//! facts block are replaced in place rather than appended blindly.

use crate::facts::FactList;
use crate::story::StorySetting;

/// Built-in storytelling guidelines. Every story prompt ends with these.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an AI narrator for collaborative interactive storytelling. The user \
describes scenes as the narrator; you respond in character with dialogue, \
thoughts, and actions.

Guidelines:
1. Stay in character. Speak and act as the characters in the story.
2. Use immersive descriptions. Show emotions, actions, and surroundings.
3. Always move the story forward with engaging responses.
4. When several characters speak, label each character's dialogue clearly.
5. If the user's input is short, expand on it with natural storytelling.

Keep the story engaging and consistent with everything established so far.";

/// Sentinel used to spot duplicated copies of the guideline block.
const DEFAULT_PROMPT_MARKER: &str = "You are an AI narrator for collaborative interactive storytelling.";

/// Header introducing the facts section inside the system prompt.
const FACTS_HEADER: &str = "Established Story Facts:";

/// Collapse repeated copies of the built-in guideline block down to one,
/// keeping whatever custom text came before the first copy.
pub fn dedupe_default_section(prompt: &str) -> String {
    if prompt.matches(DEFAULT_PROMPT_MARKER).count() <= 1 {
        return prompt.to_string();
    }

    let prefix = match prompt.find(DEFAULT_PROMPT_MARKER) {
        Some(0) | None => String::new(),
        Some(idx) => prompt[..idx].trim_end().to_string(),
    };

    if prefix.is_empty() {
        DEFAULT_SYSTEM_PROMPT.to_string()
    } else {
        format!("{prefix}\n\n{DEFAULT_SYSTEM_PROMPT}")
    }
}

/// Append the numbered facts section, replacing any existing one first.
/// With no facts the prompt passes through untouched.
pub fn append_facts(prompt: &str, facts: &FactList) -> String {
    if facts.is_empty() {
        return prompt.to_string();
    }

    let base = match prompt.find(FACTS_HEADER) {
        Some(idx) => prompt[..idx].trim_end(),
        None => prompt,
    };

    let mut result = String::with_capacity(base.len() + 256);
    result.push_str(base);
    result.push_str("\n\n");
    result.push_str(FACTS_HEADER);
    result.push('\n');
    for (i, fact) in facts.facts().iter().enumerate() {
        result.push_str(&format!("{}. {}\n", i + 1, fact));
    }
    result.push_str("\nRemember to maintain consistency with these established facts.");
    result
}

/// Compose the full system prompt for a story setting. An explicit
/// `system_prompt` on the setting wins; otherwise one is generated from the
/// setting's parts plus the built-in guidelines.
pub fn compose_story_prompt(setting: &StorySetting) -> String {
    if !setting.system_prompt.trim().is_empty() {
        return dedupe_default_section(&setting.system_prompt);
    }

    format!(
        "Story Title: {}\n\nWorld:\n{}\n\nMain Characters:\n{}\n\nThemes:\n{}\n\n{}",
        setting.title, setting.world, setting.characters, setting.themes, DEFAULT_SYSTEM_PROMPT
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_single_copy_untouched() {
        let prompt = format!("My world.\n\n{DEFAULT_SYSTEM_PROMPT}");
        assert_eq!(dedupe_default_section(&prompt), prompt);
    }

    #[test]
    fn test_dedupe_collapses_repeats() {
        let doubled = format!("Prelude.\n\n{DEFAULT_SYSTEM_PROMPT}\n\n{DEFAULT_SYSTEM_PROMPT}");
        let cleaned = dedupe_default_section(&doubled);
        assert_eq!(cleaned.matches(DEFAULT_PROMPT_MARKER).count(), 1);
        assert!(cleaned.starts_with("Prelude."));
    }

    #[test]
    fn test_append_facts_numbers_entries() {
        let facts = FactList::from_vec(vec![
            "The king is dead".to_string(),
            "Winter lasts years".to_string(),
        ]);
        let prompt = append_facts("Narrate.", &facts);
        assert!(prompt.contains("Established Story Facts:"));
        assert!(prompt.contains("1. The king is dead"));
        assert!(prompt.contains("2. Winter lasts years"));
    }

    #[test]
    fn test_append_facts_replaces_existing_section() {
        let facts = FactList::from_vec(vec!["New fact".to_string()]);
        let prompt = append_facts("Narrate.", &facts);
        let reapplied = append_facts(&prompt, &facts);
        assert_eq!(reapplied.matches("Established Story Facts:").count(), 1);
        assert_eq!(reapplied.matches("New fact").count(), 1);
    }

    #[test]
    fn test_append_facts_empty_passthrough() {
        assert_eq!(append_facts("Narrate.", &FactList::new()), "Narrate.");
    }

    #[test]
    fn test_compose_prefers_explicit_prompt() {
        let setting = StorySetting {
            title: "T".to_string(),
            world: "W".to_string(),
            characters: "C".to_string(),
            themes: "Th".to_string(),
            system_prompt: "Custom narration rules.".to_string(),
        };
        assert_eq!(compose_story_prompt(&setting), "Custom narration rules.");
    }

    #[test]
    fn test_compose_generates_from_parts() {
        let setting = StorySetting {
            title: "The Long Drought".to_string(),
            world: "A parched forest".to_string(),
            characters: "Hazel the squirrel".to_string(),
            themes: "perseverance".to_string(),
            system_prompt: String::new(),
        };
        let prompt = compose_story_prompt(&setting);
        assert!(prompt.contains("Story Title: The Long Drought"));
        assert!(prompt.contains("A parched forest"));
        assert!(prompt.contains(DEFAULT_PROMPT_MARKER));
    }
}
