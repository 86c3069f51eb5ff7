//! Interactive turn loop and slash-command dispatch.
//!
//! The session owns the single live `History` and threads it through the
//! context operations. Turn-taking is strictly sequential: one user turn is
//! appended, the streamed response is consumed, and only a complete
//! non-blank response commits; cancellation, errors, and empty responses
//! roll the user turn back so no orphaned user turn ever survives.

use std::io::{self, BufRead, Write};
use tokio::sync::mpsc;
use tracing::warn;

use crate::client::{CancelToken, ChatClient, StreamEvent};
use crate::config::LoreweaverConfig;
use crate::context::{self, History, Role, TurnLog};
use crate::facts::{self, FactList};
use crate::prompt;
use crate::session::{SessionStore, TempSession, SESSION_FORMAT_VERSION};
use crate::story::{slugify, StorySetting, StoryStore, WorldTemplate};
use crate::Result;

/// Appended to a scratch copy of the history when the user asks for a recap.
const SUMMARY_REQUEST: &str = "\
Please write a detailed recap of the story so far as a condensed narrative, \
not a bullet list. Keep the core plot points, character arcs, tone, and any \
recurring themes, with enough context that the story can continue seamlessly \
from the recap alone.";

/// Turns kept verbatim when folding a recap into the history.
const SUMMARY_KEEP_RECENT: usize = 10;

/// How a streamed response ended.
enum StreamResult {
    Complete(String),
    Cancelled,
    Failed(String),
}

/// One interactive storytelling session.
pub struct ChatSession {
    config: LoreweaverConfig,
    client: ChatClient,
    store: SessionStore,
    stories: StoryStore,
    history: History,
    facts: FactList,
    story: Option<StorySetting>,
    turn_log: TurnLog,
    session_name: Option<String>,
}

impl ChatSession {
    pub async fn new(config: LoreweaverConfig) -> Result<Self> {
        let store = SessionStore::new(&config.data_dir).await?;
        let stories = StoryStore::new(&config.data_dir).await?;
        let client = ChatClient::new(&config);

        Ok(Self {
            config,
            client,
            store,
            stories,
            history: History::with_system(prompt::DEFAULT_SYSTEM_PROMPT),
            facts: FactList::new(),
            story: None,
            turn_log: TurnLog::new(),
            session_name: None,
        })
    }

    pub fn has_temp(&self) -> bool {
        self.store.has_temp()
    }

    /// Restore the autosaved state from an interrupted run, if any.
    pub async fn try_recover_temp(&mut self) -> Result<bool> {
        let Some(temp) = self.store.load_temp().await? else {
            return Ok(false);
        };
        if temp.messages.is_empty() {
            return Ok(false);
        }

        self.history = History::from_turns(temp.messages);
        self.story = temp.story_setting;
        self.facts = FactList::from_vec(temp.facts);
        self.turn_log = TurnLog::from_pairs(temp.undone);
        self.session_name = temp.session_name;
        self.refresh_system_turn();

        if !context::verify(&self.history) {
            println!("Warning: recovered context failed the integrity check. Run /repair to fix it.");
        }
        Ok(true)
    }

    /// Load a named session before entering the loop (--session flag).
    pub async fn load_named(&mut self, name: &str) {
        self.load_session(name).await;
    }

    /// Run the interactive loop until /exit or end of input.
    pub async fn run(&mut self) -> Result<()> {
        print_banner(&self.config.model);

        // Blocking stdin lives on its own thread; the async side only ever
        // sees complete lines.
        let (input_tx, mut input_rx) = mpsc::channel::<String>(32);
        std::thread::spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if input_tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        eprintln!("Error reading stdin: {e}");
                        break;
                    }
                }
            }
        });

        loop {
            print!("\nNarrator: ");
            let _ = io::stdout().flush();

            let line = tokio::select! {
                line = input_rx.recv() => match line {
                    Some(line) => line,
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    println!("\nInput cancelled.");
                    continue;
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if trimmed.starts_with('/') {
                if self.handle_command(trimmed, &mut input_rx).await? {
                    break;
                }
            } else {
                self.take_turn(trimmed.to_string()).await;
            }
        }

        Ok(())
    }

    // ─── Turn taking ────────────────────────────────────────────────

    async fn take_turn(&mut self, input: String) {
        self.history.push_user(input);

        let used = context::estimate_history(&self.history);
        if used * 10 >= self.config.num_ctx * 9 {
            println!(
                "Warning: context is at {used}/{} estimated tokens. Consider /compress, or /save and /clear.",
                self.config.num_ctx
            );
        }

        match self.stream_response(&self.history, "Characters").await {
            StreamResult::Complete(text) if text.trim().is_empty() => {
                self.history.pop_if_role(Role::User);
                println!("Warning: received an empty response; turn rolled back.");
            }
            StreamResult::Complete(text) => {
                self.history.push_assistant(text);
                self.turn_log.invalidate();
                self.autosave().await;
            }
            StreamResult::Cancelled => {
                self.history.pop_if_role(Role::User);
                println!("[Response cancelled, turn rolled back]");
            }
            StreamResult::Failed(e) => {
                self.history.pop_if_role(Role::User);
                eprintln!("Error during generation: {e}");
            }
        }
    }

    /// Stream one generation over `history`, echoing deltas as they come.
    /// Ctrl-C raises the cancellation flag and returns immediately; a hung
    /// stream is abandoned the same way as a live one.
    async fn stream_response(&self, history: &History, label: &str) -> StreamResult {
        let cancel = CancelToken::new();
        let mut rx = match self.client.chat_stream(history, cancel.clone()).await {
            Ok(rx) => rx,
            Err(e) => return StreamResult::Failed(e.to_string()),
        };

        print!("\n{label}: ");
        let _ = io::stdout().flush();

        let mut text = String::new();
        let result = loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    cancel.cancel();
                    break StreamResult::Cancelled;
                }
                event = rx.recv() => match event {
                    Some(StreamEvent::Delta(delta)) => {
                        print!("{delta}");
                        let _ = io::stdout().flush();
                        text.push_str(&delta);
                    }
                    Some(StreamEvent::Done) | None => {
                        break StreamResult::Complete(std::mem::take(&mut text));
                    }
                    Some(StreamEvent::Cancelled) => break StreamResult::Cancelled,
                    Some(StreamEvent::Error(e)) => break StreamResult::Failed(e),
                }
            }
        };
        println!();
        result
    }

    // ─── Command dispatch ───────────────────────────────────────────

    /// Returns true when the session should end.
    async fn handle_command(
        &mut self,
        line: &str,
        input_rx: &mut mpsc::Receiver<String>,
    ) -> Result<bool> {
        let mut parts = line.splitn(2, char::is_whitespace);
        let command = parts.next().unwrap_or("").to_lowercase();
        let rest = parts.next().unwrap_or("").trim().to_string();

        match command.as_str() {
            "/exit" | "/bye" => {
                self.autosave().await;
                println!("Goodbye!");
                return Ok(true);
            }
            "/clear" => self.clear_context().await,
            "/save" => self.save_session(&rest).await,
            "/load" => self.load_session(&rest).await,
            "/sessions" => self.list_sessions().await,
            "/undo" => self.undo().await,
            "/redo" => self.redo().await,
            "/verify" => self.verify_context(),
            "/repair" => self.repair_context().await,
            "/facts" => self.facts_command(&rest).await,
            "/story" => self.story_command(&rest, input_rx).await,
            "/world" => self.world_command(&rest, input_rx).await,
            "/info" => self.show_info(),
            "/system" => self.set_system_prompt(input_rx).await,
            "/compress" => self.compress_context(input_rx).await,
            "/summarize" => self.summarize(input_rx).await,
            "/help" => print_commands(),
            _ => println!("Unknown command '{command}'. Try /help."),
        }
        Ok(false)
    }

    async fn clear_context(&mut self) {
        self.store.backup_history(&self.history).await;
        self.history.reset(self.fallback_system_prompt());
        self.session_name = None;
        self.turn_log.invalidate();
        println!("Context cleared. Only the system turn remains.");
        self.autosave().await;
    }

    async fn save_session(&mut self, arg: &str) {
        let name = if arg.is_empty() {
            match &self.session_name {
                Some(name) => name.clone(),
                None => self.generate_session_name(),
            }
        } else if arg == "new" {
            self.generate_session_name()
        } else {
            arg.to_string()
        };

        match self
            .store
            .save(&name, &self.history, self.story.as_ref(), &self.facts)
            .await
        {
            Ok(report) => {
                if report.duplicates_removed > 0 {
                    println!(
                        "Note: {} duplicate turns were not saved.",
                        report.duplicates_removed
                    );
                }
                if let Err(e) = self.store.save_facts(&name, &self.facts).await {
                    warn!("Could not save facts sidecar: {}", e);
                }
                self.session_name = Some(name);
                println!("Session saved to {:?}", report.path);
                println!(
                    "Context size: {} tokens, {} turns",
                    context::estimate_history(&self.history),
                    self.history.len()
                );
                self.store.discard_temp().await;
            }
            Err(e) => eprintln!("Error saving session: {e}"),
        }
    }

    async fn load_session(&mut self, name: &str) {
        if name.is_empty() {
            self.list_sessions().await;
            println!("Use /load <name> to load one.");
            return;
        }

        let loaded = match self.store.load(name).await {
            Ok(loaded) => loaded,
            Err(e) => {
                eprintln!("Error loading session: {e}");
                return;
            }
        };

        if loaded.newer_version {
            println!("Warning: this session was created by a newer version; some data may be ignored.");
        }
        if loaded.legacy_format {
            println!("Note: loading legacy session format (pre-versioning).");
        }
        if loaded.invalid_dropped > 0 {
            println!("Warning: {} invalid entries were removed.", loaded.invalid_dropped);
        }
        if loaded.duplicates_removed > 0 {
            println!("Note: {} duplicate turns were removed.", loaded.duplicates_removed);
        }

        let original_len = loaded.history.len();
        let trimmed = context::trim(
            &loaded.history,
            self.config.trim_token_ceiling(),
            self.config.max_turns,
        );
        let dropped = original_len - trimmed.len();
        if dropped > 0 {
            println!("Trimmed {dropped} older turns to fit within context limits.");
        }

        self.history = trimmed;
        self.story = loaded.story;
        self.facts = loaded.facts;
        self.turn_log = TurnLog::new();
        self.session_name = Some(name.to_string());
        self.refresh_system_turn();

        println!(
            "Loaded session '{name}': {} turns, {}/{} estimated tokens",
            self.history.len(),
            context::estimate_history(&self.history),
            self.config.num_ctx
        );
        if !self.facts.is_empty() {
            println!("Loaded {} story facts.", self.facts.len());
        }
        if context::verify(&self.history) {
            println!("Context integrity check: passed");
        } else {
            println!("Warning: context integrity check failed. Run /repair to fix it.");
        }
        self.autosave().await;
    }

    async fn list_sessions(&self) {
        match self.store.list().await {
            Ok(names) if names.is_empty() => println!("No saved sessions found."),
            Ok(names) => {
                println!("Available sessions:");
                for name in names {
                    match &self.session_name {
                        Some(current) if *current == name => println!("  {name} (current)"),
                        _ => println!("  {name}"),
                    }
                }
            }
            Err(e) => eprintln!("Error listing sessions: {e}"),
        }
    }

    async fn undo(&mut self) {
        if self.turn_log.undo(&mut self.history) {
            println!("Undid the last exchange.");
            self.autosave().await;
        } else {
            println!("Nothing to undo.");
        }
    }

    async fn redo(&mut self) {
        if self.turn_log.redo(&mut self.history) {
            println!("Redid the last undone exchange.");
            self.autosave().await;
        } else {
            println!("Nothing to redo.");
        }
    }

    fn verify_context(&self) {
        if context::verify(&self.history) {
            println!("Context integrity check: PASSED");
            println!(
                "Context size: {}/{} estimated tokens, {} turns",
                context::estimate_history(&self.history),
                self.config.num_ctx,
                self.history.len()
            );
        } else {
            println!("Context integrity check: FAILED. Run /repair to fix it.");
        }
    }

    async fn repair_context(&mut self) {
        let fallback = self.fallback_system_prompt();
        let history = std::mem::take(&mut self.history);
        self.history = context::repair(history, &fallback);
        self.turn_log.invalidate();
        println!(
            "Repair complete. Integrity check: {}",
            if context::verify(&self.history) {
                "passed"
            } else {
                "failed"
            }
        );
        self.autosave().await;
    }

    // ─── Facts ──────────────────────────────────────────────────────

    async fn facts_command(&mut self, rest: &str) {
        let mut parts = rest.splitn(2, char::is_whitespace);
        let sub = parts.next().unwrap_or("");
        let arg = parts.next().unwrap_or("").trim();

        match sub {
            "" | "list" => self.print_facts(),
            "add" => {
                if arg.is_empty() {
                    println!("Usage: /facts add <fact>");
                    return;
                }
                if self.facts.is_full() {
                    println!(
                        "Maximum of {} facts reached. Edit or delete one first.",
                        facts::MAX_FACTS
                    );
                    return;
                }
                if let Some(conflict) = self.facts.conflicts_with(arg) {
                    println!("Warning: potential conflict with existing fact: '{conflict}'");
                }
                self.facts.add(arg.to_string());
                println!("Fact added.");
                self.refresh_system_turn();
                self.persist_facts().await;
            }
            "del" | "remove" => match parse_index(arg, self.facts.len()) {
                Some(index) => {
                    if let Some(removed) = self.facts.remove(index) {
                        println!("Deleted fact: {removed}");
                        self.refresh_system_turn();
                        self.persist_facts().await;
                    }
                }
                None => println!("Usage: /facts del <number>"),
            },
            "edit" => {
                let mut edit_parts = arg.splitn(2, char::is_whitespace);
                let index = parse_index(edit_parts.next().unwrap_or(""), self.facts.len());
                let text = edit_parts.next().unwrap_or("").trim();
                match index {
                    Some(index) if !text.is_empty() => {
                        let others: Vec<String> = self
                            .facts
                            .facts()
                            .iter()
                            .enumerate()
                            .filter(|(i, _)| *i != index)
                            .map(|(_, f)| f.clone())
                            .collect();
                        if let Some(conflict) = facts::conflicts(text, &others) {
                            println!("Warning: potential conflict with existing fact: '{conflict}'");
                        }
                        self.facts.edit(index, text.to_string());
                        println!("Fact updated.");
                        self.refresh_system_turn();
                        self.persist_facts().await;
                    }
                    _ => println!("Usage: /facts edit <number> <new text>"),
                }
            }
            "check" => {
                if self.facts.len() < 2 {
                    println!("Need at least two facts to check consistency.");
                    return;
                }
                let pairs = self.facts.pairwise_conflicts();
                if pairs.is_empty() {
                    println!("No obvious conflicts detected between facts.");
                } else {
                    println!("Potential conflicts found:");
                    for (i, j) in pairs {
                        println!("Facts #{} and #{}:", i + 1, j + 1);
                        println!("  - {}", self.facts.facts()[i]);
                        println!("  - {}", self.facts.facts()[j]);
                    }
                }
            }
            _ => println!("Usage: /facts [list|add|edit|del|check]"),
        }
    }

    fn print_facts(&self) {
        if self.facts.is_empty() {
            println!("No facts established yet.");
            return;
        }
        println!("Current facts:");
        for (i, fact) in self.facts.facts().iter().enumerate() {
            println!("{}. {fact}", i + 1);
        }
    }

    async fn persist_facts(&mut self) {
        if let Some(name) = self.session_name.clone() {
            if let Err(e) = self.store.save_facts(&name, &self.facts).await {
                warn!("Could not save facts sidecar: {}", e);
            }
        }
        self.autosave().await;
    }

    // ─── Stories and worlds ─────────────────────────────────────────

    async fn story_command(&mut self, rest: &str, input_rx: &mut mpsc::Receiver<String>) {
        let mut parts = rest.splitn(2, char::is_whitespace);
        let sub = parts.next().unwrap_or("");
        let arg = parts.next().unwrap_or("").trim();

        match sub {
            "" | "list" => match self.stories.list_stories().await {
                Ok(names) if names.is_empty() => {
                    println!("No saved story settings. Create one with /story new <title>.");
                }
                Ok(names) => {
                    println!("Available story settings:");
                    let current = self.story.as_ref().map(|s| slugify(&s.title));
                    for name in names {
                        if current.as_deref() == Some(name.as_str()) {
                            println!("  {name} (current)");
                        } else {
                            println!("  {name}");
                        }
                    }
                }
                Err(e) => eprintln!("Error listing stories: {e}"),
            },
            "use" => match self.stories.load_story(arg).await {
                Ok(setting) => self.apply_story(setting).await,
                Err(e) => eprintln!("{e}"),
            },
            "new" => self.create_story(arg, input_rx).await,
            "delete" => {
                if confirm(input_rx, &format!("Delete story setting '{arg}'?")).await {
                    match self.stories.delete_story(arg).await {
                        Ok(()) => {
                            println!("Story setting deleted.");
                            if self.story.as_ref().map(|s| slugify(&s.title)).as_deref()
                                == Some(slugify(arg).as_str())
                            {
                                self.story = None;
                                println!("Note: the deleted setting was active.");
                            }
                        }
                        Err(e) => eprintln!("{e}"),
                    }
                } else {
                    println!("Deletion cancelled.");
                }
            }
            _ => println!("Usage: /story [list|use <name>|new <title>|delete <name>]"),
        }
    }

    async fn apply_story(&mut self, setting: StorySetting) {
        let composed = prompt::compose_story_prompt(&setting);
        self.history
            .set_system_content(prompt::append_facts(&composed, &self.facts));
        println!(
            "Story setting '{}' loaded. System prompt updated.",
            setting.title
        );
        self.story = Some(setting);
        self.autosave().await;
    }

    async fn create_story(&mut self, title: &str, input_rx: &mut mpsc::Receiver<String>) {
        if title.is_empty() {
            println!("Usage: /story new <title>");
            return;
        }

        println!("World description (finish with a blank line), or 'use <template>' to copy a world template:");
        let world_lines = read_block(input_rx).await;
        let world = match world_lines.first().and_then(|l| l.trim().strip_prefix("use ")) {
            Some(template_name) if world_lines.len() == 1 => {
                match self.stories.load_world(template_name.trim()).await {
                    Ok(template) => template.description,
                    Err(e) => {
                        eprintln!("{e}");
                        return;
                    }
                }
            }
            _ => world_lines.join("\n"),
        };

        println!("Main characters (finish with a blank line):");
        let characters = read_block(input_rx).await.join("\n");

        println!("Themes or notes (finish with a blank line):");
        let themes = read_block(input_rx).await.join("\n");

        let setting = StorySetting {
            title: title.to_string(),
            world,
            characters,
            themes,
            system_prompt: String::new(),
        };

        match self.stories.save_story(&setting).await {
            Ok(path) => {
                println!("Story setting '{title}' saved to {path:?}");
                self.apply_story(setting).await;
            }
            Err(e) => eprintln!("Error saving story setting: {e}"),
        }
    }

    async fn world_command(&mut self, rest: &str, input_rx: &mut mpsc::Receiver<String>) {
        let mut parts = rest.splitn(2, char::is_whitespace);
        let sub = parts.next().unwrap_or("");
        let arg = parts.next().unwrap_or("").trim();

        match sub {
            "" | "list" => match self.stories.list_worlds().await {
                Ok(names) if names.is_empty() => {
                    println!("No world templates. Create one with /world new <title>.");
                }
                Ok(names) => {
                    println!("Available world templates:");
                    for name in names {
                        println!("  {name}");
                    }
                }
                Err(e) => eprintln!("Error listing worlds: {e}"),
            },
            "show" => match self.stories.load_world(arg).await {
                Ok(template) => {
                    println!("{}\n{}", template.title, template.description);
                }
                Err(e) => eprintln!("{e}"),
            },
            "new" => {
                if arg.is_empty() {
                    println!("Usage: /world new <title>");
                    return;
                }
                println!("World description (finish with a blank line):");
                let description = read_block(input_rx).await.join("\n");
                if description.trim().is_empty() {
                    println!("World template creation cancelled.");
                    return;
                }
                let template = WorldTemplate {
                    title: arg.to_string(),
                    description,
                };
                match self.stories.save_world(&template).await {
                    Ok(_) => println!("World template '{arg}' saved."),
                    Err(e) => eprintln!("Error saving world template: {e}"),
                }
            }
            "delete" => {
                if confirm(input_rx, &format!("Delete world template '{arg}'?")).await {
                    match self.stories.delete_world(arg).await {
                        Ok(()) => println!("World template deleted."),
                        Err(e) => eprintln!("{e}"),
                    }
                } else {
                    println!("Deletion cancelled.");
                }
            }
            _ => println!("Usage: /world [list|show <name>|new <title>|delete <name>]"),
        }
    }

    fn show_info(&self) {
        match &self.story {
            Some(story) => {
                println!("Current story: {}", story.title);
                if !story.world.is_empty() {
                    println!("\nWorld:\n{}", story.world);
                }
                if !story.characters.is_empty() {
                    println!("\nCharacters:\n{}", story.characters);
                }
                if !story.themes.is_empty() {
                    println!("\nThemes:\n{}", story.themes);
                }
            }
            None => println!("No story setting is currently loaded."),
        }

        self.print_facts();

        let used = context::estimate_history(&self.history);
        let percent = (used as f64 / self.config.num_ctx.max(1) as f64) * 100.0;
        println!("\nContext stats:");
        println!("- Turns: {}", self.history.len());
        println!("- Estimated tokens: {used}/{} ({percent:.1}%)", self.config.num_ctx);
        if self.history.len() > self.config.compress_threshold && percent > 70.0 {
            println!("Tip: the context is getting large; /compress or /summarize can shrink it.");
        }
    }

    async fn set_system_prompt(&mut self, input_rx: &mut mpsc::Receiver<String>) {
        println!("Enter the new system prompt (finish with a blank line):");
        let lines = read_block(input_rx).await;
        if lines.is_empty() {
            println!("System prompt unchanged.");
            return;
        }

        let cleaned = prompt::dedupe_default_section(&lines.join("\n"));
        let previous = self.history.clone();
        self.history
            .set_system_content(prompt::append_facts(&cleaned, &self.facts));

        if context::verify(&self.history) {
            println!("System prompt updated.");
            self.autosave().await;
        } else {
            println!("Warning: integrity check failed after the update; previous prompt restored.");
            self.history = previous;
        }
    }

    // ─── Compression ────────────────────────────────────────────────

    async fn compress_context(&mut self, input_rx: &mut mpsc::Receiver<String>) {
        let compressed = context::compress(&self.history, self.config.compress_threshold);
        if compressed.len() == self.history.len() {
            println!("Nothing old enough to compress.");
            return;
        }

        let before = context::estimate_history(&self.history);
        let after = context::estimate_history(&compressed);
        println!(
            "Compression: {before} -> {after} estimated tokens (saving {}).",
            before.saturating_sub(after)
        );

        if confirm(input_rx, "Apply compression? It cannot be undone.").await {
            self.history = compressed;
            self.turn_log.invalidate();
            println!("Context compressed. Recent turns preserved verbatim.");
            self.autosave().await;
        } else {
            println!("Compression cancelled.");
        }
    }

    async fn summarize(&mut self, input_rx: &mut mpsc::Receiver<String>) {
        if self.history.exchange_len() == 0 {
            println!("No story to summarize yet.");
            return;
        }

        let mut scratch = self.history.clone();
        scratch.push_user(SUMMARY_REQUEST);
        println!("Generating story summary...");

        match self.stream_response(&scratch, "Summary").await {
            StreamResult::Complete(summary) if summary.trim().is_empty() => {
                println!("Summary generation returned nothing.");
            }
            StreamResult::Complete(summary) => {
                let folded = context::fold_into_summary(
                    &self.history,
                    summary.trim(),
                    SUMMARY_KEEP_RECENT,
                );
                let before = context::estimate_history(&self.history);
                let after = context::estimate_history(&folded);
                println!(
                    "Folding the summary in: {before} -> {after} estimated tokens (saving {}).",
                    before.saturating_sub(after)
                );
                if confirm(input_rx, "Replace older turns with this summary?").await {
                    self.history = folded;
                    self.turn_log.invalidate();
                    println!("Older turns replaced with the summary.");
                    self.autosave().await;
                } else {
                    println!("Summary discarded, context unchanged.");
                }
            }
            StreamResult::Cancelled => println!("[Summary generation cancelled]"),
            StreamResult::Failed(e) => eprintln!("Error generating summary: {e}"),
        }
    }

    // ─── Shared helpers ─────────────────────────────────────────────

    /// The prompt used when a system turn has to be synthesized: the active
    /// story's prompt (or the built-in default) with facts appended.
    fn fallback_system_prompt(&self) -> String {
        let base = match &self.story {
            Some(story) => prompt::compose_story_prompt(story),
            None => prompt::DEFAULT_SYSTEM_PROMPT.to_string(),
        };
        prompt::append_facts(&base, &self.facts)
    }

    /// Re-clean the leading system turn and fold the current facts in.
    fn refresh_system_turn(&mut self) {
        let Some(content) = self.history.system().map(|t| t.content.clone()) else {
            return;
        };
        let cleaned = prompt::dedupe_default_section(&content);
        self.history
            .set_system_content(prompt::append_facts(&cleaned, &self.facts));
    }

    fn generate_session_name(&self) -> String {
        let prefix = self
            .story
            .as_ref()
            .map(|s| slugify(&s.title))
            .unwrap_or_else(|| "story".to_string());
        format!("{prefix}_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S"))
    }

    async fn autosave(&self) {
        let temp = TempSession {
            version: SESSION_FORMAT_VERSION,
            timestamp: chrono::Utc::now().to_rfc3339(),
            messages: self.history.turns().to_vec(),
            story_setting: self.story.clone(),
            facts: self.facts.facts().to_vec(),
            undone: self.turn_log.pairs().to_vec(),
            session_name: self.session_name.clone(),
        };
        self.store.save_temp(&temp).await;
    }

    #[cfg(test)]
    fn history(&self) -> &History {
        &self.history
    }
}

/// Read lines until a blank line or end of input.
async fn read_block(input_rx: &mut mpsc::Receiver<String>) -> Vec<String> {
    let mut lines = Vec::new();
    loop {
        match input_rx.recv().await {
            Some(line) if line.trim().is_empty() => break,
            Some(line) => lines.push(line),
            None => break,
        }
    }
    lines
}

/// Ask a yes/no question on stdout and read the answer.
async fn confirm(input_rx: &mut mpsc::Receiver<String>, question: &str) -> bool {
    print!("{question} (y/n): ");
    let _ = io::stdout().flush();
    matches!(input_rx.recv().await, Some(line) if line.trim().eq_ignore_ascii_case("y"))
}

/// Parse a 1-based index argument against a list length.
fn parse_index(arg: &str, len: usize) -> Option<usize> {
    let number: usize = arg.parse().ok()?;
    if number >= 1 && number <= len {
        Some(number - 1)
    } else {
        None
    }
}

fn print_banner(model: &str) {
    println!("Interactive storytelling session started with model: {model}");
    print_commands();
    println!("Press Ctrl+C to cancel streaming output.");
    println!("{}", "-".repeat(50));
}

fn print_commands() {
    println!("Commands:");
    println!("  /story     - Manage story settings");
    println!("  /world     - Manage world templates");
    println!("  /info      - Show story info and context stats");
    println!("  /facts     - Manage story facts");
    println!("  /summarize - Summarize the story and optionally fold it in");
    println!("  /compress  - Compress older exchanges to save tokens");
    println!("  /clear     - Reset the context");
    println!("  /save [new|name] - Save the session");
    println!("  /load [name]     - Load a session");
    println!("  /sessions  - List saved sessions");
    println!("  /system    - Set the system prompt");
    println!("  /undo      - Undo the last exchange");
    println!("  /redo      - Redo the last undone exchange");
    println!("  /verify    - Verify context integrity");
    println!("  /repair    - Repair context integrity");
    println!("  /exit or /bye - Quit");
}
