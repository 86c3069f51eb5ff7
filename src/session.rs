//! Session persistence.
//!
//! A session file is either the modern versioned record (an object with a
//! `messages` key) or the legacy shape where the file is the bare turn
//! array. The loader tells them apart by JSON shape, never by version
//! field, and both collapse into one canonical snapshot the moment they
//! leave this module. Saves validate, deduplicate, and back up the previous
//! file first.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, warn};

use crate::context::{deduplicate, filter_valid, History, Turn, TurnPair};
use crate::facts::FactList;
use crate::story::StorySetting;
use crate::{LoreweaverError, Result};

/// Current session file format version.
pub const SESSION_FORMAT_VERSION: u32 = 1;

/// Hidden autosave used for crash and exit recovery.
const TEMP_SESSION_FILE: &str = ".temp_session.json";

/// The modern on-disk session shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub version: u32,
    pub timestamp: String,
    pub messages: Vec<Turn>,
    pub story_setting: Option<StorySetting>,
    pub facts: Vec<String>,
}

/// Autosave snapshot. Superset of a session record: also carries the undo
/// log and the active session name so an interrupted run picks up intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempSession {
    pub version: u32,
    pub timestamp: String,
    pub messages: Vec<Turn>,
    pub story_setting: Option<StorySetting>,
    pub facts: Vec<String>,
    #[serde(default)]
    pub undone: Vec<TurnPair>,
    #[serde(default)]
    pub session_name: Option<String>,
}

/// Canonical in-memory result of loading any session shape.
#[derive(Debug, Clone)]
pub struct LoadedSession {
    pub history: History,
    pub story: Option<StorySetting>,
    pub facts: FactList,
    /// Entries dropped by shape validation.
    pub invalid_dropped: usize,
    /// Entries removed by deduplication.
    pub duplicates_removed: usize,
    /// The file was the legacy bare-array shape.
    pub legacy_format: bool,
    /// The file claims a newer format version than this build knows.
    pub newer_version: bool,
}

/// Result of a save, for reporting to the user.
#[derive(Debug, Clone)]
pub struct SaveReport {
    pub path: PathBuf,
    pub duplicates_removed: usize,
}

/// Flat-file store for sessions, their fact sidecars, and backups.
pub struct SessionStore {
    sessions_dir: PathBuf,
    facts_dir: PathBuf,
    backups_dir: PathBuf,
}

impl SessionStore {
    /// Create a store rooted at the data directory, creating the
    /// subdirectories if needed.
    pub async fn new(data_dir: &Path) -> Result<Self> {
        let sessions_dir = data_dir.join("sessions");
        let facts_dir = sessions_dir.join("facts");
        let backups_dir = data_dir.join("backups");
        fs::create_dir_all(&facts_dir).await?;
        fs::create_dir_all(&backups_dir).await?;
        Ok(Self {
            sessions_dir,
            facts_dir,
            backups_dir,
        })
    }

    /// Save a session under `name`. The outgoing turns are deduplicated and
    /// the previous file, if any, is backed up first.
    pub async fn save(
        &self,
        name: &str,
        history: &History,
        story: Option<&StorySetting>,
        facts: &FactList,
    ) -> Result<SaveReport> {
        let (messages, duplicates_removed) = deduplicate(history.turns().to_vec());
        if duplicates_removed > 0 {
            info!("Removed {} duplicate turns before saving", duplicates_removed);
        }

        let record = SessionRecord {
            version: SESSION_FORMAT_VERSION,
            timestamp: Utc::now().to_rfc3339(),
            messages,
            story_setting: story.cloned(),
            facts: facts.facts().to_vec(),
        };

        let path = self.session_path(name);
        if path.exists() {
            backup_file(&self.backups_dir, &path).await;
        }
        fs::write(&path, serde_json::to_string_pretty(&record)?).await?;
        info!("Saved session '{}' to {:?}", name, path);

        Ok(SaveReport {
            path,
            duplicates_removed,
        })
    }

    /// Load a session by name, resolving the legacy/versioned shape split.
    pub async fn load(&self, name: &str) -> Result<LoadedSession> {
        let path = self.session_path(name);
        let content = fs::read_to_string(&path)
            .await
            .map_err(|_| LoreweaverError::Session(format!("no session named '{name}'")))?;
        let value: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| LoreweaverError::Session(format!("corrupt session file: {e}")))?;

        let (raw_messages, story, mut facts, newer_version, legacy_format) =
            split_session_value(value)?;

        if newer_version {
            warn!(
                "Session '{}' was written by a newer format version than {}",
                name, SESSION_FORMAT_VERSION
            );
        }
        if legacy_format {
            info!("Session '{}' uses the legacy pre-versioning shape", name);
        }

        let (valid, invalid_dropped) = filter_valid(&raw_messages);
        if invalid_dropped > 0 {
            warn!("Dropped {} invalid entries from session '{}'", invalid_dropped, name);
        }
        let (unique, duplicates_removed) = deduplicate(valid);
        if duplicates_removed > 0 {
            info!("Removed {} duplicate turns from session '{}'", duplicates_removed, name);
        }

        // The record's fact list wins; fall back to the sidecar file.
        if facts.is_empty() {
            facts = self.load_facts(name).await.unwrap_or_default();
        }

        Ok(LoadedSession {
            history: History::from_turns(unique),
            story,
            facts: FactList::from_vec(facts),
            invalid_dropped,
            duplicates_removed,
            legacy_format,
            newer_version,
        })
    }

    /// Saved session names, newest-last, hidden files excluded.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.sessions_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".json") {
                    if !stem.starts_with('.') {
                        names.push(stem.to_string());
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Write the facts sidecar for a session: a bare string array. The
    /// 15-fact cap is the fact component's business, not the file's.
    pub async fn save_facts(&self, name: &str, facts: &FactList) -> Result<()> {
        if facts.is_empty() {
            return Ok(());
        }
        let path = self.facts_path(name);
        if path.exists() {
            backup_file(&self.backups_dir, &path).await;
        }
        fs::write(&path, serde_json::to_string_pretty(facts.facts())?).await?;
        info!("Saved {} facts for session '{}'", facts.len(), name);
        Ok(())
    }

    pub async fn load_facts(&self, name: &str) -> Result<Vec<String>> {
        let path = self.facts_path(name);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).await?;
        match serde_json::from_str::<Vec<String>>(&content) {
            Ok(facts) => Ok(facts),
            Err(e) => {
                warn!("Facts file for '{}' is corrupt: {}", name, e);
                Ok(Vec::new())
            }
        }
    }

    /// Autosave the full working state. Failures are logged, never fatal:
    /// losing an autosave must not interrupt the session it protects.
    pub async fn save_temp(&self, temp: &TempSession) {
        let path = self.sessions_dir.join(TEMP_SESSION_FILE);
        let content = match serde_json::to_string_pretty(temp) {
            Ok(content) => content,
            Err(e) => {
                error!("Could not serialize temp session: {}", e);
                return;
            }
        };
        if let Err(e) = fs::write(&path, content).await {
            error!("Could not write temp session: {}", e);
        }
    }

    pub async fn load_temp(&self) -> Result<Option<TempSession>> {
        let path = self.sessions_dir.join(TEMP_SESSION_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;
        match serde_json::from_str::<TempSession>(&content) {
            Ok(temp) => Ok(Some(temp)),
            Err(e) => {
                warn!("Temp session file is corrupt: {}", e);
                Ok(None)
            }
        }
    }

    pub fn has_temp(&self) -> bool {
        self.sessions_dir.join(TEMP_SESSION_FILE).exists()
    }

    /// Remove the autosave, backing it up first.
    pub async fn discard_temp(&self) {
        let path = self.sessions_dir.join(TEMP_SESSION_FILE);
        if path.exists() {
            backup_file(&self.backups_dir, &path).await;
            let _ = fs::remove_file(&path).await;
        }
    }

    /// Snapshot an outgoing history into the backups directory. Used by
    /// context-clear so nothing is destroyed without a copy.
    pub async fn backup_history(&self, history: &History) {
        if history.len() <= 1 {
            return;
        }
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = self.backups_dir.join(format!("context_backup_{stamp}.json"));
        match serde_json::to_string_pretty(history.turns()) {
            Ok(content) => {
                if let Err(e) = fs::write(&path, content).await {
                    error!("Could not back up context: {}", e);
                } else {
                    info!("Context backed up to {:?}", path);
                }
            }
            Err(e) => error!("Could not serialize context backup: {}", e),
        }
    }

    fn session_path(&self, name: &str) -> PathBuf {
        self.sessions_dir.join(format!("{}.json", sanitize_name(name)))
    }

    fn facts_path(&self, name: &str) -> PathBuf {
        self.facts_dir.join(format!("{}_facts.json", sanitize_name(name)))
    }
}

/// Pull the turn array, story, facts, and version flags out of whichever
/// on-disk shape the value is.
#[allow(clippy::type_complexity)]
fn split_session_value(
    value: serde_json::Value,
) -> Result<(Vec<serde_json::Value>, Option<StorySetting>, Vec<String>, bool, bool)> {
    if let serde_json::Value::Array(raw) = value {
        // Legacy shape: the file is the turn array itself.
        return Ok((raw, None, Vec::new(), false, true));
    }

    if value.get("messages").is_some() {
        let version = value
            .get("version")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let raw = value
            .get("messages")
            .and_then(|m| m.as_array())
            .cloned()
            .unwrap_or_default();
        let story = value
            .get("story_setting")
            .cloned()
            .and_then(|s| serde_json::from_value(s).ok());
        let facts = value
            .get("facts")
            .cloned()
            .and_then(|f| serde_json::from_value(f).ok())
            .unwrap_or_default();
        return Ok((raw, story, facts, version > SESSION_FORMAT_VERSION, false));
    }

    Err(LoreweaverError::Session(
        "unrecognized session file shape".to_string(),
    ))
}

/// Keep filenames boring: alphanumerics, dashes, underscores.
pub fn sanitize_name(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() {
        "session".to_string()
    } else {
        safe
    }
}

/// Copy a file into the backups directory with a timestamped name.
/// Best-effort: a failed backup is logged and life goes on.
pub(crate) async fn backup_file(backups_dir: &Path, path: &Path) {
    if !path.exists() {
        return;
    }
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file")
        .to_string();
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let backup_path = backups_dir.join(format!("{filename}_{stamp}.bak"));
    match fs::copy(path, &backup_path).await {
        Ok(_) => info!("Created backup {:?}", backup_path),
        Err(e) => error!("Could not back up {:?}: {}", path, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample_history() -> History {
        let mut history = History::with_system("narrate");
        history.push_user("hello");
        history.push_assistant("hi there");
        history
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = SessionStore::new(temp.path()).await.unwrap();
        let facts = FactList::from_vec(vec!["The king is dead".to_string()]);

        store
            .save("my_tale", &sample_history(), None, &facts)
            .await
            .unwrap();
        let loaded = store.load("my_tale").await.unwrap();

        assert_eq!(loaded.history, sample_history());
        assert_eq!(loaded.facts.facts(), facts.facts());
        assert!(!loaded.legacy_format);
        assert!(!loaded.newer_version);
        assert_eq!(loaded.invalid_dropped, 0);
    }

    #[tokio::test]
    async fn test_load_legacy_array_shape() {
        let temp = TempDir::new().unwrap();
        let store = SessionStore::new(temp.path()).await.unwrap();

        let legacy = json!([
            {"role": "system", "content": "narrate"},
            {"role": "user", "content": "once upon a time"}
        ]);
        fs::write(
            temp.path().join("sessions/old_tale.json"),
            legacy.to_string(),
        )
        .await
        .unwrap();

        let loaded = store.load("old_tale").await.unwrap();
        assert!(loaded.legacy_format);
        assert_eq!(loaded.history.len(), 2);
        assert!(loaded.story.is_none());
    }

    #[tokio::test]
    async fn test_load_drops_invalid_and_duplicate_entries() {
        let temp = TempDir::new().unwrap();
        let store = SessionStore::new(temp.path()).await.unwrap();

        let record = json!({
            "version": 1,
            "timestamp": "2025-01-01T00:00:00Z",
            "messages": [
                {"role": "system", "content": "narrate"},
                {"role": "user", "content": "A"},
                {"role": "narrator", "content": "bad role"},
                {"role": "user", "content": "A"},
                "not even an object"
            ],
            "story_setting": null,
            "facts": []
        });
        fs::write(temp.path().join("sessions/messy.json"), record.to_string())
            .await
            .unwrap();

        let loaded = store.load("messy").await.unwrap();
        assert_eq!(loaded.invalid_dropped, 2);
        assert_eq!(loaded.duplicates_removed, 1);
        assert_eq!(loaded.history.len(), 2);
    }

    #[tokio::test]
    async fn test_load_flags_newer_version() {
        let temp = TempDir::new().unwrap();
        let store = SessionStore::new(temp.path()).await.unwrap();

        let record = json!({
            "version": 99,
            "timestamp": "2025-01-01T00:00:00Z",
            "messages": [{"role": "system", "content": "narrate"}],
            "story_setting": null,
            "facts": []
        });
        fs::write(temp.path().join("sessions/future.json"), record.to_string())
            .await
            .unwrap();

        let loaded = store.load("future").await.unwrap();
        assert!(loaded.newer_version);
        assert!(!loaded.legacy_format);
    }

    #[tokio::test]
    async fn test_load_rejects_unknown_shape() {
        let temp = TempDir::new().unwrap();
        let store = SessionStore::new(temp.path()).await.unwrap();
        fs::write(temp.path().join("sessions/odd.json"), "{\"foo\": 1}")
            .await
            .unwrap();
        assert!(store.load("odd").await.is_err());
    }

    #[tokio::test]
    async fn test_temp_session_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = SessionStore::new(temp.path()).await.unwrap();
        assert!(!store.has_temp());

        let temp_session = TempSession {
            version: SESSION_FORMAT_VERSION,
            timestamp: Utc::now().to_rfc3339(),
            messages: sample_history().into_turns(),
            story_setting: None,
            facts: vec!["a fact".to_string()],
            undone: vec![(Turn::user("u"), Turn::assistant("a"))],
            session_name: Some("my_tale".to_string()),
        };
        store.save_temp(&temp_session).await;
        assert!(store.has_temp());

        let restored = store.load_temp().await.unwrap().unwrap();
        assert_eq!(restored.messages.len(), 3);
        assert_eq!(restored.undone.len(), 1);
        assert_eq!(restored.session_name.as_deref(), Some("my_tale"));

        store.discard_temp().await;
        assert!(!store.has_temp());
    }

    #[test]
    fn test_list_excludes_hidden_files() {
        let temp = TempDir::new().unwrap();
        tokio_test::block_on(async {
            let store = SessionStore::new(temp.path()).await.unwrap();
            store
                .save("visible", &sample_history(), None, &FactList::new())
                .await
                .unwrap();
            store
                .save_temp(&TempSession {
                    version: SESSION_FORMAT_VERSION,
                    timestamp: Utc::now().to_rfc3339(),
                    messages: Vec::new(),
                    story_setting: None,
                    facts: Vec::new(),
                    undone: Vec::new(),
                    session_name: None,
                })
                .await;

            let names = store.list().await.unwrap();
            assert_eq!(names, vec!["visible".to_string()]);
        });
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("my tale!"), "my_tale_");
        assert_eq!(sanitize_name(""), "session");
    }
}
