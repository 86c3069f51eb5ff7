//! Story settings and world templates.
//!
//! Flat-file CRUD around the narrative metadata: a story setting bundles a
//! title, world description, characters, themes, and an optional explicit
//! system prompt; a world template is a reusable world description. Files
//! are JSON named from slugified titles and every overwrite or delete is
//! preceded by a backup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::session::backup_file;
use crate::{LoreweaverError, Result};

/// A complete story configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorySetting {
    pub title: String,
    #[serde(default)]
    pub world: String,
    #[serde(default)]
    pub characters: String,
    #[serde(default)]
    pub themes: String,
    /// Explicit system prompt; when empty one is composed from the parts.
    #[serde(default)]
    pub system_prompt: String,
}

/// A reusable world description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldTemplate {
    pub title: String,
    pub description: String,
}

/// Flat-file store for story settings and world templates.
pub struct StoryStore {
    stories_dir: PathBuf,
    worlds_dir: PathBuf,
    backups_dir: PathBuf,
}

impl StoryStore {
    /// Create a store rooted at the data directory, creating the
    /// subdirectories if needed.
    pub async fn new(data_dir: &Path) -> Result<Self> {
        let stories_dir = data_dir.join("stories");
        let worlds_dir = data_dir.join("worlds");
        let backups_dir = data_dir.join("backups");
        fs::create_dir_all(&stories_dir).await?;
        fs::create_dir_all(&worlds_dir).await?;
        fs::create_dir_all(&backups_dir).await?;
        Ok(Self {
            stories_dir,
            worlds_dir,
            backups_dir,
        })
    }

    pub async fn list_stories(&self) -> Result<Vec<String>> {
        list_json_names(&self.stories_dir).await
    }

    pub async fn list_worlds(&self) -> Result<Vec<String>> {
        list_json_names(&self.worlds_dir).await
    }

    pub async fn load_story(&self, name: &str) -> Result<StorySetting> {
        let path = self.stories_dir.join(format!("{}.json", slugify(name)));
        let content = fs::read_to_string(&path).await.map_err(|_| {
            LoreweaverError::Story(format!("no story setting named '{name}'"))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| LoreweaverError::Story(format!("corrupt story file {path:?}: {e}")))
    }

    pub async fn save_story(&self, setting: &StorySetting) -> Result<PathBuf> {
        let path = self.stories_dir.join(format!("{}.json", slugify(&setting.title)));
        if path.exists() {
            backup_file(&self.backups_dir, &path).await;
        }
        let content = serde_json::to_string_pretty(setting)?;
        fs::write(&path, content).await?;
        info!("Saved story setting '{}' to {:?}", setting.title, path);
        Ok(path)
    }

    pub async fn delete_story(&self, name: &str) -> Result<()> {
        let path = self.stories_dir.join(format!("{}.json", slugify(name)));
        if !path.exists() {
            return Err(LoreweaverError::Story(format!(
                "no story setting named '{name}'"
            )));
        }
        backup_file(&self.backups_dir, &path).await;
        fs::remove_file(&path).await?;
        info!("Deleted story setting '{}'", name);
        Ok(())
    }

    pub async fn load_world(&self, name: &str) -> Result<WorldTemplate> {
        let path = self.worlds_dir.join(format!("{}.json", slugify(name)));
        let content = fs::read_to_string(&path).await.map_err(|_| {
            LoreweaverError::Story(format!("no world template named '{name}'"))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| LoreweaverError::Story(format!("corrupt world file {path:?}: {e}")))
    }

    pub async fn save_world(&self, template: &WorldTemplate) -> Result<PathBuf> {
        let path = self.worlds_dir.join(format!("{}.json", slugify(&template.title)));
        if path.exists() {
            backup_file(&self.backups_dir, &path).await;
        }
        let content = serde_json::to_string_pretty(template)?;
        fs::write(&path, content).await?;
        info!("Saved world template '{}'", template.title);
        Ok(path)
    }

    pub async fn delete_world(&self, name: &str) -> Result<()> {
        let path = self.worlds_dir.join(format!("{}.json", slugify(name)));
        if !path.exists() {
            return Err(LoreweaverError::Story(format!(
                "no world template named '{name}'"
            )));
        }
        backup_file(&self.backups_dir, &path).await;
        fs::remove_file(&path).await?;
        Ok(())
    }
}

/// Lowercase, spaces to underscores, everything else outside [a-z0-9_-]
/// dropped. Used for filenames derived from titles.
pub fn slugify(title: &str) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if slug.is_empty() {
        warn!("Title '{}' produced an empty slug, using 'untitled'", title);
        "untitled".to_string()
    } else {
        slug
    }
}

async fn list_json_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
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
