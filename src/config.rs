//! Configuration loading and defaults.
//!
//! Settings resolve in three layers: built-in defaults, `config.toml` in
//! the data directory, then CLI flags. The `LOREWEAVER_MODEL` environment
//! variable slots in between the defaults and the config file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::Result;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.1";

/// Context window assumed for the model, in estimated tokens.
const DEFAULT_NUM_CTX: usize = 131_072;

/// Hard ceiling on non-system turns kept in the live history.
const DEFAULT_MAX_TURNS: usize = 120;

/// History length at which the pair compressor starts eating older turns.
const DEFAULT_COMPRESS_THRESHOLD: usize = 20;

/// Sampling options sent with every generation request, by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingOptions {
    pub num_ctx: usize,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub min_p: f32,
    pub mirostat: u8,
    pub mirostat_tau: f32,
    pub mirostat_eta: f32,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            num_ctx: DEFAULT_NUM_CTX,
            temperature: 0.8,
            top_k: 40,
            top_p: 0.85,
            min_p: 0.1,
            mirostat: 2,
            mirostat_tau: 5.0,
            mirostat_eta: 0.1,
        }
    }
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct LoreweaverConfig {
    /// Root for sessions, stories, worlds, and backups.
    pub data_dir: PathBuf,
    pub base_url: String,
    pub model: String,
    /// Token ceiling used when trimming history on load.
    pub num_ctx: usize,
    /// Turn-count ceiling used when trimming history on load.
    pub max_turns: usize,
    /// Whether histories are trimmed to the ceilings at all.
    pub conversation_limit: bool,
    pub compress_threshold: usize,
    pub sampling: SamplingOptions,
}

/// Partial shape of `config.toml`. Everything is optional; missing fields
/// keep their defaults.
#[derive(Debug, Default, Deserialize)]
struct ConfigToml {
    model: Option<String>,
    base_url: Option<String>,
    num_ctx: Option<usize>,
    max_turns: Option<usize>,
    conversation_limit: Option<bool>,
    compress_threshold: Option<usize>,
    temperature: Option<f32>,
    top_k: Option<u32>,
    top_p: Option<f32>,
    min_p: Option<f32>,
    mirostat: Option<u8>,
    mirostat_tau: Option<f32>,
    mirostat_eta: Option<f32>,
}

impl LoreweaverConfig {
    /// Load configuration for a data directory, reading `config.toml` there
    /// if present.
    pub async fn load(data_dir: PathBuf) -> Result<Self> {
        let mut config = Self {
            data_dir,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: std::env::var("LOREWEAVER_MODEL")
                .unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            num_ctx: DEFAULT_NUM_CTX,
            max_turns: DEFAULT_MAX_TURNS,
            conversation_limit: true,
            compress_threshold: DEFAULT_COMPRESS_THRESHOLD,
            sampling: SamplingOptions::default(),
        };

        let config_file = config.data_dir.join("config.toml");
        if config_file.exists() {
            match tokio::fs::read_to_string(&config_file).await {
                Ok(content) => match toml::from_str::<ConfigToml>(&content) {
                    Ok(parsed) => config.apply(parsed),
                    Err(e) => warn!("Ignoring malformed config.toml: {}", e),
                },
                Err(e) => warn!("Could not read config.toml: {}", e),
            }
        }

        config.sampling.num_ctx = config.num_ctx;
        info!(
            "Config: model={}, base_url={}, num_ctx={}, max_turns={}",
            config.model, config.base_url, config.num_ctx, config.max_turns
        );
        Ok(config)
    }

    fn apply(&mut self, parsed: ConfigToml) {
        if let Some(model) = parsed.model {
            self.model = model;
        }
        if let Some(base_url) = parsed.base_url {
            self.base_url = base_url;
        }
        if let Some(num_ctx) = parsed.num_ctx {
            self.num_ctx = num_ctx;
        }
        if let Some(max_turns) = parsed.max_turns {
            self.max_turns = max_turns;
        }
        if let Some(limit) = parsed.conversation_limit {
            self.conversation_limit = limit;
        }
        if let Some(threshold) = parsed.compress_threshold {
            self.compress_threshold = threshold;
        }
        if let Some(v) = parsed.temperature {
            self.sampling.temperature = v;
        }
        if let Some(v) = parsed.top_k {
            self.sampling.top_k = v;
        }
        if let Some(v) = parsed.top_p {
            self.sampling.top_p = v;
        }
        if let Some(v) = parsed.min_p {
            self.sampling.min_p = v;
        }
        if let Some(v) = parsed.mirostat {
            self.sampling.mirostat = v;
        }
        if let Some(v) = parsed.mirostat_tau {
            self.sampling.mirostat_tau = v;
        }
        if let Some(v) = parsed.mirostat_eta {
            self.sampling.mirostat_eta = v;
        }
    }

    /// The token ceiling handed to the trimmer, or None when trimming is
    /// disabled.
    pub fn trim_token_ceiling(&self) -> Option<usize> {
        self.conversation_limit.then_some(self.num_ctx)
    }
}

/// Resolve the data directory: `LOREWEAVER_HOME`, then `~/.loreweaver`.
pub fn default_data_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("LOREWEAVER_HOME") {
        return Ok(PathBuf::from(home));
    }
    let home = dirs::home_dir().ok_or_else(|| {
        crate::LoreweaverError::Config("could not determine home directory".to_string())
    })?;
    Ok(home.join(".loreweaver"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_defaults_without_config_file() {
        let temp = TempDir::new().unwrap();
        let config = LoreweaverConfig::load(temp.path().to_path_buf()).await.unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.max_turns, DEFAULT_MAX_TURNS);
        assert!(config.conversation_limit);
        assert_eq!(config.sampling.num_ctx, config.num_ctx);
    }

    #[tokio::test]
    async fn test_config_file_overrides() {
        let temp = TempDir::new().unwrap();
        tokio::fs::write(
            temp.path().join("config.toml"),
            "model = \"pantheon-rp\"\nnum_ctx = 8192\ntemperature = 0.5\n",
        )
        .await
        .unwrap();

        let config = LoreweaverConfig::load(temp.path().to_path_buf()).await.unwrap();
        assert_eq!(config.model, "pantheon-rp");
        assert_eq!(config.num_ctx, 8192);
        assert_eq!(config.sampling.num_ctx, 8192);
        assert!((config.sampling.temperature - 0.5).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_malformed_config_file_ignored() {
        let temp = TempDir::new().unwrap();
        tokio::fs::write(temp.path().join("config.toml"), "model = [broken")
            .await
            .unwrap();
        let config = LoreweaverConfig::load(temp.path().to_path_buf()).await.unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_trim_token_ceiling_respects_limit_flag() {
        let mut config = tokio_test::block_on(async {
            let temp = TempDir::new().unwrap();
            LoreweaverConfig::load(temp.path().to_path_buf()).await.unwrap()
        });
        assert_eq!(config.trim_token_ceiling(), Some(config.num_ctx));
        config.conversation_limit = false;
        assert_eq!(config.trim_token_ceiling(), None);
    }
}
