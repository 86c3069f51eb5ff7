//! Loreweaver CLI
//!
//! Interactive storytelling against a local Ollama model, with persistent
//! sessions, story settings, and a managed conversation context.

use clap::Parser;
use loreweaver::config::{default_data_dir, LoreweaverConfig};
use loreweaver::ChatSession;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Loreweaver - interactive storytelling for local models
#[derive(Parser, Debug)]
#[command(name = "loreweaver")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Data directory for sessions, stories, and backups
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Model name (overrides config.toml)
    #[arg(short, long)]
    model: Option<String>,

    /// Ollama base URL (overrides config.toml)
    #[arg(long)]
    base_url: Option<String>,

    /// Session to load at startup
    #[arg(short, long)]
    session: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    tokio::fs::create_dir_all(&data_dir).await?;
    info!("Data directory: {:?}", data_dir);

    let mut config = LoreweaverConfig::load(data_dir).await?;
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }

    let mut session = ChatSession::new(config).await?;

    if let Some(name) = cli.session {
        session.load_named(&name).await;
    } else if session.has_temp() {
        match session.try_recover_temp().await {
            Ok(true) => {
                println!("Recovered an unsaved session. Use /clear to start fresh instead.")
            }
            Ok(false) => {}
            Err(e) => eprintln!("Could not recover the unsaved session: {e}"),
        }
    }

    session.run().await?;
    Ok(())
}
