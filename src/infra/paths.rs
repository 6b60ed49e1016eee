// src/infra/paths.rs — Config/data path management
//
// All paths respect the SHOTSMITH_HOME environment variable for isolation.
// When unset, config uses ~/.shotsmith/ and data uses XDG_DATA_HOME/shotsmith.

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

fn shotsmith_home() -> Option<PathBuf> {
    std::env::var_os("SHOTSMITH_HOME").map(PathBuf::from)
}

/// Home directory, falling back to the working directory when none is known.
pub fn dirs_home() -> PathBuf {
    BaseDirs::new()
        .map(|b| b.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration directory: $SHOTSMITH_HOME/ or ~/.shotsmith/
pub fn config_dir() -> PathBuf {
    if let Some(home) = shotsmith_home() {
        return home;
    }
    dirs_home().join(".shotsmith")
}

/// Data directory: $SHOTSMITH_HOME/data/ or ~/.local/share/shotsmith/
pub fn data_dir() -> PathBuf {
    if let Some(home) = shotsmith_home() {
        return home.join("data");
    }
    ProjectDirs::from("", "", "shotsmith")
        .map(|p| p.data_local_dir().to_path_buf())
        .unwrap_or_else(|| config_dir().join("data"))
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Iteration history journal (one JSON object per line).
pub fn history_path() -> PathBuf {
    data_dir().join("history.jsonl")
}

/// Cost ledger journal (one JSON object per line).
pub fn ledger_path() -> PathBuf {
    data_dir().join("ledger.jsonl")
}

/// Default output directory for accepted images.
pub fn renders_dir() -> PathBuf {
    data_dir().join("renders")
}

/// Ensure all required directories exist
pub async fn ensure_dirs() -> anyhow::Result<()> {
    for dir in [config_dir(), data_dir(), renders_dir()] {
        tokio::fs::create_dir_all(&dir).await?;
    }
    Ok(())
}
