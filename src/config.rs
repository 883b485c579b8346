//! Configuration file support for kgchat
//!
//! Loads config from ~/.kgchat/config.toml

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Configuration for kgchat
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Backend base URL
    pub backend_url: Option<String>,

    /// Number of retrieval hits to request per question
    pub retrieval_top_k: Option<usize>,

    /// Default title for new sessions
    pub default_session_title: Option<String>,
}

impl Config {
    /// Load config from ~/.kgchat/config.toml
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    /// Load config from an explicit path
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".kgchat")
        .join("config.toml")
}
