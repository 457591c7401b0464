//! Configuration management for fanout
//!
//! Stores settings in ~/.config/fanout/config.json. Environment variables
//! always win over the config file so CI and one-off runs never need one.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Model identifier sent to OpenRouter when none is configured.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// GitHub token with `repo` scope. `GITHUB_TOKEN` takes precedence.
    pub github_token: Option<String>,
    /// OpenRouter API key. `OPENROUTER_API_KEY` takes precedence.
    pub openrouter_api_key: Option<String>,
    /// Model identifier sent to OpenRouter.
    pub model: Option<String>,
    /// Max jobs generating/committing at once.
    pub concurrency: Option<usize>,
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("fanout"))
    }

    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(err) => {
                        preserve_corrupt_config(&path, &content);
                        eprintln!(
                            "  Warning: Config file was corrupted ({}). A backup was saved and defaults were loaded.",
                            err
                        );
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to disk
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        fs::create_dir_all(&dir)?;
        let path = dir.join("config.json");
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// GitHub token (environment first, then config file).
    pub fn github_token(&self) -> Option<String> {
        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            if !token.is_empty() {
                return Some(token);
            }
        }
        self.github_token.clone()
    }

    /// OpenRouter API key (environment first, then config file).
    pub fn api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var("OPENROUTER_API_KEY") {
            if !key.is_empty() {
                return Some(key);
            }
        }
        self.openrouter_api_key.clone()
    }

    /// The model to request completions from.
    pub fn model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/fanout/config.json".to_string())
    }
}

fn preserve_corrupt_config(path: &std::path::Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}
