//! Configuration management for the CLI

use crate::output::OutputFormat;
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// CLI configuration, read from `~/.config/rpo/config.json`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Worker API URL
    pub api_url: Option<String>,
    /// Default output format (`table` or `json`)
    pub default_format: Option<String>,
}

impl Config {
    /// Load the user's configuration; a missing file means defaults
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse config file")
    }

    /// Configured output format, if it names a known one
    pub fn format(&self) -> Option<OutputFormat> {
        self.default_format
            .as_deref()
            .and_then(|name| OutputFormat::from_str(name, true).ok())
    }

    fn config_path() -> Option<PathBuf> {
        dirs_next::home_dir().map(|home| home.join(".config").join("rpo").join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert!(config.api_url.is_none());
        assert!(config.format().is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"api_url": "http://worker:8080", "default_format": "JSON"}"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.api_url.as_deref(), Some("http://worker:8080"));
        assert!(matches!(config.format(), Some(OutputFormat::Json)));
    }

    #[test]
    fn test_unknown_format_is_ignored() {
        let config = Config {
            api_url: None,
            default_format: Some("yaml".to_string()),
        };
        assert!(config.format().is_none());
    }
}
