//! Application configuration management.
//!
//! This module handles loading and saving the client configuration, which
//! includes the API base URL, the durable-store directory, and the
//! background poll interval.
//!
//! Configuration is stored at `~/.config/oneorder/config.json`.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::refresh::DEFAULT_POLL_SECS;

/// Application name used for config/data directory paths
const APP_NAME: &str = "oneorder";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment override for the API base URL
const API_URL_ENV: &str = "ONEORDER_API_URL";

/// Backend root when neither the config file nor the environment names one
const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "apiBaseUrl", default)]
    pub api_base_url: Option<String>,
    #[serde(rename = "dataDir", default)]
    pub data_dir: Option<PathBuf>,
    #[serde(rename = "pollIntervalSecs", default = "default_poll_secs")]
    pub poll_interval_secs: u64,
}

fn default_poll_secs() -> u64 {
    DEFAULT_POLL_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: None,
            data_dir: None,
            poll_interval_secs: DEFAULT_POLL_SECS,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Effective API root: environment override first, then the config
    /// file, then the built-in default.
    pub fn api_base_url(&self) -> String {
        std::env::var(API_URL_ENV)
            .ok()
            .or_else(|| self.api_base_url.clone())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
    }

    /// Directory for the durable store, shared by every context on the
    /// machine.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_poll_interval() {
        let config = Config::default();
        assert_eq!(config.poll_interval_secs, DEFAULT_POLL_SECS);
    }

    #[test]
    fn test_explicit_data_dir_wins() {
        let config = Config {
            data_dir: Some(PathBuf::from("/tmp/oneorder-test")),
            ..Config::default()
        };
        assert_eq!(
            config.data_dir().expect("data dir"),
            PathBuf::from("/tmp/oneorder-test")
        );
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = Config {
            api_base_url: Some("https://oneorder.example.com/api".to_string()),
            data_dir: None,
            poll_interval_secs: 15,
        };
        let blob = serde_json::to_string(&config).expect("serialize");
        let parsed: Config = serde_json::from_str(&blob).expect("parse");
        assert_eq!(parsed.api_base_url, config.api_base_url);
        assert_eq!(parsed.poll_interval_secs, 15);
    }
}
