//! Shared configuration for bagtree tools
//!
//! Reads from ~/.bagtree/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default storage node API endpoint
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8192";

/// Default directory the storage node downloads bags into
pub const DEFAULT_DOWNLOAD_PATH: &str = "/root/downloads";

/// Env var overriding `storage_node.api_url`
pub const API_URL_ENV: &str = "BAGTREE_API_URL";

/// Env var overriding the config directory
pub const CONFIG_DIR_ENV: &str = "BAGTREE_CONFIG_DIR";

/// Top-level config structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage_node: StorageNodeConfig,
    #[serde(default)]
    pub merkle: MerkleConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub order: OrderConfig,
}

/// Storage node connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageNodeConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Where the node places downloaded bags
    #[serde(default = "default_download_path")]
    pub download_path: String,
    /// Per-request HTTP timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StorageNodeConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            download_path: default_download_path(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_download_path() -> String {
    DEFAULT_DOWNLOAD_PATH.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Chunking parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerkleConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for MerkleConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_chunk_size() -> usize {
    4096
}

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_header_poll_ms")]
    pub header_poll_ms: u64,
    #[serde(default = "default_download_poll_ms")]
    pub download_poll_ms: u64,
    /// Accepted for older config files; admission no longer polls
    #[serde(default = "default_slot_poll_ms")]
    pub slot_poll_ms: u64,
    /// Wait for bags still downloading instead of failing fast
    #[serde(default = "default_true")]
    pub wait_for_download: bool,
    /// Upper bound on that wait, 0 = no limit
    #[serde(default)]
    pub wait_timeout_secs: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            header_poll_ms: default_header_poll_ms(),
            download_poll_ms: default_download_poll_ms(),
            slot_poll_ms: default_slot_poll_ms(),
            wait_for_download: true,
            wait_timeout_secs: 0,
        }
    }
}

fn default_max_concurrent() -> usize {
    5
}

fn default_header_poll_ms() -> u64 {
    1000
}

fn default_download_poll_ms() -> u64 {
    2000
}

fn default_slot_poll_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

/// Storage order defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderConfig {
    #[serde(default = "default_storage_period_secs")]
    pub storage_period_secs: u64,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            storage_period_secs: default_storage_period_secs(),
        }
    }
}

fn default_storage_period_secs() -> u64 {
    60 * 60 * 24 * 180
}

impl Config {
    /// Load config from file, or create default if doesn't exist
    ///
    /// `BAGTREE_API_URL` takes precedence over the file.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&get_config_path())?;
        config.apply_env();
        Ok(config)
    }

    /// Load config, returning default on any error (no panic)
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|_| {
            let mut config = Config::default();
            config.apply_env();
            config
        })
    }

    /// Load from an explicit path, writing defaults there if missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&get_config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.is_empty() {
                self.storage_node.api_url = url;
            }
        }
    }
}

/// Get the bagtree directory (~/.bagtree)
pub fn get_bagtree_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".bagtree")
}

/// Get the config file path (~/.bagtree/config.toml)
pub fn get_config_path() -> PathBuf {
    get_bagtree_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage_node.api_url, DEFAULT_API_URL);
        assert_eq!(config.storage_node.download_path, "/root/downloads");
        assert_eq!(config.merkle.chunk_size, 4096);
        assert_eq!(config.workers.max_concurrent, 5);
        assert_eq!(config.workers.header_poll_ms, 1000);
        assert_eq!(config.workers.download_poll_ms, 2000);
        assert!(config.workers.wait_for_download);
        assert_eq!(config.order.storage_period_secs, 15_552_000);
    }

    #[test]
    fn test_parse_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[storage_node]
api_url = "http://node.local:9000"

[workers]
max_concurrent = 2
wait_timeout_secs = 600
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.storage_node.api_url, "http://node.local:9000");
        assert_eq!(config.storage_node.timeout_secs, 30);
        assert_eq!(config.workers.max_concurrent, 2);
        assert_eq!(config.workers.wait_timeout_secs, 600);
        assert_eq!(config.workers.download_poll_ms, 2000);
        assert_eq!(config.merkle.chunk_size, 4096);
    }

    #[test]
    fn test_legacy_slot_poll_accepted() {
        let toml = r#"
[workers]
slot_poll_ms = 250
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.workers.slot_poll_ms, 250);
    }

    #[test]
    fn test_load_from_creates_default() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let mut config = Config::default();
        config.merkle.chunk_size = 1024;
        config.order.storage_period_secs = 3600;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.merkle.chunk_size, 1024);
        assert_eq!(loaded.order.storage_period_secs, 3600);
    }

    #[test]
    fn test_invalid_file_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[merkle]\nchunk_size = \"big\"\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
