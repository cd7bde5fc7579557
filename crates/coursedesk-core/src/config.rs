//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! backend URL, refresh and idle timings, credential storage backend and
//! the last used email.
//!
//! Configuration is stored at `~/.config/coursedesk/config.json`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth::{FileStore, KeyringStore, TokenStore};
use crate::session::{IdleConfig, SessionOptions};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "coursedesk";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const ENV_API_URL: &str = "COURSEDESK_API_URL";
const ENV_REFRESH_INTERVAL: &str = "COURSEDESK_REFRESH_INTERVAL_SECS";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

/// Where session credentials are persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub refresh_interval_secs: u64,
    pub idle_timeout_secs: u64,
    pub warning_seconds: u32,
    pub request_timeout_secs: u64,
    pub storage: StorageKind,
    pub last_email: Option<String>,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            refresh_interval_secs: 600,
            idle_timeout_secs: 900,
            warning_seconds: 60,
            request_timeout_secs: 30,
            storage: StorageKind::File,
            last_email: None,
            log_dir: None,
        }
    }
}

impl Config {
    /// Load from the default location and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
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

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var(ENV_API_URL).filter(|u| !u.is_empty()) {
            self.api_base_url = url;
        }
        if let Some(raw) = var(ENV_REFRESH_INTERVAL) {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => self.refresh_interval_secs = secs,
                _ => warn!(value = %raw, "Ignoring invalid {}", ENV_REFRESH_INTERVAL),
            }
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn idle_config(&self) -> IdleConfig {
        IdleConfig {
            idle_duration: Duration::from_secs(self.idle_timeout_secs),
            warning_seconds: self.warning_seconds,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            base_url: self.api_base_url.clone(),
            refresh_interval: self.refresh_interval(),
            request_timeout: self.request_timeout(),
        }
    }

    /// Open the configured credential store
    pub fn open_store(&self) -> Result<Arc<dyn TokenStore>> {
        Ok(match self.storage {
            StorageKind::File => Arc::new(FileStore::new(self.cache_dir()?)),
            StorageKind::Keyring => Arc::new(KeyringStore::new()?),
        })
    }
}
