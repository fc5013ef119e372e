//! Application configuration management.
//!
//! This module handles loading and saving the console configuration, which
//! includes the API base URL, the login entry point, the fallback session
//! lifetime and the last used email.
//!
//! Configuration is stored at `~/.config/shiftguard/config.json`. The
//! `SHIFTGUARD_API_URL` and `SHIFTGUARD_LOGIN_PATH` environment variables
//! override the stored values.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "shiftguard";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default API base URL when neither config nor environment sets one
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";

/// Default login entry point the sign-out trigger redirects to
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Session lifetime used when the token carries no readable `exp` claim.
pub const DEFAULT_SESSION_LIFETIME_MINUTES: i64 = 60;

/// Longest fallback session lifetime accepted from the config file (one year)
pub const MAX_SESSION_LIFETIME_MINUTES: i64 = 366 * 24 * 60;

const ENV_API_URL: &str = "SHIFTGUARD_API_URL";
const ENV_LOGIN_PATH: &str = "SHIFTGUARD_LOGIN_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub login_path: String,
    pub session_lifetime_minutes: i64,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            session_lifetime_minutes: DEFAULT_SESSION_LIFETIME_MINUTES,
            last_email: None,
        }
    }
}

impl Config {
    /// Load the config from the user config dir and apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env();
        Ok(config)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let mut config: Self =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config.check_session_lifetime();
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    fn check_session_lifetime(&mut self) {
        if !(1..=MAX_SESSION_LIFETIME_MINUTES).contains(&self.session_lifetime_minutes) {
            warn!(
                session_lifetime_minutes = self.session_lifetime_minutes,
                default = DEFAULT_SESSION_LIFETIME_MINUTES,
                "Configured session lifetime out of range, using the default"
            );
            self.session_lifetime_minutes = DEFAULT_SESSION_LIFETIME_MINUTES;
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            if !url.trim().is_empty() {
                self.api_base_url = url.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var(ENV_LOGIN_PATH) {
            if !path.trim().is_empty() {
                self.login_path = path.trim().to_string();
            }
        }
    }

    /// Base URL without a trailing slash
    pub fn api_base(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
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
}
