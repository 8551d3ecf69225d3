//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the API
//! base URL, request timeout, refresh cookie name, where the access token is
//! persisted, and the last email used to sign in.
//!
//! Configuration is stored at `~/.config/homekeep/config.json`. Environment
//! variables override the file.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "homekeep";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api";

const DEFAULT_REFRESH_COOKIE: &str = "refresh_token";

const ENV_API_URL: &str = "HOMEKEEP_API_URL";
const ENV_TIMEOUT_SECS: &str = "HOMEKEEP_TIMEOUT_SECS";
const ENV_FALLBACK: &str = "HOMEKEEP_FALLBACK";

/// Where the access token is mirrored between runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FallbackKind {
    /// Not persisted; every run starts signed out
    Memory,
    /// `session.json` in the cache directory, refresh cookie alongside
    #[default]
    File,
    /// OS keychain
    Keyring,
}

impl FromStr for FallbackKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(FallbackKind::Memory),
            "file" => Ok(FallbackKind::File),
            "keyring" => Ok(FallbackKind::Keyring),
            other => Err(anyhow::anyhow!("Unknown fallback store: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub refresh_cookie_name: String,
    pub fallback: FallbackKind,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_cookie_name: DEFAULT_REFRESH_COOKIE.to_string(),
            fallback: FallbackKind::default(),
            last_email: None,
        }
    }
}

impl Config {
    /// Load from disk, then apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Self::from_json(&contents)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse the config file contents. A zero timeout falls back to the
    /// default, the same as the environment override.
    pub fn from_json(contents: &str) -> Result<Self> {
        let mut config: Config =
            serde_json::from_str(contents).context("Failed to parse config file")?;
        if config.request_timeout_secs == 0 {
            warn!("Ignoring request_timeout_secs of 0 in config file");
            config.request_timeout_secs = DEFAULT_REQUEST_TIMEOUT_SECS;
        }
        Ok(config)
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

    /// Apply overrides from a variable lookup. Unparseable values are
    /// ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.request_timeout_secs = secs,
                _ => warn!(value = %raw, "Ignoring invalid {}", ENV_TIMEOUT_SECS),
            }
        }
        if let Some(raw) = lookup(ENV_FALLBACK) {
            match raw.parse() {
                Ok(kind) => self.fallback = kind,
                Err(e) => warn!(error = %e, "Ignoring invalid {}", ENV_FALLBACK),
            }
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.refresh_cookie_name, "refresh_token");
        assert_eq!(config.fallback, FallbackKind::File);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"api_base_url":"https://api.homekeep.app","fallback":"keyring"}"#)
                .unwrap();
        assert_eq!(config.api_base_url, "https://api.homekeep.app");
        assert_eq!(config.fallback, FallbackKind::Keyring);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[
            ("HOMEKEEP_API_URL", " https://staging.homekeep.app/api "),
            ("HOMEKEEP_TIMEOUT_SECS", "5"),
            ("HOMEKEEP_FALLBACK", "Memory"),
        ]));
        assert_eq!(config.api_base_url, "https://staging.homekeep.app/api");
        assert_eq!(config.request_timeout_secs, 5);
        assert_eq!(config.fallback, FallbackKind::Memory);
    }

    #[test]
    fn test_zero_timeout_in_file_uses_default() {
        let config = Config::from_json(r#"{"request_timeout_secs":0}"#).unwrap();
        assert_eq!(config.request_timeout_secs, 30);

        let config = Config::from_json(r#"{"request_timeout_secs":12}"#).unwrap();
        assert_eq!(config.request_timeout_secs, 12);
    }

    #[test]
    fn test_invalid_overrides_ignored() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[
            ("HOMEKEEP_TIMEOUT_SECS", "0"),
            ("HOMEKEEP_FALLBACK", "floppy"),
        ]));
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.fallback, FallbackKind::File);
    }
}
