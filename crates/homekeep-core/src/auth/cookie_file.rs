//! Persisted copy of the refresh cookie.
//!
//! The auth client's jar lives in memory only. When the access token is
//! mirrored to disk or the keychain, the refresh cookie is mirrored here so
//! both survive a restart together.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Refresh cookie file name in cache directory
pub const REFRESH_COOKIE_FILE: &str = "refresh_cookie.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedCookie {
    name: String,
    value: String,
    saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RefreshCookieFile {
    path: PathBuf,
}

impl RefreshCookieFile {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            path: cache_dir.join(REFRESH_COOKIE_FILE),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Read the stored cookie as `(name, value)`. Runs once while the client
    /// is built, before any request is in flight.
    pub fn load(&self) -> Option<(String, String)> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read refresh cookie file");
                return None;
            }
        };
        match serde_json::from_str::<PersistedCookie>(&contents) {
            Ok(cookie) if !cookie.value.is_empty() => Some((cookie.name, cookie.value)),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Failed to parse refresh cookie file");
                None
            }
        }
    }

    pub async fn save(&self, name: &str, value: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create cache directory")?;
        }
        let persisted = PersistedCookie {
            name: name.to_string(),
            value: value.to_string(),
            saved_at: Utc::now(),
        };
        let contents = serde_json::to_string_pretty(&persisted)?;
        tokio::fs::write(&self.path, contents)
            .await
            .context("Failed to write refresh cookie file")?;
        Ok(())
    }

    /// Removing a file that was never written succeeds
    pub async fn remove(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove refresh cookie file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cookie_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("homekeep");

        RefreshCookieFile::new(cache_dir.clone())
            .save("refresh_token", "R1")
            .await
            .unwrap();

        let reopened = RefreshCookieFile::new(cache_dir);
        assert_eq!(
            reopened.load(),
            Some(("refresh_token".to_string(), "R1".to_string()))
        );

        reopened.remove().await.unwrap();
        reopened.remove().await.unwrap();
        assert_eq!(reopened.load(), None);
    }

    #[test]
    fn test_corrupt_cookie_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let file = RefreshCookieFile::new(dir.path().to_path_buf());
        std::fs::write(file.path(), "not json").unwrap();
        assert_eq!(file.load(), None);
    }
}
