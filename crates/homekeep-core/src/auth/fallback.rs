//! Persisted mirror of the access credential.
//!
//! A fallback store holds a single value: the last access token. It exists
//! only so a restarted process can resume the session without logging in
//! again, and it is wiped whenever the token store is cleared.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture, FutureExt};
use keyring::Entry;
use serde::{Deserialize, Serialize};

/// Session file name in cache directory
pub const SESSION_FILE: &str = "session.json";

/// Keychain account under which the access token is stored
const KEYRING_ACCOUNT: &str = "access-token";

pub trait FallbackStore: Send + Sync {
    fn read(&self) -> BoxFuture<'_, Result<Option<String>>>;

    fn write<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Remove the stored value. Removing an absent value succeeds.
    fn remove(&self) -> BoxFuture<'_, Result<()>>;
}

/// Process-local fallback. Does not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryFallback {
    value: Mutex<Option<String>>,
}

impl MemoryFallback {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Some(token.into())),
        }
    }

    /// Peek at the stored value without going through a token store
    pub fn stored(&self) -> Option<String> {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, value: Option<String>) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }
}

impl FallbackStore for MemoryFallback {
    fn read(&self) -> BoxFuture<'_, Result<Option<String>>> {
        future::ready(Ok(self.stored())).boxed()
    }

    fn write<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<()>> {
        self.replace(Some(token.to_string()));
        future::ready(Ok(())).boxed()
    }

    fn remove(&self) -> BoxFuture<'_, Result<()>> {
        self.replace(None);
        future::ready(Ok(())).boxed()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedCredential {
    token: String,
    saved_at: DateTime<Utc>,
}

/// Fallback stored as a JSON file in the cache directory.
#[derive(Debug, Clone)]
pub struct FileFallback {
    path: PathBuf,
}

impl FileFallback {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            path: cache_dir.join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl FallbackStore for FileFallback {
    fn read(&self) -> BoxFuture<'_, Result<Option<String>>> {
        async move {
            let contents = match tokio::fs::read_to_string(&self.path).await {
                Ok(contents) => contents,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e).context("Failed to read session file"),
            };
            let persisted: PersistedCredential =
                serde_json::from_str(&contents).context("Failed to parse session file")?;
            Ok(Some(persisted.token))
        }
        .boxed()
    }

    fn write<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create cache directory")?;
            }
            let persisted = PersistedCredential {
                token: token.to_string(),
                saved_at: Utc::now(),
            };
            let contents = serde_json::to_string_pretty(&persisted)?;
            tokio::fs::write(&self.path, contents)
                .await
                .context("Failed to write session file")?;
            Ok(())
        }
        .boxed()
    }

    fn remove(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e).context("Failed to remove session file"),
            }
        }
        .boxed()
    }
}

/// Fallback stored in the OS keychain.
///
/// Keyring calls are blocking, so each one runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct KeyringFallback {
    service: String,
}

impl KeyringFallback {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(service: &str) -> Result<Entry> {
        Entry::new(service, KEYRING_ACCOUNT).context("Failed to create keyring entry")
    }
}

impl FallbackStore for KeyringFallback {
    fn read(&self) -> BoxFuture<'_, Result<Option<String>>> {
        let service = self.service.clone();
        async move {
            tokio::task::spawn_blocking(move || match Self::entry(&service)?.get_password() {
                Ok(token) => Ok(Some(token)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(e).context("Failed to retrieve token from keychain"),
            })
            .await
            .context("Keyring task failed")?
        }
        .boxed()
    }

    fn write<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<()>> {
        let service = self.service.clone();
        let token = token.to_string();
        async move {
            tokio::task::spawn_blocking(move || {
                Self::entry(&service)?
                    .set_password(&token)
                    .context("Failed to store token in keychain")
            })
            .await
            .context("Keyring task failed")?
        }
        .boxed()
    }

    fn remove(&self) -> BoxFuture<'_, Result<()>> {
        let service = self.service.clone();
        async move {
            tokio::task::spawn_blocking(move || match Self::entry(&service)?.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(e).context("Failed to delete token from keychain"),
            })
            .await
            .context("Keyring task failed")?
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_fallback_roundtrip() {
        let store = MemoryFallback::default();
        assert_eq!(store.read().await.unwrap(), None);

        store.write("T1").await.unwrap();
        assert_eq!(store.read().await.unwrap().as_deref(), Some("T1"));

        store.remove().await.unwrap();
        store.remove().await.unwrap();
        assert_eq!(store.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_fallback_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("homekeep");

        FileFallback::new(cache_dir.clone()).write("T1").await.unwrap();

        let reopened = FileFallback::new(cache_dir);
        assert!(reopened.path().exists());
        assert_eq!(reopened.read().await.unwrap().as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn test_file_fallback_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileFallback::new(dir.path().to_path_buf());

        assert_eq!(store.read().await.unwrap(), None);
        // Removing a file that was never written is not an error
        store.remove().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_fallback_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileFallback::new(dir.path().to_path_buf());
        std::fs::write(store.path(), "not json").unwrap();

        assert!(store.read().await.is_err());
    }
}
