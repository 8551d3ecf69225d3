use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{AccessCredential, FallbackStore, MemoryFallback};

/// Sole owner of the current access credential.
///
/// The in-memory copy is authoritative; the fallback store mirrors it so a
/// restarted process can resume. Consumers always go through [`TokenStore::get`]
/// and never hold on to a credential across an await point.
pub struct TokenStore {
    memory: Mutex<Option<AccessCredential>>,
    fallback: Arc<dyn FallbackStore>,
    /// Serializes fallback I/O so a late write cannot resurrect a cleared token
    fallback_io: tokio::sync::Mutex<()>,
    present: watch::Sender<bool>,
}

impl TokenStore {
    pub fn new(fallback: Arc<dyn FallbackStore>) -> Self {
        let (present, _) = watch::channel(false);
        Self {
            memory: Mutex::new(None),
            fallback,
            fallback_io: tokio::sync::Mutex::new(()),
            present,
        }
    }

    /// Store with a process-local fallback only
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryFallback::default()))
    }

    /// Store a new access credential in memory and in the fallback.
    ///
    /// Blank values are ignored with a warning.
    pub async fn set(&self, token: &str) {
        let Some(credential) = AccessCredential::new(token) else {
            warn!("Ignoring blank access token");
            return;
        };

        *self.lock_memory() = Some(credential.clone());
        self.present.send_replace(true);
        debug!("Access token updated");

        let _io = self.fallback_io.lock().await;
        // A clear() may have run while we waited for the fallback
        if self.lock_memory().as_ref() != Some(&credential) {
            return;
        }
        if let Err(e) = self.fallback.write(credential.as_str()).await {
            warn!(error = %e, "Failed to persist access token");
        }
    }

    /// Current credential, resuming from the fallback when memory is empty.
    pub async fn get(&self) -> Option<AccessCredential> {
        if let Some(credential) = self.snapshot() {
            return Some(credential);
        }

        let _io = self.fallback_io.lock().await;
        if let Some(credential) = self.snapshot() {
            return Some(credential);
        }

        let stored = match self.fallback.read().await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted access token");
                return None;
            }
        };

        let credential = AccessCredential::new(stored?)?;
        *self.lock_memory() = Some(credential.clone());
        self.present.send_replace(true);
        info!("Resumed session from persisted access token");
        Some(credential)
    }

    /// In-memory value only; never touches the fallback
    pub fn snapshot(&self) -> Option<AccessCredential> {
        self.lock_memory().clone()
    }

    /// Remove the credential from memory and from the fallback.
    ///
    /// Safe to call repeatedly. Returns `true` if an in-memory credential was
    /// removed, in which case subscribers are told the session ended.
    pub async fn clear(&self) -> bool {
        let removed = self.lock_memory().take().is_some();

        {
            let _io = self.fallback_io.lock().await;
            if let Err(e) = self.fallback.remove().await {
                warn!(error = %e, "Failed to remove persisted access token");
            }
        }

        if removed {
            self.present.send_replace(false);
            info!("Access token cleared");
        }
        removed
    }

    /// Watch whether a credential is present; flips to `false` when the session ends.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.present.subscribe()
    }

    fn lock_memory(&self) -> std::sync::MutexGuard<'_, Option<AccessCredential>> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
