use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub subject_id: String,
    pub display_name: String,
    pub email: String,
    pub access_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionData {
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes().max(0)
    }
}

/// Shared holder of the live session.
///
/// Only the authentication exchange (`establish`, `load`) and the sign-out
/// trigger (`clear`) write to it; everything else reads. Expiry changes are
/// published on a watch channel so the expiry watcher can rearm its timer.
/// Clone is cheap and every clone sees the same session.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    data: RwLock<Option<SessionData>>,
    expiry_tx: watch::Sender<Option<DateTime<Utc>>>,
    generation: AtomicU64,
    cache_dir: Option<PathBuf>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// In-memory store, nothing is written to disk
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Store that persists the session to `cache_dir/session.json`
    pub fn persistent(cache_dir: PathBuf) -> Self {
        Self::build(Some(cache_dir))
    }

    fn build(cache_dir: Option<PathBuf>) -> Self {
        let (expiry_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(StoreInner {
                data: RwLock::new(None),
                expiry_tx,
                generation: AtomicU64::new(0),
                cache_dir,
            }),
        }
    }

    /// Load session from disk. Expired sessions are discarded.
    pub fn load(&self) -> Result<bool> {
        let Some(path) = self.session_path() else {
            return Ok(false);
        };
        if !path.exists() {
            return Ok(false);
        }

        let contents = std::fs::read_to_string(&path).context("Failed to read session file")?;
        let data: SessionData =
            serde_json::from_str(&contents).context("Failed to parse session file")?;

        if data.is_expired() {
            debug!(expired_at = %data.expires_at, "Discarding expired session from disk");
            std::fs::remove_file(&path).context("Failed to remove expired session file")?;
            return Ok(false);
        }

        self.install(data);
        Ok(true)
    }

    /// Replace the live session with a freshly exchanged one
    pub fn establish(&self, data: SessionData) -> Result<()> {
        if let Some(path) = self.session_path() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let contents = serde_json::to_string_pretty(&data)?;
            std::fs::write(&path, contents).context("Failed to write session file")?;
        }
        info!(subject = %data.subject_id, expires_at = %data.expires_at, "Session established");
        self.install(data);
        Ok(())
    }

    fn install(&self, data: SessionData) {
        let expires_at = data.expires_at;
        {
            let mut live = self.write();
            *live = Some(data);
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.expiry_tx.send_replace(Some(expires_at));
    }

    /// Clear session data, returning the session that was live (if any)
    pub fn clear(&self) -> Option<SessionData> {
        let previous = self.write().take();
        self.after_clear();
        previous
    }

    /// Clear session data only if no newer session has been established since
    /// `generation`. As with `compare_exchange`, `Err` carries the live
    /// generation and the store is left untouched.
    pub fn clear_generation(&self, generation: u64) -> Result<Option<SessionData>, u64> {
        let previous = {
            let mut live = self.write();
            let current = self.generation();
            if current != generation {
                return Err(current);
            }
            live.take()
        };
        self.after_clear();
        Ok(previous)
    }

    fn after_clear(&self) {
        self.inner.expiry_tx.send_replace(None);

        if let Some(path) = self.session_path() {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(error = %e, "Failed to remove session file");
                }
            }
        }
    }

    /// The current session, or `None` when signed out
    pub fn current(&self) -> Option<SessionData> {
        self.read().clone()
    }

    /// Get the bearer token if a session exists
    pub fn token(&self) -> Option<String> {
        self.read().as_ref().map(|d| d.access_token.clone())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.read().as_ref().map(|d| d.expires_at)
    }

    /// Check if session is valid (exists and not expired)
    pub fn is_valid(&self) -> bool {
        self.read().as_ref().map(|d| !d.is_expired()).unwrap_or(false)
    }

    /// Number of sessions established on this store so far
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Receiver that observes every expiry change, including clears
    pub fn subscribe_expiry(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.inner.expiry_tx.subscribe()
    }

    fn session_path(&self) -> Option<PathBuf> {
        self.inner.cache_dir.as_ref().map(|dir| dir.join(SESSION_FILE))
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<SessionData>> {
        self.inner.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<SessionData>> {
        self.inner.data.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
pub(crate) fn sample_session(expires_at: DateTime<Utc>) -> SessionData {
    SessionData {
        subject_id: "42".to_string(),
        display_name: "Dana Supervisor".to_string(),
        email: "dana@example.com".to_string(),
        access_token: "opaque-token".to_string(),
        created_at: Utc::now(),
        expires_at,
    }
}
