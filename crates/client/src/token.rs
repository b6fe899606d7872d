// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential state and persistence.
//!
//! [`TokenStore`] is the single owner of the access/refresh pair. It is pure
//! state plus persist-through: no HTTP of its own. Persistence goes through
//! the [`StoragePort`] seam so tests (and non-file targets) can substitute
//! a backend; reads tolerate corrupt or missing storage by loading as
//! no-credential rather than erroring.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Well-known persistence keys, stable across restarts so a reload can
/// resume the session without re-login.
const KEY_ACCESS: &str = "auth.access_token";
const KEY_REFRESH: &str = "auth.refresh_token";
const KEY_EXPIRES: &str = "auth.expires_at";

/// The access/refresh token pair plus expiry (epoch seconds).
///
/// `expires_at == 0` means no recorded expiry, which is treated as expired:
/// the credential must carry a future instant to count as live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: u64,
}

impl Credential {
    /// Build a credential expiring `expires_in` seconds from now.
    pub fn expiring_in(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: u64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at: epoch_secs() + expires_in,
        }
    }
}

/// Small key/value persistence seam.
///
/// Implementations are synchronous and infallible at the interface: I/O
/// failures are logged and swallowed so credential handling never panics
/// over a broken disk.
pub trait StoragePort: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// In-memory storage for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoragePort for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut map) = self.map.lock() {
            map.insert(key.to_owned(), value.to_owned());
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut map) = self.map.lock() {
            map.remove(key);
        }
    }
}

/// File-backed storage: one JSON document per path, written atomically
/// (unique tmp file + rename) so concurrent saves cannot interleave and a
/// crash mid-write cannot leave a truncated document behind.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    map: Mutex<HashMap<String, String>>,
}

impl FileStorage {
    /// Open storage at `path`, loading any existing document. A corrupt or
    /// missing file loads as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let map = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), err = %e, "corrupt storage file, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self { path, map: Mutex::new(map) }
    }

    fn flush(&self, map: &HashMap<String, String>) {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let json = match serde_json::to_string_pretty(map) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(err = %e, "failed to serialize storage");
                return;
            }
        };
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                if let Err(e) = std::fs::create_dir_all(dir) {
                    tracing::warn!(err = %e, "failed to create storage dir");
                    return;
                }
            }
        }
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = self.path.with_file_name(tmp_name);
        let result = std::fs::write(&tmp_path, json)
            .and_then(|()| std::fs::rename(&tmp_path, &self.path));
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), err = %e, "failed to persist storage");
        }
    }
}

impl StoragePort for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut map) = self.map.lock() {
            map.insert(key.to_owned(), value.to_owned());
            self.flush(&map);
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut map) = self.map.lock() {
            if map.remove(key).is_some() {
                self.flush(&map);
            }
        }
    }
}

/// Single owner of the [`Credential`]. All reads and writes are synchronous;
/// `set` persists before returning so a dependent retry always reads the
/// refreshed token back.
pub struct TokenStore {
    storage: Box<dyn StoragePort>,
    current: Mutex<Option<Credential>>,
}

impl TokenStore {
    /// Create a store over the given storage backend, seeding from any
    /// persisted fields. Unparseable persisted state loads as no-credential.
    pub fn new(storage: Box<dyn StoragePort>) -> Self {
        let current = load_persisted(storage.as_ref());
        Self { storage, current: Mutex::new(current) }
    }

    /// Current credential, if any.
    pub fn get(&self) -> Option<Credential> {
        self.current.lock().ok()?.clone()
    }

    /// Replace the credential and persist it, visible to all consumers
    /// before this returns.
    pub fn set(&self, credential: Credential) {
        self.storage.set(KEY_ACCESS, &credential.access_token);
        match &credential.refresh_token {
            Some(rt) => self.storage.set(KEY_REFRESH, rt),
            None => self.storage.remove(KEY_REFRESH),
        }
        self.storage.set(KEY_EXPIRES, &credential.expires_at.to_string());
        if let Ok(mut current) = self.current.lock() {
            *current = Some(credential);
        }
    }

    /// True when no credential is present or `now + skew` has reached the
    /// recorded expiry.
    pub fn is_expired(&self, skew_secs: u64) -> bool {
        match self.get() {
            Some(cred) => epoch_secs() + skew_secs >= cred.expires_at,
            None => true,
        }
    }

    /// Drop the credential and its persisted fields. Idempotent.
    pub fn clear(&self) {
        self.storage.remove(KEY_ACCESS);
        self.storage.remove(KEY_REFRESH);
        self.storage.remove(KEY_EXPIRES);
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
    }
}

fn load_persisted(storage: &dyn StoragePort) -> Option<Credential> {
    let access_token = storage.get(KEY_ACCESS)?;
    let expires_at = match storage.get(KEY_EXPIRES).map(|v| v.parse::<u64>()) {
        Some(Ok(at)) => at,
        Some(Err(_)) | None => {
            tracing::debug!("persisted expiry missing or unparseable, treating credential as expired");
            0
        }
    };
    Some(Credential { access_token, refresh_token: storage.get(KEY_REFRESH), expires_at })
}

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
