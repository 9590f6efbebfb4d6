//! Secret and counter storage.
//!
//! The engine never owns secrets or counters; it talks to a [`SecretStore`]
//! keyed by token `uid`. Two implementations ship with the crate:
//! [`MemoryStore`] (with failure injection for tests) and [`JsonFileStore`]
//! (a pretty-printed JSON file, rewritten on every mutation).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::otp::token::{Secret, Token};
use crate::otp::types::*;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Synchronous get/set access to per-token secrets and HOTP counters.
///
/// Any failure of the backing medium is reported as
/// `OtpErrorKind::StoreUnavailable`; an unknown uid is `NotFound`.
pub trait SecretStore: Send + Sync {
    /// Store a secret and its starting counter under `uid`, replacing any
    /// previous entry.
    fn insert(&self, uid: &str, secret: &Secret, counter: u64) -> Result<(), OtpError>;

    fn get_secret(&self, uid: &str) -> Result<Secret, OtpError>;

    fn get_counter(&self, uid: &str) -> Result<u64, OtpError>;

    /// Overwrite the counter. Moving it backwards is `InvalidInput`.
    fn set_counter(&self, uid: &str, counter: u64) -> Result<(), OtpError>;

    /// Drop the entry for `uid`. Removing an unknown uid is not an error.
    fn remove(&self, uid: &str) -> Result<(), OtpError>;
}

/// Persist a token's secret and provisioning counter.
pub fn register_token(store: &dyn SecretStore, token: &Token) -> Result<(), OtpError> {
    store.insert(token.uid(), token.secret(), token.initial_counter().unwrap_or(0))?;
    log::info!("registered {} token {}", token.otp_type(), token.uid());
    Ok(())
}

fn not_found(uid: &str) -> OtpError {
    OtpError::new(OtpErrorKind::NotFound, format!("No stored secret for token {}", uid))
}

fn check_forward(uid: &str, current: u64, next: u64) -> Result<(), OtpError> {
    if next < current {
        return Err(OtpError::new(
            OtpErrorKind::InvalidInput,
            format!("Counter for token {} cannot move backwards", uid),
        )
        .with_detail(format!("{} -> {}", current, next)));
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  MemoryStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
struct MemoryEntry {
    secret: Secret,
    counter: u64,
}

/// Process-local store. Reads and writes can be made to fail on demand
/// to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent read fail with `StoreUnavailable`.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail with `StoreUnavailable`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_guard(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, MemoryEntry>>, OtpError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(OtpError::store("Simulated read failure"));
        }
        self.entries
            .lock()
            .map_err(|_| OtpError::store("Memory store lock poisoned"))
    }

    fn write_guard(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, MemoryEntry>>, OtpError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(OtpError::store("Simulated write failure"));
        }
        self.entries
            .lock()
            .map_err(|_| OtpError::store("Memory store lock poisoned"))
    }
}

impl SecretStore for MemoryStore {
    fn insert(&self, uid: &str, secret: &Secret, counter: u64) -> Result<(), OtpError> {
        self.write_guard()?.insert(
            uid.to_string(),
            MemoryEntry {
                secret: secret.clone(),
                counter,
            },
        );
        Ok(())
    }

    fn get_secret(&self, uid: &str) -> Result<Secret, OtpError> {
        self.read_guard()?
            .get(uid)
            .map(|e| e.secret.clone())
            .ok_or_else(|| not_found(uid))
    }

    fn get_counter(&self, uid: &str) -> Result<u64, OtpError> {
        self.read_guard()?
            .get(uid)
            .map(|e| e.counter)
            .ok_or_else(|| not_found(uid))
    }

    fn set_counter(&self, uid: &str, counter: u64) -> Result<(), OtpError> {
        let mut entries = self.write_guard()?;
        let entry = entries.get_mut(uid).ok_or_else(|| not_found(uid))?;
        check_forward(uid, entry.counter, counter)?;
        entry.counter = counter;
        Ok(())
    }

    fn remove(&self, uid: &str) -> Result<(), OtpError> {
        self.write_guard()?.remove(uid);
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  JsonFileStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// On-disk form of one entry. The secret is kept Base32-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSecret {
    secret: String,
    counter: u64,
}

/// File-backed store. The whole map is rewritten on every mutation via a
/// temporary file and a rename.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, StoredSecret>>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file starts an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OtpError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let json = std::fs::read_to_string(&path).map_err(|e| {
                OtpError::store(format!("read {}", path.display())).with_detail(e.to_string())
            })?;
            serde_json::from_str(&json).map_err(|e| {
                OtpError::store(format!("parse {}", path.display())).with_detail(e.to_string())
            })?
        } else {
            HashMap::new()
        };
        log::debug!("opened secret store {}", path.display());
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredSecret>>, OtpError> {
        self.entries
            .lock()
            .map_err(|_| OtpError::store("File store lock poisoned"))
    }

    fn save(&self, entries: &HashMap<String, StoredSecret>) -> Result<(), OtpError> {
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| OtpError::store("serialise secret store").with_detail(e.to_string()))?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| {
                OtpError::store(format!("mkdir {}", dir.display())).with_detail(e.to_string())
            })?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| {
            OtpError::store(format!("write {}", tmp.display())).with_detail(e.to_string())
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            OtpError::store(format!("rename to {}", self.path.display())).with_detail(e.to_string())
        })
    }

    /// Apply `f` to a copy of the map and persist it; the in-memory map is
    /// only replaced once the file write succeeds.
    fn mutate<F>(&self, f: F) -> Result<(), OtpError>
    where
        F: FnOnce(&mut HashMap<String, StoredSecret>) -> Result<(), OtpError>,
    {
        let mut entries = self.lock()?;
        let mut next = entries.clone();
        f(&mut next)?;
        if let Err(e) = self.save(&next) {
            log::warn!("secret store write failed: {}", e);
            return Err(e);
        }
        *entries = next;
        Ok(())
    }
}

impl SecretStore for JsonFileStore {
    fn insert(&self, uid: &str, secret: &Secret, counter: u64) -> Result<(), OtpError> {
        let stored = StoredSecret {
            secret: secret.to_base32(),
            counter,
        };
        self.mutate(|m| {
            m.insert(uid.to_string(), stored);
            Ok(())
        })
    }

    fn get_secret(&self, uid: &str) -> Result<Secret, OtpError> {
        let entries = self.lock()?;
        let stored = entries.get(uid).ok_or_else(|| not_found(uid))?;
        Secret::from_base32(&stored.secret)
            .map_err(|e| OtpError::store(format!("corrupt secret for token {}", uid)).with_detail(e.message))
    }

    fn get_counter(&self, uid: &str) -> Result<u64, OtpError> {
        self.lock()?
            .get(uid)
            .map(|s| s.counter)
            .ok_or_else(|| not_found(uid))
    }

    fn set_counter(&self, uid: &str, counter: u64) -> Result<(), OtpError> {
        self.mutate(|m| {
            let stored = m.get_mut(uid).ok_or_else(|| not_found(uid))?;
            check_forward(uid, stored.counter, counter)?;
            stored.counter = counter;
            Ok(())
        })
    }

    fn remove(&self, uid: &str) -> Result<(), OtpError> {
        self.mutate(|m| {
            m.remove(uid);
            Ok(())
        })
    }
}
