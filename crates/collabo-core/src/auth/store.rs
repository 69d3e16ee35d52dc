//! Key-value backends for the persisted session.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use keyring::Entry;
use tracing::{debug, warn};

/// Key the session token is stored under.
pub const TOKEN_KEY: &str = "token";

/// Key the cached user record is stored under.
pub const USER_KEY: &str = "user";

/// Session file name in the data directory
const SESSION_FILE: &str = "session.json";

/// Service name for keychain entries
const SERVICE_NAME: &str = "collabo";

/// A string key-value store that outlives the process (or pretends to).
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

// ============================================================================
// Memory
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

// ============================================================================
// File
// ============================================================================

/// A flat JSON object on disk. The file is deleted once its last key is removed.
///
/// An unreadable file counts as an empty session: reads skip it, the next
/// write replaces it, and removing any key deletes it.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

/// Contents of the session file as found on disk.
enum SessionFile {
    Missing,
    Entries(BTreeMap<String, String>),
    Corrupt,
}

impl FileStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(SESSION_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<SessionFile> {
        if !self.path.exists() {
            return Ok(SessionFile::Missing);
        }
        let contents =
            std::fs::read_to_string(&self.path).context("Failed to read session file")?;
        match serde_json::from_str(&contents) {
            Ok(entries) => Ok(SessionFile::Entries(entries)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Session file is unreadable, treating it as empty");
                Ok(SessionFile::Corrupt)
            }
        }
    }

    fn entries(&self) -> Result<BTreeMap<String, String>> {
        match self.read()? {
            SessionFile::Entries(entries) => Ok(entries),
            SessionFile::Missing | SessionFile::Corrupt => Ok(BTreeMap::new()),
        }
    }

    fn delete_file(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove session file"),
        }
    }

    fn write(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if entries.is_empty() {
            return self.delete_file();
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(entries)?;

        // Write a private temp file, then rename over the old one
        let tmp = self.path.with_extension("json.tmp");
        let _ = std::fs::remove_file(&tmp);
        let mut file = open_private(&tmp).context("Failed to create session file")?;
        file.write_all(contents.as_bytes())
            .and_then(|_| file.sync_all())
            .context("Failed to write session file")?;
        drop(file);
        std::fs::rename(&tmp, &self.path).context("Failed to replace session file")?;
        Ok(())
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.entries()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.entries()?;
        entries.insert(key.to_string(), value.to_string());
        self.write(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.read()? {
            SessionFile::Missing => Ok(()),
            // Can't tell what the file holds, so none of it survives
            SessionFile::Corrupt => {
                debug!(key, path = %self.path.display(), "Removing unreadable session file");
                self.delete_file()
            }
            SessionFile::Entries(mut entries) => {
                if entries.remove(key).is_some() {
                    debug!(key, path = %self.path.display(), "Removed session key");
                    self.write(&entries)?;
                }
                Ok(())
            }
        }
    }
}

// ============================================================================
// Keyring
// ============================================================================

/// OS keychain, one entry per key under the `collabo` service.
///
/// Backed by macOS Keychain, Windows Credential Manager, or the Linux kernel
/// keyring, per the platform features enabled on `keyring`.
#[derive(Debug, Default)]
pub struct KeyringStore;

impl KeyringStore {
    fn entry(key: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, key).context("Failed to create keyring entry")
    }
}

impl KeyValueStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match Self::entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve value from keychain"),
        }
    }

    /// Fails unless a fresh entry reads the value back, which rules out
    /// keyring's non-persistent fallback on platforms without a keychain.
    fn set(&self, key: &str, value: &str) -> Result<()> {
        Self::entry(key)?
            .set_password(value)
            .context("Failed to store value in keychain")?;
        match self.get(key)? {
            Some(stored) if stored == value => Ok(()),
            _ => anyhow::bail!("Keychain did not retain the value; no persistent credential store is available"),
        }
    }

    fn remove(&self, key: &str) -> Result<()> {
        match Self::entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete value from keychain"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
