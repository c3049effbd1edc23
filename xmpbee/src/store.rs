// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Persistence: the settings blob and the platform secret store.
//!
//! Passwords live exclusively in the secret store, keyed by bare JID.
//! The settings blob is a single JSON document; installs that predate the
//! secret store may still carry plaintext passwords in it, which are
//! migrated out and scrubbed on load.

use core::fmt;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::account::Account;

/// Service name under which secrets are filed.
const SECRET_SERVICE: &str = "xmpbee";

/// Settings blob file name under the data root.
const SETTINGS_FILE: &str = "settings.json";

/// Error from the stores.
#[derive(Debug)]
pub enum StoreError {
    /// Filesystem error.
    Io(std::io::Error),
    /// The settings blob does not parse.
    Json(serde_json::Error),
    /// The platform secret store refused.
    Secret(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(fmt, "I/O error: {}", e),
            StoreError::Json(e) => write!(fmt, "settings parse error: {}", e),
            StoreError::Secret(e) => write!(fmt, "secret store error: {}", e),
        }
    }
}

impl StdError for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Json(e)
    }
}

/// Where the settings blob and logs live: `$XMPBEE_HOME` when set,
/// otherwise the platform data directory.
pub fn data_root() -> PathBuf {
    if let Some(home) = std::env::var_os("XMPBEE_HOME") {
        return PathBuf::from(home);
    }
    match dirs::data_dir() {
        Some(dir) => dir.join("xmpbee"),
        None => PathBuf::from("."),
    }
}

/// The persisted user preferences and account parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Bare JID of the account used last.
    #[serde(default)]
    pub last_account: Option<String>,
    /// Known accounts.
    #[serde(default)]
    pub accounts: Vec<Account>,
    /// Whether to raise desktop notifications.
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    /// Whether to play sounds.
    #[serde(default = "default_true")]
    pub sounds_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            last_account: None,
            accounts: Vec::new(),
            notifications_enabled: true,
            sounds_enabled: true,
        }
    }
}

/// The JSON settings blob on disk.
pub struct KvStore {
    path: PathBuf,
}

impl KvStore {
    /// A store rooted at `root`.
    pub fn new(root: &Path) -> KvStore {
        KvStore {
            path: root.join(SETTINGS_FILE),
        }
    }

    /// Load the blob; a missing file yields defaults.
    pub fn load(&self) -> Result<Settings, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the blob.
    pub fn save(&self, settings: &Settings) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(settings)?)?;
        Ok(())
    }
}

/// Storage for passwords, keyed by bare JID.
pub trait SecretStore: Send + Sync {
    /// Store a secret.
    fn put(&self, key: &str, secret: &str) -> Result<(), StoreError>;
    /// Fetch a secret; `Ok(None)` when there is none.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// Remove a secret; removing an absent secret is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// The platform keyring.
pub struct KeyringStore {
    service: String,
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringStore {
    pub fn new() -> KeyringStore {
        KeyringStore {
            service: SECRET_SERVICE.to_owned(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, StoreError> {
        keyring::Entry::new(&self.service, key).map_err(|e| StoreError::Secret(e.to_string()))
    }
}

impl SecretStore for KeyringStore {
    fn put(&self, key: &str, secret: &str) -> Result<(), StoreError> {
        self.entry(key)?
            .set_password(secret)
            .map_err(|e| StoreError::Secret(e.to_string()))
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::Secret(e.to_string())),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::Secret(e.to_string())),
        }
    }
}

/// In-memory store for tests and headless runs.
#[derive(Default)]
pub struct MemoryStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

impl SecretStore for MemoryStore {
    fn put(&self, key: &str, secret: &str) -> Result<(), StoreError> {
        self.secrets
            .lock()
            .map_err(|_| StoreError::Secret("poisoned".to_owned()))?
            .insert(key.to_owned(), secret.to_owned());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .secrets
            .lock()
            .map_err(|_| StoreError::Secret("poisoned".to_owned()))?
            .get(key)
            .cloned())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.secrets
            .lock()
            .map_err(|_| StoreError::Secret("poisoned".to_owned()))?
            .remove(key);
        Ok(())
    }
}

/// Move any legacy plaintext passwords from the settings blob into the
/// secret store. Returns whether the settings changed and must be saved.
pub fn migrate_secrets(settings: &mut Settings, secrets: &dyn SecretStore) -> bool {
    let mut changed = false;
    for account in &mut settings.accounts {
        if let Some(password) = account.password.take() {
            match secrets.put(&account.jid, &password) {
                Ok(()) => {
                    info!("migrated stored password for {} into the secret store", account.jid);
                    changed = true;
                }
                Err(e) => {
                    warn!("could not migrate password for {}: {}", account.jid, e);
                    // Leave the blob untouched rather than lose the secret.
                    account.password = Some(password);
                }
            }
        }
    }
    changed
}
