//! Local durable key/value storage.
//!
//! Values are JSON documents. Keys for one participant live under a
//! [`Namespace`] so two identities can share a database without seeing each
//! other's history or queue.
//!
//! Database structure (sled backend):
//! - `kv`: key -> JSON value

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Db, Tree};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Byte-level key/value persistence.
pub trait KeyValueStore: Send + Sync {
    /// Read a raw value.
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a raw value.
    fn set_raw(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove a value. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Shared store handle.
pub type SharedStore = Arc<dyn KeyValueStore>;

/// Read a JSON value.
pub fn get_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get_raw(key)? {
        Some(data) => {
            let value = serde_json::from_slice(&data)
                .map_err(|e| Error::Persistence(format!("failed to decode '{}': {}", key, e)))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Write a JSON value.
pub fn set_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let data = serde_json::to_vec(value)
        .map_err(|e| Error::Persistence(format!("failed to encode '{}': {}", key, e)))?;
    store.set_raw(key, data)
}

/// Sled-based persistent storage.
pub struct SledStore {
    #[allow(dead_code)]
    db: Db,
    kv: Tree,
}

impl SledStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = sled::open(path)
            .map_err(|e| Error::Persistence(format!("failed to open chat database: {}", e)))?;
        Self::from_db(db)
    }

    /// Open a throwaway database, removed when dropped.
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| Error::Persistence(format!("failed to open temporary database: {}", e)))?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            kv: db.open_tree("kv")?,
            db,
        })
    }

    /// Flush the database to disk.
    pub fn flush(&self) -> Result<()> {
        self.kv.flush()?;
        Ok(())
    }
}

impl KeyValueStore for SledStore {
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.kv.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn set_raw(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.kv.insert(key.as_bytes(), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.kv.remove(key.as_bytes())?;
        Ok(())
    }
}

/// In-memory storage. Survives "restarts" only as long as the value lives.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::Persistence("memory store poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set_raw(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Persistence("memory store poisoned".to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Persistence("memory store poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

/// Key prefix scoping a store to one local identity.
#[derive(Clone)]
pub struct Namespace {
    store: SharedStore,
    prefix: String,
}

impl Namespace {
    /// Scope `store` to `login_id`.
    pub fn new(store: SharedStore, login_id: &str) -> Self {
        Self {
            store,
            prefix: format!("{}/", login_id),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Read a JSON value under this namespace.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        get_json(self.store.as_ref(), &self.key(name))
    }

    /// Write a JSON value under this namespace.
    pub fn set<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        set_json(self.store.as_ref(), &self.key(name), value)
    }

    /// Remove a value under this namespace.
    pub fn remove(&self, name: &str) -> Result<()> {
        self.store.remove(&self.key(name))
    }

    /// The unscoped store.
    pub fn store(&self) -> &SharedStore {
        &self.store
    }
}
