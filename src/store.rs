//! Whole-document persistence.
//!
//! Every persisted structure is one JSON document under one key. Callers load a snapshot,
//! compute a new one and save it back; there is no partial update.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};

pub const KEY_COMMISSION: &str = "commission";
pub const KEY_REGISTRY: &str = "registry";

pub trait DocumentStore: Send + Sync {
    /// Returns `None` when nothing was saved under `key` yet.
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>>;
    fn save(&self, key: &str, document: &serde_json::Value) -> Result<()>;
}

/// Load typed document. Missing document yields `T::default()`.
pub fn load_document<T>(store: &dyn DocumentStore, key: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match store.load(key)? {
        Some(v) => Ok(serde_json::from_value(v)?),
        None => Ok(T::default()),
    }
}

pub fn save_document<T: Serialize>(store: &dyn DocumentStore, key: &str, document: &T) -> Result<()> {
    let v = serde_json::to_value(document)?;
    store.save(key, &v)
}

/// Documents stored as `<dir>/<key>.json`.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn read(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
        let path = self.path(key);
        let data = match std::fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context(format!("can't read from {}", path.display())),
        };
        if data.trim().is_empty() {
            return Ok(None);
        }
        let v = serde_json::from_str(&data).context(format!("parsing {}", path.display()))?;
        Ok(Some(v))
    }

    fn write(&self, key: &str, document: &serde_json::Value) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .context(format!("creating state dir {}", self.dir.display()))?;
        let path = self.path(key);
        let mut data = serde_json::to_string_pretty(document)?;
        data.push('\n');
        write_private(&path, data.as_bytes()).context(format!("writing {}", path.display()))
    }
}

#[cfg(unix)]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut f = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    f.write_all(data)
}

#[cfg(not(unix))]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, data)
}

impl DocumentStore for JsonFileStore {
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.read(key).map_err(Error::Store)
    }

    fn save(&self, key: &str, document: &serde_json::Value) -> Result<()> {
        self.write(key, document).map_err(Error::Store)?;
        log::debug!("saved document {}", key);
        Ok(())
    }
}

/// In-memory store, mostly for tests. Failures can be injected per operation.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, serde_json::Value>>,
    fail_save: Mutex<Option<String>>,
    fail_load: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `save` fail with given message.
    pub fn fail_saves(&self, msg: &str) {
        if let Ok(mut f) = self.fail_save.lock() {
            *f = Some(msg.to_owned());
        }
    }

    pub fn fail_loads(&self, msg: &str) {
        if let Ok(mut f) = self.fail_load.lock() {
            *f = Some(msg.to_owned());
        }
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.docs.lock().ok().and_then(|d| d.get(key).cloned())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::Store(anyhow::anyhow!("memory store lock poisoned"))
}

impl DocumentStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        if let Some(msg) = self.fail_load.lock().map_err(poisoned)?.as_ref() {
            return Err(Error::Store(anyhow::anyhow!("{}", msg)));
        }
        Ok(self.docs.lock().map_err(poisoned)?.get(key).cloned())
    }

    fn save(&self, key: &str, document: &serde_json::Value) -> Result<()> {
        if let Some(msg) = self.fail_save.lock().map_err(poisoned)?.as_ref() {
            return Err(Error::Store(anyhow::anyhow!("{}", msg)));
        }
        self.docs
            .lock()
            .map_err(poisoned)?
            .insert(key.to_owned(), document.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn file_store_missing_is_default() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(tmp.path().join("nested"));
        let doc: Doc = load_document(&store, "registry").unwrap();
        assert_eq!(doc, Doc::default());
    }

    #[test]
    fn file_store_save_load() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let store = JsonFileStore::new(dir);
        let doc = Doc {
            name: "hub".to_owned(),
            count: 3,
        };
        save_document(&store, "commission", &doc).unwrap();
        assert!(dir.join("commission.json").exists());
        let back: Doc = load_document(&store, "commission").unwrap();
        assert_eq!(back, doc);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.join("commission.json")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn file_store_corrupt_document() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("registry.json"), "{not json").unwrap();
        let store = JsonFileStore::new(tmp.path());
        assert!(matches!(store.load("registry"), Err(Error::Store(_))));
    }

    #[test]
    fn memory_store_failures() {
        let store = MemoryStore::new();
        save_document(&store, "k", &Doc::default()).unwrap();
        store.fail_saves("disk full");
        let err = save_document(&store, "k", &Doc::default()).unwrap_err();
        assert!(err.to_string().contains("disk full"));
        store.fail_loads("broken");
        assert!(load_document::<Doc>(&store, "k").is_err());
    }
}
