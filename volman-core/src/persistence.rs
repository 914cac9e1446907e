// SPDX-License-Identifier: GPL-3.0-only

//! Namespaced key/value store used for cached device attributes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;

pub type ValueMap = BTreeMap<String, serde_json::Value>;

type Document = BTreeMap<String, BTreeMap<String, ValueMap>>;

pub trait DataPersistence: Send + Sync {
    fn set_value(&self, namespace: &str, key: &str, value: ValueMap);
    fn value(&self, namespace: &str, key: &str) -> Option<ValueMap>;
    fn keys(&self, namespace: &str) -> BTreeSet<String>;
    /// Flush pending writes.
    fn sync(&self) -> anyhow::Result<()>;
    /// Discard in-memory state and re-read the backing store.
    fn reload(&self) -> anyhow::Result<()>;
}

fn lookup(doc: &Document, namespace: &str, key: &str) -> Option<ValueMap> {
    doc.get(namespace).and_then(|ns| ns.get(key)).cloned()
}

fn namespace_keys(doc: &Document, namespace: &str) -> BTreeSet<String> {
    doc.get(namespace)
        .map(|ns| ns.keys().cloned().collect())
        .unwrap_or_default()
}

#[derive(Debug, Default)]
pub struct MemoryPersistence {
    doc: Mutex<Document>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataPersistence for MemoryPersistence {
    fn set_value(&self, namespace: &str, key: &str, value: ValueMap) {
        let mut doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        doc.entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    fn value(&self, namespace: &str, key: &str) -> Option<ValueMap> {
        lookup(&self.doc.lock().unwrap_or_else(|e| e.into_inner()), namespace, key)
    }

    fn keys(&self, namespace: &str) -> BTreeSet<String> {
        namespace_keys(&self.doc.lock().unwrap_or_else(|e| e.into_inner()), namespace)
    }

    fn sync(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn reload(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Store backed by a single JSON document `{namespace: {key: {...}}}`
#[derive(Debug)]
pub struct JsonFilePersistence {
    path: PathBuf,
    doc: Mutex<Document>,
}

impl JsonFilePersistence {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let doc = read_document(&path)?;
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Document> {
        self.doc.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn read_document(path: &Path) -> anyhow::Result<Document> {
    match std::fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(Document::new()),
        Ok(bytes) => serde_json::from_slice(&bytes)
            .with_context(|| format!("parse persistence file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Document::new()),
        Err(e) => Err(e).with_context(|| format!("read persistence file {}", path.display())),
    }
}

impl DataPersistence for JsonFilePersistence {
    fn set_value(&self, namespace: &str, key: &str, value: ValueMap) {
        self.lock()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    fn value(&self, namespace: &str, key: &str) -> Option<ValueMap> {
        lookup(&self.lock(), namespace, key)
    }

    fn keys(&self, namespace: &str) -> BTreeSet<String> {
        namespace_keys(&self.lock(), namespace)
    }

    fn sync(&self) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(&*self.lock())?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;

        tracing::debug!(path = %self.path.display(), "persistence synced");
        Ok(())
    }

    fn reload(&self) -> anyhow::Result<()> {
        let doc = read_document(&self.path)?;
        *self.lock() = doc;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("volman-persistence-{}-{name}", std::process::id()))
            .join("store.json")
    }

    fn sample() -> ValueMap {
        let mut map = ValueMap::new();
        map.insert("BurnTotalSize".to_string(), json!(734003200u64));
        map.insert("BurnMediaType".to_string(), json!("cd_r"));
        map
    }

    #[test]
    fn memory_store_round_trips_values() {
        let store = MemoryPersistence::new();
        store.set_value("BurnAttribute", "sr0", sample());

        assert_eq!(store.value("BurnAttribute", "sr0"), Some(sample()));
        assert_eq!(store.value("BurnAttribute", "sr1"), None);
        assert_eq!(store.value("Other", "sr0"), None);
        assert_eq!(
            store.keys("BurnAttribute").into_iter().collect::<Vec<_>>(),
            ["sr0"]
        );
    }

    #[test]
    fn json_store_survives_reopen() {
        let path = temp_path("reopen");
        let _ = std::fs::remove_file(&path);

        let store = JsonFilePersistence::open(&path).unwrap();
        assert!(store.keys("BurnAttribute").is_empty());
        store.set_value("BurnAttribute", "sr0", sample());
        store.sync().unwrap();

        let reopened = JsonFilePersistence::open(&path).unwrap();
        assert_eq!(reopened.value("BurnAttribute", "sr0"), Some(sample()));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn reload_discards_unsynced_writes() {
        let path = temp_path("reload");
        let _ = std::fs::remove_file(&path);

        let store = JsonFilePersistence::open(&path).unwrap();
        store.set_value("BurnAttribute", "sr0", sample());
        store.reload().unwrap();
        assert_eq!(store.value("BurnAttribute", "sr0"), None);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn corrupt_file_fails_to_open() {
        let path = temp_path("corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();

        assert!(JsonFilePersistence::open(&path).is_err());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
