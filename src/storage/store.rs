use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use crate::core::error::Result;
use crate::core::types::Props;

/// Durable per-document property storage, consumed by the index proxy to
/// seed a cached document's original term set when a pending update arrives
/// for a document not yet in the overlay.
pub trait DocumentStorage: Send + Sync {
    fn get(&self, guid: &str) -> Option<Props>;
    fn put(&self, guid: &str, props: Props) -> Result<()>;
    fn delete(&self, guid: &str) -> Result<()>;
    fn walk(&self) -> Vec<String>;
}

/// In-memory storage for tests and ephemeral embedders.
#[derive(Default)]
pub struct MemoryStorage {
    records: RwLock<HashMap<String, Props>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStorage for MemoryStorage {
    fn get(&self, guid: &str) -> Option<Props> {
        self.records.read().get(guid).cloned()
    }

    fn put(&self, guid: &str, props: Props) -> Result<()> {
        self.records.write().insert(guid.to_string(), props);
        Ok(())
    }

    fn delete(&self, guid: &str) -> Result<()> {
        self.records.write().remove(guid);
        Ok(())
    }

    fn walk(&self) -> Vec<String> {
        self.records.read().keys().cloned().collect()
    }
}

/// Directory structure for durable property records
#[derive(Debug, Clone)]
pub struct FileStorage {
    pub base_dir: PathBuf,
    pub meta_dir: PathBuf,      // one JSON record per guid
}

impl FileStorage {
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        let meta_dir = base_dir.join("meta");
        fs::create_dir_all(&meta_dir)?;
        Ok(FileStorage { base_dir, meta_dir })
    }

    fn record_path(&self, guid: &str) -> PathBuf {
        self.meta_dir.join(format!("{}.json", guid))
    }
}

impl DocumentStorage for FileStorage {
    fn get(&self, guid: &str) -> Option<Props> {
        let data = fs::read(self.record_path(guid)).ok()?;
        serde_json::from_slice(&data).ok()
    }

    fn put(&self, guid: &str, props: Props) -> Result<()> {
        let data = serde_json::to_vec(&props)?;
        fs::write(self.record_path(guid), data)?;
        Ok(())
    }

    fn delete(&self, guid: &str) -> Result<()> {
        match fs::remove_file(self.record_path(guid)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn walk(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.meta_dir) else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                name.strip_suffix(".json").map(str::to_string)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_storage_round_trips_records() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().to_path_buf()).unwrap();
        let props = Props::from([("title".to_string(), json!("hello"))]);

        storage.put("doc-1", props.clone()).unwrap();
        assert_eq!(storage.get("doc-1"), Some(props));
        assert_eq!(storage.walk(), vec!["doc-1".to_string()]);

        storage.delete("doc-1").unwrap();
        assert_eq!(storage.get("doc-1"), None);
        storage.delete("doc-1").unwrap(); // idempotent
    }
}
