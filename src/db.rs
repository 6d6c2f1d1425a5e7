//! Program bookkeeping database.
//!
//! The framework only needs a key-value interface; real deployments may
//! point it at whatever store they share between runs. [`JsonDb`] is the
//! bundled single-master implementation: one JSON file, loaded on open,
//! persisted on every write.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::DbError;

pub trait ProgramDb: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, DbError>;
    fn put(&self, key: &str, value: &str) -> Result<(), DbError>;
    fn keys(&self) -> Result<Vec<String>, DbError>;
}

pub struct JsonDb {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonDb {
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entries = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(path)?)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), DbError> {
        let rendered = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, rendered)?;
        Ok(())
    }
}

impl ProgramDb for JsonDb {
    fn get(&self, key: &str) -> Result<Option<String>, DbError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), DbError> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn keys(&self) -> Result<Vec<String>, DbError> {
        Ok(self.entries.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("program-db.json");

        let db = JsonDb::open(&path).unwrap();
        db.put("program_id", "abc").unwrap();
        db.put("started_at", "2024-01-01T00:00:00Z").unwrap();
        drop(db);

        let db = JsonDb::open(&path).unwrap();
        assert_eq!(db.get("program_id").unwrap().as_deref(), Some("abc"));
        assert_eq!(db.keys().unwrap().len(), 2);
    }
}
