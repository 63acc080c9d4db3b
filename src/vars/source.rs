//! Persistence backends for host variable records.
//!
//! The variable store persists mutated host records after every successful
//! merge. The backend is an opaque byte-blob key/value store keyed by host
//! name; it is only ever written under the store's writer lock, so
//! implementations need not be independently thread-safe beyond interior
//! mutability.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// An opaque byte-blob key/value store for host records.
pub trait Source: Send + Sync {
    /// Read every persisted entry, keyed by name.
    fn read(&self) -> Result<HashMap<String, Vec<u8>>>;

    /// Write one entry under the given name.
    fn write(&self, data: &[u8], name: &str) -> Result<()>;
}

/// In-memory backend; snapshots vanish with the process.
#[derive(Debug, Default)]
pub struct MemorySource {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySource {
    /// Create an empty in-memory source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted entries (test hook).
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the source holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Source for MemorySource {
    fn read(&self) -> Result<HashMap<String, Vec<u8>>> {
        Ok(self.entries.lock().clone())
    }

    fn write(&self, data: &[u8], name: &str) -> Result<()> {
        self.entries.lock().insert(name.to_string(), data.to_vec());
        Ok(())
    }
}

/// Durable file-backed source: one JSON file per host under a directory.
#[derive(Debug)]
pub struct FileSource {
    dir: PathBuf,
}

impl FileSource {
    /// Open (creating if needed) a file source rooted at `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Source(format!("cannot create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

impl Source for FileSource {
    fn read(&self) -> Result<HashMap<String, Vec<u8>>> {
        let mut entries = HashMap::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                entries.insert(stem.to_string(), std::fs::read(&path)?);
            }
        }
        Ok(entries)
    }

    fn write(&self, data: &[u8], name: &str) -> Result<()> {
        let path = self.entry_path(name);
        std::fs::write(&path, data)
            .map_err(|e| Error::Source(format!("cannot write {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_round_trip() {
        let source = MemorySource::new();
        source.write(b"{\"remote\":{}}", "node1").unwrap();
        let entries = source.read().unwrap();
        assert_eq!(entries["node1"], b"{\"remote\":{}}");
    }

    #[test]
    fn test_file_source_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(dir.path()).unwrap();
        source.write(b"{}", "node1").unwrap();
        source.write(b"{\"a\":1}", "node2").unwrap();

        let reopened = FileSource::new(dir.path()).unwrap();
        let entries = reopened.read().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["node2"], b"{\"a\":1}");
    }

    #[test]
    fn test_file_source_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.txt"), b"not a record").unwrap();
        let source = FileSource::new(dir.path()).unwrap();
        assert!(source.read().unwrap().is_empty());
    }
}
