//! File-based memory backend — persistent JSON-lines storage.
//!
//! Each line is a JSON-encoded `MemoryEntry`. Recall memory only grows, so
//! stores append a single line rather than rewriting the file.

use async_trait::async_trait;
use kestrel_core::error::MemoryError;
use kestrel_core::memory::{MemoryBackend, MemoryEntry, MemoryQuery};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::vector;

/// A file-backed memory store using JSONL (one JSON object per line).
///
/// Entries are loaded into memory on creation; searches never touch disk.
pub struct FileBackend {
    path: PathBuf,
    entries: RwLock<Vec<MemoryEntry>>,
}

impl FileBackend {
    /// Create a new file-based backend at the given path.
    ///
    /// If the file exists, entries are loaded from it.
    /// If the file does not exist, starts empty (file created on first write).
    pub fn new(path: PathBuf) -> Self {
        let entries = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = entries.len(), "File memory backend loaded");
        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    /// Load entries from a JSONL file.
    fn load_from_disk(path: &Path) -> Vec<MemoryEntry> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<MemoryEntry>(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted memory entry");
                    None
                }
            })
            .collect()
    }

    async fn append(&self, entry: &MemoryEntry) -> Result<(), MemoryError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                MemoryError::Storage(format!("Failed to create memory directory: {e}"))
            })?;
        }

        let mut line = serde_json::to_string(entry)
            .map_err(|e| MemoryError::Storage(format!("Failed to serialize memory entry: {e}")))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open memory file: {e}")))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to write memory file: {e}")))?;
        file.flush()
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to flush memory file: {e}")))
    }
}

#[async_trait]
impl MemoryBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    async fn store(&self, mut entry: MemoryEntry) -> Result<String, MemoryError> {
        if entry.id.is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }
        let id = entry.id.clone();
        let mut entries = self.entries.write().await;
        self.append(&entry).await?;
        entries.push(entry);
        Ok(id)
    }

    async fn search(&self, query: MemoryQuery) -> Result<Vec<MemoryEntry>, MemoryError> {
        let entries = self.entries.read().await;
        Ok(vector::rank(&entries, &query.text, query.limit, query.min_score))
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        Ok(self.entries.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn store_and_reload_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory/memory.jsonl");

        let mem = FileBackend::new(path.clone());
        let id = mem.store(MemoryEntry::new("Q: what is petgraph | A: a graph library")).await.unwrap();
        assert!(!id.is_empty());

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("petgraph"));

        let reloaded = FileBackend::new(path);
        assert_eq!(reloaded.count().await.unwrap(), 1);
        let hits = reloaded.search(MemoryQuery::new("petgraph library", 2)).await.unwrap();
        assert_eq!(hits[0].id, id);
    }

    #[tokio::test]
    async fn corrupted_lines_are_skipped() {
        let mut tmp = NamedTempFile::new().unwrap();
        let good = serde_json::to_string(&MemoryEntry::new("valid entry")).unwrap();
        writeln!(tmp, "{good}").unwrap();
        writeln!(tmp, "{{ this is not json").unwrap();
        writeln!(tmp).unwrap();

        let mem = FileBackend::new(tmp.path().to_path_buf());
        assert_eq!(mem.count().await.unwrap(), 1);
    }
}
