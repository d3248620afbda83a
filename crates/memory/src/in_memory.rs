//! In-memory backend — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use kestrel_core::error::MemoryError;
use kestrel_core::memory::{MemoryBackend, MemoryEntry, MemoryQuery};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::vector;

/// An in-memory backend that stores memories in a Vec.
#[derive(Default)]
pub struct InMemoryBackend {
    entries: RwLock<Vec<MemoryEntry>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn store(&self, mut entry: MemoryEntry) -> Result<String, MemoryError> {
        if entry.id.is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }
        let id = entry.id.clone();
        self.entries.write().await.push(entry);
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

    #[tokio::test]
    async fn store_and_search() {
        let mem = InMemoryBackend::new();
        mem.store(MemoryEntry::new("Rust is great for systems programming")).await.unwrap();
        mem.store(MemoryEntry::new("Python is great for scripting")).await.unwrap();
        mem.store(MemoryEntry::new("JavaScript runs in the browser")).await.unwrap();

        let results = mem.search(MemoryQuery::new("systems programming in Rust", 10)).await.unwrap();
        assert!(!results.is_empty());
        assert!(results[0].content.contains("Rust"));
        assert_eq!(mem.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn empty_store_returns_nothing() {
        let mem = InMemoryBackend::new();
        assert!(mem.search(MemoryQuery::new("anything", 2)).await.unwrap().is_empty());
    }
}
