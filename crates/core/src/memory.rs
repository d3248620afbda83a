//! Memory trait — the vector-memory collaborator used for recall.
//!
//! The similarity engine itself is an external concern. The scheduler only
//! needs to store internalized exchanges and query the closest few back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MemoryError;

/// A single memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique ID for this memory
    pub id: String,

    /// The content of the memory
    pub content: String,

    /// Tags for categorization ("chat", "study", ...)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// When this memory was created
    pub created_at: DateTime<Utc>,

    /// Relevance score (set by search operations)
    #[serde(default)]
    pub score: f32,
}

impl MemoryEntry {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            tags: Vec::new(),
            created_at: Utc::now(),
            score: 0.0,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// A query for searching memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryQuery {
    /// The search text
    pub text: String,

    /// Maximum number of results
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Minimum relevance score threshold
    #[serde(default)]
    pub min_score: f32,
}

fn default_limit() -> usize {
    2
}

impl MemoryQuery {
    pub fn new(text: impl Into<String>, limit: usize) -> Self {
        Self {
            text: text.into(),
            limit,
            min_score: 0.0,
        }
    }
}

/// The core MemoryBackend trait.
///
/// Implementations: in-memory (for testing), JSONL file.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// The backend name (e.g., "file", "in_memory").
    fn name(&self) -> &str;

    /// Store a new memory entry, returning its id.
    async fn store(&self, entry: MemoryEntry) -> std::result::Result<String, MemoryError>;

    /// Search memories by query, best match first.
    async fn search(&self, query: MemoryQuery) -> std::result::Result<Vec<MemoryEntry>, MemoryError>;

    /// Get total memory count.
    async fn count(&self) -> std::result::Result<usize, MemoryError>;
}
