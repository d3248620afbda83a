//! Reasoning and recall stores for Kestrel.
//!
//! - [`KnowledgeGraph`]: persistent semantic graph with conflict detection,
//!   importance scoring, community summaries and strategic node selection
//! - [`VisitedSet`]: persisted footprint of fetched locators
//! - [`TopicWeights`]: persisted study-topic preferences
//! - [`FileBackend`] / [`InMemoryBackend`]: recall memory

pub mod community;
pub mod file_backend;
pub mod graph;
pub mod in_memory;
pub mod persist;
pub mod topics;
pub mod vector;
pub mod visited;

pub use file_backend::FileBackend;
pub use graph::{GraphDocument, GraphEdge, GraphNode, KnowledgeGraph, NodeKind, Strategy, Summarizer};
pub use in_memory::InMemoryBackend;
pub use persist::PersistError;
pub use topics::TopicWeights;
pub use visited::VisitedSet;
