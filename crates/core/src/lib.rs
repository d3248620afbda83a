//! # Kestrel Core
//!
//! Domain types, traits, and error definitions for the Kestrel autonomous
//! agent scheduler. Every collaborator (generation backend, tools, vector
//! memory) is a trait here; implementations live in their own crates.

pub mod backend;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod tool;
pub mod ui;

// Re-export key types at crate root for ergonomics
pub use backend::{Backend, BackendProfile, ReloadStatus, BACKEND_UNAVAILABLE};
pub use error::{BackendError, Error, GraphError, MemoryError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use memory::{MemoryBackend, MemoryEntry, MemoryQuery};
pub use message::{Message, Role};
pub use tool::{
    FailureKind, Params, Tool, ToolCall, ToolKind, ToolRegistry, ToolResult, ToolSpec,
    CLARIFY_TOOL,
};
pub use ui::{UiConstructor, UiDescriptor, UiManifest, UiPanel, UiSnapshot};
