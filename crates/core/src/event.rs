//! Domain event system — decoupled observation of the scheduler.
//!
//! Observers subscribe and filter for what they care about. Publishing never
//! blocks: a slow or absent subscriber simply misses events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::tool::FailureKind;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A fragment of streamed generation
    GenerationChunk { text: String },

    /// A tool was dispatched
    ToolExecuted {
        tool_name: String,
        failure: Option<FailureKind>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The model asked for clarification instead of acting
    ClarificationRequested {
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A knowledge triple was rejected by conflict detection
    RelationRejected {
        subject: String,
        relation: String,
        object: String,
    },

    /// A turn finished
    TurnCompleted {
        internal: bool,
        closures: usize,
        timestamp: DateTime<Utc>,
    },

    /// The backend was reloaded with a profile
    BackendReloaded { profile: String, status: String },

    StudyStarted { timestamp: DateTime<Utc> },

    StudyStopped {
        iterations: u64,
        timestamp: DateTime<Utc>,
    },

    /// Deadlock breaker fired
    DeadlockRecovered {
        topic: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
