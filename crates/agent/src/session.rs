//! The working context of the single logical session.

use std::path::Path;

use chrono::{DateTime, Utc};
use kestrel_core::message::Message;
use kestrel_memory::persist::{self, PersistError};
use serde::{Deserialize, Serialize};

use crate::curator;

const CANONICAL_QUESTION: &str = "What is the current layout of the project?";

const CANONICAL_ANSWER: &str = "I will inspect the project structure first.\n\
```json\n\
{\"tool\": \"code_inspector\", \"params\": {\"action\": \"structure\"}}\n\
```";

/// Ordered message history; index 0 is always the system instruction.
#[derive(Debug, Clone)]
pub struct Session {
    history: Vec<Message>,
}

/// What gets written to `session.json`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub saved_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Session {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            history: vec![Message::system(system_prompt)],
        }
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn push(&mut self, message: Message) {
        self.history.push(message);
    }

    /// Replace the standing instruction, e.g. after the tool set changed.
    pub fn set_system(&mut self, prompt: impl Into<String>) {
        match self.history.first_mut() {
            Some(first) if first.is_system() => first.content = prompt.into(),
            _ => self.history.insert(0, Message::system(prompt)),
        }
    }

    /// Trim the history with the adaptive curator.
    pub fn curate(&mut self, importance: impl Fn(&str) -> f64) {
        if self.history.len() > curator::CURATION_THRESHOLD {
            self.history = curator::curate(&self.history, importance);
        }
    }

    /// Hard reset to the system instruction plus one well-formed exchange.
    pub fn reset_to_canonical(&mut self) {
        self.history.truncate(1);
        self.history.extend(canonical_exchange());
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            saved_at: Utc::now(),
            messages: self.history.clone(),
        }
    }
}

impl SessionSnapshot {
    pub fn save(&self, path: &Path) -> Result<(), PersistError> {
        persist::write_json_atomic(path, self)
    }

    pub fn load(path: &Path) -> Result<Option<Self>, PersistError> {
        persist::read_json(path)
    }
}

/// A user question answered with a correctly fenced tool call.
pub fn canonical_exchange() -> [Message; 2] {
    [
        Message::user(CANONICAL_QUESTION),
        Message::assistant(CANONICAL_ANSWER),
    ]
}
