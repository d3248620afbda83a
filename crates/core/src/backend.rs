//! Generation backend trait — the one exclusive generation resource.
//!
//! A backend turns a working context into text. The contract is deliberately
//! infallible at the boundary: transport or model failures come back as a
//! diagnostic sentinel string so that callers never unwind a turn because
//! the model misbehaved.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::BackendError;
use crate::message::Message;

/// Returned by every generation once the backend has been marked unusable.
pub const BACKEND_UNAVAILABLE: &str = "[backend unavailable: no model is loaded]";

/// Prefix shared by all diagnostic sentinels.
pub const SENTINEL_PREFIX: &str = "[backend ";

/// Context size used when a requested profile cannot be applied.
pub const SAFE_CONTEXT_SIZE: u32 = 4096;

/// Render a backend failure as the sentinel text handed to callers.
pub fn failure_sentinel(err: &BackendError) -> String {
    format!("[backend error: {err}]")
}

/// True if `text` is a sentinel rather than model output.
pub fn is_sentinel(text: &str) -> bool {
    text.starts_with(SENTINEL_PREFIX)
}

/// A hot-swappable backend configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendProfile {
    /// Profile label used in logs ("normal", "extended", "safe").
    #[serde(default)]
    pub name: String,

    /// Model identifier as served by the backend.
    #[serde(default = "default_model")]
    pub model: String,

    /// Context window in tokens.
    #[serde(default = "default_context_size")]
    pub context_size: u32,

    /// Generation budget per call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_model() -> String {
    "local".into()
}
fn default_context_size() -> u32 {
    8192
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.7
}

impl BackendProfile {
    /// The minimal profile a failed reload falls back to.
    pub fn safe(model: impl Into<String>) -> Self {
        Self {
            name: "safe".into(),
            model: model.into(),
            context_size: SAFE_CONTEXT_SIZE,
            max_tokens: 512,
            temperature: default_temperature(),
        }
    }
}

impl Default for BackendProfile {
    fn default() -> Self {
        Self {
            name: "normal".into(),
            model: default_model(),
            context_size: default_context_size(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Outcome of [`Backend::reload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadStatus {
    /// The requested profile is active.
    Applied,
    /// The requested profile failed; the safe profile is active.
    FellBack,
    /// Both the requested and the safe profile failed. Generations return
    /// [`BACKEND_UNAVAILABLE`] until a later reload succeeds.
    Unusable,
}

/// The core Backend trait.
///
/// Implementations: OpenAI-compatible HTTP servers, scripted backends in tests.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Generate a complete response. Never fails; see module docs.
    async fn generate(&self, messages: &[Message]) -> String;

    /// Generate a response as a lazy sequence of text fragments.
    ///
    /// Default implementation calls `generate()` and yields the result as a
    /// single fragment.
    async fn stream(&self, messages: &[Message]) -> mpsc::Receiver<String> {
        let text = self.generate(messages).await;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(text).await;
        rx
    }

    /// Hot-swap the active profile.
    async fn reload(&self, profile: &BackendProfile) -> ReloadStatus;

    /// The currently active profile, if any.
    fn active_profile(&self) -> Option<BackendProfile> {
        None
    }
}
