//! OpenAI-compatible HTTP backend.
//!
//! Works with llama.cpp server, vLLM, Ollama, LM Studio and any endpoint
//! exposing `/v1/chat/completions` and `/v1/models`.
//!
//! Failures never escape [`Backend::generate`]: they are logged and rendered
//! as a diagnostic sentinel. A failed [`Backend::reload`] drops to the safe
//! profile, and only when that also fails is the backend marked unusable.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use kestrel_config::BackendConfig;
use kestrel_core::backend::{
    BACKEND_UNAVAILABLE, Backend, BackendProfile, ReloadStatus, failure_sentinel,
};
use kestrel_core::error::BackendError;
use kestrel_core::message::Message;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Active profile plus the usable flag, swapped together on reload.
#[derive(Debug, Clone)]
struct ActiveState {
    profile: BackendProfile,
    usable: bool,
}

/// A generation backend talking to an OpenAI-compatible server.
pub struct HttpBackend {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    /// Model used for the safe profile when a reload fails.
    fallback_model: String,
    state: Mutex<ActiveState>,
}

impl HttpBackend {
    /// Create a backend starting on `profile`.
    pub fn new(base_url: impl Into<String>, profile: BackendProfile) -> Self {
        Self::with_client(base_url, None, reqwest::Client::new(), profile)
    }

    /// Create a backend from the `[backend]` config section.
    pub fn from_config(config: &BackendConfig, profile: BackendProfile) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self::with_client(&config.api_url, config.api_key.clone(), client, profile)
    }

    fn with_client(
        base_url: impl Into<String>,
        api_key: Option<String>,
        client: reqwest::Client,
        profile: BackendProfile,
    ) -> Self {
        Self {
            name: "http".into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
            fallback_model: profile.model.clone(),
            state: Mutex::new(ActiveState {
                profile,
                usable: true,
            }),
        }
    }

    /// Whether generations currently reach the server.
    pub fn is_usable(&self) -> bool {
        self.snapshot().usable
    }

    fn snapshot(&self) -> ActiveState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, profile: BackendProfile, usable: bool) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.profile = profile;
        state.usable = usable;
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {key}")),
            None => request,
        }
    }

    fn request_body(profile: &BackendProfile, messages: &[Message], stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": profile.model,
            "messages": to_api_messages(messages),
            "temperature": profile.temperature,
            "max_tokens": profile.max_tokens,
            "stream": stream,
        })
    }

    async fn post_chat(
        &self,
        profile: &BackendProfile,
        messages: &[Message],
        stream: bool,
    ) -> Result<reqwest::Response, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self
            .authorize(self.client.post(&url))
            .json(&Self::request_body(profile, messages, stream));
        if stream {
            request = request.header("Accept", "text/event-stream");
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %body, "Backend returned error");
            return Err(match status {
                404 => BackendError::ModelNotFound(profile.model.clone()),
                _ => BackendError::ApiError {
                    status_code: status,
                    message: body,
                },
            });
        }
        Ok(response)
    }

    async fn complete(
        &self,
        profile: &BackendProfile,
        messages: &[Message],
    ) -> Result<String, BackendError> {
        debug!(model = %profile.model, messages = messages.len(), "Sending completion request");
        let response = self.post_chat(profile, messages, false).await?;
        let parsed: ApiResponse = response.json().await.map_err(|e| BackendError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| BackendError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })
    }

    /// Model identifiers the server currently serves.
    pub async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(BackendError::ApiError {
                status_code: response.status().as_u16(),
                message: "model listing failed".into(),
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        Ok(body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn map_transport_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout(e.to_string())
    } else {
        BackendError::Network(e.to_string())
    }
}

/// Servers that answer `/models` with an empty list accept any model name.
fn serves(models: &[String], model: &str) -> bool {
    models.is_empty() || models.iter().any(|m| m == model)
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, messages: &[Message]) -> String {
        let state = self.snapshot();
        if !state.usable {
            return BACKEND_UNAVAILABLE.to_string();
        }
        match self.complete(&state.profile, messages).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Generation failed");
                failure_sentinel(&e)
            }
        }
    }

    async fn stream(&self, messages: &[Message]) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(64);
        let state = self.snapshot();
        if !state.usable {
            let _ = tx.send(BACKEND_UNAVAILABLE.to_string()).await;
            return rx;
        }

        let response = match self.post_chat(&state.profile, messages, true).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Streaming request failed");
                let _ = tx.send(failure_sentinel(&e)).await;
                return rx;
            }
        };

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer = LineBuffer::default();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let err = BackendError::StreamInterrupted(e.to_string());
                        let _ = tx.send(failure_sentinel(&err)).await;
                        return;
                    }
                };
                buffer.push(&chunk);

                while let Some(line) = buffer.next_line() {
                    match parse_sse_line(&line) {
                        SseLine::Delta(text) => {
                            if tx.send(text).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                        SseLine::Done => return,
                        SseLine::Skip => {}
                    }
                }
            }
        });

        rx
    }

    async fn reload(&self, profile: &BackendProfile) -> ReloadStatus {
        let models = match self.list_models().await {
            Ok(models) => models,
            Err(e) => {
                warn!(profile = %profile.name, error = %e, "Backend unreachable, marking unusable");
                let current = self.snapshot().profile;
                self.set_state(current, false);
                return ReloadStatus::Unusable;
            }
        };

        if serves(&models, &profile.model) {
            info!(profile = %profile.name, model = %profile.model, "Backend profile applied");
            self.set_state(profile.clone(), true);
            return ReloadStatus::Applied;
        }

        let safe_model = if serves(&models, &self.fallback_model) {
            Some(self.fallback_model.clone())
        } else {
            models.first().cloned()
        };

        match safe_model {
            Some(model) => {
                warn!(
                    requested = %profile.model,
                    fallback = %model,
                    "Requested model not served, falling back to safe profile"
                );
                self.set_state(BackendProfile::safe(model), true);
                ReloadStatus::FellBack
            }
            None => {
                let current = self.snapshot().profile;
                self.set_state(current, false);
                ReloadStatus::Unusable
            }
        }
    }

    fn active_profile(&self) -> Option<BackendProfile> {
        let state = self.snapshot();
        state.usable.then_some(state.profile)
    }
}

/// Raw stream bytes split into complete lines. A multi-byte character cut
/// across network reads stays buffered until its line is complete.
#[derive(Debug, Default)]
struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<String> {
        let end = self.bytes.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.bytes.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

/// One classified line of a server-sent event stream.
#[derive(Debug, PartialEq)]
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<StreamResponse>(data) {
        Ok(resp) => resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty())
            .map_or(SseLine::Skip, SseLine::Delta),
        Err(e) => {
            trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
            SseLine::Skip
        }
    }
}

fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
    messages
        .iter()
        .map(|m| ApiMessage {
            role: m.role.to_string(),
            content: Some(m.content.clone()),
        })
        .collect()
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
