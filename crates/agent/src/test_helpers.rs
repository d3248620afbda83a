//! Shared mocks for orchestrator and study tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kestrel_core::backend::{Backend, BackendProfile, ReloadStatus};
use kestrel_core::error::ToolError;
use kestrel_core::event::EventBus;
use kestrel_core::message::{Message, Role};
use kestrel_core::tool::{Params, Tool, ToolRegistry};
use kestrel_memory::{KnowledgeGraph, TopicWeights, VisitedSet};
use kestrel_security::DomainPolicy;
use serde_json::Value;

use crate::orchestrator::Orchestrator;
use crate::policy::DispatchPolicy;
use crate::study::{StudyScheduler, StudySettings};

/// A backend that replays scripted responses in order, then repeats
/// `fallback` forever. Every prompt and reload is recorded.
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<String>>,
    fallback: String,
    pub prompts: Mutex<Vec<Vec<Message>>>,
    pub reloads: Mutex<Vec<String>>,
    /// `(last user message, active profile)` at the start of each generation.
    pub generations: Mutex<Vec<(String, String)>>,
    delay: Duration,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<&str>) -> Arc<Self> {
        Self::with_fallback(responses, "Nothing more to add.")
    }

    pub fn with_fallback(responses: Vec<&str>, fallback: &str) -> Arc<Self> {
        Self::build(responses, fallback, Duration::ZERO)
    }

    /// Every generation takes `delay` to complete.
    pub fn slow(fallback: &str, delay: Duration) -> Arc<Self> {
        Self::build(vec![], fallback, delay)
    }

    fn build(responses: Vec<&str>, fallback: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            fallback: fallback.to_string(),
            prompts: Mutex::new(Vec::new()),
            reloads: Mutex::new(Vec::new()),
            generations: Mutex::new(Vec::new()),
            delay,
        })
    }

    /// Profile active when the generation for user message `input` started.
    pub fn profile_for(&self, input: &str) -> Option<String> {
        self.generations
            .lock()
            .unwrap()
            .iter()
            .find(|(user, _)| user == input)
            .map(|(_, profile)| profile.clone())
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn last_prompt(&self) -> Vec<Message> {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }

    pub fn reload_names(&self) -> Vec<String> {
        self.reloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, messages: &[Message]) -> String {
        self.prompts.lock().unwrap().push(messages.to_vec());
        let user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let profile = self
            .reloads
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_else(|| "normal".into());
        self.generations.lock().unwrap().push((user, profile));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }

    async fn reload(&self, profile: &BackendProfile) -> ReloadStatus {
        self.reloads.lock().unwrap().push(profile.name.clone());
        ReloadStatus::Applied
    }
}

/// A tool that counts invocations and echoes its parameters.
pub struct CountingTool {
    name: String,
    fail: bool,
    calls: AtomicUsize,
}

impl CountingTool {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Counts invocations"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, params: Params) -> Result<String, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: "scripted failure".into(),
            });
        }
        Ok(format!("ok: {}", Value::Object(params)))
    }
}

pub fn params(pairs: &[(&str, &str)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}

/// A fenced tool-call block as a model would emit it.
pub fn tool_block(tool: &str, params: &str) -> String {
    format!("```json\n{{\"tool\": \"{tool}\", \"params\": {params}}}\n```")
}

/// A scheduler over a fresh orchestrator with a counting `web_browser`.
pub fn study_scheduler(backend: Arc<ScriptedBackend>, topics: &[&str], pause: Duration) -> StudyScheduler {
    let mut registry = ToolRegistry::new();
    registry.register(CountingTool::new("web_browser"));
    let orchestrator = Orchestrator::new(
        backend,
        Arc::new(registry),
        Arc::new(KnowledgeGraph::in_memory()),
        DispatchPolicy::new(DomainPolicy::default(), Arc::new(VisitedSet::in_memory())),
        Arc::new(EventBus::new(256)),
    );
    let weights = TopicWeights::in_memory();
    weights.seed(topics.iter().copied()).unwrap();

    let settings = StudySettings {
        normal: BackendProfile::default(),
        extended: BackendProfile {
            name: "extended".into(),
            context_size: 16384,
            ..BackendProfile::default()
        },
        deadlock_threshold: 3,
        iteration_pause: pause,
    };
    StudyScheduler::new(Arc::new(orchestrator), Arc::new(weights), settings).with_seed(11)
}
