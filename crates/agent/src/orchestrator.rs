//! The conversation orchestrator: one turn of curate → generate → dispatch
//! → self-correct → commit.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use kestrel_core::backend::{is_sentinel, Backend, BackendProfile, ReloadStatus};
use kestrel_core::error::GraphError;
use kestrel_core::event::{DomainEvent, EventBus};
use kestrel_core::memory::{MemoryBackend, MemoryEntry, MemoryQuery};
use kestrel_core::message::Message;
use kestrel_core::tool::{ToolRegistry, ToolResult, CLARIFY_TOOL};
use kestrel_memory::{KnowledgeGraph, Summarizer};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::activity::Activity;
use crate::curator::extract_entities;
use crate::knowledge::{commit_triples, extract_triples, Triple};
use crate::parser::parse_tool_calls;
use crate::policy::DispatchPolicy;
use crate::prompt::system_prompt;
use crate::session::{Session, SessionSnapshot};

/// Entities from the input that get graph logic chains in recall.
const RECALL_ENTITIES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnMode {
    /// A user turn: raises the interrupt and marks the session busy.
    Foreground,
    /// A study-loop turn: no busy/interrupt bookkeeping, no internalization.
    Internal,
}

/// What happened during one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnReport {
    /// The last generated response.
    pub response: String,
    pub tool_results: Vec<ToolResult>,
    /// Successful tool closures.
    pub closures: usize,
    pub clarification: Option<String>,
    /// Last failure once the retry budget was spent.
    pub final_error: Option<String>,
    pub generations: usize,
    pub committed: usize,
    pub rejected: usize,
}

impl TurnReport {
    pub fn closed(&self) -> bool {
        self.closures > 0
    }
}

/// Lowers the busy flag and the interrupt when a user turn ends, however it ends.
struct UserTurn<'a>(&'a Activity);

impl<'a> UserTurn<'a> {
    fn begin(activity: &'a Activity) -> Self {
        activity.begin_user_turn();
        Self(activity)
    }
}

impl Drop for UserTurn<'_> {
    fn drop(&mut self) {
        self.0.end_user_turn();
    }
}

pub struct Orchestrator {
    backend: Arc<dyn Backend>,
    tools: Arc<ToolRegistry>,
    graph: Arc<KnowledgeGraph>,
    policy: DispatchPolicy,
    events: Arc<EventBus>,
    activity: Arc<Activity>,

    /// The working context. Holding this lock is holding the backend.
    session: Mutex<Session>,
    /// Set while internal work has the backend on a borrowed profile.
    restore_profile: std::sync::Mutex<Option<BackendProfile>>,

    memory: Option<Arc<dyn MemoryBackend>>,
    session_path: Option<PathBuf>,
    /// Fire-and-forget persistence, awaited only by [`Orchestrator::flush`].
    background: std::sync::Mutex<JoinSet<()>>,
    max_retries: u32,
    recall_limit: usize,
    chain_depth: usize,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn Backend>,
        tools: Arc<ToolRegistry>,
        graph: Arc<KnowledgeGraph>,
        policy: DispatchPolicy,
        events: Arc<EventBus>,
    ) -> Self {
        let session = Session::new(system_prompt(&tools));
        Self {
            backend,
            tools,
            graph,
            policy,
            events,
            activity: Arc::new(Activity::new()),
            session: Mutex::new(session),
            restore_profile: std::sync::Mutex::new(None),
            memory: None,
            session_path: None,
            background: std::sync::Mutex::new(JoinSet::new()),
            max_retries: 2,
            recall_limit: 2,
            chain_depth: 2,
        }
    }

    /// Attach a vector memory for recall and internalization.
    pub fn with_memory(mut self, memory: Arc<dyn MemoryBackend>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Snapshot the session to `path` after every turn.
    pub fn with_session_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_path = Some(path.into());
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_recall_limit(mut self, limit: usize) -> Self {
        self.recall_limit = limit;
        self
    }

    pub fn with_chain_depth(mut self, depth: usize) -> Self {
        self.chain_depth = depth;
        self
    }

    pub fn with_activity(mut self, activity: Arc<Activity>) -> Self {
        self.activity = activity;
        self
    }

    /// Start from a previously saved history instead of a bare system prompt.
    pub fn with_history(self, snapshot: SessionSnapshot) -> Self {
        let mut session = Session::new(system_prompt(&self.tools));
        for msg in snapshot.messages.into_iter().filter(|m| !m.is_system()) {
            session.push(msg);
        }
        Self {
            session: Mutex::new(session),
            ..self
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn graph(&self) -> &Arc<KnowledgeGraph> {
        &self.graph
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn activity(&self) -> &Arc<Activity> {
        &self.activity
    }

    pub async fn history(&self) -> Vec<Message> {
        self.session.lock().await.history().to_vec()
    }

    /// Deadlock recovery: drop everything but the system instruction and
    /// the canonical example exchange.
    pub async fn reset_to_canonical(&self) {
        let mut session = self.session.lock().await;
        session.reset_to_canonical();
        warn!(len = session.len(), "Working context reset to canonical exchange");
    }

    /// A one-off generation outside the working context, serialized with turns.
    pub async fn generate_exclusive(&self, messages: &[Message]) -> String {
        let _session = self.session.lock().await;
        self.backend.generate(messages).await
    }

    /// Switch the backend to `profile` for internal work, serialized with
    /// generation. The first foreground turn to get the backend afterwards
    /// reloads `restore` before generating.
    pub async fn lend_profile(&self, profile: &BackendProfile, restore: &BackendProfile) -> ReloadStatus {
        let _session = self.session.lock().await;
        let status = self.backend.reload(profile).await;
        *self.restore_slot() = Some(restore.clone());
        status
    }

    /// Reload the profile recorded by [`Orchestrator::lend_profile`], unless a
    /// foreground turn already did.
    pub async fn restore_profile(&self) -> Option<(BackendProfile, ReloadStatus)> {
        let _session = self.session.lock().await;
        let profile = self.restore_slot().take()?;
        let status = self.backend.reload(&profile).await;
        Some((profile, status))
    }

    fn restore_slot(&self) -> std::sync::MutexGuard<'_, Option<BackendProfile>> {
        self.restore_profile.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one turn for `input`.
    ///
    /// `prefill` seeds the first generation with a forced assistant prefix.
    pub async fn run_turn(&self, input: &str, mode: TurnMode, prefill: Option<&str>) -> TurnReport {
        let _turn = (mode == TurnMode::Foreground).then(|| UserTurn::begin(&self.activity));

        let content = match self.recall(input).await {
            Some(recall) => format!("{input}\n\n{recall}"),
            None => input.to_string(),
        };

        let mut report = TurnReport::default();
        let mut responses: Vec<String> = Vec::new();

        let snapshot = {
            let mut session = self.session.lock().await;
            if mode == TurnMode::Foreground {
                let borrowed = self.restore_slot().take();
                if let Some(profile) = borrowed {
                    let status = self.backend.reload(&profile).await;
                    info!(profile = %profile.name, ?status, "Profile restored for foreground turn");
                    self.events.publish(DomainEvent::BackendReloaded {
                        profile: profile.name.clone(),
                        status: format!("{status:?}"),
                    });
                }
            }
            session.set_system(system_prompt(&self.tools));
            session.curate(|entity| self.graph.node_importance(entity));
            session.push(Message::user(content));

            let mut attempt: u32 = 0;
            loop {
                let prefix = if attempt == 0 { prefill } else { None };
                let response = self.generate(session.history(), prefix).await;
                report.generations += 1;
                session.push(Message::assistant(&response));
                let calls = parse_tool_calls(&response);
                responses.push(response.clone());
                report.response = response;

                let mut failure: Option<ToolResult> = None;
                for call in calls {
                    if call.name == CLARIFY_TOOL {
                        let reason = call
                            .str_param(&["reason", "question"])
                            .unwrap_or("no reason given")
                            .to_string();
                        info!(reason = %reason, "Clarification requested");
                        self.events.publish(DomainEvent::ClarificationRequested {
                            reason: reason.clone(),
                            timestamp: Utc::now(),
                        });
                        report.clarification = Some(reason);
                        break;
                    }

                    let started = Instant::now();
                    let result = self.policy.dispatch(&self.tools, call).await;
                    self.events.publish(DomainEvent::ToolExecuted {
                        tool_name: result.tool.clone(),
                        failure: result.failure,
                        duration_ms: started.elapsed().as_millis() as u64,
                        timestamp: Utc::now(),
                    });

                    if result.is_success() {
                        session.push(Message::system(format!(
                            "[Tool Output: {}]\n{}",
                            result.tool, result.output
                        )));
                        report.closures += 1;
                    } else {
                        warn!(tool = %result.tool, error = %result.output, "Tool call failed");
                        failure = Some(result.clone());
                    }
                    report.tool_results.push(result);
                }

                if report.clarification.is_some() {
                    break;
                }
                let Some(failed) = failure else {
                    break;
                };
                if attempt >= self.max_retries {
                    warn!(attempts = attempt + 1, "Retry budget exhausted");
                    report.final_error = Some(failed.describe());
                    break;
                }
                attempt += 1;
                debug!(attempt, "Feeding tool failure back for correction");
                session.push(Message::user(format!(
                    "{}\nCorrect the tool call and try again.",
                    failed.describe()
                )));
            }

            session.snapshot()
        };

        let (committed, rejected) = self.commit_knowledge(&responses).await;
        report.committed = committed;
        report.rejected = rejected;

        if mode == TurnMode::Foreground {
            self.internalize(input, &report.response);
        }
        self.save_snapshot(snapshot);

        self.events.publish(DomainEvent::TurnCompleted {
            internal: mode == TurnMode::Internal,
            closures: report.closures,
            timestamp: Utc::now(),
        });
        report
    }

    /// Vector memories plus graph logic chains for the first entities of `input`.
    async fn recall(&self, input: &str) -> Option<String> {
        let mut lines: Vec<String> = Vec::new();

        if let Some(memory) = &self.memory {
            match memory.search(MemoryQuery::new(input, self.recall_limit)).await {
                Ok(entries) => lines.extend(entries.into_iter().map(|e| format!("- {}", e.content))),
                Err(e) => warn!(error = %e, "Memory recall failed"),
            }
        }

        let mut seen = HashSet::new();
        let entities = extract_entities(input)
            .into_iter()
            .filter(|e| seen.insert(*e))
            .take(RECALL_ENTITIES);
        for entity in entities {
            for chain in self.graph.query_logic_chain(entity, self.chain_depth) {
                let line = format!("- {chain}");
                if !lines.contains(&line) {
                    lines.push(line);
                }
            }
        }

        if lines.is_empty() {
            return None;
        }
        debug!(count = lines.len(), "Recall attached to input");
        Some(format!("[Recall]\n{}", lines.join("\n")))
    }

    async fn generate(&self, history: &[Message], prefill: Option<&str>) -> String {
        let response = match prefill {
            Some(prefix) => {
                let mut messages = history.to_vec();
                messages.push(Message::assistant(prefix));
                let continuation = self.stream_response(&messages).await;
                if is_sentinel(&continuation) {
                    continuation
                } else {
                    format!("{prefix}{continuation}")
                }
            }
            None => self.stream_response(history).await,
        };
        if is_sentinel(&response) {
            warn!(backend = %self.backend.name(), response = %response, "Backend returned a diagnostic");
        }
        response
    }

    /// Forward each chunk to observers while accumulating the response.
    async fn stream_response(&self, messages: &[Message]) -> String {
        let mut rx = self.backend.stream(messages).await;
        let mut full = String::new();
        while let Some(chunk) = rx.recv().await {
            full.push_str(&chunk);
            self.events.publish(DomainEvent::GenerationChunk { text: chunk });
        }
        full
    }

    async fn commit_knowledge(&self, responses: &[String]) -> (usize, usize) {
        let mut triples: Vec<Triple> = Vec::new();
        for t in responses.iter().flat_map(|r| extract_triples(r)) {
            if !triples.contains(&t) {
                triples.push(t);
            }
        }
        if triples.is_empty() {
            return (0, 0);
        }

        let graph = Arc::clone(&self.graph);
        let events = Arc::clone(&self.events);
        match tokio::task::spawn_blocking(move || commit_triples(&graph, &triples, &events)).await {
            Ok(summary) => (summary.committed, summary.rejected),
            Err(e) => {
                warn!(error = %e, "Knowledge commit task failed");
                (0, 0)
            }
        }
    }

    /// Store the exchange in vector memory in the background.
    fn internalize(&self, input: &str, response: &str) {
        let Some(memory) = self.memory.clone() else {
            return;
        };
        if is_sentinel(response) || response.trim().is_empty() {
            return;
        }
        let entry = MemoryEntry::new(format!("Q: {input} | A: {response}")).with_tag("dialogue");
        self.background().spawn(async move {
            if let Err(e) = memory.store(entry).await {
                warn!(error = %e, "Failed to internalize exchange");
            }
        });
    }

    fn save_snapshot(&self, snapshot: SessionSnapshot) {
        let Some(path) = self.session_path.clone() else {
            return;
        };
        self.background().spawn_blocking(move || {
            if let Err(e) = snapshot.save(&path) {
                warn!(error = %e, "Failed to save session snapshot");
            }
        });
    }
}

impl Orchestrator {
    /// The background task set, with already finished tasks reaped.
    fn background(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        let mut set = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        while set.try_join_next().is_some() {}
        set
    }

    /// Wait for pending background persistence to finish.
    pub async fn flush(&self) {
        let mut pending = std::mem::take(&mut *self.background());
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Background persistence task failed");
            }
        }
    }
}

/// Uses the generation backend to describe graph communities.
pub struct BackendSummarizer<'a> {
    orchestrator: &'a Orchestrator,
}

impl<'a> BackendSummarizer<'a> {
    pub fn new(orchestrator: &'a Orchestrator) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Summarizer for BackendSummarizer<'_> {
    async fn summarize(&self, members: &[String]) -> Result<String, GraphError> {
        let messages = [
            Message::system("You name the common theme of a group of related concepts in one or two sentences."),
            Message::user(format!("Concepts: {}", members.join(", "))),
        ];
        let text = self.orchestrator.generate_exclusive(&messages).await;
        if is_sentinel(&text) || text.trim().is_empty() {
            return Err(GraphError::Summarizer(text));
        }
        Ok(text.trim().to_string())
    }
}
