//! End-to-end tests for the Kestrel runtime.
//!
//! These exercise the full pipeline over the real tool registry and file-backed
//! stores: a user turn through tool dispatch and knowledge commit, the study
//! loop with profile switching and journaling, and session persistence.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kestrel_agent::{
    DispatchPolicy, Orchestrator, SessionSnapshot, StudyJournal, StudyScheduler, StudySettings, TurnMode,
};
use kestrel_config::AppConfig;
use kestrel_core::backend::{Backend, BackendProfile, ReloadStatus};
use kestrel_core::event::{DomainEvent, EventBus};
use kestrel_core::memory::{MemoryBackend, MemoryQuery};
use kestrel_core::message::Message;
use kestrel_memory::{FileBackend, KnowledgeGraph, TopicWeights, VisitedSet};

// ── Scripted backend ─────────────────────────────────────────────────────

/// Replays scripted responses, then repeats a fallback.
struct ScriptedBackend {
    responses: Mutex<VecDeque<String>>,
    fallback: String,
    calls: Mutex<usize>,
    reloads: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new(responses: Vec<String>, fallback: &str) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            fallback: fallback.to_string(),
            calls: Mutex::new(0),
            reloads: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    fn reloads(&self) -> Vec<String> {
        self.reloads.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "e2e_scripted"
    }

    async fn generate(&self, _messages: &[Message]) -> String {
        *self.calls.lock().unwrap() += 1;
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

// ── Fixture ──────────────────────────────────────────────────────────────

fn tool_block(tool: &str, params: serde_json::Value) -> String {
    format!(
        "```json\n{}\n```",
        serde_json::json!({"tool": tool, "params": params})
    )
}

/// A config whose every path lives under `root`, with a tiny project to inspect.
fn config_in(root: &Path) -> AppConfig {
    let project = root.join("project");
    std::fs::create_dir_all(project.join("src")).unwrap();
    std::fs::write(project.join("Cargo.toml"), "[package]\nname = \"demo\"").unwrap();
    std::fs::write(project.join("src/lib.rs"), "pub fn answer() -> u32 { 42 }").unwrap();

    let mut config = AppConfig::default();
    config.paths.data_dir = root.join("data");
    config.paths.module_dir = root.join("modules");
    config.paths.workspace_dir = root.join("workspace");
    config.paths.project_root = Some(project);
    config.study.iteration_pause_secs = 0;
    config.study.deadlock_threshold = 3;
    config
}

struct Stack {
    orchestrator: Arc<Orchestrator>,
    graph: Arc<KnowledgeGraph>,
    memory: Arc<FileBackend>,
    events: Arc<EventBus>,
}

fn build(config: &AppConfig, backend: Arc<ScriptedBackend>) -> Stack {
    std::fs::create_dir_all(&config.paths.data_dir).unwrap();
    let graph = Arc::new(KnowledgeGraph::open(config.paths.graph_path()).unwrap());
    let memory = Arc::new(FileBackend::new(config.paths.memory_path()));
    let events = Arc::new(EventBus::new(256));
    let policy = DispatchPolicy::new(
        kestrel_tools::domain_policy(config),
        Arc::new(VisitedSet::open(config.paths.visited_path())),
    );
    let orchestrator = Orchestrator::new(
        backend,
        Arc::new(kestrel_tools::default_registry(config)),
        Arc::clone(&graph),
        policy,
        Arc::clone(&events),
    )
    .with_memory(memory.clone())
    .with_session_path(config.paths.session_path())
    .with_max_retries(config.agent.max_retries);

    Stack {
        orchestrator: Arc::new(orchestrator),
        graph,
        memory,
        events,
    }
}

// ── Foreground turns ─────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_tool_turn_reads_project_and_commits_knowledge() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let response = format!(
        "{}\n[KG: demo | defines | answer]",
        tool_block("code_inspector", serde_json::json!({"action": "read", "filename": "src/lib.rs"}))
    );
    let backend = ScriptedBackend::new(vec![response], "done");
    let stack = build(&config, backend.clone());

    let report = stack
        .orchestrator
        .run_turn("What does the demo crate define?", TurnMode::Foreground, None)
        .await;

    assert!(report.closed());
    assert_eq!(report.generations, 1);
    assert_eq!(report.committed, 1);
    assert_eq!(backend.calls(), 1);

    let history = stack.orchestrator.history().await;
    let tool_output = history.last().unwrap();
    assert!(tool_output.is_system());
    assert!(tool_output.content.starts_with("[Tool Output: code_inspector]"));
    assert!(tool_output.content.contains("pub fn answer()"));

    assert_eq!(stack.graph.edges_between("demo", "answer").len(), 1);
    let reopened = KnowledgeGraph::open(config.paths.graph_path()).unwrap();
    assert_eq!(reopened.edges_between("demo", "answer").len(), 1);
}

#[tokio::test]
async fn e2e_turn_is_internalized_and_snapshot_saved() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let backend = ScriptedBackend::new(vec!["Petgraph stores the knowledge graph.".into()], "ok");
    let stack = build(&config, backend);

    stack
        .orchestrator
        .run_turn("Which crate stores the graph?", TurnMode::Foreground, None)
        .await;
    stack.orchestrator.flush().await;

    let hits = stack
        .memory
        .search(MemoryQuery::new("crate stores graph", 2))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].content.contains("Petgraph"));

    let snapshot = SessionSnapshot::load(&config.paths.session_path()).unwrap().unwrap();
    assert_eq!(snapshot.messages.len(), 3);
    assert!(snapshot.messages[0].is_system());
}

#[tokio::test]
async fn e2e_failing_tool_call_spends_retry_budget() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let missing = tool_block("code_inspector", serde_json::json!({"filename": "src/missing.rs"}));
    let backend = ScriptedBackend::new(vec![], &missing);
    let stack = build(&config, backend.clone());

    let report = stack
        .orchestrator
        .run_turn("Read the missing file", TurnMode::Foreground, None)
        .await;

    assert!(!report.closed());
    assert_eq!(report.generations, config.agent.max_retries as usize + 1);
    assert_eq!(backend.calls(), report.generations);
    assert!(report.final_error.as_deref().unwrap().contains("not found"));

    let history = stack.orchestrator.history().await;
    let corrections = history
        .iter()
        .filter(|m| m.content.contains("Correct the tool call and try again."))
        .count();
    // The last failure is reported instead of fed back
    assert_eq!(corrections, report.generations - 1);
}

#[tokio::test]
async fn e2e_clarification_ends_the_turn() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let ask = tool_block("clarify", serde_json::json!({"reason": "Which project do you mean?"}));
    let backend = ScriptedBackend::new(vec![ask], "unused");
    let stack = build(&config, backend.clone());
    let mut rx = stack.events.subscribe();

    let report = stack
        .orchestrator
        .run_turn("Inspect it", TurnMode::Foreground, None)
        .await;

    assert_eq!(report.clarification.as_deref(), Some("Which project do you mean?"));
    assert_eq!(backend.calls(), 1);

    let mut clarified = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(&*event, DomainEvent::ClarificationRequested { .. }) {
            clarified = true;
        }
    }
    assert!(clarified);
}

#[tokio::test]
async fn e2e_previous_session_is_restored() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    {
        let backend = ScriptedBackend::new(vec!["First answer.".into()], "ok");
        let stack = build(&config, backend);
        stack.orchestrator.run_turn("First question", TurnMode::Foreground, None).await;
        stack.orchestrator.flush().await;
    }

    let snapshot = SessionSnapshot::load(&config.paths.session_path()).unwrap().unwrap();
    let backend = ScriptedBackend::new(vec![], "ok");
    let registry = Arc::new(kestrel_tools::default_registry(&config));
    let orchestrator = Orchestrator::new(
        backend,
        registry,
        Arc::new(KnowledgeGraph::in_memory()),
        DispatchPolicy::new(Default::default(), Arc::new(VisitedSet::in_memory())),
        Arc::new(EventBus::new(16)),
    )
    .with_history(snapshot);

    let history = orchestrator.history().await;
    assert!(history.iter().any(|m| m.content == "First question"));
    assert!(history.iter().any(|m| m.content == "First answer."));
}

// ── Study loop ───────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_study_session_rewards_topic_and_writes_report() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let structure = format!(
        "\n{}",
        tool_block("code_inspector", serde_json::json!({"action": "structure"}))
    );
    let backend = ScriptedBackend::new(vec![], &structure);
    let stack = build(&config, backend.clone());

    let topics = Arc::new(TopicWeights::open(config.paths.topics_path()));
    topics.seed(["rust ownership"]).unwrap();
    let journal = Arc::new(StudyJournal::new(config.paths.reports_dir()));
    let scheduler = StudyScheduler::new(
        Arc::clone(&stack.orchestrator),
        Arc::clone(&topics),
        StudySettings::from_config(&config),
    )
    .with_journal(Arc::clone(&journal))
    .with_event_weights(kestrel_agent::EventWeights::with_kinds(
        &[kestrel_agent::EventKind::ResearchTopic],
        10.0,
    ))
    .with_seed(7);

    let outcome = scheduler.run(Some(2)).await.unwrap();

    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.closures, 2);
    assert_eq!(outcome.deadlocks, 0);
    assert!(!outcome.interrupted);
    assert!(topics.get("rust ownership").unwrap() > 1.0);
    assert!(!stack.orchestrator.activity().is_study_active());
    assert_eq!(backend.reloads(), vec!["extended".to_string(), "normal".to_string()]);

    let report = std::fs::read_to_string(journal.today_path()).unwrap();
    assert!(report.contains("rust ownership"));

    // Weights survive a reload
    let reopened = TopicWeights::open(config.paths.topics_path());
    assert_eq!(reopened.get("rust ownership"), topics.get("rust ownership"));
}

#[tokio::test]
async fn e2e_user_turn_interrupts_running_study() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.study.iteration_pause_secs = 60;
    let backend = ScriptedBackend::new(vec![], "Still thinking.");
    let stack = build(&config, backend);

    let topics = Arc::new(TopicWeights::in_memory());
    topics.seed(["tokio"]).unwrap();
    let scheduler = Arc::new(StudyScheduler::new(
        Arc::clone(&stack.orchestrator),
        topics,
        StudySettings::from_config(&config),
    ));

    let running = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.run(None).await }
    });
    while !stack.orchestrator.activity().is_study_active() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    stack
        .orchestrator
        .run_turn("Hello?", TurnMode::Foreground, None)
        .await;

    let outcome = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("study loop should stop after a user turn")
        .unwrap()
        .unwrap();
    assert!(outcome.interrupted);
}
