//! Wiring shared by every command that talks to the backend.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use kestrel_agent::{
    DispatchPolicy, Orchestrator, SessionSnapshot, StudyJournal, StudyScheduler, StudySettings,
};
use kestrel_config::AppConfig;
use kestrel_core::backend::{Backend, ReloadStatus};
use kestrel_core::event::EventBus;
use kestrel_core::memory::MemoryBackend;
use kestrel_core::ui::UiSnapshot;
use kestrel_memory::{FileBackend, KnowledgeGraph, TopicWeights, VisitedSet};
use kestrel_providers::HttpBackend;
use kestrel_tools::learning_monitor::MONITOR_TOPICS;
use tracing::{info, warn};

/// Load the config from `path`, or from `KESTREL_CONFIG`/the default location.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_overrides(|key| std::env::var(key).ok());
            config.validate()?;
            config
        }
        None => AppConfig::load()?,
    };
    Ok(config)
}

pub fn open_graph(config: &AppConfig) -> anyhow::Result<KnowledgeGraph> {
    let path = config.paths.graph_path();
    KnowledgeGraph::open(&path).with_context(|| format!("Failed to open graph at {}", path.display()))
}

pub fn open_topics(config: &AppConfig) -> anyhow::Result<TopicWeights> {
    let topics = TopicWeights::open(config.paths.topics_path());
    let added = topics.seed(&config.study.seed_topics)?;
    if added > 0 {
        info!(added, "Seed topics added");
    }
    Ok(topics)
}

pub struct Runtime {
    pub config: AppConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub scheduler: Arc<StudyScheduler>,
    pub topics: Arc<TopicWeights>,
    pub journal: Arc<StudyJournal>,
}

impl Runtime {
    /// Connect to the configured backend and open every store.
    pub async fn start(config: AppConfig) -> anyhow::Result<Self> {
        let backend = HttpBackend::from_config(&config.backend, config.profiles.normal.clone());
        match backend.reload(&config.profiles.normal).await {
            ReloadStatus::Applied => info!(url = %config.backend.api_url, "Backend ready"),
            ReloadStatus::FellBack => warn!("Configured model not served, using the safe profile"),
            ReloadStatus::Unusable => warn!(
                url = %config.backend.api_url,
                "Backend unreachable; responses will be diagnostics until it comes up"
            ),
        }
        Self::with_backend(config, Arc::new(backend))
    }

    pub fn with_backend(config: AppConfig, backend: Arc<dyn Backend>) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.paths.data_dir).with_context(|| {
            format!("Failed to create data dir {}", config.paths.data_dir.display())
        })?;

        let graph = Arc::new(open_graph(&config)?);
        let topics = Arc::new(open_topics(&config)?);
        let visited = Arc::new(VisitedSet::open(config.paths.visited_path()));
        let memory: Arc<dyn MemoryBackend> = Arc::new(FileBackend::new(config.paths.memory_path()));
        let tools = Arc::new(kestrel_tools::default_registry(&config));
        let policy = DispatchPolicy::new(kestrel_tools::domain_policy(&config), visited);

        let mut orchestrator = Orchestrator::new(backend, tools, graph, policy, Arc::new(EventBus::default()))
            .with_memory(memory)
            .with_session_path(config.paths.session_path())
            .with_max_retries(config.agent.max_retries)
            .with_recall_limit(config.agent.recall_limit)
            .with_chain_depth(config.agent.chain_depth);
        match SessionSnapshot::load(&config.paths.session_path()) {
            Ok(Some(snapshot)) => {
                info!(messages = snapshot.messages.len(), "Previous session restored");
                orchestrator = orchestrator.with_history(snapshot);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Previous session unreadable, starting fresh"),
        }
        let orchestrator = Arc::new(orchestrator);

        let journal = Arc::new(StudyJournal::new(config.paths.reports_dir()));
        let scheduler = Arc::new(
            StudyScheduler::new(
                Arc::clone(&orchestrator),
                Arc::clone(&topics),
                StudySettings::from_config(&config),
            )
            .with_journal(Arc::clone(&journal)),
        );

        Ok(Self {
            config,
            orchestrator,
            scheduler,
            topics,
            journal,
        })
    }
}

/// State handed to UI panels.
pub fn ui_snapshot(topics: &TopicWeights, graph: &KnowledgeGraph, study_active: bool) -> UiSnapshot {
    UiSnapshot {
        top_topics: topics.top(MONITOR_TOPICS),
        graph_nodes: graph.node_count(),
        graph_edges: graph.edge_count(),
        study_active,
    }
}
