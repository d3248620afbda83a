//! The autonomous study loop.
//!
//! Each iteration draws an event kind, resolves it to a topic, and runs an
//! internal turn through the orchestrator. A turn that closes at least one
//! tool call rewards its topic; anything else penalises it. Three failures
//! in a row count as a deadlock: the topic takes a heavy penalty and the
//! working context is reset to the canonical exchange.
//!
//! The loop switches the backend to the extended profile on entry and
//! always restores the normal profile on exit.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use kestrel_config::AppConfig;
use kestrel_core::backend::{BackendProfile, ReloadStatus};
use kestrel_core::event::DomainEvent;
use kestrel_memory::{Strategy, TopicWeights};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::weights::{EventKind, EventWeights};
use crate::activity::interrupted;
use crate::journal::StudyJournal;
use crate::orchestrator::{BackendSummarizer, Orchestrator, TurnMode};

const PREFILL: &str = "Let me work through this step by step.";

/// Consecutive-failure counter that fires once per `threshold` failures.
#[derive(Debug, Clone)]
pub struct FailureCounter {
    count: u32,
    threshold: u32,
}

impl FailureCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold: threshold.max(1),
        }
    }

    /// Count a failure. Returns `true`, and resets, when the threshold is hit.
    pub fn record_failure(&mut self) -> bool {
        self.count += 1;
        if self.count >= self.threshold {
            self.count = 0;
            return true;
        }
        false
    }

    pub fn record_success(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[derive(Debug, Clone)]
pub struct StudySettings {
    pub normal: BackendProfile,
    pub extended: BackendProfile,
    pub deadlock_threshold: u32,
    pub iteration_pause: Duration,
}

impl StudySettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            normal: config.profiles.normal.clone(),
            extended: config.profiles.extended.clone(),
            deadlock_threshold: config.study.deadlock_threshold,
            iteration_pause: Duration::from_secs(config.study.iteration_pause_secs),
        }
    }
}

/// How a study session ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudyOutcome {
    pub iterations: u64,
    pub closures: u64,
    pub deadlocks: u64,
    pub interrupted: bool,
}

/// What one iteration will work on.
enum Target {
    Topic { topic: String, prompt: String },
    Summaries,
    Nothing,
}

pub struct StudyScheduler {
    orchestrator: Arc<Orchestrator>,
    topics: Arc<TopicWeights>,
    journal: Option<Arc<StudyJournal>>,
    settings: StudySettings,
    events: Mutex<EventWeights>,
    rng: Mutex<StdRng>,
}

impl StudyScheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, topics: Arc<TopicWeights>, settings: StudySettings) -> Self {
        Self {
            orchestrator,
            topics,
            journal: None,
            settings,
            events: Mutex::new(EventWeights::new()),
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    pub fn with_journal(mut self, journal: Arc<StudyJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    pub fn with_event_weights(self, weights: EventWeights) -> Self {
        Self {
            events: Mutex::new(weights),
            ..self
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn event_weights(&self) -> EventWeights {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Run until interrupted or until `max_iterations` iterations are done.
    ///
    /// Returns `None` if another study loop already holds the slot.
    pub async fn run(&self, max_iterations: Option<u64>) -> Option<StudyOutcome> {
        let activity = Arc::clone(self.orchestrator.activity());
        if !activity.try_begin_study() {
            debug!("Study loop already running");
            return None;
        }
        let mut interrupt = activity.interrupt_receiver();
        let events = self.orchestrator.events();
        events.publish(DomainEvent::StudyStarted { timestamp: Utc::now() });
        info!("Study session started");

        let status = self
            .orchestrator
            .lend_profile(&self.settings.extended, &self.settings.normal)
            .await;
        self.report_reload(&self.settings.extended, status);
        let outcome = AssertUnwindSafe(self.study_loop(&mut interrupt, max_iterations))
            .catch_unwind()
            .await;
        match self.orchestrator.restore_profile().await {
            Some((profile, status)) => self.report_reload(&profile, status),
            None => debug!("Normal profile already restored by a foreground turn"),
        }
        activity.end_study();

        let outcome = outcome.unwrap_or_else(|_| {
            error!("Study loop panicked; normal profile restored");
            StudyOutcome::default()
        });
        events.publish(DomainEvent::StudyStopped {
            iterations: outcome.iterations,
            timestamp: Utc::now(),
        });
        info!(
            iterations = outcome.iterations,
            closures = outcome.closures,
            deadlocks = outcome.deadlocks,
            interrupted = outcome.interrupted,
            "Study session ended"
        );
        Some(outcome)
    }

    fn report_reload(&self, profile: &BackendProfile, status: ReloadStatus) {
        match status {
            ReloadStatus::Applied => debug!(profile = %profile.name, "Backend profile applied"),
            ReloadStatus::FellBack => warn!(profile = %profile.name, "Backend fell back to the safe profile"),
            ReloadStatus::Unusable => warn!(profile = %profile.name, "Backend unusable after reload"),
        }
        self.orchestrator.events().publish(DomainEvent::BackendReloaded {
            profile: profile.name.clone(),
            status: format!("{status:?}"),
        });
    }

    async fn study_loop(&self, interrupt: &mut watch::Receiver<bool>, max_iterations: Option<u64>) -> StudyOutcome {
        let mut outcome = StudyOutcome::default();
        let mut failures = FailureCounter::new(self.settings.deadlock_threshold);

        loop {
            if interrupted(interrupt) {
                outcome.interrupted = true;
                break;
            }
            if max_iterations.is_some_and(|max| outcome.iterations >= max) {
                break;
            }

            let kind = self.next_event();
            debug!(event = %kind, "Study event selected");
            match self.resolve(kind) {
                Target::Nothing => debug!(event = %kind, "Nothing to study yet"),
                Target::Summaries => {
                    self.summarize().await;
                }
                Target::Topic { .. } if interrupted(interrupt) => {
                    outcome.interrupted = true;
                    break;
                }
                Target::Topic { topic, prompt } => {
                    if self.study_topic(kind, &topic, &prompt).await {
                        failures.record_success();
                        outcome.closures += 1;
                    } else if failures.record_failure() {
                        self.recover_from_deadlock(&topic).await;
                        outcome.deadlocks += 1;
                    }
                }
            }
            outcome.iterations += 1;

            if pause(interrupt, self.settings.iteration_pause).await {
                outcome.interrupted = true;
                break;
            }
        }
        outcome
    }

    fn next_event(&self) -> EventKind {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .select(&mut *rng)
            .unwrap_or(EventKind::ResearchTopic)
    }

    fn resolve(&self, kind: EventKind) -> Target {
        let graph = self.orchestrator.graph();
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);

        let (topic, prompt) = match kind {
            EventKind::SummarizeCommunities => return Target::Summaries,
            EventKind::ResearchTopic => return self.research(&mut rng),
            EventKind::ExtendLeaf => match graph.strategic_node(Strategy::Leaf, &mut *rng) {
                Some(t) => {
                    let p = format!(
                        "Extend what you know about \"{t}\": find one new, verifiable fact connecting it to something else and record it."
                    );
                    (t, p)
                }
                None => return self.research(&mut rng),
            },
            EventKind::ConsolidateHub => match graph.strategic_node(Strategy::Hub, &mut *rng) {
                Some(t) => {
                    let p = format!(
                        "\"{t}\" is a central concept. Check its existing relations against a reliable source and record corrections or missing links."
                    );
                    (t, p)
                }
                None => return self.research(&mut rng),
            },
        };

        match self.topics.ensure(&topic) {
            Ok(true) => info!(topic = %topic, "New study topic discovered"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Failed to persist topic weights"),
        }
        Target::Topic { topic, prompt }
    }

    fn research(&self, rng: &mut StdRng) -> Target {
        match self.topics.choose(rng) {
            Some(topic) => {
                let prompt = format!(
                    "Research \"{topic}\": search for an authoritative source, read it, and record the key facts."
                );
                Target::Topic { topic, prompt }
            }
            None => Target::Nothing,
        }
    }

    /// One internal turn on `topic`. Returns whether a tool call closed.
    async fn study_topic(&self, kind: EventKind, topic: &str, prompt: &str) -> bool {
        let report = self
            .orchestrator
            .run_turn(prompt, TurnMode::Internal, Some(PREFILL))
            .await;

        if let Some(reason) = &report.clarification {
            info!(topic = %topic, reason = %reason, "Study turn asked for clarification");
            if let Some(journal) = &self.journal {
                journal.log_confusion(topic, reason).await;
            }
        }

        let adjusted = if report.closed() {
            self.topics.reward(topic)
        } else {
            self.topics.penalize(topic)
        };
        match adjusted {
            Ok(weight) => debug!(topic = %topic, weight, closed = report.closed(), "Topic weight adjusted"),
            Err(e) => warn!(error = %e, "Failed to persist topic weights"),
        }

        if let Some(journal) = &self.journal {
            journal.log_activity(
                kind.as_str(),
                &format!(
                    "{topic}: {} tool closure(s), {} relation(s) committed",
                    report.closures, report.committed
                ),
            ).await;
        }
        report.closed()
    }

    async fn summarize(&self) -> bool {
        let summarizer = BackendSummarizer::new(&self.orchestrator);
        let mut rng = StdRng::from_rng(&mut *self.rng.lock().unwrap_or_else(PoisonError::into_inner));
        match self
            .orchestrator
            .graph()
            .update_community_summaries(&summarizer, &mut rng)
            .await
        {
            Ok(written) => {
                if let Some(journal) = &self.journal {
                    journal.log_activity(
                        EventKind::SummarizeCommunities.as_str(),
                        &format!("{written} community summaries updated"),
                    ).await;
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "Community summarization failed");
                false
            }
        }
    }

    async fn recover_from_deadlock(&self, topic: &str) {
        warn!(topic = %topic, threshold = self.settings.deadlock_threshold, "Study deadlock, recovering");
        if let Err(e) = self.topics.deadlock_penalty(topic) {
            warn!(error = %e, "Failed to persist topic weights");
        }
        self.orchestrator.reset_to_canonical().await;
        self.orchestrator.events().publish(DomainEvent::DeadlockRecovered {
            topic: topic.to_string(),
            timestamp: Utc::now(),
        });
        if let Some(journal) = &self.journal {
            journal.log_activity("deadlock", &format!("{topic}: context reset")).await;
        }
    }
}

/// Sleep for `duration` unless interrupted first. Returns `true` if interrupted.
async fn pause(interrupt: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    if interrupted(interrupt) {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => interrupted(interrupt),
        _ = interrupt.changed() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{study_scheduler, tool_block, ScriptedBackend};

    fn scheduler(backend: Arc<ScriptedBackend>, topics: &[&str]) -> StudyScheduler {
        study_scheduler(backend, topics, Duration::from_millis(1))
            .with_event_weights(EventWeights::with_kinds(&[EventKind::ResearchTopic], 10.0))
    }

    #[test]
    fn failure_counter_fires_exactly_on_threshold() {
        let mut counter = FailureCounter::new(3);
        assert!(!counter.record_failure());
        assert!(!counter.record_failure());
        assert!(counter.record_failure());
        assert_eq!(counter.count(), 0);

        assert!(!counter.record_failure());
        counter.record_success();
        assert!(!counter.record_failure());
        assert!(!counter.record_failure());
        assert!(counter.record_failure());
    }

    #[tokio::test]
    async fn successful_iterations_reward_topic() {
        let block = tool_block("web_browser", r#"{"query": "tokio"}"#);
        let backend = ScriptedBackend::with_fallback(vec![], &block);
        let study = scheduler(backend.clone(), &["tokio"]);

        let outcome = study.run(Some(2)).await.unwrap();
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.closures, 2);
        assert_eq!(outcome.deadlocks, 0);
        let weight = study.topics.get("tokio").unwrap();
        assert!((weight - 1.44).abs() < 1e-9);
    }

    #[tokio::test]
    async fn deadlock_recovers_on_third_failure() {
        let backend = ScriptedBackend::with_fallback(vec![], "I am not sure.");
        let study = scheduler(backend.clone(), &["tokio"]);
        let mut events = study.orchestrator().events().subscribe();

        let outcome = study.run(Some(3)).await.unwrap();
        assert_eq!(outcome.deadlocks, 1);
        assert_eq!(outcome.closures, 0);
        // three penalties, then the deadlock penalty
        let expected = (1.0f64 * 0.8 * 0.8 * 0.8 * 0.3).max(0.1);
        assert!((study.topics.get("tokio").unwrap() - expected).abs() < 1e-9);
        assert_eq!(study.orchestrator().history().await.len(), 3);

        let mut recovered = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event.as_ref(), DomainEvent::DeadlockRecovered { .. }) {
                recovered += 1;
            }
        }
        assert_eq!(recovered, 1);
    }

    #[tokio::test]
    async fn two_failures_do_not_trigger_recovery() {
        let backend = ScriptedBackend::with_fallback(vec![], "I am not sure.");
        let study = scheduler(backend, &["tokio"]);
        let outcome = study.run(Some(2)).await.unwrap();
        assert_eq!(outcome.deadlocks, 0);
        assert!(study.orchestrator().history().await.len() > 3);
    }

    #[tokio::test]
    async fn profiles_switch_and_restore() {
        let backend = ScriptedBackend::new(vec![]);
        let study = scheduler(backend.clone(), &["tokio"]);
        study.run(Some(1)).await.unwrap();
        assert_eq!(backend.reload_names(), ["extended", "normal"]);
        assert!(!study.orchestrator().activity().is_study_active());
    }

    #[tokio::test]
    async fn user_turn_interrupts_study() {
        let backend = ScriptedBackend::new(vec![]);
        let study = Arc::new(scheduler(backend.clone(), &["tokio"]));
        let activity = Arc::clone(study.orchestrator().activity());

        let runner = Arc::clone(&study);
        let handle = tokio::spawn(async move { runner.run(None).await });
        tokio::task::yield_now().await;
        activity.begin_user_turn();
        activity.end_user_turn();

        let outcome = handle.await.unwrap().unwrap();
        assert!(outcome.interrupted);
        assert_eq!(backend.reload_names().last().map(String::as_str), Some("normal"));
        assert!(!activity.is_study_active());
    }

    #[tokio::test(start_paused = true)]
    async fn interrupting_turn_generates_on_normal_profile() {
        let backend = ScriptedBackend::slow("Still reading.", Duration::from_secs(5));
        let study = Arc::new(scheduler(backend.clone(), &["tokio"]));
        let orchestrator = Arc::clone(study.orchestrator());

        let runner = Arc::clone(&study);
        let handle = tokio::spawn(async move { runner.run(None).await });
        while backend.call_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // queued behind the in-flight study generation
        orchestrator.run_turn("what changed?", TurnMode::Foreground, None).await;
        assert_eq!(backend.profile_for("what changed?").as_deref(), Some("normal"));

        let outcome = handle.await.unwrap().unwrap();
        assert!(outcome.interrupted);
        assert_eq!(backend.call_count(), 2);
        // the foreground turn already restored the normal profile
        assert_eq!(backend.reload_names(), ["extended", "normal"]);
    }

    #[tokio::test]
    async fn only_one_study_loop_at_a_time() {
        let backend = ScriptedBackend::new(vec![]);
        let study = scheduler(backend, &["tokio"]);
        assert!(study.orchestrator().activity().try_begin_study());
        assert!(study.run(Some(1)).await.is_none());
    }

    #[tokio::test]
    async fn empty_knowledge_idles_without_generating() {
        let backend = ScriptedBackend::new(vec![]);
        let study = scheduler(backend.clone(), &[]);
        let outcome = study.run(Some(2)).await.unwrap();
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.deadlocks, 0);
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn clarification_is_journaled() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(StudyJournal::new(dir.path()));
        let clarify = tool_block("clarify", r#"{"reason": "which runtime?"}"#);
        let backend = ScriptedBackend::with_fallback(vec![], &clarify);
        let study = scheduler(backend, &["tokio"]).with_journal(journal.clone());

        study.run(Some(1)).await.unwrap();
        let report = std::fs::read_to_string(journal.today_path()).unwrap();
        assert!(report.contains("[confusion] tokio: which runtime?"));
    }
}
