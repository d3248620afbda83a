//! Polls activity and starts the study loop once the user has been idle.
//!
//! The monitor never touches the generation lock; it only reads the busy
//! and study flags and the time since the last user activity.

use std::sync::Arc;
use std::time::Duration;

use kestrel_config::AppConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::scheduler::StudyScheduler;
use crate::activity::Activity;

pub struct IdleMonitor {
    scheduler: Arc<StudyScheduler>,
    threshold: Duration,
    poll: Duration,
}

impl IdleMonitor {
    pub fn new(scheduler: Arc<StudyScheduler>, threshold: Duration, poll: Duration) -> Self {
        Self {
            scheduler,
            threshold,
            poll,
        }
    }

    pub fn from_config(scheduler: Arc<StudyScheduler>, config: &AppConfig) -> Self {
        Self::new(
            scheduler,
            Duration::from_secs(config.study.idle_threshold_secs),
            Duration::from_secs(config.study.poll_interval_secs),
        )
    }

    /// Whether a study session should begin now.
    pub fn should_start(activity: &Activity, threshold: Duration) -> bool {
        !activity.is_busy() && !activity.is_study_active() && activity.idle_for() >= threshold
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Poll until `shutdown` is raised or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let activity = Arc::clone(self.scheduler.orchestrator().activity());
        let mut ticker = tokio::time::interval(self.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(threshold_secs = self.threshold.as_secs(), "Idle monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if !Self::should_start(&activity, self.threshold) {
                continue;
            }
            info!(idle_secs = activity.idle_for().as_secs(), "Idle threshold reached, starting study");
            let scheduler = Arc::clone(&self.scheduler);
            let activity = Arc::clone(&activity);
            tokio::spawn(async move {
                if scheduler.run(None).await.is_some() {
                    // wait a full threshold before studying again
                    activity.touch();
                }
            });
        }
        debug!("Idle monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{study_scheduler, ScriptedBackend};

    #[tokio::test(start_paused = true)]
    async fn should_start_respects_flags_and_threshold() {
        let activity = Activity::new();
        let threshold = Duration::from_secs(60);
        assert!(!IdleMonitor::should_start(&activity, threshold));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(IdleMonitor::should_start(&activity, threshold));

        activity.begin_user_turn();
        assert!(!IdleMonitor::should_start(&activity, threshold));
        activity.end_user_turn();
        assert!(!IdleMonitor::should_start(&activity, threshold));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(activity.try_begin_study());
        assert!(!IdleMonitor::should_start(&activity, threshold));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_starts_and_user_interrupts_study() {
        let backend = ScriptedBackend::new(vec![]);
        let scheduler = Arc::new(study_scheduler(backend.clone(), &["tokio"], Duration::from_secs(30)));
        let activity = Arc::clone(scheduler.orchestrator().activity());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let monitor = IdleMonitor::new(scheduler, Duration::from_secs(60), Duration::from_secs(5));
        let handle = monitor.spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_secs(70)).await;
        assert!(activity.is_study_active());
        assert_eq!(backend.reload_names().first().map(String::as_str), Some("extended"));

        activity.begin_user_turn();
        activity.end_user_turn();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!activity.is_study_active());
        assert_eq!(backend.reload_names().last().map(String::as_str), Some("normal"));

        shutdown_tx.send_replace(true);
        handle.await.unwrap();
    }
}
