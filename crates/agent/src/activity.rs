//! Busy/idle bookkeeping shared by foreground turns, the idle monitor and
//! the study loop.
//!
//! The interrupt is a single-slot `watch` channel: a user turn raises it on
//! entry and lowers it on exit. The study loop keeps a receiver and treats
//! both a raised value and any change since it last looked as a request to
//! stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

pub struct Activity {
    busy: AtomicBool,
    study_active: AtomicBool,
    last_activity: Mutex<Instant>,
    interrupt: watch::Sender<bool>,
}

impl Activity {
    pub fn new() -> Self {
        let (interrupt, _) = watch::channel(false);
        Self {
            busy: AtomicBool::new(false),
            study_active: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
            interrupt,
        }
    }

    pub fn begin_user_turn(&self) {
        self.interrupt.send_replace(true);
        self.busy.store(true, Ordering::SeqCst);
        self.touch();
    }

    pub fn end_user_turn(&self) {
        self.busy.store(false, Ordering::SeqCst);
        self.touch();
        self.interrupt.send_replace(false);
    }

    /// Ask a running study loop to stop without starting a turn.
    pub fn request_stop(&self) {
        self.interrupt.send_modify(|raised| *raised = true);
        self.interrupt.send_replace(false);
    }

    pub fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn is_study_active(&self) -> bool {
        self.study_active.load(Ordering::SeqCst)
    }

    /// Claim the study slot. Returns `false` if a study loop already runs.
    pub fn try_begin_study(&self) -> bool {
        self.study_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn end_study(&self) {
        self.study_active.store(false, Ordering::SeqCst);
    }

    pub fn interrupt_receiver(&self) -> watch::Receiver<bool> {
        self.interrupt.subscribe()
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// True if the holder of `rx` should stop: the signal is raised, it changed
/// since last observed, or the sender is gone.
pub fn interrupted(rx: &watch::Receiver<bool>) -> bool {
    rx.has_changed().unwrap_or(true) || *rx.borrow()
}
