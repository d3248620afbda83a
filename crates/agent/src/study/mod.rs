//! Idle-triggered autonomous study.

pub mod idle;
pub mod scheduler;
pub mod weights;

pub use idle::IdleMonitor;
pub use scheduler::{FailureCounter, StudyOutcome, StudyScheduler, StudySettings};
pub use weights::{EventKind, EventWeights};
