//! The scheduler at the heart of Kestrel.
//!
//! Two callers share one generation backend:
//!
//! 1. **Foreground turns** from the user, entering [`Orchestrator::run_turn`]
//! 2. **The study loop**, started by the [`IdleMonitor`] once the user has
//!    been away long enough, calling the same orchestrator in internal mode
//!
//! A turn curates the working context, streams a response, extracts and
//! dispatches tool calls with a bounded self-correction loop, and commits
//! `[KG: ...]` relations into the knowledge graph. The generation lock inside
//! the orchestrator guarantees at most one generation/tool cycle in flight.

pub mod activity;
pub mod curator;
pub mod journal;
pub mod knowledge;
pub mod orchestrator;
pub mod parser;
pub mod policy;
pub mod prompt;
pub mod session;
pub mod study;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use activity::Activity;
pub use curator::{curate, extract_entities};
pub use journal::StudyJournal;
pub use knowledge::{extract_triples, Triple};
pub use orchestrator::{BackendSummarizer, Orchestrator, TurnMode, TurnReport};
pub use parser::parse_tool_calls;
pub use policy::DispatchPolicy;
pub use session::{Session, SessionSnapshot};
pub use study::{
    EventKind, EventWeights, FailureCounter, IdleMonitor, StudyOutcome, StudyScheduler, StudySettings,
};
