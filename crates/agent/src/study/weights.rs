//! Self-balancing weights over study event kinds.
//!
//! Picking an event damps its weight and lifts every other one, so a kind
//! that keeps winning cedes ground to the rest.

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use rand::seq::IndexedRandom;

pub const SEED_WEIGHT: f64 = 10.0;
pub const SELECTED_FACTOR: f64 = 0.4;
pub const OTHERS_FACTOR: f64 = 1.2;
pub const MAX_WEIGHT: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    /// Extend an under-connected node.
    ExtendLeaf,
    /// Consolidate a highly connected node.
    ConsolidateHub,
    /// Research a topic chosen by topic weight.
    ResearchTopic,
    /// Refresh community summary nodes.
    SummarizeCommunities,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::ExtendLeaf,
        EventKind::ConsolidateHub,
        EventKind::ResearchTopic,
        EventKind::SummarizeCommunities,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ExtendLeaf => "extend_leaf",
            EventKind::ConsolidateHub => "consolidate_hub",
            EventKind::ResearchTopic => "research_topic",
            EventKind::SummarizeCommunities => "summarize_communities",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-lifetime event weights, each within `[0, MAX_WEIGHT]`.
#[derive(Debug, Clone)]
pub struct EventWeights {
    weights: BTreeMap<EventKind, f64>,
}

impl EventWeights {
    pub fn new() -> Self {
        Self::with_kinds(&EventKind::ALL, SEED_WEIGHT)
    }

    pub fn with_kinds(kinds: &[EventKind], seed: f64) -> Self {
        Self {
            weights: kinds.iter().map(|&k| (k, seed.clamp(0.0, MAX_WEIGHT))).collect(),
        }
    }

    pub fn get(&self, kind: EventKind) -> f64 {
        self.weights.get(&kind).copied().unwrap_or(0.0)
    }

    /// Draw an event by weight and rebalance around it.
    pub fn select<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<EventKind> {
        let kinds: Vec<EventKind> = self.weights.keys().copied().collect();
        let picked = match kinds.choose_weighted(rng, |k| self.get(*k)) {
            Ok(&kind) => kind,
            // all weights zero
            Err(_) => *kinds.choose(rng)?,
        };
        self.rebalance(picked);
        Some(picked)
    }

    pub fn rebalance(&mut self, selected: EventKind) {
        for (kind, weight) in self.weights.iter_mut() {
            let factor = if *kind == selected { SELECTED_FACTOR } else { OTHERS_FACTOR };
            *weight = (*weight * factor).clamp(0.0, MAX_WEIGHT);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (EventKind, f64)> + '_ {
        self.weights.iter().map(|(k, w)| (*k, *w))
    }
}

impl Default for EventWeights {
    fn default() -> Self {
        Self::new()
    }
}
