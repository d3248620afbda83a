//! Topic-weight table — persisted study preferences.
//!
//! Weights live in `[MIN_WEIGHT, MAX_WEIGHT]` no matter how many rewards or
//! penalties are applied. Only the study scheduler mutates the table.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use rand::Rng;
use rand::seq::IndexedRandom;
use tracing::{debug, warn};

use crate::persist::{self, PersistError};

pub const MIN_WEIGHT: f64 = 0.1;
pub const MAX_WEIGHT: f64 = 10.0;
/// Weight given to a topic on first sight.
pub const INITIAL_WEIGHT: f64 = 1.0;

pub const REWARD_FACTOR: f64 = 1.2;
pub const PENALTY_FACTOR: f64 = 0.8;
pub const DEADLOCK_FACTOR: f64 = 0.3;

pub struct TopicWeights {
    path: Option<PathBuf>,
    weights: Mutex<BTreeMap<String, f64>>,
}

fn clamp(weight: f64) -> f64 {
    if weight.is_nan() {
        return MIN_WEIGHT;
    }
    weight.clamp(MIN_WEIGHT, MAX_WEIGHT)
}

impl TopicWeights {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            weights: Mutex::new(BTreeMap::new()),
        }
    }

    /// Load the table at `path`. Out-of-range values are clamped on load;
    /// a corrupted file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let loaded: BTreeMap<String, f64> = match persist::read_json(&path) {
            Ok(table) => table.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Topic weights unreadable, starting empty");
                BTreeMap::new()
            }
        };
        let weights = loaded.into_iter().map(|(k, v)| (k, clamp(v))).collect::<BTreeMap<_, _>>();
        debug!(path = %path.display(), topics = weights.len(), "Topic weights loaded");
        Self {
            path: Some(path),
            weights: Mutex::new(weights),
        }
    }

    fn save(&self, weights: &BTreeMap<String, f64>) -> Result<(), PersistError> {
        match &self.path {
            Some(path) => persist::write_json_atomic(path, weights),
            None => Ok(()),
        }
    }

    /// Add every topic not yet present at the initial weight.
    pub fn seed<I, S>(&self, topics: I) -> Result<usize, PersistError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut weights = self.weights.lock().unwrap_or_else(PoisonError::into_inner);
        let mut added = 0;
        for topic in topics {
            let topic = topic.as_ref().trim();
            if topic.is_empty() || weights.contains_key(topic) {
                continue;
            }
            weights.insert(topic.to_string(), INITIAL_WEIGHT);
            added += 1;
        }
        if added > 0 {
            self.save(&weights)?;
        }
        Ok(added)
    }

    /// Insert `topic` at the initial weight if it is new. Returns whether it was added.
    pub fn ensure(&self, topic: &str) -> Result<bool, PersistError> {
        Ok(self.seed([topic])? == 1)
    }

    pub fn get(&self, topic: &str) -> Option<f64> {
        self.weights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .copied()
    }

    /// Multiply a topic's weight by `factor`, clamp, persist. Unknown topics
    /// start from the initial weight. Returns the new weight.
    pub fn scale(&self, topic: &str, factor: f64) -> Result<f64, PersistError> {
        let mut weights = self.weights.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = weights.entry(topic.to_string()).or_insert(INITIAL_WEIGHT);
        *entry = clamp(*entry * factor);
        let updated = *entry;
        self.save(&weights)?;
        Ok(updated)
    }

    pub fn reward(&self, topic: &str) -> Result<f64, PersistError> {
        self.scale(topic, REWARD_FACTOR)
    }

    pub fn penalize(&self, topic: &str) -> Result<f64, PersistError> {
        self.scale(topic, PENALTY_FACTOR)
    }

    pub fn deadlock_penalty(&self, topic: &str) -> Result<f64, PersistError> {
        self.scale(topic, DEADLOCK_FACTOR)
    }

    /// Weighted random topic.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<String> {
        let entries: Vec<(String, f64)> = self
            .weights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        entries
            .choose_weighted(rng, |(_, w)| *w)
            .ok()
            .or_else(|| entries.choose(rng))
            .map(|(k, _)| k.clone())
    }

    /// Highest-weighted topics, heaviest first, name as tie-break.
    pub fn top(&self, limit: usize) -> Vec<(String, f64)> {
        let mut entries: Vec<(String, f64)> = self
            .weights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        entries.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(limit);
        entries
    }

    pub fn len(&self) -> usize {
        self.weights.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
