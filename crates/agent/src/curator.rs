//! Adaptive trimming of the working context.
//!
//! Once history grows past [`CURATION_THRESHOLD`] entries, each message is
//! scored by a blend of recency and the graph importance of the entities it
//! mentions. The best [`KEEP_TOP`] survive together with the last
//! [`RECENCY_FLOOR`] messages and the leading system instruction, in their
//! original order.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use kestrel_core::message::Message;
use regex_lite::Regex;

pub const CURATION_THRESHOLD: usize = 15;
pub const KEEP_TOP: usize = 12;
pub const RECENCY_FLOOR: usize = 3;

const RECENCY_WEIGHT: f64 = 0.4;
const GRAPH_WEIGHT: f64 = 0.6;
const GRAPH_NORMALISER: f64 = 20.0;

/// Ideographic runs of 2-6 characters, or alphanumeric/hyphen runs of 3-15.
static RE_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x{4e00}-\x{9fa5}]{2,6}|[A-Za-z0-9\-]{3,15}").expect("entity pattern is valid")
});

/// Candidate entity names mentioned in `text`, in order of appearance.
pub fn extract_entities(text: &str) -> Vec<&str> {
    RE_ENTITY.find_iter(text).map(|m| m.as_str()).collect()
}

/// Composite score for the message at `index` of `total`.
pub fn score(index: usize, total: usize, graph_weight: f64) -> f64 {
    let recency = (index + 1) as f64 / total as f64;
    RECENCY_WEIGHT * recency + GRAPH_WEIGHT * (graph_weight / GRAPH_NORMALISER).min(1.0)
}

/// Curate `history`, looking up entity importance through `importance`.
///
/// Short histories are returned unchanged. Equal scores are broken by
/// original position so the result is deterministic.
pub fn curate(history: &[Message], importance: impl Fn(&str) -> f64) -> Vec<Message> {
    let total = history.len();
    if total <= CURATION_THRESHOLD {
        return history.to_vec();
    }

    let mut ranked: Vec<(usize, f64)> = history
        .iter()
        .enumerate()
        .map(|(i, msg)| {
            let graph_weight: f64 = extract_entities(&msg.content)
                .into_iter()
                .map(&importance)
                .sum();
            (i, score(i, total, graph_weight))
        })
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut keep: BTreeSet<usize> = ranked.iter().take(KEEP_TOP).map(|(i, _)| *i).collect();
    keep.extend(total - RECENCY_FLOOR..total);
    if history[0].is_system() {
        keep.insert(0);
    }

    keep.into_iter().map(|i| history[i].clone()).collect()
}
