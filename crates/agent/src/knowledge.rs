//! `[KG: subject | relation | object]` markers in generated text.

use std::sync::LazyLock;

use kestrel_core::event::{DomainEvent, EventBus};
use kestrel_memory::KnowledgeGraph;
use regex_lite::Regex;
use tracing::{debug, info, warn};

static RE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[KG:\s*([^|\]]+?)\s*\|\s*([^|\]]+?)\s*\|\s*([^|\]]+?)\s*\]")
        .expect("knowledge marker pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple {
    pub subject: String,
    pub relation: String,
    pub object: String,
}

/// Distinct triples marked in `text`, in order of appearance.
pub fn extract_triples(text: &str) -> Vec<Triple> {
    let mut triples: Vec<Triple> = Vec::new();
    for caps in RE_MARKER.captures_iter(text) {
        let triple = Triple {
            subject: caps[1].trim().to_string(),
            relation: caps[2].trim().to_string(),
            object: caps[3].trim().to_string(),
        };
        if !triples.contains(&triple) {
            triples.push(triple);
        }
    }
    triples
}

/// Outcome of committing a batch of triples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub committed: usize,
    pub rejected: usize,
}

/// Add every triple to `graph`. Conflicts and persistence failures are
/// logged and counted, never raised.
pub fn commit_triples(graph: &KnowledgeGraph, triples: &[Triple], events: &EventBus) -> CommitSummary {
    let mut summary = CommitSummary::default();
    for t in triples {
        match graph.add_relation(&t.subject, &t.relation, &t.object) {
            Ok(true) => {
                info!(subject = %t.subject, relation = %t.relation, object = %t.object, "Relation committed");
                summary.committed += 1;
            }
            Ok(false) => {
                debug!(subject = %t.subject, relation = %t.relation, "Marker not committed");
                events.publish(DomainEvent::RelationRejected {
                    subject: t.subject.clone(),
                    relation: t.relation.clone(),
                    object: t.object.clone(),
                });
                summary.rejected += 1;
            }
            Err(e) => {
                warn!(error = %e, subject = %t.subject, "Relation could not be persisted");
                summary.rejected += 1;
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_are_extracted_and_trimmed() {
        let text = "Found it. [KG: tokio | is | async runtime] and [KG:petgraph|stores|graphs]";
        let triples = extract_triples(text);
        assert_eq!(triples.len(), 2);
        assert_eq!(triples[0].subject, "tokio");
        assert_eq!(triples[0].object, "async runtime");
        assert_eq!(triples[1].relation, "stores");
    }

    #[test]
    fn duplicates_and_incomplete_markers_are_dropped() {
        let text = "[KG: a | b | c] [KG: a | b | c] [KG: a | b]";
        assert_eq!(extract_triples(text).len(), 1);
    }

    #[test]
    fn conflicting_triple_is_rejected_not_raised() {
        let graph = KnowledgeGraph::in_memory();
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let triples = extract_triples("[KG: Rust | is | safe] [KG: Rust | is not | safe]");

        let summary = commit_triples(&graph, &triples, &bus);
        assert_eq!(summary, CommitSummary { committed: 1, rejected: 1 });
        assert_eq!(graph.edges_between("Rust", "safe").len(), 1);
        assert!(matches!(
            rx.try_recv().unwrap().as_ref(),
            DomainEvent::RelationRejected { .. }
        ));
    }
}
