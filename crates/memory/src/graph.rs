//! Knowledge graph — the persistent reasoning store.
//!
//! A directed multigraph of named nodes and labelled relations, backed by
//! `petgraph`. Nodes are created on first reference and never removed except
//! by [`KnowledgeGraph::clear`]. Every mutation rewrites the JSON document
//! at the configured path.
//!
//! # Conflict detection
//!
//! [`KnowledgeGraph::check_conflict`] is a polarity heuristic, not a theorem
//! prover. A relation is "negated" if its label contains a negation marker.
//! A candidate is rejected when an edge on the same ordered `(subject,
//! object)` pair has the opposite polarity. Relations from the subject to
//! other objects are not inspected.

use async_trait::async_trait;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use kestrel_core::error::GraphError;

use crate::community::greedy_modularity;
use crate::persist;

/// Importance multiplier for summary nodes.
pub const SUMMARY_MULTIPLIER: f64 = 1.5;

/// Relation linking a summary node to its members.
pub const CONTAINS_RELATION: &str = "contains";

/// Communities smaller than this are not summarized.
pub const MIN_COMMUNITY_SIZE: usize = 5;

/// Chance of skipping a community whose summary already exists.
pub const SUMMARY_SKIP_PROBABILITY: f64 = 0.9;

/// Fraction of the degree ranking sampled by leaf/hub strategies.
const STRATEGIC_BAND: f64 = 0.3;

/// Below this many candidates strategic selection is uniform.
const SMALL_GRAPH: usize = 4;

const NEGATION_WORDS: &[&str] = &[
    "not", "no", "none", "never", "neither", "nor", "cannot", "without", "lacks", "deny",
    "denies", "denied",
];
const NEGATION_STEMS: &[&str] = &["reject", "forbid", "prohibit", "exclud"];
const NEGATION_CJK: &[&str] = &["不是", "不属于", "不能", "没有", "并非", "拒绝", "禁止"];

/// True if a relation label carries negative polarity.
pub fn is_negated(relation: &str) -> bool {
    if NEGATION_CJK.iter().any(|m| relation.contains(m)) {
        return true;
    }
    relation
        .split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '\u{2019}'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase().replace('\u{2019}', "'"))
        .any(|t| {
            NEGATION_WORDS.contains(&t.as_str())
                || t.ends_with("n't")
                || NEGATION_STEMS.iter().any(|s| t.starts_with(s))
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Entity,
    Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_count: Option<usize>,
}

impl GraphNode {
    fn entity(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: NodeKind::Entity,
            description: None,
            member_count: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub relation: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// The persisted graph document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

/// Node-selection strategy for autonomous study.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Low-degree nodes: extend under-explored knowledge
    Leaf,
    /// High-degree nodes: consolidate core concepts
    Hub,
    Random,
}

/// Produces a description for a community of node ids.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, members: &[String]) -> Result<String, GraphError>;
}

#[derive(Debug, Clone)]
struct Relation {
    label: String,
    weight: f64,
}

#[derive(Default)]
struct Inner {
    graph: DiGraph<GraphNode, Relation>,
    index: HashMap<String, NodeIndex>,
}

enum Insert {
    Added,
    Duplicate,
    Conflict,
}

impl Inner {
    fn from_document(doc: GraphDocument) -> Self {
        let mut inner = Self::default();
        for node in doc.nodes {
            if inner.index.contains_key(&node.id) {
                continue;
            }
            let id = node.id.clone();
            let idx = inner.graph.add_node(node);
            inner.index.insert(id, idx);
        }
        for edge in doc.edges {
            let a = inner.ensure_entity(&edge.from);
            let b = inner.ensure_entity(&edge.to);
            inner.graph.add_edge(
                a,
                b,
                Relation {
                    label: edge.relation,
                    weight: edge.weight,
                },
            );
        }
        inner
    }

    fn to_document(&self) -> GraphDocument {
        GraphDocument {
            nodes: self.graph.node_weights().cloned().collect(),
            edges: self
                .graph
                .edge_references()
                .map(|e| GraphEdge {
                    from: self.graph[e.source()].id.clone(),
                    to: self.graph[e.target()].id.clone(),
                    relation: e.weight().label.clone(),
                    weight: e.weight().weight,
                })
                .collect(),
        }
    }

    fn ensure_entity(&mut self, id: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(GraphNode::entity(id));
        self.index.insert(id.to_string(), idx);
        idx
    }

    fn degree(&self, idx: NodeIndex) -> usize {
        self.graph.edges_directed(idx, Direction::Outgoing).count()
            + self.graph.edges_directed(idx, Direction::Incoming).count()
    }

    fn pair_relations(&self, subject: &str, object: &str) -> Vec<&str> {
        let (Some(&a), Some(&b)) = (self.index.get(subject), self.index.get(object)) else {
            return Vec::new();
        };
        self.graph
            .edges_connecting(a, b)
            .map(|e| e.weight().label.as_str())
            .collect()
    }

    fn conflicts(&self, subject: &str, relation: &str, object: &str) -> bool {
        let polarity = is_negated(relation);
        self.pair_relations(subject, object)
            .into_iter()
            .any(|existing| is_negated(existing) != polarity)
    }

    fn has_triple(&self, subject: &str, relation: &str, object: &str) -> bool {
        self.pair_relations(subject, object)
            .into_iter()
            .any(|existing| existing == relation)
    }
}

/// The knowledge graph shared by the orchestrator, curator and study loop.
pub struct KnowledgeGraph {
    path: Option<PathBuf>,
    inner: RwLock<Inner>,
    save_lock: Mutex<()>,
}

impl KnowledgeGraph {
    /// A graph that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: RwLock::new(Inner::default()),
            save_lock: Mutex::new(()),
        }
    }

    /// Load the graph document at `path`, or start empty if it does not exist.
    ///
    /// A corrupted document is moved aside to `<path>.corrupt` and the graph
    /// starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, GraphError> {
        let path = path.into();
        let doc = match persist::read_json::<GraphDocument>(&path) {
            Ok(doc) => doc.unwrap_or_default(),
            Err(persist::PersistError::Json { source, .. }) => {
                let mut aside = path.as_os_str().to_owned();
                aside.push(".corrupt");
                warn!(path = %path.display(), error = %source, "Graph document corrupted, starting empty");
                if let Err(e) = std::fs::rename(&path, PathBuf::from(aside)) {
                    warn!(error = %e, "Failed to move corrupted graph aside");
                }
                GraphDocument::default()
            }
            Err(e) => {
                return Err(GraphError::Persistence {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let inner = Inner::from_document(doc);
        debug!(
            path = %path.display(),
            nodes = inner.graph.node_count(),
            edges = inner.graph.edge_count(),
            "Knowledge graph loaded"
        );
        Ok(Self {
            path: Some(path),
            inner: RwLock::new(inner),
            save_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a mutation and persist if it reports a change.
    ///
    /// The save lock is held across mutate + write so documents land on disk
    /// in mutation order; the graph lock is released before file I/O.
    fn commit<R>(&self, mutate: impl FnOnce(&mut Inner) -> (R, bool)) -> Result<R, GraphError> {
        let _save = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (result, doc) = {
            let mut inner = self.write();
            let (result, changed) = mutate(&mut inner);
            let doc = match (&self.path, changed) {
                (Some(_), true) => Some(inner.to_document()),
                _ => None,
            };
            (result, doc)
        };
        if let (Some(path), Some(doc)) = (&self.path, doc) {
            persist::write_json_atomic(path, &doc).map_err(|e| GraphError::Persistence {
                path: e.path().display().to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(result)
    }

    /// Insert `subject -[relation]-> object` with weight 1.0.
    pub fn add_relation(&self, subject: &str, relation: &str, object: &str) -> Result<bool, GraphError> {
        self.add_weighted_relation(subject, relation, object, 1.0)
    }

    /// Insert a relation unless it conflicts with an existing one.
    ///
    /// Returns `false` if conflict detection rejected it (graph unchanged).
    /// Re-adding an identical triple is a no-op that returns `true`.
    pub fn add_weighted_relation(
        &self,
        subject: &str,
        relation: &str,
        object: &str,
        weight: f64,
    ) -> Result<bool, GraphError> {
        let (subject, relation, object) = (subject.trim(), relation.trim(), object.trim());
        if subject.is_empty() || relation.is_empty() || object.is_empty() {
            debug!("Ignoring relation with an empty component");
            return Ok(false);
        }

        let outcome = self.commit(|inner| {
            if inner.conflicts(subject, relation, object) {
                return (Insert::Conflict, false);
            }
            if inner.has_triple(subject, relation, object) {
                return (Insert::Duplicate, false);
            }
            let a = inner.ensure_entity(subject);
            let b = inner.ensure_entity(object);
            inner.graph.add_edge(
                a,
                b,
                Relation {
                    label: relation.to_string(),
                    weight,
                },
            );
            (Insert::Added, true)
        })?;

        match outcome {
            Insert::Added => {
                debug!(%subject, %relation, %object, "Relation added");
                Ok(true)
            }
            Insert::Duplicate => Ok(true),
            Insert::Conflict => {
                warn!(%subject, %relation, %object, "Relation rejected: contradicts an existing relation");
                Ok(false)
            }
        }
    }

    /// True if an edge on the same ordered pair has opposite polarity.
    pub fn check_conflict(&self, subject: &str, relation: &str, object: &str) -> bool {
        self.read()
            .conflicts(subject.trim(), relation.trim(), object.trim())
    }

    /// Degree centrality (in + out), ×1.5 for summary nodes. Unknown ids score 0.
    pub fn node_importance(&self, id: &str) -> f64 {
        let inner = self.read();
        let Some(&idx) = inner.index.get(id) else {
            return 0.0;
        };
        let degree = inner.degree(idx) as f64;
        match inner.graph[idx].kind {
            NodeKind::Summary => degree * SUMMARY_MULTIPLIER,
            NodeKind::Entity => degree,
        }
    }

    /// Pick a node according to `strategy`.
    ///
    /// Every node, summaries included, is ranked by degree ascending (ties by
    /// id). Leaf samples the lowest 30%, hub the highest 30%. Graphs with
    /// fewer than four nodes, or where every node has the same degree, are
    /// sampled uniformly.
    pub fn strategic_node<R: Rng + ?Sized>(&self, strategy: Strategy, rng: &mut R) -> Option<String> {
        let inner = self.read();
        let mut ranked: Vec<(usize, &str)> = inner
            .graph
            .node_indices()
            .map(|i| (inner.degree(i), inner.graph[i].id.as_str()))
            .collect();
        ranked.sort_unstable();

        let (first, last) = (ranked.first()?.0, ranked.last()?.0);
        let band = ((ranked.len() as f64 * STRATEGIC_BAND).ceil() as usize).max(1);
        let uniform = ranked.len() < SMALL_GRAPH || first == last;
        let pool = match strategy {
            _ if uniform => &ranked[..],
            Strategy::Random => &ranked[..],
            Strategy::Leaf => &ranked[..band],
            Strategy::Hub => &ranked[ranked.len() - band..],
        };
        pool.choose(rng).map(|(_, id)| id.to_string())
    }

    /// Relations within `depth` hops of `entity`, rendered `A —[rel]→ B`.
    ///
    /// The neighborhood ignores edge direction; every edge between two
    /// nodes in it is reported once. Unknown entities yield nothing.
    pub fn query_logic_chain(&self, entity: &str, depth: usize) -> Vec<String> {
        let inner = self.read();
        let Some(&start) = inner.index.get(entity.trim()) else {
            return Vec::new();
        };

        let mut dist: HashMap<NodeIndex, usize> = HashMap::from([(start, 0)]);
        let mut order = vec![start];
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            let d = dist.get(&node).copied().unwrap_or(0);
            if d >= depth {
                continue;
            }
            for nbr in inner.graph.neighbors_undirected(node) {
                if !dist.contains_key(&nbr) {
                    dist.insert(nbr, d + 1);
                    order.push(nbr);
                    queue.push_back(nbr);
                }
            }
        }

        let mut seen = HashSet::new();
        let mut chains = Vec::new();
        for &node in &order {
            for edge in inner.graph.edges_directed(node, Direction::Outgoing) {
                if !dist.contains_key(&edge.target()) {
                    continue;
                }
                let line = format!(
                    "{} —[{}]→ {}",
                    inner.graph[node].id,
                    edge.weight().label,
                    inner.graph[edge.target()].id
                );
                if seen.insert(line.clone()) {
                    chains.push(line);
                }
            }
        }
        chains
    }

    /// Cluster entities and (re)generate summary nodes for large communities.
    ///
    /// Returns the number of summaries written. A summarizer failure skips
    /// that community.
    pub async fn update_community_summaries<R: Rng + Send + ?Sized>(
        &self,
        summarizer: &dyn Summarizer,
        rng: &mut R,
    ) -> Result<usize, GraphError> {
        let plan: Vec<(String, Vec<String>, bool)> = {
            let inner = self.read();
            let entities: Vec<NodeIndex> = inner
                .graph
                .node_indices()
                .filter(|&i| inner.graph[i].kind == NodeKind::Entity)
                .collect();
            let position: HashMap<NodeIndex, usize> =
                entities.iter().enumerate().map(|(p, &i)| (i, p)).collect();
            let edges: Vec<(usize, usize, f64)> = inner
                .graph
                .edge_references()
                .filter_map(|e| {
                    Some((
                        *position.get(&e.source())?,
                        *position.get(&e.target())?,
                        e.weight().weight,
                    ))
                })
                .collect();

            greedy_modularity(entities.len(), &edges)
                .into_iter()
                .enumerate()
                .filter(|(_, members)| members.len() >= MIN_COMMUNITY_SIZE)
                .map(|(n, members)| {
                    let id = format!("community_summary_{n}");
                    let exists = inner.index.contains_key(&id);
                    let names = members
                        .iter()
                        .map(|&p| inner.graph[entities[p]].id.clone())
                        .collect();
                    (id, names, exists)
                })
                .collect()
        };

        let mut written = 0;
        for (id, members, exists) in plan {
            if exists && rng.random::<f64>() < SUMMARY_SKIP_PROBABILITY {
                debug!(summary = %id, "Keeping existing community summary");
                continue;
            }
            let description = match summarizer.summarize(&members).await {
                Ok(d) => d,
                Err(e) => {
                    warn!(summary = %id, error = %e, "Summarizer failed, skipping community");
                    continue;
                }
            };

            self.commit(|inner| {
                let idx = match inner.index.get(&id) {
                    Some(&idx) => idx,
                    None => {
                        let idx = inner.graph.add_node(GraphNode::entity(&id));
                        inner.index.insert(id.clone(), idx);
                        idx
                    }
                };
                let node = &mut inner.graph[idx];
                node.kind = NodeKind::Summary;
                node.description = Some(description);
                node.member_count = Some(members.len());

                for member in &members {
                    if !inner.has_triple(&id, CONTAINS_RELATION, member) {
                        let m = inner.ensure_entity(member);
                        inner.graph.add_edge(
                            idx,
                            m,
                            Relation {
                                label: CONTAINS_RELATION.to_string(),
                                weight: 1.0,
                            },
                        );
                    }
                }
                ((), true)
            })?;
            info!(summary = %id, members = members.len(), "Community summary updated");
            written += 1;
        }
        Ok(written)
    }

    pub fn node(&self, id: &str) -> Option<GraphNode> {
        let inner = self.read();
        inner.index.get(id).map(|&idx| inner.graph[idx].clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().index.contains_key(id)
    }

    /// All edges from `from` to `to`.
    pub fn edges_between(&self, from: &str, to: &str) -> Vec<GraphEdge> {
        self.read()
            .pair_relations(from, to)
            .into_iter()
            .map(|relation| GraphEdge {
                from: from.to_string(),
                to: to.to_string(),
                relation: relation.to_string(),
                weight: 1.0,
            })
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.read().graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.read().graph.edge_count()
    }

    pub fn summary_count(&self) -> usize {
        self.read()
            .graph
            .node_weights()
            .filter(|n| n.kind == NodeKind::Summary)
            .count()
    }

    /// Entity ids ordered by importance, highest first.
    pub fn top_entities(&self, limit: usize) -> Vec<(String, f64)> {
        let inner = self.read();
        let mut ranked: Vec<(String, f64)> = inner
            .graph
            .node_indices()
            .filter(|&i| inner.graph[i].kind == NodeKind::Entity)
            .map(|i| (inner.graph[i].id.clone(), inner.degree(i) as f64))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }

    pub fn document(&self) -> GraphDocument {
        self.read().to_document()
    }

    /// Remove every node and edge.
    pub fn clear(&self) -> Result<(), GraphError> {
        self.commit(|inner| {
            *inner = Inner::default();
            ((), true)
        })
    }
}
