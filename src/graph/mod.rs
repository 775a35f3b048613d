//! Directed dependency multigraph over opaque resource identities
//!
//! The graph stores only identities plus adjacency, never resource
//! internals. An edge `source -> target` means `source` converges
//! before `target`; equivalently, `target` depends on `source`.
//!
//! Invariants every public operation maintains:
//!
//! - the forward (`out_from`) and reverse (`in_to`) adjacency maps are
//!   mirror images
//! - every edge endpoint is a vertex
//! - removing a vertex removes all edges touching it first; no
//!   operation leaves an edge referencing an absent vertex
//! - multiple edges between the same pair carry distinct labels
//!   (set-of-labels semantics: re-adding an identical label is a no-op)
//!
//! Transitive-closure queries are memoized per vertex and stamped with
//! a revision counter bumped on every mutation, so reads between
//! mutations short-circuit while stale entries are discarded lazily.

pub mod cycle;

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

/// Bounds required of a vertex identity
///
/// `Display` supplies the stable textual form used for deterministic
/// ordering and cycle reports. Blanket-implemented; `String` qualifies.
pub trait GraphVertex: Clone + Eq + Hash + fmt::Debug + fmt::Display {}

impl<T: Clone + Eq + Hash + fmt::Debug + fmt::Display> GraphVertex for T {}

/// Which events an edge forwards to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventFilter {
    /// Pure ordering edge; no events cross it
    None,
    /// All events from the source are forwarded
    All,
}

/// What the target does when an event arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Callback {
    /// Re-trigger the target (restart a service, rerun an exec, ...)
    Refresh,
}

/// Label on a dependency edge: an event filter plus optional callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeLabel {
    pub event: EventFilter,
    pub callback: Option<Callback>,
}

impl EdgeLabel {
    /// A pure ordering edge that forwards nothing
    pub fn ordering() -> Self {
        Self { event: EventFilter::None, callback: None }
    }

    /// A notification edge: all events, refresh callback
    pub fn notify() -> Self {
        Self { event: EventFilter::All, callback: Some(Callback::Refresh) }
    }

    /// Whether an event with the given name crosses this edge
    pub fn matches(&self, _event_name: &str) -> bool {
        matches!(self.event, EventFilter::All)
    }
}

impl Default for EdgeLabel {
    fn default() -> Self {
        Self::ordering()
    }
}

/// A labeled edge between two vertices
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge<V> {
    pub source: V,
    pub target: V,
    pub label: EdgeLabel,
}

/// Direction of an adjacency query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Edges leading into a vertex (its dependencies)
    In,
    /// Edges leading out of a vertex (its dependents)
    Out,
}

type Adjacency<V> = HashMap<V, HashMap<V, HashSet<EdgeLabel>>>;

#[derive(Debug)]
struct ClosureCache<V> {
    revision: u64,
    upstream: HashMap<V, HashSet<V>>,
    downstream: HashMap<V, HashSet<V>>,
}

impl<V> Default for ClosureCache<V> {
    fn default() -> Self {
        Self { revision: 0, upstream: HashMap::new(), downstream: HashMap::new() }
    }
}

/// Generic directed multigraph with cycle detection, topological
/// ordering, transitive-closure queries, and container splicing
#[derive(Debug)]
pub struct RelationshipGraph<V: GraphVertex> {
    in_to: Adjacency<V>,
    out_from: Adjacency<V>,
    revision: u64,
    closure: RefCell<ClosureCache<V>>,
}

impl<V: GraphVertex> Default for RelationshipGraph<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: GraphVertex> RelationshipGraph<V> {
    /// Create an empty graph
    pub fn new() -> Self {
        Self {
            in_to: HashMap::new(),
            out_from: HashMap::new(),
            revision: 0,
            closure: RefCell::new(ClosureCache::default()),
        }
    }

    /// Number of vertices
    pub fn len(&self) -> usize {
        self.in_to.len()
    }

    /// Whether the graph has no vertices
    pub fn is_empty(&self) -> bool {
        self.in_to.is_empty()
    }

    /// Test whether a vertex is in the graph
    pub fn has_vertex(&self, v: &V) -> bool {
        self.in_to.contains_key(v)
    }

    /// All vertices, in unspecified order
    pub fn vertices(&self) -> Vec<V> {
        self.in_to.keys().cloned().collect()
    }

    /// All edges, in unspecified order
    pub fn edges(&self) -> Vec<Edge<V>> {
        let mut result = Vec::new();
        for (source, targets) in &self.out_from {
            for (target, labels) in targets {
                for label in labels {
                    result.push(Edge {
                        source: source.clone(),
                        target: target.clone(),
                        label: *label,
                    });
                }
            }
        }
        result
    }

    /// Add a vertex; a no-op if it is already present
    pub fn add_vertex(&mut self, v: V) {
        self.in_to.entry(v.clone()).or_default();
        self.out_from.entry(v).or_default();
    }

    /// Remove a vertex, cascading removal of every edge touching it
    pub fn remove_vertex(&mut self, v: &V) {
        if !self.has_vertex(v) {
            return;
        }
        let touching: Vec<Edge<V>> = self
            .adjacent_edges(v, Direction::In)
            .into_iter()
            .chain(self.adjacent_edges(v, Direction::Out))
            .collect();
        for edge in &touching {
            self.remove_edge(edge);
        }
        self.in_to.remove(v);
        self.out_from.remove(v);
        self.bump();
    }

    /// Add an edge, creating missing endpoints
    ///
    /// Idempotent per label: adding the same (source, target, label)
    /// twice leaves a single edge.
    pub fn add_edge(&mut self, source: V, target: V, label: EdgeLabel) {
        self.add_vertex(source.clone());
        self.add_vertex(target.clone());
        self.in_to
            .get_mut(&target)
            .expect("endpoint added above")
            .entry(source.clone())
            .or_default()
            .insert(label);
        self.out_from
            .get_mut(&source)
            .expect("endpoint added above")
            .entry(target)
            .or_default()
            .insert(label);
        self.bump();
    }

    /// Remove one labeled edge; a no-op if it is not present
    pub fn remove_edge(&mut self, edge: &Edge<V>) {
        let mut removed = false;
        if let Some(targets) = self.out_from.get_mut(&edge.source)
            && let Some(labels) = targets.get_mut(&edge.target)
        {
            removed = labels.remove(&edge.label);
            if labels.is_empty() {
                targets.remove(&edge.target);
            }
        }
        if let Some(sources) = self.in_to.get_mut(&edge.target)
            && let Some(labels) = sources.get_mut(&edge.source)
        {
            labels.remove(&edge.label);
            if labels.is_empty() {
                sources.remove(&edge.source);
            }
        }
        if removed {
            self.bump();
        }
    }

    /// Whether at least one edge runs from `source` to `target`
    pub fn has_edge(&self, source: &V, target: &V) -> bool {
        self.out_from
            .get(source)
            .is_some_and(|targets| targets.contains_key(target))
    }

    /// All edges from `source` to `target`
    pub fn edges_between(&self, source: &V, target: &V) -> Vec<Edge<V>> {
        self.out_from
            .get(source)
            .and_then(|targets| targets.get(target))
            .map(|labels| {
                labels
                    .iter()
                    .map(|label| Edge {
                        source: source.clone(),
                        target: target.clone(),
                        label: *label,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Neighboring vertices in the given direction
    pub fn adjacent(&self, v: &V, direction: Direction) -> Vec<V> {
        let map = match direction {
            Direction::In => &self.in_to,
            Direction::Out => &self.out_from,
        };
        map.get(v).map(|ns| ns.keys().cloned().collect()).unwrap_or_default()
    }

    /// Edges touching a vertex in the given direction
    pub fn adjacent_edges(&self, v: &V, direction: Direction) -> Vec<Edge<V>> {
        let mut result = Vec::new();
        match direction {
            Direction::In => {
                if let Some(sources) = self.in_to.get(v) {
                    for (source, labels) in sources {
                        for label in labels {
                            result.push(Edge {
                                source: source.clone(),
                                target: v.clone(),
                                label: *label,
                            });
                        }
                    }
                }
            }
            Direction::Out => {
                if let Some(targets) = self.out_from.get(v) {
                    for (target, labels) in targets {
                        for label in labels {
                            result.push(Edge {
                                source: v.clone(),
                                target: target.clone(),
                                label: *label,
                            });
                        }
                    }
                }
            }
        }
        result
    }

    /// Vertices this vertex directly depends on (in-neighbors)
    pub fn direct_dependencies_of(&self, v: &V) -> Vec<V> {
        self.adjacent(v, Direction::In)
    }

    /// Vertices directly depending on this vertex (out-neighbors)
    pub fn direct_dependents_of(&self, v: &V) -> Vec<V> {
        self.adjacent(v, Direction::Out)
    }

    /// Everything this vertex transitively depends on
    ///
    /// Memoized; the cache survives until the next graph mutation.
    pub fn dependencies(&self, v: &V) -> HashSet<V> {
        self.reachable(v, Direction::In)
    }

    /// Everything transitively depending on this vertex
    pub fn dependents(&self, v: &V) -> HashSet<V> {
        self.reachable(v, Direction::Out)
    }

    /// Outbound edges of `source` that forward an event with this name
    ///
    /// Warns and returns nothing for a vertex not in the graph.
    pub fn matching_edges(&self, source: &V, event_name: &str) -> Vec<Edge<V>> {
        if !self.has_vertex(source) {
            log::warn!("got an event from invalid vertex {source}");
            return Vec::new();
        }
        self.adjacent_edges(source, Direction::Out)
            .into_iter()
            .filter(|edge| edge.label.matches(event_name))
            .collect()
    }

    /// Replace container vertices with admissible/completed sentinel pairs
    ///
    /// `containment` holds container -> content edges (the structural
    /// view of the catalog); `is_container` decides which of its
    /// vertices are containers; `sentinels` mints the (admissible,
    /// completed) identities for one container.
    ///
    /// For each container C with direct contents c1..ck:
    ///
    /// 1. completed(C) depends on admissible(C)
    /// 2. each ci's admissible-equivalent depends on admissible(C)
    /// 3. completed(C) depends on each ci's completed-equivalent
    /// 4. dependents of C now depend on completed(C)
    /// 5. admissible(C) depends on everything C depended on
    /// 6. C and its edges are removed
    ///
    /// Containers that contain or depend on other containers resolve
    /// through the sentinel maps, so the new edge count stays linear in
    /// the number of contained vertices regardless of nesting depth.
    pub fn splice<P, F>(&mut self, containment: &RelationshipGraph<V>, is_container: P, mut sentinels: F)
    where
        P: Fn(&V) -> bool,
        F: FnMut(&V) -> (V, V),
    {
        let mut containers: Vec<V> = containment
            .vertices()
            .into_iter()
            .filter(|v| is_container(v) && self.has_vertex(v))
            .collect();
        containers.sort_by_key(ToString::to_string);

        let mut admissible: HashMap<V, V> = HashMap::new();
        let mut completed: HashMap<V, V> = HashMap::new();
        for container in &containers {
            let (adm, comp) = sentinels(container);
            admissible.insert(container.clone(), adm);
            completed.insert(container.clone(), comp);
        }
        // Pass non-containers through unchanged so edges to vertices that
        // may or may not be containers land on the right endpoint.
        let adm_of = |v: &V| admissible.get(v).unwrap_or(v).clone();
        let comp_of = |v: &V| completed.get(v).unwrap_or(v).clone();

        for container in &containers {
            let adm = adm_of(container);
            let comp = comp_of(container);
            self.add_edge(adm.clone(), comp.clone(), EdgeLabel::notify());
            for content in containment.adjacent(container, Direction::Out) {
                self.add_edge(adm.clone(), adm_of(&content), EdgeLabel::notify());
                self.add_edge(comp_of(&content), comp.clone(), EdgeLabel::notify());
            }
            for edge in self.adjacent_edges(container, Direction::Out) {
                self.add_edge(comp.clone(), adm_of(&edge.target), edge.label);
                self.remove_edge(&edge);
            }
            for edge in self.adjacent_edges(container, Direction::In) {
                self.add_edge(comp_of(&edge.source), adm.clone(), edge.label);
                self.remove_edge(&edge);
            }
        }

        for container in &containers {
            self.remove_vertex(container);
        }
    }

    /// A copy of this graph with every edge direction flipped
    pub fn reversal(&self) -> Self {
        let mut reversed = Self::new();
        for v in self.vertices() {
            reversed.add_vertex(v);
        }
        for edge in self.edges() {
            reversed.add_edge(edge.target, edge.source, edge.label);
        }
        reversed
    }

    fn bump(&mut self) {
        self.revision += 1;
    }

    fn reachable(&self, v: &V, direction: Direction) -> HashSet<V> {
        let mut cache = self.closure.borrow_mut();
        if cache.revision != self.revision {
            *cache = ClosureCache { revision: self.revision, ..ClosureCache::default() };
        }
        let memo = match direction {
            Direction::In => &mut cache.upstream,
            Direction::Out => &mut cache.downstream,
        };
        if let Some(hit) = memo.get(v) {
            return hit.clone();
        }

        // Iterative breadth-first walk; catalog graphs can be deep and
        // must not risk native stack exhaustion.
        let mut result = HashSet::new();
        let mut stack = self.adjacent(v, direction);
        while let Some(node) = stack.pop() {
            if result.insert(node.clone()) {
                stack.extend(self.adjacent(&node, direction));
            }
        }
        memo.insert(v.clone(), result.clone());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &str)]) -> RelationshipGraph<String> {
        let mut g = RelationshipGraph::new();
        for (s, t) in edges {
            g.add_edge((*s).to_string(), (*t).to_string(), EdgeLabel::ordering());
        }
        g
    }

    #[test]
    fn add_edge_creates_endpoints() {
        let g = graph(&[("a", "b")]);
        assert!(g.has_vertex(&"a".to_string()));
        assert!(g.has_vertex(&"b".to_string()));
        assert!(g.has_edge(&"a".to_string(), &"b".to_string()));
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn duplicate_label_is_noop() {
        let mut g = graph(&[("a", "b")]);
        g.add_edge("a".to_string(), "b".to_string(), EdgeLabel::ordering());
        assert_eq!(g.edges().len(), 1);
        assert_eq!(g.edges_between(&"a".to_string(), &"b".to_string()).len(), 1);
    }

    #[test]
    fn distinct_labels_coexist() {
        let mut g = graph(&[("a", "b")]);
        g.add_edge("a".to_string(), "b".to_string(), EdgeLabel::notify());
        assert_eq!(g.edges_between(&"a".to_string(), &"b".to_string()).len(), 2);
    }

    #[test]
    fn remove_vertex_cascades_edges() {
        let mut g = graph(&[("a", "b"), ("b", "c")]);
        g.remove_vertex(&"b".to_string());
        assert!(!g.has_vertex(&"b".to_string()));
        assert!(g.edges().is_empty());
        assert!(g.adjacent(&"a".to_string(), Direction::Out).is_empty());
        assert!(g.adjacent(&"c".to_string(), Direction::In).is_empty());
    }

    #[test]
    fn remove_edge_keeps_other_labels() {
        let mut g = graph(&[("a", "b")]);
        g.add_edge("a".to_string(), "b".to_string(), EdgeLabel::notify());
        g.remove_edge(&Edge {
            source: "a".to_string(),
            target: "b".to_string(),
            label: EdgeLabel::ordering(),
        });
        let remaining = g.edges_between(&"a".to_string(), &"b".to_string());
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].label, EdgeLabel::notify());
    }

    #[test]
    fn adjacency_mirrors() {
        let g = graph(&[("a", "b"), ("a", "c")]);
        let mut out = g.adjacent(&"a".to_string(), Direction::Out);
        out.sort();
        assert_eq!(out, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(g.adjacent(&"b".to_string(), Direction::In), vec!["a".to_string()]);
    }

    #[test]
    fn transitive_closure() {
        let g = graph(&[("a", "b"), ("b", "c"), ("x", "c")]);
        let deps = g.dependencies(&"c".to_string());
        assert!(deps.contains("a"));
        assert!(deps.contains("b"));
        assert!(deps.contains("x"));
        let dependents = g.dependents(&"a".to_string());
        assert_eq!(dependents.len(), 2);
        assert!(dependents.contains("b"));
        assert!(dependents.contains("c"));
    }

    #[test]
    fn closure_cache_invalidated_on_mutation() {
        let mut g = graph(&[("a", "b")]);
        assert!(g.dependents(&"a".to_string()).contains("b"));
        g.add_edge("b".to_string(), "c".to_string(), EdgeLabel::ordering());
        assert!(g.dependents(&"a".to_string()).contains("c"));
        g.remove_vertex(&"c".to_string());
        assert!(!g.dependents(&"a".to_string()).contains("c"));
    }

    #[test]
    fn matching_edges_filters_by_label() {
        let mut g = graph(&[("a", "b")]);
        g.add_edge("a".to_string(), "c".to_string(), EdgeLabel::notify());
        let matched = g.matching_edges(&"a".to_string(), "content_changed");
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].target, "c");
    }

    #[test]
    fn matching_edges_for_unknown_vertex_is_empty() {
        let g = graph(&[("a", "b")]);
        assert!(g.matching_edges(&"ghost".to_string(), "changed").is_empty());
    }

    #[test]
    fn reversal_flips_edges_and_keeps_labels() {
        let mut g = graph(&[("a", "b")]);
        g.add_edge("b".to_string(), "c".to_string(), EdgeLabel::notify());
        g.add_vertex("lone".to_string());

        let reversed = g.reversal();
        assert_eq!(reversed.len(), g.len());
        assert!(reversed.has_edge(&"b".to_string(), &"a".to_string()));
        assert!(reversed.has_vertex(&"lone".to_string()));
        let labels = reversed.edges_between(&"c".to_string(), &"b".to_string());
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].label, EdgeLabel::notify());
    }

    #[test]
    fn splice_preserves_reachability() {
        // P -> C -> S with C containing c1 and c2.
        let mut g = graph(&[("p", "container"), ("container", "s")]);
        g.add_vertex("c1".to_string());
        g.add_vertex("c2".to_string());
        let mut containment = graph(&[("container", "c1"), ("container", "c2")]);
        containment.add_vertex("p".to_string());
        containment.add_vertex("s".to_string());

        g.splice(
            &containment,
            |v| v == "container",
            |v| (format!("admissible_{v}"), format!("completed_{v}")),
        );

        assert!(!g.has_vertex(&"container".to_string()));
        for content in ["c1", "c2"] {
            assert!(g.dependencies(&content.to_string()).contains("p"), "{content} must follow p");
            assert!(g.dependents(&content.to_string()).contains("s"), "{content} must precede s");
        }
    }

    #[test]
    fn splice_handles_nested_containers() {
        // outer contains inner, inner contains leaf; x depends on outer.
        let mut g = graph(&[("outer", "x")]);
        g.add_vertex("inner".to_string());
        g.add_vertex("leaf".to_string());
        let containment = graph(&[("outer", "inner"), ("inner", "leaf")]);

        g.splice(
            &containment,
            |v| v == "outer" || v == "inner",
            |v| (format!("admissible_{v}"), format!("completed_{v}")),
        );

        assert!(!g.has_vertex(&"outer".to_string()));
        assert!(!g.has_vertex(&"inner".to_string()));
        assert!(g.dependents(&"leaf".to_string()).contains("x"));
    }

    #[test]
    fn splice_rewired_edges_keep_labels() {
        let mut g = RelationshipGraph::new();
        g.add_edge("container".to_string(), "s".to_string(), EdgeLabel::notify());
        let containment = graph(&[("container", "c1")]);

        g.splice(
            &containment,
            |v| v == "container",
            |v| (format!("admissible_{v}"), format!("completed_{v}")),
        );

        let rewired = g.edges_between(&"completed_container".to_string(), &"s".to_string());
        assert_eq!(rewired.len(), 1);
        assert_eq!(rewired[0].label, EdgeLabel::notify());
    }
}
