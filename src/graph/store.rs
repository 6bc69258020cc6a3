// src/graph/store.rs — Bounded, capacity-evicting node/edge storage

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use super::decay::HalfLife;
use super::model::{GraphEdge, GraphNode};
use crate::infra::errors::{HabitusError, Result};

/// Capacity and decay settings for a [`GraphStore`].
#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    pub max_nodes: usize,
    pub max_edges: usize,
    pub node_half_life: HalfLife,
    pub edge_half_life: HalfLife,
}

/// What an eviction or prune pass removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Eviction {
    /// Nodes removed, with their effective score at eviction time.
    pub nodes: Vec<(String, f64)>,
    /// Edges removed on their own account, with effective weight.
    pub edges: Vec<(String, f64)>,
    /// Edges removed because an endpoint was removed.
    pub cascaded_edges: Vec<String>,
}

impl Eviction {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty() && self.cascaded_edges.is_empty()
    }

    pub fn removed_edge_ids(&self) -> impl Iterator<Item = &str> {
        self.edges
            .iter()
            .map(|(id, _)| id.as_str())
            .chain(self.cascaded_edges.iter().map(String::as_str))
    }

    pub fn removed_node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|(id, _)| id.as_str())
    }

    fn extend(&mut self, other: Eviction) {
        self.nodes.extend(other.nodes);
        self.edges.extend(other.edges);
        self.cascaded_edges.extend(other.cascaded_edges);
    }
}

/// In-memory keyed store. Edges always reference existing nodes.
///
/// Not synchronized; owners wrap it in a single lock.
#[derive(Debug)]
pub struct GraphStore {
    nodes: HashMap<String, GraphNode>,
    edges: HashMap<String, GraphEdge>,
    limits: StoreLimits,
}

impl GraphStore {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            limits,
        }
    }

    pub fn limits(&self) -> &StoreLimits {
        &self.limits
    }

    // -- Nodes --

    /// Insert or replace a node by id.
    pub fn upsert_node(&mut self, node: GraphNode) -> Result<()> {
        node.validate()?;
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    pub fn get_node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Remove a node and every edge that references it.
    pub fn remove_node(&mut self, id: &str) -> Option<(GraphNode, Vec<GraphEdge>)> {
        let node = self.nodes.remove(id)?;
        let edge_ids: Vec<String> = self
            .edges
            .values()
            .filter(|e| e.touches(id))
            .map(|e| e.id.clone())
            .collect();
        let mut removed: Vec<GraphEdge> = edge_ids
            .iter()
            .filter_map(|eid| self.edges.remove(eid))
            .collect();
        removed.sort_by(|a, b| a.id.cmp(&b.id));
        Some((node, removed))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_score(&self, node: &GraphNode, now_ms: i64) -> f64 {
        self.limits
            .node_half_life
            .decayed(node.score, node.updated_at_ms, now_ms)
    }

    // -- Edges --

    /// Insert or replace an edge by id. Both endpoints must already exist.
    pub fn upsert_edge(&mut self, edge: GraphEdge) -> Result<()> {
        edge.validate()?;
        for endpoint in [&edge.from, &edge.to] {
            if !self.nodes.contains_key(endpoint) {
                return Err(HabitusError::validation(
                    "edge",
                    format!("endpoint '{endpoint}' of '{}' does not exist", edge.id),
                ));
            }
        }
        self.edges.insert(edge.id.clone(), edge);
        Ok(())
    }

    pub fn get_edge(&self, id: &str) -> Option<&GraphEdge> {
        self.edges.get(id)
    }

    /// Edges matching every given filter, ordered by id.
    pub fn get_edges(
        &self,
        from: Option<&str>,
        to: Option<&str>,
        edge_type: Option<&str>,
    ) -> Vec<&GraphEdge> {
        let mut out: Vec<&GraphEdge> = self
            .edges
            .values()
            .filter(|e| from.map_or(true, |f| e.from == f))
            .filter(|e| to.map_or(true, |t| e.to == t))
            .filter(|e| edge_type.map_or(true, |t| e.edge_type == t))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn remove_edge(&mut self, id: &str) -> Option<GraphEdge> {
        self.edges.remove(id)
    }

    pub fn edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.edges.values()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge_weight(&self, edge: &GraphEdge, now_ms: i64) -> f64 {
        self.limits
            .edge_half_life
            .decayed(edge.weight, edge.updated_at_ms, now_ms)
    }

    // -- Eviction --

    /// Evict lowest-scoring nodes, then lowest-weight edges, until both
    /// counts are within capacity. Ties break on id (smaller id goes first).
    pub fn enforce_capacity(&mut self, now_ms: i64) -> Eviction {
        let mut eviction = Eviction::default();

        if self.nodes.len() > self.limits.max_nodes {
            let excess = self.nodes.len() - self.limits.max_nodes;
            let ranked = self.ranked_nodes(now_ms);
            for (id, score) in ranked.into_iter().take(excess) {
                if let Some((_, edges)) = self.remove_node(&id) {
                    eviction
                        .cascaded_edges
                        .extend(edges.into_iter().map(|e| e.id));
                    eviction.nodes.push((id, score));
                }
            }
        }

        if self.edges.len() > self.limits.max_edges {
            let excess = self.edges.len() - self.limits.max_edges;
            let ranked = self.ranked_edges(now_ms);
            for (id, weight) in ranked.into_iter().take(excess) {
                if self.edges.remove(&id).is_some() {
                    eviction.edges.push((id, weight));
                }
            }
        }

        eviction
    }

    /// Physically remove entries whose decayed value fell below the minimum.
    pub fn prune_below(&mut self, node_min_score: f64, edge_min_weight: f64, now_ms: i64) -> Eviction {
        let mut eviction = Eviction::default();

        let weak_nodes: Vec<(String, f64)> = self
            .ranked_nodes(now_ms)
            .into_iter()
            .filter(|(_, score)| *score < node_min_score)
            .collect();
        for (id, score) in weak_nodes {
            if let Some((_, edges)) = self.remove_node(&id) {
                eviction
                    .cascaded_edges
                    .extend(edges.into_iter().map(|e| e.id));
                eviction.nodes.push((id, score));
            }
        }

        let weak_edges: Vec<(String, f64)> = self
            .ranked_edges(now_ms)
            .into_iter()
            .filter(|(_, w)| *w < edge_min_weight)
            .collect();
        for (id, weight) in weak_edges {
            if self.edges.remove(&id).is_some() {
                eviction.edges.push((id, weight));
            }
        }

        eviction.extend(self.enforce_capacity(now_ms));
        eviction
    }

    /// All nodes ordered lowest effective score first.
    fn ranked_nodes(&self, now_ms: i64) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .nodes
            .values()
            .map(|n| (n.id.clone(), self.node_score(n, now_ms)))
            .collect();
        ranked.sort_by(ascending_then_id);
        ranked
    }

    /// All edges ordered lowest effective weight first.
    fn ranked_edges(&self, now_ms: i64) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .edges
            .values()
            .map(|e| (e.id.clone(), self.edge_weight(e, now_ms)))
            .collect();
        ranked.sort_by(ascending_then_id);
        ranked
    }

    /// Node ids reachable from `center` within `hops` steps, ignoring direction.
    /// Only edges accepted by `edge_visible` are traversed.
    pub fn neighborhood<F>(&self, center: &str, hops: u32, edge_visible: F) -> HashSet<String>
    where
        F: Fn(&GraphEdge) -> bool,
    {
        let mut seen = HashSet::new();
        if !self.nodes.contains_key(center) {
            return seen;
        }

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in self.edges.values().filter(|e| edge_visible(e)) {
            adjacency.entry(&edge.from).or_default().push(&edge.to);
            adjacency.entry(&edge.to).or_default().push(&edge.from);
        }

        seen.insert(center.to_string());
        let mut frontier = vec![center];
        for _ in 0..hops {
            let mut next = Vec::new();
            for id in frontier {
                for &neighbor in adjacency.get(id).map(Vec::as_slice).unwrap_or(&[]) {
                    if seen.insert(neighbor.to_string()) {
                        next.push(neighbor);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        seen
    }
}

fn ascending_then_id(a: &(String, f64), b: &(String, f64)) -> Ordering {
    a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::model::NodeKind;

    fn limits(max_nodes: usize, max_edges: usize) -> StoreLimits {
        StoreLimits {
            max_nodes,
            max_edges,
            node_half_life: HalfLife::from_hours(24.0),
            edge_half_life: HalfLife::from_hours(12.0),
        }
    }

    fn node(id: &str, score: f64) -> GraphNode {
        GraphNode::new(id, NodeKind::Entity, score, 0)
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let mut store = GraphStore::new(limits(10, 10));
        store.upsert_node(node("a", 1.0)).unwrap();
        store.upsert_node(node("a", 3.0)).unwrap();
        assert_eq!(store.node_count(), 1);
        assert_eq!(store.get_node("a").unwrap().score, 3.0);
    }

    #[test]
    fn test_edge_requires_endpoints() {
        let mut store = GraphStore::new(limits(10, 10));
        store.upsert_node(node("a", 1.0)).unwrap();
        let err = store
            .upsert_edge(GraphEdge::new("a", "affects", "b", 1.0, 0))
            .unwrap_err();
        assert!(err.is_caller_error());
        assert_eq!(store.edge_count(), 0);
    }

    #[test]
    fn test_remove_node_cascades() {
        let mut store = GraphStore::new(limits(10, 10));
        for id in ["a", "b", "c"] {
            store.upsert_node(node(id, 1.0)).unwrap();
        }
        store.upsert_edge(GraphEdge::new("a", "x", "b", 1.0, 0)).unwrap();
        store.upsert_edge(GraphEdge::new("c", "x", "a", 1.0, 0)).unwrap();
        store.upsert_edge(GraphEdge::new("b", "x", "c", 1.0, 0)).unwrap();

        let (_, removed) = store.remove_node("a").unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(store.edge_count(), 1);
        assert!(store.edges().all(|e| !e.touches("a")));
    }

    #[test]
    fn test_capacity_evicts_lowest_with_id_tiebreak() {
        let mut store = GraphStore::new(limits(2, 10));
        store.upsert_node(node("b", 1.0)).unwrap();
        store.upsert_node(node("a", 1.0)).unwrap();
        store.upsert_node(node("c", 5.0)).unwrap();

        let ev = store.enforce_capacity(0);
        assert_eq!(ev.nodes, vec![("a".to_string(), 1.0)]);
        assert!(store.contains_node("b"));
        assert!(store.contains_node("c"));
    }

    #[test]
    fn test_capacity_uses_decayed_scores() {
        let mut store = GraphStore::new(limits(1, 10));
        // "old" was large long ago, "fresh" is small but current.
        let mut old = node("old", 4.0);
        old.updated_at_ms = 0;
        let mut fresh = node("fresh", 1.5);
        fresh.updated_at_ms = 3 * 24 * 3_600_000;
        store.upsert_node(old).unwrap();
        store.upsert_node(fresh).unwrap();

        let ev = store.enforce_capacity(3 * 24 * 3_600_000);
        assert_eq!(ev.nodes.len(), 1);
        assert_eq!(ev.nodes[0].0, "old");
        assert!((ev.nodes[0].1 - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_edge_capacity() {
        let mut store = GraphStore::new(limits(10, 1));
        store.upsert_node(node("a", 1.0)).unwrap();
        store.upsert_node(node("b", 1.0)).unwrap();
        store.upsert_edge(GraphEdge::new("a", "x", "b", 0.2, 0)).unwrap();
        store.upsert_edge(GraphEdge::new("a", "y", "b", 0.9, 0)).unwrap();
        let ev = store.enforce_capacity(0);
        assert_eq!(ev.edges.len(), 1);
        assert_eq!(ev.edges[0].0, GraphEdge::make_id("a", "x", "b"));
        assert_eq!(store.edge_count(), 1);
    }

    #[test]
    fn test_prune_below() {
        let mut store = GraphStore::new(limits(10, 10));
        store.upsert_node(node("weak", 0.05)).unwrap();
        store.upsert_node(node("strong", 2.0)).unwrap();
        store.upsert_node(node("other", 2.0)).unwrap();
        store
            .upsert_edge(GraphEdge::new("weak", "x", "strong", 5.0, 0))
            .unwrap();
        store
            .upsert_edge(GraphEdge::new("strong", "x", "other", 0.01, 0))
            .unwrap();

        let ev = store.prune_below(0.1, 0.1, 0);
        assert_eq!(ev.nodes.len(), 1);
        assert_eq!(ev.cascaded_edges.len(), 1);
        assert_eq!(ev.edges.len(), 1);
        assert_eq!(store.node_count(), 2);
        assert_eq!(store.edge_count(), 0);
    }

    #[test]
    fn test_get_edges_filters() {
        let mut store = GraphStore::new(limits(10, 10));
        for id in ["a", "b", "c"] {
            store.upsert_node(node(id, 1.0)).unwrap();
        }
        store.upsert_edge(GraphEdge::new("a", "affects", "b", 1.0, 0)).unwrap();
        store.upsert_edge(GraphEdge::new("a", "in_zone", "c", 1.0, 0)).unwrap();
        store.upsert_edge(GraphEdge::new("b", "affects", "c", 1.0, 0)).unwrap();

        assert_eq!(store.get_edges(Some("a"), None, None).len(), 2);
        assert_eq!(store.get_edges(None, Some("c"), None).len(), 2);
        assert_eq!(store.get_edges(None, None, Some("affects")).len(), 2);
        assert_eq!(store.get_edges(Some("a"), Some("c"), Some("affects")).len(), 0);
    }

    #[test]
    fn test_neighborhood_hops() {
        let mut store = GraphStore::new(limits(10, 10));
        for id in ["a", "b", "c", "d"] {
            store.upsert_node(node(id, 1.0)).unwrap();
        }
        store.upsert_edge(GraphEdge::new("a", "x", "b", 1.0, 0)).unwrap();
        store.upsert_edge(GraphEdge::new("c", "x", "b", 1.0, 0)).unwrap();
        store.upsert_edge(GraphEdge::new("c", "x", "d", 1.0, 0)).unwrap();

        let one = store.neighborhood("a", 1, |_| true);
        assert_eq!(one.len(), 2);
        let two = store.neighborhood("a", 2, |_| true);
        assert!(two.contains("c") && !two.contains("d"));
        let zero = store.neighborhood("a", 0, |_| true);
        assert_eq!(zero.len(), 1);
        assert!(store.neighborhood("missing", 3, |_| true).is_empty());
    }
}
