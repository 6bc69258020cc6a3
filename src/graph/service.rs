// src/graph/service.rs — Brain graph: decaying relevance graph service

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::decay::HalfLife;
use super::model::{
    merge_meta, Evidence, GraphEdge, GraphLimits, GraphNode, GraphQuery, GraphState, Meta,
    NodeKind, GRAPH_STATE_VERSION,
};
use super::snapshot;
use super::store::{Eviction, GraphStore, StoreLimits};
use crate::events::normalize::{EventKind, EventNormalizer, NormEvent, Normalized};
use crate::infra::config::GraphConfig;
use crate::infra::errors::{HabitusError, Result};
use crate::storage::SharedStore;

pub const EDGE_IN_ZONE: &str = "in_zone";
pub const EDGE_AFFECTS: &str = "affects";

/// Counts reported by [`BrainGraphService::stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    /// At or above the output thresholds right now.
    pub visible_nodes: usize,
    pub visible_edges: usize,
    pub nodes_by_kind: BTreeMap<String, usize>,
}

/// Owns the graph store behind one lock; optionally writes through to SQLite.
pub struct BrainGraphService {
    store: Mutex<GraphStore>,
    persist: Option<SharedStore>,
    config: GraphConfig,
    normalizer: EventNormalizer,
}

impl BrainGraphService {
    pub fn new(config: GraphConfig, normalizer: EventNormalizer) -> Self {
        let limits = StoreLimits {
            max_nodes: config.max_nodes,
            max_edges: config.max_edges,
            node_half_life: HalfLife::from_hours(config.node_half_life_hours),
            edge_half_life: HalfLife::from_hours(config.edge_half_life_hours),
        };
        Self {
            store: Mutex::new(GraphStore::new(limits)),
            persist: None,
            config,
            normalizer,
        }
    }

    /// Build the service and reload the persisted graph from `persist`.
    pub fn with_store(
        config: GraphConfig,
        normalizer: EventNormalizer,
        persist: SharedStore,
    ) -> Result<Self> {
        let (nodes, edges) = {
            let db = persist
                .lock()
                .map_err(|_| HabitusError::LockPoisoned("storage"))?;
            let nodes = db.load_nodes().map_err(storage_error)?;
            let edges = db.load_edges().map_err(storage_error)?;
            (nodes, edges)
        };

        let mut service = Self::new(config, normalizer);
        {
            let store = service
                .store
                .get_mut()
                .map_err(|_| HabitusError::LockPoisoned("graph"))?;
            for node in nodes {
                store.upsert_node(node)?;
            }
            for edge in edges {
                if let Err(e) = store.upsert_edge(edge) {
                    tracing::warn!("Skipping stored edge: {}", e);
                }
            }
        }
        tracing::debug!("Loaded graph: {:?}", service.counts());
        service.persist = Some(persist);
        Ok(service)
    }

    pub fn limits(&self) -> GraphLimits {
        GraphLimits {
            max_nodes: self.config.max_nodes,
            max_edges: self.config.max_edges,
            node_min_score: self.config.node_min_score,
            edge_min_weight: self.config.edge_min_weight,
            node_half_life_hours: self.config.node_half_life_hours,
            edge_half_life_hours: self.config.edge_half_life_hours,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, GraphStore>> {
        self.store
            .lock()
            .map_err(|_| HabitusError::LockPoisoned("graph"))
    }

    /// `(nodes, edges)` physically stored.
    pub fn counts(&self) -> (usize, usize) {
        self.lock()
            .map(|s| (s.node_count(), s.edge_count()))
            .unwrap_or_default()
    }

    // -- Touch --

    /// Decay the node's score to `now_ms`, then add `delta`. Creates the
    /// node on first touch. Returns the node as written by the touch.
    ///
    /// Capacity is enforced afterwards, so a node still too weak to stay
    /// is returned but already evicted.
    #[allow(clippy::too_many_arguments)]
    pub fn touch_node(
        &self,
        id: &str,
        label: Option<&str>,
        kind: Option<NodeKind>,
        domain: Option<&str>,
        delta: f64,
        meta_patch: Option<&Meta>,
        now_ms: i64,
    ) -> Result<GraphNode> {
        check_delta("node", delta)?;
        let mut store = self.lock()?;
        let node = touched_node(&store, id, label, kind, domain, delta, meta_patch, now_ms)?;
        store.upsert_node(node.clone())?;
        let eviction = store.enforce_capacity(now_ms);
        if !store.contains_node(&node.id) {
            tracing::debug!("Touched node {} evicted at capacity", node.id);
        }
        self.write_through(&store, &[node.id.as_str()], &[], &eviction);
        Ok(node)
    }

    /// Decay the edge's weight to `now_ms`, then add `delta`. Missing
    /// endpoints are created at the minimum node score.
    ///
    /// Capacity is enforced afterwards. When that evicts the edge, or an
    /// endpoint it cascades from, the returned edge is no longer stored.
    #[allow(clippy::too_many_arguments)]
    pub fn touch_edge(
        &self,
        from: &str,
        edge_type: &str,
        to: &str,
        delta: f64,
        evidence: Option<Evidence>,
        meta_patch: Option<&Meta>,
        now_ms: i64,
    ) -> Result<GraphEdge> {
        check_delta("edge", delta)?;
        let mut store = self.lock()?;
        let edge = self.touched_edge(&mut store, from, edge_type, to, delta, evidence, meta_patch, now_ms)?;
        let eviction = store.enforce_capacity(now_ms);
        if store.get_edge(&edge.id).is_none() {
            tracing::debug!("Touched edge {} evicted at capacity", edge.id);
        }
        self.write_through(&store, &[from, to], &[edge.id.as_str()], &eviction);
        Ok(edge)
    }

    #[allow(clippy::too_many_arguments)]
    fn touched_edge(
        &self,
        store: &mut GraphStore,
        from: &str,
        edge_type: &str,
        to: &str,
        delta: f64,
        evidence: Option<Evidence>,
        meta_patch: Option<&Meta>,
        now_ms: i64,
    ) -> Result<GraphEdge> {
        let mut edge = GraphEdge::new(from, edge_type, to, delta, now_ms);
        edge.validate()?;

        for endpoint in [from, to] {
            if !store.contains_node(endpoint) {
                let kind = NodeKind::infer_from_id(endpoint);
                let mut node = GraphNode::new(endpoint, kind, self.config.node_min_score, now_ms);
                node.domain = infer_domain(endpoint, kind);
                store.upsert_node(node)?;
            }
        }

        if let Some(existing) = store.get_edge(&edge.id) {
            let half_life = store.limits().edge_half_life;
            let at = now_ms.max(existing.updated_at_ms);
            edge.weight = half_life.accumulate(existing.weight, existing.updated_at_ms, at, delta);
            edge.updated_at_ms = at;
            edge.meta = existing.meta.clone();
            if evidence.is_none() {
                edge.evidence = existing.evidence.clone();
            }
        }
        if evidence.is_some() {
            edge.evidence = evidence;
        }
        if let Some(patch) = meta_patch {
            merge_meta(&mut edge.meta, patch);
        }
        store.upsert_edge(edge.clone())?;
        Ok(edge)
    }

    // -- Query --

    /// Soft-filtered view of the graph at `now_ms`. Scores and weights in the
    /// result are effective (decayed) values.
    pub fn get_graph_state(&self, query: &GraphQuery, now_ms: i64) -> Result<GraphState> {
        let store = self.lock()?;

        let visible_nodes: HashSet<&str> = store
            .nodes()
            .filter(|n| store.node_score(n, now_ms) >= self.config.node_min_score)
            .map(|n| n.id.as_str())
            .collect();
        let edge_visible = |e: &GraphEdge| {
            store.edge_weight(e, now_ms) >= self.config.edge_min_weight
                && visible_nodes.contains(e.from.as_str())
                && visible_nodes.contains(e.to.as_str())
        };

        let reachable = match query.center_node.as_deref() {
            Some(center) if visible_nodes.contains(center) => {
                Some(store.neighborhood(center, query.hops, edge_visible))
            }
            Some(_) => Some(HashSet::new()),
            None => None,
        };

        let mut nodes: Vec<GraphNode> = store
            .nodes()
            .filter(|n| visible_nodes.contains(n.id.as_str()))
            .filter(|n| reachable.as_ref().map_or(true, |r| r.contains(&n.id)))
            .filter(|n| query.kinds.as_ref().map_or(true, |k| k.contains(&n.kind)))
            .filter(|n| {
                query.domains.as_ref().map_or(true, |d| {
                    n.domain.as_ref().is_some_and(|nd| d.contains(nd))
                })
            })
            .map(|n| GraphNode {
                score: store.node_score(n, now_ms),
                ..n.clone()
            })
            .collect();
        nodes.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        nodes.truncate(query.max_nodes.unwrap_or(self.config.max_nodes));

        let kept: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let mut edges: Vec<GraphEdge> = store
            .edges()
            .filter(|e| edge_visible(e))
            .filter(|e| kept.contains(e.from.as_str()) && kept.contains(e.to.as_str()))
            .map(|e| GraphEdge {
                weight: store.edge_weight(e, now_ms),
                ..e.clone()
            })
            .collect();
        edges.sort_by(|a, b| b.weight.total_cmp(&a.weight).then_with(|| a.id.cmp(&b.id)));
        edges.truncate(query.max_edges.unwrap_or(self.config.max_edges));

        Ok(GraphState {
            version: GRAPH_STATE_VERSION,
            generated_at_ms: now_ms,
            nodes,
            edges,
            limits: self.limits(),
        })
    }

    pub fn stats(&self, now_ms: i64) -> Result<GraphStats> {
        let store = self.lock()?;
        let mut stats = GraphStats {
            nodes: store.node_count(),
            edges: store.edge_count(),
            ..Default::default()
        };
        for node in store.nodes() {
            *stats.nodes_by_kind.entry(node.kind.to_string()).or_default() += 1;
            if store.node_score(node, now_ms) >= self.config.node_min_score {
                stats.visible_nodes += 1;
            }
        }
        stats.visible_edges = store
            .edges()
            .filter(|e| store.edge_weight(e, now_ms) >= self.config.edge_min_weight)
            .count();
        Ok(stats)
    }

    // -- Ingestion --

    /// Normalize and apply one raw upstream event. Bad events are logged
    /// and dropped; this never fails.
    pub fn process_ha_event(&self, raw: &Value, received_at_ms: i64) {
        match self.normalizer.normalize(raw, received_at_ms) {
            Ok(Normalized::Event(event)) => {
                if let Err(e) = self.apply_event(&event) {
                    tracing::warn!("Graph update for {} failed: {}", event.key, e);
                }
            }
            Ok(Normalized::Heartbeat { .. }) => {}
            Err(reason) => tracing::debug!("Dropping event: {}", reason),
        }
    }

    /// Project a normalized event onto the graph at the event's timestamp.
    pub fn apply_event(&self, event: &NormEvent) -> Result<()> {
        let now = event.ts_ms;
        match event.kind {
            EventKind::StateChange => {
                let mut meta = Meta::new();
                meta.insert("state".into(), json!(event.transition));
                meta.insert("last_changed_ms".into(), json!(event.ts_ms));
                self.touch_node(
                    &event.entity_id,
                    event.context.friendly_name.as_deref(),
                    Some(NodeKind::Entity),
                    Some(&event.domain),
                    self.config.state_change_delta,
                    Some(&meta),
                    now,
                )?;
                if let Some(ref zone) = event.context.zone {
                    let zone_id = format!("zone:{zone}");
                    self.touch_node(
                        &zone_id,
                        Some(zone),
                        Some(NodeKind::Zone),
                        None,
                        self.config.edge_delta,
                        None,
                        now,
                    )?;
                    self.touch_edge(
                        &event.entity_id,
                        EDGE_IN_ZONE,
                        &zone_id,
                        self.config.edge_delta,
                        Some(Evidence::new("state_change", &event.key)),
                        None,
                        now,
                    )?;
                }
            }
            EventKind::ServiceCall => {
                let service_id = format!("service:{}", event.entity_id);
                let mut meta = Meta::new();
                meta.insert("last_called_ms".into(), json!(event.ts_ms));
                if let Some(ref user) = event.context.user_id {
                    meta.insert("last_user_id".into(), json!(user));
                }
                self.touch_node(
                    &service_id,
                    Some(&event.entity_id),
                    Some(NodeKind::Concept),
                    Some(&event.domain),
                    self.config.service_call_delta,
                    Some(&meta),
                    now,
                )?;
                for target in &event.targets {
                    self.touch_edge(
                        &service_id,
                        EDGE_AFFECTS,
                        target,
                        self.config.edge_delta,
                        Some(Evidence::new("service_call", &event.key)),
                        None,
                        now,
                    )?;
                }
            }
        }
        Ok(())
    }

    // -- Maintenance --

    /// Physically remove entries below their thresholds, then re-check capacity.
    pub fn prune(&self, now_ms: i64) -> Result<Eviction> {
        let mut store = self.lock()?;
        let eviction = store.prune_below(
            self.config.node_min_score,
            self.config.edge_min_weight,
            now_ms,
        );
        if !eviction.is_empty() {
            tracing::info!(
                "Pruned {} nodes, {} edges",
                eviction.nodes.len(),
                eviction.edges.len() + eviction.cascaded_edges.len()
            );
        }
        self.write_through(&store, &[], &[], &eviction);
        Ok(eviction)
    }

    /// Replace the persisted graph with the in-memory one, atomically.
    pub fn save_snapshot(&self) -> Result<()> {
        let Some(ref persist) = self.persist else {
            return Err(HabitusError::Storage("no database attached".into()));
        };
        let store = self.lock()?;
        let mut nodes: Vec<GraphNode> = store.nodes().cloned().collect();
        let mut edges: Vec<GraphEdge> = store.edges().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        edges.sort_by(|a, b| a.id.cmp(&b.id));

        let db = persist
            .lock()
            .map_err(|_| HabitusError::LockPoisoned("storage"))?;
        db.replace_graph(&nodes, &edges).map_err(storage_error)
    }

    /// Write the current view to `path` as JSON (temp file + rename).
    pub fn export_json(&self, path: &Path, query: &GraphQuery, now_ms: i64) -> Result<GraphState> {
        let state = self.get_graph_state(query, now_ms)?;
        snapshot::write_state(path, &state)?;
        Ok(state)
    }

    /// Load a state written by [`Self::export_json`] and make it the graph.
    pub fn import_json(&self, path: &Path) -> Result<GraphState> {
        let state = snapshot::read_state(path)?;
        self.import_state(&state)?;
        Ok(state)
    }

    /// Replace the in-memory graph with `state`. Stored scores are taken
    /// as-is, stamped with the state's `generated_at_ms`. With a database
    /// attached the persisted graph is replaced as well.
    pub fn import_state(&self, state: &GraphState) -> Result<()> {
        let mut fresh = GraphStore::new(*self.lock()?.limits());
        for node in &state.nodes {
            fresh.upsert_node(GraphNode {
                updated_at_ms: state.generated_at_ms,
                ..node.clone()
            })?;
        }
        for edge in &state.edges {
            fresh.upsert_edge(GraphEdge {
                updated_at_ms: state.generated_at_ms,
                ..edge.clone()
            })?;
        }
        fresh.enforce_capacity(state.generated_at_ms);

        *self.lock()? = fresh;
        if self.persist.is_some() {
            if let Err(e) = self.save_snapshot() {
                tracing::warn!("Persisting imported graph failed: {}", e);
            }
        }
        Ok(())
    }

    // Best effort: a failed write is logged and memory stays authoritative.
    fn write_through(
        &self,
        store: &GraphStore,
        node_ids: &[&str],
        edge_ids: &[&str],
        eviction: &Eviction,
    ) {
        let Some(ref persist) = self.persist else {
            return;
        };
        let nodes: Vec<GraphNode> = node_ids
            .iter()
            .filter_map(|id| store.get_node(id).cloned())
            .collect();
        let edges: Vec<GraphEdge> = edge_ids
            .iter()
            .filter_map(|id| store.get_edge(id).cloned())
            .collect();
        let removed_nodes: Vec<String> = eviction.removed_node_ids().map(str::to_string).collect();
        let removed_edges: Vec<String> = eviction.removed_edge_ids().map(str::to_string).collect();
        if nodes.is_empty() && edges.is_empty() && removed_nodes.is_empty() && removed_edges.is_empty() {
            return;
        }

        let result = match persist.lock() {
            Ok(db) => db
                .apply_graph_changes(&nodes, &edges, &removed_nodes, &removed_edges)
                .map_err(storage_error),
            Err(_) => Err(HabitusError::LockPoisoned("storage")),
        };
        if let Err(e) = result {
            tracing::warn!("Graph write-through failed: {}", e);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn touched_node(
    store: &GraphStore,
    id: &str,
    label: Option<&str>,
    kind: Option<NodeKind>,
    domain: Option<&str>,
    delta: f64,
    meta_patch: Option<&Meta>,
    now_ms: i64,
) -> Result<GraphNode> {
    let mut node = match store.get_node(id) {
        Some(existing) => {
            let half_life = store.limits().node_half_life;
            // A node's clock never runs backwards.
            let at = now_ms.max(existing.updated_at_ms);
            let mut node = existing.clone();
            node.score = half_life.accumulate(existing.score, existing.updated_at_ms, at, delta);
            node.updated_at_ms = at;
            if let Some(kind) = kind {
                node.kind = kind;
            }
            node
        }
        None => {
            let kind = kind.unwrap_or_else(|| NodeKind::infer_from_id(id));
            let mut node = GraphNode::new(id, kind, delta, now_ms);
            node.domain = infer_domain(id, kind);
            node
        }
    };
    if let Some(label) = label.filter(|l| !l.trim().is_empty()) {
        node.label = label.to_string();
    }
    if let Some(domain) = domain {
        node.domain = Some(domain.to_string());
    }
    if let Some(patch) = meta_patch {
        merge_meta(&mut node.meta, patch);
    }
    node.validate()?;
    Ok(node)
}

fn check_delta(what: &'static str, delta: f64) -> Result<()> {
    if !delta.is_finite() {
        return Err(HabitusError::validation(what, format!("delta {delta} is not finite")));
    }
    Ok(())
}

/// `light.kitchen` → `light`; prefixed ids carry no domain.
fn infer_domain(id: &str, kind: NodeKind) -> Option<String> {
    if kind != NodeKind::Entity {
        return None;
    }
    id.split_once('.')
        .map(|(d, _)| d)
        .filter(|d| !d.is_empty() && !d.contains(':'))
        .map(str::to_string)
}

fn storage_error(e: anyhow::Error) -> HabitusError {
    HabitusError::Storage(e.to_string())
}
