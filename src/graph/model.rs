// src/graph/model.rs — Brain graph node/edge types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::infra::errors::{HabitusError, Result};

/// Free-form metadata attached to nodes and edges.
pub type Meta = BTreeMap<String, serde_json::Value>;

/// Schema version of [`GraphState`] payloads.
pub const GRAPH_STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Entity,
    Zone,
    Concept,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Zone => "zone",
            Self::Concept => "concept",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "entity" => Some(Self::Entity),
            "zone" => Some(Self::Zone),
            "concept" => Some(Self::Concept),
            _ => None,
        }
    }

    /// Guess the kind of an auto-created node from its id prefix.
    pub fn infer_from_id(id: &str) -> Self {
        if id.starts_with("zone:") {
            Self::Zone
        } else if id.starts_with("concept:") || id.starts_with("service:") {
            Self::Concept
        } else {
            Self::Entity
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    pub domain: Option<String>,
    /// Score as of `updated_at_ms`; decays lazily.
    pub score: f64,
    pub updated_at_ms: i64,
    #[serde(default)]
    pub meta: Meta,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, kind: NodeKind, score: f64, now_ms: i64) -> Self {
        let id = id.into();
        Self {
            label: default_label(&id),
            id,
            kind,
            domain: None,
            score,
            updated_at_ms: now_ms,
            meta: Meta::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(HabitusError::validation("node", "id must not be empty"));
        }
        if !self.score.is_finite() {
            return Err(HabitusError::validation(
                "node",
                format!("score of '{}' is not finite", self.id),
            ));
        }
        Ok(())
    }
}

/// Where an edge's weight came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: String,
    #[serde(rename = "ref")]
    pub reference: String,
}

impl Evidence {
    pub fn new(kind: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            reference: reference.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub from: String,
    pub to: String,
    pub edge_type: String,
    /// Weight as of `updated_at_ms`; decays lazily.
    pub weight: f64,
    pub evidence: Option<Evidence>,
    #[serde(default)]
    pub meta: Meta,
    pub updated_at_ms: i64,
}

impl GraphEdge {
    pub fn new(from: &str, edge_type: &str, to: &str, weight: f64, now_ms: i64) -> Self {
        Self {
            id: Self::make_id(from, edge_type, to),
            from: from.to_string(),
            to: to.to_string(),
            edge_type: edge_type.to_string(),
            weight,
            evidence: None,
            meta: Meta::new(),
            updated_at_ms: now_ms,
        }
    }

    /// Stable id: one edge per (from, type, to).
    pub fn make_id(from: &str, edge_type: &str, to: &str) -> String {
        format!("e:{from}|{edge_type}|{to}")
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.from == node_id || self.to == node_id
    }

    pub fn validate(&self) -> Result<()> {
        if self.from.trim().is_empty() || self.to.trim().is_empty() {
            return Err(HabitusError::validation("edge", "endpoints must not be empty"));
        }
        if self.edge_type.trim().is_empty() {
            return Err(HabitusError::validation("edge", "edge_type must not be empty"));
        }
        if self.id != Self::make_id(&self.from, &self.edge_type, &self.to) {
            return Err(HabitusError::validation(
                "edge",
                format!("id '{}' does not match its endpoints", self.id),
            ));
        }
        if !self.weight.is_finite() {
            return Err(HabitusError::validation(
                "edge",
                format!("weight of '{}' is not finite", self.id),
            ));
        }
        Ok(())
    }
}

/// Label for a node created without one: the part after the id prefix.
pub fn default_label(id: &str) -> String {
    match id.split_once(':') {
        Some((_, rest)) if !rest.is_empty() => rest.to_string(),
        _ => id.to_string(),
    }
}

/// Merge `patch` into `meta`; `null` values delete keys.
pub fn merge_meta(meta: &mut Meta, patch: &Meta) {
    for (k, v) in patch {
        if v.is_null() {
            meta.remove(k);
        } else {
            meta.insert(k.clone(), v.clone());
        }
    }
}

/// Filters for [`crate::graph::BrainGraphService::get_graph_state`].
#[derive(Debug, Clone, Default)]
pub struct GraphQuery {
    pub kinds: Option<Vec<NodeKind>>,
    pub domains: Option<Vec<String>>,
    pub center_node: Option<String>,
    pub hops: u32,
    /// Output caps; default to the store capacity.
    pub max_nodes: Option<usize>,
    pub max_edges: Option<usize>,
}

impl GraphQuery {
    pub fn centered(node: impl Into<String>, hops: u32) -> Self {
        Self {
            center_node: Some(node.into()),
            hops,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphLimits {
    pub max_nodes: usize,
    pub max_edges: usize,
    pub node_min_score: f64,
    pub edge_min_weight: f64,
    pub node_half_life_hours: f64,
    pub edge_half_life_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphState {
    pub version: u32,
    pub generated_at_ms: i64,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub limits: GraphLimits,
}
