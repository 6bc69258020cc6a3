// src/storage/store.rs — SQLite operations

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::BTreeMap;

use crate::events::normalize::NormEvent;
use crate::graph::model::{Evidence, GraphEdge, GraphNode, Meta, NodeKind};

/// Low-level SQLite operations for all persisted data.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    // -- Graph --

    /// Apply one batch of graph mutations atomically: removals first, then
    /// node upserts, then edge upserts.
    pub fn apply_graph_changes(
        &self,
        nodes: &[GraphNode],
        edges: &[GraphEdge],
        removed_nodes: &[String],
        removed_edges: &[String],
    ) -> anyhow::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for id in removed_edges {
            tx.execute("DELETE FROM graph_edges WHERE id = ?1", params![id])?;
        }
        for id in removed_nodes {
            // Edges go with the node (ON DELETE CASCADE).
            tx.execute("DELETE FROM graph_nodes WHERE id = ?1", params![id])?;
        }
        for node in nodes {
            upsert_node(&tx, node)?;
        }
        for edge in edges {
            upsert_edge(&tx, edge)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Replace the whole persisted graph in one transaction.
    pub fn replace_graph(&self, nodes: &[GraphNode], edges: &[GraphEdge]) -> anyhow::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM graph_edges", [])?;
        tx.execute("DELETE FROM graph_nodes", [])?;
        for node in nodes {
            upsert_node(&tx, node)?;
        }
        for edge in edges {
            upsert_edge(&tx, edge)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_nodes(&self) -> anyhow::Result<Vec<GraphNode>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, label, domain, score, updated_at_ms, meta
             FROM graph_nodes ORDER BY id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(NodeRow {
                id: row.get(0)?,
                kind: row.get(1)?,
                label: row.get(2)?,
                domain: row.get(3)?,
                score: row.get(4)?,
                updated_at_ms: row.get(5)?,
                meta: row.get(6)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?.into_node()?);
        }
        Ok(result)
    }

    pub fn load_edges(&self) -> anyhow::Result<Vec<GraphEdge>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, from_node, to_node, edge_type, weight, evidence_kind, evidence_ref,
                    meta, updated_at_ms
             FROM graph_edges ORDER BY id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(EdgeRow {
                id: row.get(0)?,
                from_node: row.get(1)?,
                to_node: row.get(2)?,
                edge_type: row.get(3)?,
                weight: row.get(4)?,
                evidence_kind: row.get(5)?,
                evidence_ref: row.get(6)?,
                meta: row.get(7)?,
                updated_at_ms: row.get(8)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?.into_edge()?);
        }
        Ok(result)
    }

    pub fn graph_counts(&self) -> anyhow::Result<(usize, usize)> {
        let nodes: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM graph_nodes", [], |r| r.get(0))?;
        let edges: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM graph_edges", [], |r| r.get(0))?;
        Ok((nodes as usize, edges as usize))
    }

    // -- Normalized events --

    pub fn insert_norm_events(&self, events: &[NormEvent]) -> anyhow::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO norm_events (ts_ms, event_key, entity_id, domain, kind, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for e in events {
                let kind = serde_json::to_value(e.kind)?;
                stmt.execute(params![
                    e.ts_ms,
                    e.key,
                    e.entity_id,
                    e.domain,
                    kind.as_str().unwrap_or_default(),
                    serde_json::to_string(e)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Events with `ts_ms >= since_ms`, oldest first, insertion order on ties.
    pub fn query_norm_events_since(&self, since_ms: i64) -> anyhow::Result<Vec<NormEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT payload FROM norm_events WHERE ts_ms >= ?1 ORDER BY ts_ms, seq",
        )?;

        let rows = stmt.query_map(params![since_ms], |row| row.get::<_, String>(0))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(serde_json::from_str(&row?)?);
        }
        Ok(result)
    }

    pub fn delete_norm_events_before(&self, cutoff_ms: i64) -> anyhow::Result<usize> {
        let n = self
            .conn
            .execute("DELETE FROM norm_events WHERE ts_ms < ?1", params![cutoff_ms])?;
        Ok(n)
    }

    // -- Mining thresholds --

    pub fn save_mining_thresholds(&self, kv: &BTreeMap<String, String>) -> anyhow::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM mining_thresholds", [])?;
        for (key, value) in kv {
            tx.execute(
                "INSERT INTO mining_thresholds (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_mining_thresholds(&self) -> anyhow::Result<BTreeMap<String, String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM mining_thresholds")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut result = BTreeMap::new();
        for row in rows {
            let (k, v) = row?;
            result.insert(k, v);
        }
        Ok(result)
    }

    // -- Experiments --

    pub fn upsert_experiment(&self, row: &ExperimentRow) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO ab_experiments (id, variant_a, variant_b, status, winner,
             a_overrides, a_total, b_overrides, b_total, p_value, created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
                variant_a = excluded.variant_a,
                variant_b = excluded.variant_b,
                status = excluded.status,
                winner = excluded.winner,
                a_overrides = excluded.a_overrides,
                a_total = excluded.a_total,
                b_overrides = excluded.b_overrides,
                b_total = excluded.b_total,
                p_value = excluded.p_value,
                completed_at = excluded.completed_at",
            params![
                row.id,
                row.variant_a,
                row.variant_b,
                row.status,
                row.winner,
                row.a_overrides,
                row.a_total,
                row.b_overrides,
                row.b_total,
                row.p_value,
                row.created_at,
                row.completed_at
            ],
        )?;
        Ok(())
    }

    pub fn get_experiment(&self, id: &str) -> anyhow::Result<Option<ExperimentRow>> {
        let row = self
            .conn
            .query_row(
                &format!("{EXPERIMENT_SELECT} WHERE id = ?1"),
                params![id],
                experiment_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn load_experiments(&self) -> anyhow::Result<Vec<ExperimentRow>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{EXPERIMENT_SELECT} ORDER BY created_at, id"))?;
        let rows = stmt.query_map([], experiment_row)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}

const EXPERIMENT_SELECT: &str = "SELECT id, variant_a, variant_b, status, winner,
     a_overrides, a_total, b_overrides, b_total, p_value, created_at, completed_at
     FROM ab_experiments";

fn experiment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExperimentRow> {
    Ok(ExperimentRow {
        id: row.get(0)?,
        variant_a: row.get(1)?,
        variant_b: row.get(2)?,
        status: row.get(3)?,
        winner: row.get(4)?,
        a_overrides: row.get(5)?,
        a_total: row.get(6)?,
        b_overrides: row.get(7)?,
        b_total: row.get(8)?,
        p_value: row.get(9)?,
        created_at: row.get(10)?,
        completed_at: row.get(11)?,
    })
}

// Plain UPSERT: INSERT OR REPLACE would delete the node row and cascade
// away its edges.
fn upsert_node(tx: &Transaction<'_>, node: &GraphNode) -> anyhow::Result<()> {
    tx.execute(
        "INSERT INTO graph_nodes (id, kind, label, domain, score, updated_at_ms, meta)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
            kind = excluded.kind,
            label = excluded.label,
            domain = excluded.domain,
            score = excluded.score,
            updated_at_ms = excluded.updated_at_ms,
            meta = excluded.meta",
        params![
            node.id,
            node.kind.as_str(),
            node.label,
            node.domain,
            node.score,
            node.updated_at_ms,
            serde_json::to_string(&node.meta)?
        ],
    )?;
    Ok(())
}

fn upsert_edge(tx: &Transaction<'_>, edge: &GraphEdge) -> anyhow::Result<()> {
    let (evidence_kind, evidence_ref) = match edge.evidence {
        Some(ref e) => (Some(e.kind.as_str()), Some(e.reference.as_str())),
        None => (None, None),
    };
    tx.execute(
        "INSERT INTO graph_edges (id, from_node, to_node, edge_type, weight,
         evidence_kind, evidence_ref, meta, updated_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
            weight = excluded.weight,
            evidence_kind = excluded.evidence_kind,
            evidence_ref = excluded.evidence_ref,
            meta = excluded.meta,
            updated_at_ms = excluded.updated_at_ms",
        params![
            edge.id,
            edge.from,
            edge.to,
            edge.edge_type,
            edge.weight,
            evidence_kind,
            evidence_ref,
            serde_json::to_string(&edge.meta)?,
            edge.updated_at_ms
        ],
    )?;
    Ok(())
}

fn parse_meta(raw: &str) -> anyhow::Result<Meta> {
    if raw.trim().is_empty() {
        return Ok(Meta::new());
    }
    Ok(serde_json::from_str(raw)?)
}

// -- Row types --

#[derive(Debug, Clone)]
struct NodeRow {
    id: String,
    kind: String,
    label: String,
    domain: Option<String>,
    score: f64,
    updated_at_ms: i64,
    meta: String,
}

impl NodeRow {
    fn into_node(self) -> anyhow::Result<GraphNode> {
        let kind = NodeKind::parse(&self.kind)
            .ok_or_else(|| anyhow::anyhow!("node '{}' has unknown kind '{}'", self.id, self.kind))?;
        Ok(GraphNode {
            meta: parse_meta(&self.meta)?,
            id: self.id,
            kind,
            label: self.label,
            domain: self.domain,
            score: self.score,
            updated_at_ms: self.updated_at_ms,
        })
    }
}

#[derive(Debug, Clone)]
struct EdgeRow {
    id: String,
    from_node: String,
    to_node: String,
    edge_type: String,
    weight: f64,
    evidence_kind: Option<String>,
    evidence_ref: Option<String>,
    meta: String,
    updated_at_ms: i64,
}

impl EdgeRow {
    fn into_edge(self) -> anyhow::Result<GraphEdge> {
        let evidence = match (self.evidence_kind, self.evidence_ref) {
            (Some(kind), Some(reference)) => Some(Evidence { kind, reference }),
            _ => None,
        };
        Ok(GraphEdge {
            meta: parse_meta(&self.meta)?,
            id: self.id,
            from: self.from_node,
            to: self.to_node,
            edge_type: self.edge_type,
            weight: self.weight,
            evidence,
            updated_at_ms: self.updated_at_ms,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentRow {
    pub id: String,
    /// JSON
    pub variant_a: String,
    /// JSON
    pub variant_b: String,
    pub status: String,
    pub winner: Option<String>,
    pub a_overrides: i64,
    pub a_total: i64,
    pub b_overrides: i64,
    pub b_total: i64,
    pub p_value: Option<f64>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl ExperimentRow {
    pub fn new(id: &str, variant_a: &str, variant_b: &str) -> Self {
        Self {
            id: id.to_string(),
            variant_a: variant_a.to_string(),
            variant_b: variant_b.to_string(),
            status: "running".to_string(),
            winner: None,
            a_overrides: 0,
            a_total: 0,
            b_overrides: 0,
            b_total: 0,
            p_value: None,
            created_at: Utc::now().to_rfc3339(),
            completed_at: None,
        }
    }
}
