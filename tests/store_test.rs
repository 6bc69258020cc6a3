// tests/store_test.rs — Integration test: SQLite round-trip (store CRUD)

use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeMap;

use habitus::events::{EventContext, EventKind, NormEvent};
use habitus::experiments::{ExperimentRegistry, ExperimentStatus, SignificanceTester, Variant};
use habitus::graph::{BrainGraphService, Evidence, GraphEdge, GraphNode, GraphQuery, Meta, NodeKind};
use habitus::infra::config::{Config, GraphConfig};
use habitus::patterns::MiningConfig;
use habitus::context::HabitusContext;
use habitus::events::EventNormalizer;
use habitus::storage::{Database, ExperimentRow, Store};

const T0: i64 = 1_767_261_600_000;
const HOUR_MS: i64 = 3_600_000;

/// Create an in-memory SQLite store with schema applied.
fn test_store() -> Store {
    Database::in_memory().unwrap().store
}

fn event(key: &str, ts_ms: i64) -> NormEvent {
    let (entity, transition) = key.rsplit_once(':').unwrap();
    NormEvent {
        ts_ms,
        key: key.to_string(),
        entity_id: entity.to_string(),
        domain: entity.split('.').next().unwrap().to_string(),
        transition: transition.to_string(),
        kind: EventKind::StateChange,
        from_state: Some("off".into()),
        targets: vec![],
        context: EventContext {
            hour: 10,
            weekday: 3,
            is_weekend: false,
            zone: Some("kitchen".into()),
            user_id: None,
            friendly_name: None,
        },
    }
}

#[test]
fn test_graph_rows_roundtrip() {
    let store = test_store();

    let mut node = GraphNode::new("light.kitchen", NodeKind::Entity, 2.5, T0);
    node.label = "Kitchen".into();
    node.domain = Some("light".into());
    node.meta.insert("state".into(), json!("on"));
    let zone = GraphNode::new("zone:kitchen", NodeKind::Zone, 0.5, T0);
    let mut edge = GraphEdge::new("light.kitchen", "in_zone", "zone:kitchen", 0.75, T0);
    edge.evidence = Some(Evidence::new("state_change", "light.kitchen:on"));

    store
        .apply_graph_changes(&[node.clone(), zone.clone()], &[edge.clone()], &[], &[])
        .unwrap();

    let mut nodes = store.load_nodes().unwrap();
    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(nodes, vec![node.clone(), zone]);
    assert_eq!(store.load_edges().unwrap(), vec![edge]);

    // Updating a node must not cascade its edges away.
    node.score = 3.0;
    store.apply_graph_changes(&[node], &[], &[], &[]).unwrap();
    assert_eq!(store.graph_counts().unwrap(), (2, 1));

    // Removing a node takes its edges with it.
    store
        .apply_graph_changes(&[], &[], &["zone:kitchen".to_string()], &[])
        .unwrap();
    assert_eq!(store.graph_counts().unwrap(), (1, 0));
}

#[test]
fn test_replace_graph() {
    let store = test_store();
    let a = GraphNode::new("a.x", NodeKind::Entity, 1.0, T0);
    let b = GraphNode::new("b.y", NodeKind::Entity, 1.0, T0);
    store.replace_graph(&[a.clone(), b], &[]).unwrap();
    store.replace_graph(&[a], &[]).unwrap();
    assert_eq!(store.graph_counts().unwrap(), (1, 0));
}

#[test]
fn test_norm_events_roundtrip_and_retention() {
    let store = test_store();
    let events = vec![
        event("light.a:on", T0),
        event("switch.b:on", T0 + 1_000),
        event("light.a:off", T0 + 2 * HOUR_MS),
    ];
    store.insert_norm_events(&events).unwrap();

    assert_eq!(store.query_norm_events_since(0).unwrap(), events);
    assert_eq!(store.query_norm_events_since(T0 + 1).unwrap().len(), 2);

    assert_eq!(store.delete_norm_events_before(T0 + HOUR_MS).unwrap(), 2);
    assert_eq!(store.query_norm_events_since(0).unwrap(), events[2..].to_vec());
}

#[test]
fn test_mining_thresholds_roundtrip() {
    let store = test_store();
    assert!(store.load_mining_thresholds().unwrap().is_empty());

    let config = MiningConfig {
        windows_sec: vec![30, 120],
        min_lift: 1.7,
        exclude_domains: vec!["sensor".into()],
        ..Default::default()
    };
    store.save_mining_thresholds(&config.to_kv()).unwrap();
    let kv: BTreeMap<String, String> = store.load_mining_thresholds().unwrap();
    assert_eq!(MiningConfig::from_kv(&kv).unwrap(), config);
}

#[test]
fn test_experiment_rows() {
    let store = test_store();
    let mut row = ExperimentRow::new("exp-1", "{\"delay\":30}", "{\"delay\":60}");
    store.upsert_experiment(&row).unwrap();

    row.a_total = 10;
    row.a_overrides = 3;
    store.upsert_experiment(&row).unwrap();

    assert_eq!(store.get_experiment("exp-1").unwrap(), Some(row.clone()));
    assert_eq!(store.get_experiment("missing").unwrap(), None);
    assert_eq!(store.load_experiments().unwrap(), vec![row]);
}

#[test]
fn test_on_disk_services_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("habitus.db");

    {
        let db = Database::open(&path).unwrap().into_shared();
        let graph =
            BrainGraphService::with_store(GraphConfig::default(), EventNormalizer::default(), db.clone())
                .unwrap();
        let mut meta = Meta::new();
        meta.insert("state".into(), json!("on"));
        graph
            .touch_node("light.kitchen", Some("Kitchen"), None, Some("light"), 1.0, Some(&meta), T0)
            .unwrap();
        graph
            .touch_edge("light.kitchen", "in_zone", "zone:kitchen", 0.5, None, None, T0)
            .unwrap();

        let registry = ExperimentRegistry::new(SignificanceTester::default())
            .with_store(db)
            .unwrap();
        registry.start("exp", json!("a"), json!("b")).unwrap();
        for i in 0..25 {
            registry.record("exp", Variant::A, i < 5).unwrap();
            registry.record("exp", Variant::B, i < 20).unwrap();
        }
        assert!(registry.check_significance("exp").unwrap().significant);
    }

    let db = Database::open(&path).unwrap().into_shared();
    let graph =
        BrainGraphService::with_store(GraphConfig::default(), EventNormalizer::default(), db.clone())
            .unwrap();
    assert_eq!(graph.counts(), (2, 1));
    let state = graph.get_graph_state(&GraphQuery::default(), T0).unwrap();
    let kitchen = state.nodes.iter().find(|n| n.id == "light.kitchen").unwrap();
    assert_eq!(kitchen.kind, NodeKind::Entity);
    assert_eq!(kitchen.domain.as_deref(), Some("light"));
    assert_eq!(kitchen.label, "Kitchen");
    assert_eq!(kitchen.score, 1.0);
    let zone = state.nodes.iter().find(|n| n.id == "zone:kitchen").unwrap();
    assert_eq!(zone.kind, NodeKind::Zone);

    let registry = ExperimentRegistry::new(SignificanceTester::default())
        .with_store(db)
        .unwrap();
    let exp = registry.get("exp").unwrap();
    assert_eq!(exp.status, ExperimentStatus::Completed);
    assert_eq!(exp.winner, Some(Variant::A));
}

#[test]
fn test_context_reloads_buffer_and_thresholds() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.database = Some(dir.path().join("data").join("habitus.db"));

    let raws: Vec<_> = (0..10)
        .map(|i| {
            json!({"type": "state_changed", "entity_id": "light.a", "old": "off", "new": "on", "ts": T0 + i * 60_000})
        })
        .collect();
    {
        let ctx = HabitusContext::new(config.clone(), T0).unwrap();
        ctx.ingest_raw(&raws, T0 + HOUR_MS).unwrap();
        let tuned = MiningConfig {
            min_lift: 2.0,
            ..Default::default()
        };
        ctx.habitus.update_mining_config(tuned).unwrap();
    }

    let ctx = HabitusContext::new(config, T0 + HOUR_MS).unwrap();
    assert_eq!(ctx.habitus.buffered(), 10);
    assert_eq!(ctx.habitus.mining_config().unwrap().min_lift, 2.0);
    assert_eq!(ctx.graph.counts(), (1, 0));
}
