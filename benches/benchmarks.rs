// benches/benchmarks.rs — Performance benchmarks (criterion)
//
// Key metrics:
//   1. Startup time — schema migration + store init
//   2. Graph touch throughput — touches with capacity eviction in play
//   3. Mining pass — full scan over a synthetic event buffer
//   4. Significance test — chi-squared + p-value

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rusqlite::Connection;
use serde_json::json;

use habitus::events::{EventNormalizer, NormEvent};
use habitus::experiments::{Observation, SignificanceTester};
use habitus::graph::{BrainGraphService, GraphQuery};
use habitus::infra::config::GraphConfig;
use habitus::patterns::{MiningConfig, PatternMiner};
use habitus::storage::schema::run_migrations;
use habitus::storage::Store;

const T0: i64 = 1_767_261_600_000;

// ─── Helpers ────────────────────────────────────────────────────────────────

/// A day of household activity: a handful of entities with a few habits.
fn synthetic_events(n: usize) -> Vec<NormEvent> {
    let normalizer = EventNormalizer::default();
    let entities = [
        "binary_sensor.hall_motion",
        "light.hall",
        "binary_sensor.front_door",
        "lock.front_door",
        "media_player.tv",
        "light.living_room",
        "switch.kettle",
        "cover.bedroom",
    ];
    let raws: Vec<_> = (0..n)
        .map(|i| {
            let entity = entities[(i * 7 + i / 3) % entities.len()];
            let new = if i % 2 == 0 { "on" } else { "off" };
            json!({
                "type": "state_changed",
                "entity_id": entity,
                "new": new,
                "ts": T0 + i as i64 * 17_000,
            })
        })
        .collect();
    normalizer.normalize_batch(&raws, T0).0
}

fn graph(max_nodes: usize) -> BrainGraphService {
    let config = GraphConfig {
        max_nodes,
        max_edges: max_nodes * 3,
        ..Default::default()
    };
    BrainGraphService::new(config, EventNormalizer::default())
}

// ─── Benchmark: Startup (schema init) ───────────────────────────────────────

fn bench_startup(c: &mut Criterion) {
    c.bench_function("startup_schema_init", |b| {
        b.iter(|| {
            let conn = Connection::open_in_memory().expect("open in-memory db");
            run_migrations(black_box(&conn)).expect("run migrations");
            Store::new(conn)
        })
    });
}

// ─── Benchmark: Graph touches ───────────────────────────────────────────────

fn bench_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph");

    group.bench_function("touch_edge_1000_under_capacity", |b| {
        b.iter(|| {
            let g = graph(500);
            for i in 0..1000i64 {
                let from = format!("light.l{}", i % 200);
                let to = format!("zone:z{}", i % 20);
                g.touch_edge(&from, "in_zone", &to, 0.5, None, None, T0 + i * 1000)
                    .expect("touch");
            }
            g
        })
    });

    group.bench_function("touch_node_1000_evicting", |b| {
        b.iter(|| {
            let g = graph(100);
            for i in 0..1000i64 {
                let id = format!("sensor.s{i}");
                g.touch_node(&id, None, None, None, 1.0, None, T0 + i * 1000)
                    .expect("touch");
            }
            g
        })
    });

    let g = graph(500);
    for i in 0..1500i64 {
        let from = format!("light.l{}", i % 400);
        let to = format!("light.l{}", (i * 7) % 400);
        g.touch_edge(&from, "related", &to, 0.5, None, None, T0 + i * 1000)
            .expect("touch");
    }
    group.bench_function("graph_state_full", |b| {
        b.iter(|| g.get_graph_state(black_box(&GraphQuery::default()), T0 + 2_000_000))
    });
    group.bench_function("graph_state_centered_2_hops", |b| {
        let query = GraphQuery::centered("light.l0", 2);
        b.iter(|| g.get_graph_state(black_box(&query), T0 + 2_000_000))
    });

    group.finish();
}

// ─── Benchmark: Mining pass ─────────────────────────────────────────────────

fn bench_mining(c: &mut Criterion) {
    let mut group = c.benchmark_group("mining");
    let config = MiningConfig::default();

    for n in [1_000usize, 10_000] {
        let events = synthetic_events(n);
        group.bench_function(format!("mine_{n}_events"), |b| {
            b.iter(|| {
                PatternMiner::new(&config)
                    .expect("valid config")
                    .mine(black_box(&events), T0)
            })
        });
    }

    group.finish();
}

// ─── Benchmark: Significance ────────────────────────────────────────────────

fn bench_significance(c: &mut Criterion) {
    let tester = SignificanceTester::default();
    c.bench_function("chi_squared_test", |b| {
        b.iter(|| {
            tester.test(
                black_box(Observation::new(37, 412)),
                black_box(Observation::new(61, 398)),
            )
        })
    });
}

// ─── Main ───────────────────────────────────────────────────────────────────

criterion_group!(
    benches,
    bench_startup,
    bench_graph,
    bench_mining,
    bench_significance,
);
criterion_main!(benches);
