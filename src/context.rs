// src/context.rs — Services wired together once at startup

use serde_json::Value;
use std::sync::Arc;

use crate::events::normalize::{BatchSummary, EventNormalizer};
use crate::experiments::ab::ExperimentRegistry;
use crate::experiments::significance::SignificanceTester;
use crate::graph::service::BrainGraphService;
use crate::infra::config::Config;
use crate::infra::errors::{HabitusError, Result};
use crate::patterns::habitus::HabitusService;
use crate::patterns::zone::ZoneBasedMiner;
use crate::storage::{Database, SharedStore};

/// Everything a front end needs, built from one [`Config`].
pub struct HabitusContext {
    pub config: Config,
    pub normalizer: EventNormalizer,
    pub graph: Arc<BrainGraphService>,
    pub habitus: Arc<HabitusService>,
    pub experiments: Arc<ExperimentRegistry>,
    pub db: Option<SharedStore>,
}

impl HabitusContext {
    /// Open the configured database (when enabled) and reload persisted state.
    pub fn new(config: Config, now_ms: i64) -> Result<Self> {
        let db = if config.storage.enabled {
            let path = config.storage.database_path();
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let database = Database::open(&path)
                .map_err(|e| HabitusError::Storage(format!("{}: {e}", path.display())))?;
            tracing::debug!("Opened database at {}", path.display());
            Some(database.into_shared())
        } else {
            None
        };
        Self::build(config, db, now_ms)
    }

    /// Same wiring over an in-memory database.
    pub fn in_memory(config: Config, now_ms: i64) -> Result<Self> {
        let db = Database::in_memory().map_err(|e| HabitusError::Storage(e.to_string()))?;
        Self::build(config, Some(db.into_shared()), now_ms)
    }

    fn build(config: Config, db: Option<SharedStore>, now_ms: i64) -> Result<Self> {
        config.validate()?;
        let normalizer = EventNormalizer::new(config.events.utc_offset_minutes);

        let graph = match db {
            Some(ref db) => {
                BrainGraphService::with_store(config.graph.clone(), normalizer.clone(), db.clone())?
            }
            None => BrainGraphService::new(config.graph.clone(), normalizer.clone()),
        };

        let mut habitus =
            HabitusService::new(config.mining.clone(), &config.events, &config.scheduler)?;
        if !config.zones.is_empty() {
            let zones = ZoneBasedMiner::new(Arc::new(config.static_zones()))
                .with_zone_configs(config.zone_mining_configs())?;
            habitus = habitus.with_zones(zones);
        }
        if let Some(ref db) = db {
            habitus = habitus.with_store(db.clone(), now_ms)?;
        }

        let mut experiments = ExperimentRegistry::new(SignificanceTester::from(&config.significance));
        if let Some(ref db) = db {
            experiments = experiments.with_store(db.clone())?;
        }

        Ok(Self {
            normalizer,
            graph: Arc::new(graph),
            habitus: Arc::new(habitus),
            experiments: Arc::new(experiments),
            db,
            config,
        })
    }

    /// Normalize a batch once, project it onto the graph and buffer it for
    /// mining. Graph failures are logged per event and never stop the batch.
    pub fn ingest_raw(&self, raws: &[Value], received_at_ms: i64) -> Result<BatchSummary> {
        let (events, summary) = self.normalizer.normalize_batch(raws, received_at_ms);
        for event in &events {
            if let Err(e) = self.graph.apply_event(event) {
                tracing::warn!("Graph update for {} failed: {}", event.key, e);
            }
        }
        let buffered = self.habitus.ingest(events, received_at_ms)?;
        tracing::info!(
            "Ingested batch: {} accepted, {} rejected, {} buffered for mining",
            summary.accepted,
            summary.rejected,
            buffered
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::model::GraphQuery;
    use serde_json::json;

    const T0: i64 = 1_767_261_600_000;

    #[test]
    fn test_ingest_feeds_graph_and_buffer() {
        let ctx = HabitusContext::in_memory(Config::default(), T0).unwrap();
        let raws = vec![
            json!({"type": "state_changed", "entity_id": "light.kitchen", "old": "off", "new": "on", "zone": "kitchen", "ts": T0}),
            json!({"type": "call_service", "domain": "light", "service": "turn_off", "entity_ids": ["light.kitchen"], "ts": T0 + 1_000}),
            json!({"nonsense": true}),
        ];
        let summary = ctx.ingest_raw(&raws, T0 + 2_000).unwrap();
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.rejected, 1);

        // Service calls reach the graph but not the miner by default.
        assert_eq!(ctx.habitus.buffered(), 1);
        let state = ctx.graph.get_graph_state(&GraphQuery::default(), T0 + 2_000).unwrap();
        let ids: Vec<&str> = state.nodes.iter().map(|n| n.id.as_str()).collect();
        assert!(ids.contains(&"light.kitchen"));
        assert!(ids.contains(&"zone:kitchen"));
        assert!(ids.contains(&"service:light.turn_off"));
    }

    #[test]
    fn test_storage_disabled() {
        let mut config = Config::default();
        config.storage.enabled = false;
        let ctx = HabitusContext::new(config, T0).unwrap();
        assert!(ctx.db.is_none());
        assert!(ctx.graph.save_snapshot().is_err());
    }
}
