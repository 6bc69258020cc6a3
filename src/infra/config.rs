// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::infra::errors::{HabitusError, Result};
use crate::infra::paths;
use crate::patterns::config::MiningConfig;
use crate::patterns::zone::{StaticZones, ZoneMiningConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub graph: GraphConfig,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub mining: MiningConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub significance: SignificanceConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub zones: Vec<ZoneEntry>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub max_nodes: usize,
    pub max_edges: usize,
    pub node_half_life_hours: f64,
    pub edge_half_life_hours: f64,
    pub node_min_score: f64,
    pub edge_min_weight: f64,
    /// Score added to an entity node per state change.
    pub state_change_delta: f64,
    /// Score added to a service concept node per call.
    pub service_call_delta: f64,
    /// Weight added to derived edges (`in_zone`, `affects`).
    pub edge_delta: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_nodes: 500,
            max_edges: 1500,
            node_half_life_hours: 72.0,
            edge_half_life_hours: 24.0,
            node_min_score: 0.1,
            edge_min_weight: 0.1,
            state_change_delta: 1.0,
            service_call_delta: 1.0,
            edge_delta: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub buffer_max_events: usize,
    pub retention_hours: u32,
    /// Local time offset used for hour/weekday context.
    pub utc_offset_minutes: i32,
    /// Feed service calls to the miner as well as state changes.
    pub include_service_calls: bool,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer_max_events: 100_000,
            retention_hours: 24 * 14,
            utc_offset_minutes: 0,
            include_service_calls: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Minimum gap between two scheduled mining passes.
    pub min_gap_minutes: u32,
    pub lookback_hours: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_gap_minutes: 60,
            lookback_hours: 24 * 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignificanceConfig {
    pub min_samples: u64,
    pub alpha: f64,
}

impl Default for SignificanceConfig {
    fn default() -> Self {
        Self {
            min_samples: 20,
            alpha: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub enabled: bool,
    /// Defaults to `<data dir>/habitus.db`.
    pub database: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database: None,
        }
    }
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(paths::db_path)
    }
}

/// One `[[zones]]` table: membership plus mining policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZoneEntry {
    pub id: String,
    #[serde(default)]
    pub entities: Vec<String>,
    pub min_events: Option<usize>,
    pub confidence_threshold: Option<f64>,
    pub lift_threshold: Option<f64>,
    pub requires_confirmation: Option<bool>,
    #[serde(default)]
    pub safety_critical_entities: BTreeSet<String>,
    pub mining: Option<MiningConfig>,
}

impl ZoneEntry {
    pub fn mining_config(&self) -> ZoneMiningConfig {
        let d = ZoneMiningConfig::for_zone(&self.id);
        ZoneMiningConfig {
            min_events: self.min_events.unwrap_or(d.min_events),
            confidence_threshold: self.confidence_threshold.unwrap_or(d.confidence_threshold),
            lift_threshold: self.lift_threshold.unwrap_or(d.lift_threshold),
            requires_confirmation: self.requires_confirmation.unwrap_or(d.requires_confirmation),
            safety_critical_entities: self.safety_critical_entities.clone(),
            mining: self.mining.clone(),
            ..d
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.mining.validate()?;

        let g = &self.graph;
        if g.max_nodes == 0 || g.max_edges == 0 {
            return Err(HabitusError::Config(
                "graph.max_nodes and graph.max_edges must be >= 1".into(),
            ));
        }
        if g.node_half_life_hours <= 0.0 || g.edge_half_life_hours <= 0.0 {
            return Err(HabitusError::Config("graph half-lives must be > 0".into()));
        }
        if g.node_min_score < 0.0 || g.edge_min_weight < 0.0 {
            return Err(HabitusError::Config(
                "graph.node_min_score and graph.edge_min_weight must be >= 0".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.significance.alpha) || self.significance.alpha == 0.0 {
            return Err(HabitusError::Config(format!(
                "significance.alpha must be within (0, 1), got {}",
                self.significance.alpha
            )));
        }
        if !(-14 * 60..=14 * 60).contains(&self.events.utc_offset_minutes) {
            return Err(HabitusError::Config(format!(
                "events.utc_offset_minutes out of range: {}",
                self.events.utc_offset_minutes
            )));
        }

        let mut seen = BTreeSet::new();
        for zone in &self.zones {
            if !seen.insert(zone.id.as_str()) {
                return Err(HabitusError::Config(format!(
                    "zone '{}' is defined twice",
                    zone.id
                )));
            }
            zone.mining_config().validate()?;
        }
        Ok(())
    }

    /// Zone membership table from the `[[zones]]` entries.
    pub fn static_zones(&self) -> StaticZones {
        let mut zones = StaticZones::new();
        for zone in &self.zones {
            zones.insert(&zone.id, zone.entities.iter().cloned());
        }
        zones
    }

    pub fn zone_mining_configs(&self) -> Vec<ZoneMiningConfig> {
        self.zones.iter().map(ZoneEntry::mining_config).collect()
    }
}
