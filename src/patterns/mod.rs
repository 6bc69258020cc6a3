// src/patterns/mod.rs — Habitus: windowed A→B association-rule mining

pub mod config;
pub mod habitus;
pub mod miner;
pub mod rule;
pub mod stats;
pub mod zone;

pub use config::MiningConfig;
pub use habitus::{HabitusService, MinedPattern, PatternEvidence};
pub use miner::{MiningOutcome, MiningStats, PatternMiner};
pub use rule::{Rule, RuleEvidence, RuleFilter};
pub use zone::{
    get_top_suggestions, StaticZones, ZoneBasedMiner, ZoneMembership, ZoneMiningConfig,
    ZoneMiningResult, ZoneSuggestion,
};
