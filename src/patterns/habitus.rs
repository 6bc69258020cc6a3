// src/patterns/habitus.rs — Event buffer owner and mining entry point

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::config::MiningConfig;
use super::miner::{apply_output_policy, MiningStats, PatternMiner};
use super::rule::{Rule, RuleEvidence, RuleFilter};
use super::stats::pattern_id;
use super::zone::ZoneBasedMiner;
use crate::events::buffer::EventBuffer;
use crate::events::normalize::{EventKind, NormEvent};
use crate::infra::config::{EventsConfig, SchedulerConfig};
use crate::infra::errors::{HabitusError, Result};
use crate::storage::SharedStore;

const HOUR_MS: i64 = 3_600_000;
const MINUTE_MS: i64 = 60_000;

/// Statistics behind one mined pattern.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternEvidence {
    pub n_a: u64,
    pub n_b: u64,
    pub n_ab: u64,
    pub dt_sec: u64,
    pub confidence: f64,
    pub confidence_lb: f64,
    pub lift: f64,
    pub leverage: f64,
    pub score: f64,
    pub examples: RuleEvidence,
    pub zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MinedPattern {
    pub antecedent: String,
    pub consequent: String,
    pub evidence: PatternEvidence,
    pub discovered_at_ms: i64,
}

impl MinedPattern {
    fn from_rule(rule: &Rule, zone: Option<&str>) -> Self {
        Self {
            antecedent: rule.a.clone(),
            consequent: rule.b.clone(),
            evidence: PatternEvidence {
                n_a: rule.n_a,
                n_b: rule.n_b,
                n_ab: rule.n_ab,
                dt_sec: rule.dt_sec,
                confidence: rule.confidence,
                confidence_lb: rule.confidence_lb,
                lift: rule.lift,
                leverage: rule.leverage,
                score: rule.score(),
                examples: rule.evidence.clone(),
                zone: zone.map(str::to_string),
            },
            discovered_at_ms: rule.created_at_ms,
        }
    }
}

/// Mining state swapped as a unit after each successful pass.
#[derive(Debug, Default)]
struct MiningState {
    config: MiningConfig,
    rules: Arc<Vec<Rule>>,
    last_run_ms: Option<i64>,
    last_stats: Option<MiningStats>,
}

/// Owns the mining buffer and the current rule set.
pub struct HabitusService {
    buffer: Mutex<EventBuffer>,
    state: Mutex<MiningState>,
    zones: Option<ZoneBasedMiner>,
    persist: Option<SharedStore>,
    include_service_calls: bool,
    min_gap_ms: i64,
    default_lookback_hours: u32,
}

impl HabitusService {
    pub fn new(mining: MiningConfig, events: &EventsConfig, scheduler: &SchedulerConfig) -> Result<Self> {
        mining.validate()?;
        Ok(Self {
            buffer: Mutex::new(EventBuffer::new(
                events.buffer_max_events,
                events.retention_hours as i64 * HOUR_MS,
            )),
            state: Mutex::new(MiningState {
                config: mining,
                ..Default::default()
            }),
            zones: None,
            persist: None,
            include_service_calls: events.include_service_calls,
            min_gap_ms: scheduler.min_gap_minutes as i64 * MINUTE_MS,
            default_lookback_hours: scheduler.lookback_hours,
        })
    }

    pub fn with_zones(mut self, zones: ZoneBasedMiner) -> Self {
        self.zones = Some(zones);
        self
    }

    /// Attach a database: persisted thresholds replace the configured ones
    /// and retained events are reloaded into the buffer.
    pub fn with_store(mut self, persist: SharedStore, now_ms: i64) -> Result<Self> {
        {
            let db = persist
                .lock()
                .map_err(|_| HabitusError::LockPoisoned("storage"))?;
            let kv = db
                .load_mining_thresholds()
                .map_err(|e| HabitusError::Storage(e.to_string()))?;
            if !kv.is_empty() {
                let config = MiningConfig::from_kv(&kv)?;
                tracing::info!("Loaded {} persisted mining thresholds", kv.len());
                self.state_mut()?.config = config;
            }

            let buffer = self
                .buffer
                .get_mut()
                .map_err(|_| HabitusError::LockPoisoned("event buffer"))?;
            let since = now_ms - buffer.max_age_ms();
            let events = db
                .query_norm_events_since(since)
                .map_err(|e| HabitusError::Storage(e.to_string()))?;
            tracing::debug!("Reloaded {} events", events.len());
            buffer.extend(events);
        }
        self.persist = Some(persist);
        Ok(self)
    }

    fn state_mut(&mut self) -> Result<&mut MiningState> {
        self.state
            .get_mut()
            .map_err(|_| HabitusError::LockPoisoned("mining state"))
    }

    fn state(&self) -> Result<MutexGuard<'_, MiningState>> {
        self.state
            .lock()
            .map_err(|_| HabitusError::LockPoisoned("mining state"))
    }

    fn buffer(&self) -> Result<MutexGuard<'_, EventBuffer>> {
        self.buffer
            .lock()
            .map_err(|_| HabitusError::LockPoisoned("event buffer"))
    }

    // -- Ingestion --

    /// Buffer normalized events for mining and expire old ones. Returns how
    /// many were buffered.
    pub fn ingest(&self, events: Vec<NormEvent>, now_ms: i64) -> Result<usize> {
        let accepted: Vec<NormEvent> = events
            .into_iter()
            .filter(|e| self.include_service_calls || e.kind == EventKind::StateChange)
            .collect();
        if accepted.is_empty() {
            return Ok(0);
        }

        let cutoff = {
            let mut buffer = self.buffer()?;
            buffer.extend(accepted.iter().cloned());
            let expired = buffer.expire(now_ms);
            if expired > 0 {
                tracing::debug!("Expired {} buffered events", expired);
            }
            now_ms - buffer.max_age_ms()
        };

        if let Some(ref persist) = self.persist {
            let result = match persist.lock() {
                Ok(db) => db
                    .insert_norm_events(&accepted)
                    .and_then(|_| db.delete_norm_events_before(cutoff))
                    .map_err(|e| HabitusError::Storage(e.to_string())),
                Err(_) => Err(HabitusError::LockPoisoned("storage")),
            };
            if let Err(e) = result {
                tracing::warn!("Event write-through failed: {}", e);
            }
        }
        Ok(accepted.len())
    }

    pub fn buffered(&self) -> usize {
        self.buffer().map(|b| b.len()).unwrap_or_default()
    }

    // -- Mining --

    /// Run a full pass over the last `lookback_hours` of buffered events,
    /// optionally scoped to a zone. The rule cache is replaced only when
    /// the pass succeeds.
    pub fn mine_patterns(
        &self,
        lookback_hours: u32,
        zone: Option<&str>,
        now_ms: i64,
    ) -> Result<BTreeMap<String, MinedPattern>> {
        let since = now_ms - lookback_hours as i64 * HOUR_MS;
        let snapshot = self.buffer()?.snapshot(Some(since));
        let config = self.state()?.config.clone();

        let (rules, stats) = match zone {
            Some(zone_id) => {
                let zones = self.zones.as_ref().ok_or_else(|| {
                    HabitusError::validation("zone", "zone mining is not configured")
                })?;
                let result = zones.mine_zone(&snapshot, zone_id, None, &config, now_ms)?;
                (result.rules, result.stats.mining.unwrap_or_default())
            }
            None => {
                let outcome = PatternMiner::new(&config)?.mine(&snapshot, now_ms);
                (apply_output_policy(outcome.rules, &config), outcome.stats)
            }
        };

        tracing::info!(
            "Mined {} rules from {} events ({}h lookback{})",
            rules.len(),
            snapshot.len(),
            lookback_hours,
            zone.map(|z| format!(", zone {z}")).unwrap_or_default()
        );

        let patterns = rules
            .iter()
            .map(|r| (pattern_id(&r.a, &r.b), MinedPattern::from_rule(r, zone)))
            .collect();

        let mut state = self.state()?;
        state.rules = Arc::new(rules);
        state.last_run_ms = Some(now_ms);
        state.last_stats = Some(stats);
        Ok(patterns)
    }

    /// Scheduled pass: `None` when the previous pass is more recent than
    /// the minimum gap.
    pub fn mine_if_due(&self, now_ms: i64) -> Result<Option<BTreeMap<String, MinedPattern>>> {
        if let Some(last) = self.state()?.last_run_ms {
            if now_ms - last < self.min_gap_ms {
                tracing::debug!("Mining not due ({} ms since last pass)", now_ms - last);
                return Ok(None);
            }
        }
        self.mine_patterns(self.default_lookback_hours, None, now_ms)
            .map(Some)
    }

    /// Cached rules from the last pass, best first.
    pub fn get_rules(&self, filter: &RuleFilter) -> Result<Vec<Rule>> {
        let rules = Arc::clone(&self.state()?.rules);
        Ok(filter.apply(rules.iter()))
    }

    pub fn last_stats(&self) -> Option<MiningStats> {
        self.state().ok().and_then(|s| s.last_stats.clone())
    }

    pub fn last_run_ms(&self) -> Option<i64> {
        self.state().ok().and_then(|s| s.last_run_ms)
    }

    pub fn zones(&self) -> Option<&ZoneBasedMiner> {
        self.zones.as_ref()
    }

    /// Snapshot of buffered events since `since_ms`.
    pub fn events_since(&self, since_ms: i64) -> Result<Vec<NormEvent>> {
        Ok(self.buffer()?.snapshot(Some(since_ms)))
    }

    pub fn mining_config(&self) -> Result<MiningConfig> {
        Ok(self.state()?.config.clone())
    }

    /// Validate and install new thresholds, persisting them when a database
    /// is attached. Takes effect on the next pass.
    pub fn update_mining_config(&self, config: MiningConfig) -> Result<()> {
        config.validate()?;
        if let Some(ref persist) = self.persist {
            let db = persist
                .lock()
                .map_err(|_| HabitusError::LockPoisoned("storage"))?;
            if let Err(e) = db.save_mining_thresholds(&config.to_kv()) {
                tracing::warn!("Persisting mining thresholds failed: {}", e);
            }
        }
        self.state()?.config = config;
        Ok(())
    }
}
