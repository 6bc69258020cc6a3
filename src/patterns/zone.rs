// src/patterns/zone.rs — Per-zone mining with safety vetoes

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::config::MiningConfig;
use super::miner::{apply_output_policy, MiningStats, PatternMiner};
use super::rule::{rank_cmp, Rule};
use crate::events::normalize::{EventKind, NormEvent};
use crate::infra::errors::{HabitusError, Result};

pub const REASON_INSUFFICIENT_EVENTS: &str = "insufficient_events";

/// Zone/tag registry seam. Membership lives outside this crate.
pub trait ZoneMembership: Send + Sync {
    fn zone_ids(&self) -> Vec<String>;

    /// `None` when the zone is unknown to the registry.
    fn entities_in_zone(&self, zone_id: &str) -> Option<HashSet<String>>;
}

/// Fixed membership table, typically built from `[[zones]]` config.
#[derive(Debug, Clone, Default)]
pub struct StaticZones {
    zones: BTreeMap<String, BTreeSet<String>>,
}

impl StaticZones {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_zone<I, S>(mut self, zone_id: &str, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(zone_id, entities);
        self
    }

    pub fn insert<I, S>(&mut self, zone_id: &str, entities: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.zones
            .entry(zone_id.to_string())
            .or_default()
            .extend(entities.into_iter().map(Into::into));
    }
}

impl ZoneMembership for StaticZones {
    fn zone_ids(&self) -> Vec<String> {
        self.zones.keys().cloned().collect()
    }

    fn entities_in_zone(&self, zone_id: &str) -> Option<HashSet<String>> {
        self.zones
            .get(zone_id)
            .map(|members| members.iter().cloned().collect())
    }
}

/// Thresholds and safety policy of one zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneMiningConfig {
    pub zone_id: String,
    pub min_events: usize,
    pub confidence_threshold: f64,
    pub lift_threshold: f64,
    pub requires_confirmation: bool,
    /// Entities that may never be the consequent of an actionable rule.
    pub safety_critical_entities: BTreeSet<String>,
    /// Overrides the global mining thresholds for this zone.
    pub mining: Option<MiningConfig>,
}

impl Default for ZoneMiningConfig {
    fn default() -> Self {
        Self {
            zone_id: String::new(),
            min_events: 10,
            confidence_threshold: 0.6,
            lift_threshold: 1.5,
            requires_confirmation: true,
            safety_critical_entities: BTreeSet::new(),
            mining: None,
        }
    }
}

impl ZoneMiningConfig {
    pub fn for_zone(zone_id: impl Into<String>) -> Self {
        Self {
            zone_id: zone_id.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.zone_id.trim().is_empty() {
            return Err(HabitusError::Config("zone_id must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(HabitusError::Config(format!(
                "zone '{}': confidence_threshold must be within [0, 1]",
                self.zone_id
            )));
        }
        if !self.lift_threshold.is_finite() || self.lift_threshold < 0.0 {
            return Err(HabitusError::Config(format!(
                "zone '{}': lift_threshold must be >= 0",
                self.zone_id
            )));
        }
        if let Some(ref mining) = self.mining {
            mining.validate()?;
        }
        Ok(())
    }

    fn is_safety_critical(&self, entity_id: &str) -> bool {
        self.safety_critical_entities.contains(entity_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ZoneStats {
    pub skipped: bool,
    pub reason: Option<String>,
    /// Events attributed to the zone.
    pub events: usize,
    pub rules: usize,
    pub filtered: usize,
    pub blocked: usize,
    pub mining: Option<MiningStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneMiningResult {
    pub zone_id: String,
    /// Actionable rules, ranked.
    pub rules: Vec<Rule>,
    /// Below the zone's confidence/lift thresholds.
    pub filtered_rules: Vec<Rule>,
    /// Consequent is safety critical. Never actionable.
    pub safety_blocked: Vec<Rule>,
    pub stats: ZoneStats,
    pub requires_confirmation: bool,
}

impl ZoneMiningResult {
    fn skipped(zone: &ZoneMiningConfig, events: usize, reason: &str) -> Self {
        Self {
            zone_id: zone.zone_id.clone(),
            rules: Vec::new(),
            filtered_rules: Vec::new(),
            safety_blocked: Vec::new(),
            stats: ZoneStats {
                skipped: true,
                reason: Some(reason.to_string()),
                events,
                ..Default::default()
            },
            requires_confirmation: zone.requires_confirmation,
        }
    }
}

/// A cross-zone suggestion.
#[derive(Debug, Clone, Serialize)]
pub struct ZoneSuggestion {
    pub zone_id: String,
    pub requires_confirmation: bool,
    pub score: f64,
    pub rule: Rule,
}

/// Zone policy and membership. Global thresholds are supplied per pass so
/// zone mining always follows the live mining configuration.
pub struct ZoneBasedMiner {
    membership: Arc<dyn ZoneMembership>,
    zones: HashMap<String, ZoneMiningConfig>,
}

impl ZoneBasedMiner {
    pub fn new(membership: Arc<dyn ZoneMembership>) -> Self {
        Self {
            membership,
            zones: HashMap::new(),
        }
    }

    pub fn with_zone_configs<I>(mut self, configs: I) -> Result<Self>
    where
        I: IntoIterator<Item = ZoneMiningConfig>,
    {
        for config in configs {
            config.validate()?;
            self.zones.insert(config.zone_id.clone(), config);
        }
        Ok(self)
    }

    /// Configured policy for a zone, or defaults when none was registered.
    pub fn zone_config(&self, zone_id: &str) -> ZoneMiningConfig {
        self.zones
            .get(zone_id)
            .cloned()
            .unwrap_or_else(|| ZoneMiningConfig::for_zone(zone_id))
    }

    /// Zones known to the registry or configured here, sorted.
    pub fn zone_ids(&self) -> Vec<String> {
        let mut ids: BTreeSet<String> = self.membership.zone_ids().into_iter().collect();
        ids.extend(self.zones.keys().cloned());
        ids.into_iter().collect()
    }

    /// Mine one zone. `config` overrides the registered zone policy; `base`
    /// applies unless the zone carries its own mining thresholds.
    pub fn mine_zone(
        &self,
        events: &[NormEvent],
        zone_id: &str,
        config: Option<&ZoneMiningConfig>,
        base: &MiningConfig,
        now_ms: i64,
    ) -> Result<ZoneMiningResult> {
        let members = self.membership.entities_in_zone(zone_id);
        if members.is_none() && config.is_none() && !self.zones.contains_key(zone_id) {
            return Err(HabitusError::not_found("zone", zone_id));
        }
        let zone = match config {
            Some(c) => {
                let zone = ZoneMiningConfig {
                    zone_id: zone_id.to_string(),
                    ..c.clone()
                };
                zone.validate()?;
                zone
            }
            None => self.zone_config(zone_id),
        };
        let members = members.unwrap_or_default();

        let scoped: Vec<NormEvent> = events
            .iter()
            .filter(|e| in_zone(e, zone_id, &members))
            .cloned()
            .collect();

        if scoped.len() < zone.min_events {
            tracing::debug!(
                "Zone {}: {} events < min_events {}, skipping",
                zone_id,
                scoped.len(),
                zone.min_events
            );
            return Ok(ZoneMiningResult::skipped(
                &zone,
                scoped.len(),
                REASON_INSUFFICIENT_EVENTS,
            ));
        }

        let mining = zone.mining.as_ref().unwrap_or(base);
        let outcome = PatternMiner::new(mining)?.mine(&scoped, now_ms);
        let service_targets = service_call_targets(&scoped);

        // Veto first so a blocked consequent never reaches the threshold split.
        let mut rules = Vec::new();
        let mut filtered_rules = Vec::new();
        let mut safety_blocked = Vec::new();
        for rule in outcome.rules {
            if consequent_entities(&rule, &service_targets).any(|e| zone.is_safety_critical(e)) {
                safety_blocked.push(rule);
            } else if rule.confidence < zone.confidence_threshold
                || rule.lift < zone.lift_threshold
            {
                filtered_rules.push(rule);
            } else {
                rules.push(rule);
            }
        }

        let stats = ZoneStats {
            skipped: false,
            reason: None,
            events: scoped.len(),
            rules: rules.len(),
            filtered: filtered_rules.len(),
            blocked: safety_blocked.len(),
            mining: Some(outcome.stats),
        };
        tracing::info!(
            "Zone {}: {} rules, {} filtered, {} safety-blocked from {} events",
            zone_id,
            stats.rules,
            stats.filtered,
            stats.blocked,
            stats.events
        );

        Ok(ZoneMiningResult {
            zone_id: zone_id.to_string(),
            rules: apply_output_policy(rules, mining),
            filtered_rules: apply_output_policy(filtered_rules, mining),
            safety_blocked: apply_output_policy(safety_blocked, mining),
            stats,
            requires_confirmation: zone.requires_confirmation,
        })
    }

    /// Mine every known zone. A zone that fails is logged and left out.
    pub fn mine_all_zones(
        &self,
        events: &[NormEvent],
        base: &MiningConfig,
        now_ms: i64,
    ) -> Vec<ZoneMiningResult> {
        let mut results = Vec::new();
        for zone_id in self.zone_ids() {
            match self.mine_zone(events, &zone_id, None, base, now_ms) {
                Ok(result) => results.push(result),
                Err(e) => tracing::warn!("Zone {} mining failed: {}", zone_id, e),
            }
        }
        results
    }
}

/// Cross-zone ranked merge. Each (A, B) appears once, from the zone where
/// it scores best; blocked and filtered rules never surface.
pub fn get_top_suggestions(results: &[ZoneMiningResult], limit: usize) -> Vec<ZoneSuggestion> {
    let mut best: HashMap<(&str, &str), (&ZoneMiningResult, &Rule)> = HashMap::new();
    for result in results.iter().filter(|r| !r.stats.skipped) {
        for rule in &result.rules {
            let key = (rule.a.as_str(), rule.b.as_str());
            let replace = match best.get(&key) {
                Some((_, current)) => rank_cmp(rule, current).is_lt(),
                None => true,
            };
            if replace {
                best.insert(key, (result, rule));
            }
        }
    }

    let mut merged: Vec<(&ZoneMiningResult, &Rule)> = best.into_values().collect();
    merged.sort_by(|x, y| rank_cmp(x.1, y.1).then_with(|| x.0.zone_id.cmp(&y.0.zone_id)));
    merged
        .into_iter()
        .take(limit)
        .map(|(result, rule)| ZoneSuggestion {
            zone_id: result.zone_id.clone(),
            requires_confirmation: result.requires_confirmation,
            score: rule.score(),
            rule: rule.clone(),
        })
        .collect()
}

fn in_zone(event: &NormEvent, zone_id: &str, members: &HashSet<String>) -> bool {
    members.contains(&event.entity_id)
        || event.context.zone.as_deref() == Some(zone_id)
        || event.targets.iter().any(|t| members.contains(t))
}

/// Entities a service-call key acted on, per key.
fn service_call_targets(events: &[NormEvent]) -> HashMap<&str, HashSet<&str>> {
    let mut targets: HashMap<&str, HashSet<&str>> = HashMap::new();
    for e in events.iter().filter(|e| e.kind == EventKind::ServiceCall) {
        targets
            .entry(e.key.as_str())
            .or_default()
            .extend(e.targets.iter().map(String::as_str));
    }
    targets
}

fn consequent_entities<'a>(
    rule: &'a Rule,
    service_targets: &'a HashMap<&'a str, HashSet<&'a str>>,
) -> impl Iterator<Item = &'a str> {
    std::iter::once(rule.b_entity()).chain(
        service_targets
            .get(rule.b.as_str())
            .into_iter()
            .flat_map(|t| t.iter().copied()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::miner::tests::{ev, lenient};

    fn zoned(key: &str, ts_ms: i64, zone: &str) -> NormEvent {
        let mut e = ev(key, ts_ms);
        e.context.zone = Some(zone.to_string());
        e
    }

    fn kitchen_events(rounds: i64) -> Vec<NormEvent> {
        let mut events = Vec::new();
        for i in 0..rounds {
            let t = i * 100_000;
            events.push(zoned("binary_sensor.kitchen_motion:on", t, "kitchen"));
            events.push(zoned("light.kitchen:on", t + 2_000, "kitchen"));
            events.push(zoned("lock.back_door:unlocked", t + 4_000, "kitchen"));
        }
        events
    }

    fn miner(zones: StaticZones) -> ZoneBasedMiner {
        ZoneBasedMiner::new(Arc::new(zones))
    }

    #[test]
    fn test_insufficient_events_skips() {
        let events: Vec<_> = (0..5).map(|i| zoned("light.a:on", i * 1_000, "hall")).collect();
        let m = miner(StaticZones::new().with_zone("hall", ["light.a"]));
        let cfg = ZoneMiningConfig {
            min_events: 10,
            ..ZoneMiningConfig::for_zone("hall")
        };
        let result = m.mine_zone(&events, "hall", Some(&cfg), &lenient(), 0).unwrap();
        assert!(result.stats.skipped);
        assert_eq!(result.stats.reason.as_deref(), Some(REASON_INSUFFICIENT_EVENTS));
        assert!(result.rules.is_empty());
        assert_eq!(result.stats.events, 5);
    }

    #[test]
    fn test_safety_critical_consequent_blocked() {
        let m = miner(StaticZones::new().with_zone("kitchen", ["light.kitchen"]));
        let cfg = ZoneMiningConfig {
            min_events: 1,
            confidence_threshold: 0.0,
            lift_threshold: 0.0,
            safety_critical_entities: ["lock.back_door".to_string()].into(),
            ..ZoneMiningConfig::for_zone("kitchen")
        };
        let result = m.mine_zone(&kitchen_events(6), "kitchen", Some(&cfg), &lenient(), 0).unwrap();

        assert!(!result.safety_blocked.is_empty());
        assert!(result.rules.iter().all(|r| r.b_entity() != "lock.back_door"));
        assert!(result.filtered_rules.iter().all(|r| r.b_entity() != "lock.back_door"));
        assert!(result.safety_blocked.iter().all(|r| r.b_entity() == "lock.back_door"));
        assert!(result
            .rules
            .iter()
            .any(|r| r.a == "binary_sensor.kitchen_motion:on" && r.b == "light.kitchen:on"));
    }

    #[test]
    fn test_safety_veto_covers_service_call_targets() {
        let mut events = Vec::new();
        for i in 0..6 {
            let t = i * 100_000;
            events.push(zoned("binary_sensor.door:on", t, "garage"));
            let mut call = zoned("lock.unlock:called", t + 1_000, "garage");
            call.kind = EventKind::ServiceCall;
            call.targets = vec!["lock.garage".into()];
            events.push(call);
        }
        let m = miner(StaticZones::new().with_zone("garage", ["lock.garage"]));
        let cfg = ZoneMiningConfig {
            min_events: 1,
            confidence_threshold: 0.0,
            lift_threshold: 0.0,
            safety_critical_entities: ["lock.garage".to_string()].into(),
            ..ZoneMiningConfig::for_zone("garage")
        };
        let result = m.mine_zone(&events, "garage", Some(&cfg), &lenient(), 0).unwrap();
        assert!(result.rules.iter().all(|r| r.b != "lock.unlock:called"));
        assert!(result.safety_blocked.iter().any(|r| r.b == "lock.unlock:called"));
    }

    #[test]
    fn test_zone_thresholds_filter() {
        let m = miner(StaticZones::new().with_zone("kitchen", Vec::<String>::new()));
        let cfg = ZoneMiningConfig {
            min_events: 1,
            confidence_threshold: 1.0,
            lift_threshold: 100.0,
            ..ZoneMiningConfig::for_zone("kitchen")
        };
        let result = m.mine_zone(&kitchen_events(6), "kitchen", Some(&cfg), &lenient(), 0).unwrap();
        assert!(result.rules.is_empty());
        assert!(!result.filtered_rules.is_empty());
        assert_eq!(result.stats.filtered, result.filtered_rules.len());
    }

    #[test]
    fn test_events_outside_zone_ignored() {
        let mut events = kitchen_events(6);
        events.extend((0..20).map(|i| zoned("light.porch:on", i * 7_000, "outside")));
        let m = miner(StaticZones::new().with_zone("kitchen", Vec::<String>::new()));
        let cfg = ZoneMiningConfig {
            min_events: 1,
            ..ZoneMiningConfig::for_zone("kitchen")
        };
        let result = m.mine_zone(&events, "kitchen", Some(&cfg), &lenient(), 0).unwrap();
        assert_eq!(result.stats.events, 18);
        assert!(result
            .rules
            .iter()
            .chain(&result.filtered_rules)
            .all(|r| !r.a.contains("porch") && !r.b.contains("porch")));
    }

    #[test]
    fn test_unknown_zone_is_error() {
        let m = miner(StaticZones::new());
        let err = m.mine_zone(&[], "attic", None, &lenient(), 0).unwrap_err();
        assert!(matches!(err, HabitusError::NotFound { .. }));
    }

    #[test]
    fn test_mine_all_and_top_suggestions() {
        let mut events = kitchen_events(6);
        for i in 0..6 {
            let t = 10_000_000 + i * 100_000;
            events.push(zoned("binary_sensor.hall_motion:on", t, "hall"));
            events.push(zoned("light.hall:on", t + 1_000, "hall"));
        }
        let zones = StaticZones::new()
            .with_zone("kitchen", Vec::<String>::new())
            .with_zone("hall", Vec::<String>::new())
            .with_zone("attic", Vec::<String>::new());
        let m = miner(zones)
            .with_zone_configs(["kitchen", "hall"].map(|z| ZoneMiningConfig {
                min_events: 4,
                confidence_threshold: 0.0,
                lift_threshold: 0.0,
                ..ZoneMiningConfig::for_zone(z)
            }))
            .unwrap();

        let results = m.mine_all_zones(&events, &lenient(), 0);
        assert_eq!(results.len(), 3);
        let attic = results.iter().find(|r| r.zone_id == "attic").unwrap();
        assert!(attic.stats.skipped);

        let top = get_top_suggestions(&results, 2);
        assert_eq!(top.len(), 2);
        assert!(top[0].score >= top[1].score);

        let all = get_top_suggestions(&results, usize::MAX);
        let mut pairs: Vec<_> = all.iter().map(|s| (&s.rule.a, &s.rule.b)).collect();
        let before = pairs.len();
        pairs.sort();
        pairs.dedup();
        assert_eq!(pairs.len(), before);
        assert!(all.iter().any(|s| s.zone_id == "hall"));
    }

    #[test]
    fn test_invalid_zone_config_rejected() {
        let cfg = ZoneMiningConfig {
            confidence_threshold: 2.0,
            ..ZoneMiningConfig::for_zone("kitchen")
        };
        assert!(cfg.validate().is_err());
        assert!(ZoneMiningConfig::default().validate().is_err());
    }
}
