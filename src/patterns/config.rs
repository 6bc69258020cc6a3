// src/patterns/config.rs — Mining thresholds

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::infra::errors::{HabitusError, Result};

/// Longest accepted A→B window: 30 days.
pub const MAX_WINDOW_SEC: u64 = 30 * 24 * 3600;

/// Thresholds and filters for one mining pass. Immutable during the pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    /// Candidate delays between A and B, in seconds.
    pub windows_sec: Vec<u64>,
    pub min_support_a: u32,
    pub min_support_b: u32,
    pub min_hits: u32,
    pub min_confidence: f64,
    pub min_confidence_lb: f64,
    pub min_lift: f64,
    pub min_leverage: f64,
    pub max_rules: usize,
    /// Empty means every domain.
    pub include_domains: Vec<String>,
    pub exclude_domains: Vec<String>,
    pub exclude_self_rules: bool,
    pub exclude_same_entity: bool,
    pub anonymize_entity_ids: bool,
    /// Distinct days with at least one hit; 0 disables the check.
    pub min_stability_days: u32,
    /// Hit/miss examples kept per rule.
    pub max_examples: usize,
    /// z-value of the Wilson lower bound (1.96 ≈ 95%).
    pub wilson_z: f64,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            windows_sec: vec![60, 300, 900],
            min_support_a: 5,
            min_support_b: 5,
            min_hits: 3,
            min_confidence: 0.5,
            min_confidence_lb: 0.3,
            min_lift: 1.2,
            min_leverage: 0.0,
            max_rules: 200,
            include_domains: Vec::new(),
            exclude_domains: Vec::new(),
            exclude_self_rules: true,
            exclude_same_entity: true,
            anonymize_entity_ids: false,
            min_stability_days: 0,
            max_examples: 3,
            wilson_z: 1.96,
        }
    }
}

impl MiningConfig {
    /// Reject contradictory or out-of-range thresholds. Nothing is clamped.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(HabitusError::Config(msg));

        if self.windows_sec.is_empty() {
            return fail("windows_sec must not be empty".into());
        }
        if self.windows_sec.contains(&0) {
            return fail("windows_sec entries must be > 0".into());
        }
        if let Some(w) = self.windows_sec.iter().find(|&&w| w > MAX_WINDOW_SEC) {
            return fail(format!("windows_sec entry {w} exceeds {MAX_WINDOW_SEC} seconds"));
        }
        if self.min_support_a == 0 || self.min_support_b == 0 {
            return fail("min_support_a/min_support_b must be >= 1".into());
        }
        if self.min_hits == 0 {
            return fail("min_hits must be >= 1".into());
        }
        for (name, v) in [
            ("min_confidence", self.min_confidence),
            ("min_confidence_lb", self.min_confidence_lb),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return fail(format!("{name} must be within [0, 1], got {v}"));
            }
        }
        if self.min_confidence_lb > self.min_confidence {
            return fail(format!(
                "min_confidence_lb ({}) exceeds min_confidence ({})",
                self.min_confidence_lb, self.min_confidence
            ));
        }
        if !self.min_lift.is_finite() || self.min_lift < 0.0 {
            return fail(format!("min_lift must be >= 0, got {}", self.min_lift));
        }
        // Leverage of two events is bounded by ±0.25.
        if !(-0.25..=0.25).contains(&self.min_leverage) {
            return fail(format!(
                "min_leverage must be within [-0.25, 0.25], got {}",
                self.min_leverage
            ));
        }
        if self.max_rules == 0 {
            return fail("max_rules must be >= 1".into());
        }
        if !self.wilson_z.is_finite() || self.wilson_z <= 0.0 {
            return fail(format!("wilson_z must be > 0, got {}", self.wilson_z));
        }
        if let Some(d) = self
            .include_domains
            .iter()
            .find(|d| self.exclude_domains.contains(d))
        {
            return fail(format!("domain '{d}' is both included and excluded"));
        }
        Ok(())
    }

    pub fn domain_allowed(&self, domain: &str) -> bool {
        if self.exclude_domains.iter().any(|d| d == domain) {
            return false;
        }
        self.include_domains.is_empty() || self.include_domains.iter().any(|d| d == domain)
    }

    /// Flat key→value form used for persistence.
    pub fn to_kv(&self) -> BTreeMap<String, String> {
        let mut kv = BTreeMap::new();
        let mut put = |k: &str, v: String| {
            kv.insert(k.to_string(), v);
        };
        put("windows_sec", join(self.windows_sec.iter()));
        put("min_support_a", self.min_support_a.to_string());
        put("min_support_b", self.min_support_b.to_string());
        put("min_hits", self.min_hits.to_string());
        put("min_confidence", self.min_confidence.to_string());
        put("min_confidence_lb", self.min_confidence_lb.to_string());
        put("min_lift", self.min_lift.to_string());
        put("min_leverage", self.min_leverage.to_string());
        put("max_rules", self.max_rules.to_string());
        put("include_domains", join(self.include_domains.iter()));
        put("exclude_domains", join(self.exclude_domains.iter()));
        put("exclude_self_rules", self.exclude_self_rules.to_string());
        put("exclude_same_entity", self.exclude_same_entity.to_string());
        put("anonymize_entity_ids", self.anonymize_entity_ids.to_string());
        put("min_stability_days", self.min_stability_days.to_string());
        put("max_examples", self.max_examples.to_string());
        put("wilson_z", self.wilson_z.to_string());
        kv
    }

    /// Inverse of [`MiningConfig::to_kv`]. Missing keys keep defaults;
    /// unknown keys and unparsable values are errors.
    pub fn from_kv(kv: &BTreeMap<String, String>) -> Result<Self> {
        let mut c = Self::default();
        for (key, value) in kv {
            match key.as_str() {
                "windows_sec" => c.windows_sec = parse_list(key, value)?,
                "min_support_a" => c.min_support_a = parse(key, value)?,
                "min_support_b" => c.min_support_b = parse(key, value)?,
                "min_hits" => c.min_hits = parse(key, value)?,
                "min_confidence" => c.min_confidence = parse(key, value)?,
                "min_confidence_lb" => c.min_confidence_lb = parse(key, value)?,
                "min_lift" => c.min_lift = parse(key, value)?,
                "min_leverage" => c.min_leverage = parse(key, value)?,
                "max_rules" => c.max_rules = parse(key, value)?,
                "include_domains" => c.include_domains = parse_list(key, value)?,
                "exclude_domains" => c.exclude_domains = parse_list(key, value)?,
                "exclude_self_rules" => c.exclude_self_rules = parse(key, value)?,
                "exclude_same_entity" => c.exclude_same_entity = parse(key, value)?,
                "anonymize_entity_ids" => c.anonymize_entity_ids = parse(key, value)?,
                "min_stability_days" => c.min_stability_days = parse(key, value)?,
                "max_examples" => c.max_examples = parse(key, value)?,
                "wilson_z" => c.wilson_z = parse(key, value)?,
                other => {
                    return Err(HabitusError::Config(format!(
                        "unknown mining threshold '{other}'"
                    )))
                }
            }
        }
        c.validate()?;
        Ok(c)
    }
}

fn join<T: ToString>(items: impl Iterator<Item = T>) -> String {
    items.map(|i| i.to_string()).collect::<Vec<_>>().join(",")
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| HabitusError::Config(format!("cannot parse {key} = '{value}'")))
}

fn parse_list<T: std::str::FromStr>(key: &str, value: &str) -> Result<Vec<T>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse(key, s))
        .collect()
}
