// src/patterns/rule.rs — Mined A→B association rules

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::stats::anonymize_key;
use crate::events::normalize::{key_domain, split_key};

// Composite score weights. Each term lies in [0, 1], so the score does too.
const W_CONFIDENCE_LB: f64 = 0.6;
const W_LIFT: f64 = 0.3;
const W_LEVERAGE: f64 = 0.1;

/// Largest possible leverage of two events.
const MAX_LEVERAGE: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitExample {
    pub a_ts_ms: i64,
    pub b_ts_ms: i64,
    pub latency_sec: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissExample {
    pub a_ts_ms: i64,
}

/// A→B delay distribution over all hits, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyQuantiles {
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleEvidence {
    pub hits: Vec<HitExample>,
    pub misses: Vec<MissExample>,
    pub latency: Option<LatencyQuantiles>,
    /// Distinct days with at least one hit.
    pub stability_days: u32,
}

/// "When A happens, B follows within `dt_sec`."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub a: String,
    pub b: String,
    pub n_a: u64,
    pub n_b: u64,
    pub n_ab: u64,
    /// Events in the mined snapshot.
    pub n_total: u64,
    pub dt_sec: u64,
    pub confidence: f64,
    pub confidence_lb: f64,
    pub lift: f64,
    pub leverage: f64,
    pub evidence: RuleEvidence,
    pub created_at_ms: i64,
}

impl Rule {
    /// Weighted sum of the Wilson bound, a saturating lift term and
    /// normalized leverage. Non-decreasing in each statistic.
    pub fn score(&self) -> f64 {
        let lift_term = if self.lift > 1.0 { 1.0 - 1.0 / self.lift } else { 0.0 };
        let leverage_term = (self.leverage / MAX_LEVERAGE).clamp(0.0, 1.0);
        W_CONFIDENCE_LB * self.confidence_lb.clamp(0.0, 1.0)
            + W_LIFT * lift_term
            + W_LEVERAGE * leverage_term
    }

    pub fn a_entity(&self) -> &str {
        split_key(&self.a).0
    }

    pub fn b_entity(&self) -> &str {
        split_key(&self.b).0
    }

    pub fn a_domain(&self) -> &str {
        key_domain(&self.a)
    }

    pub fn b_domain(&self) -> &str {
        key_domain(&self.b)
    }

    /// Copy with entity ids hashed; statistics untouched.
    pub fn anonymized(&self) -> Self {
        Self {
            a: anonymize_key(&self.a),
            b: anonymize_key(&self.b),
            ..self.clone()
        }
    }
}

/// Best first: score, then evidence, then shorter window, then keys.
pub fn rank_cmp(x: &Rule, y: &Rule) -> Ordering {
    y.score()
        .total_cmp(&x.score())
        .then_with(|| y.n_ab.cmp(&x.n_ab))
        .then_with(|| x.dt_sec.cmp(&y.dt_sec))
        .then_with(|| x.a.cmp(&y.a))
        .then_with(|| x.b.cmp(&y.b))
}

/// Caller-side filter for cached rules.
#[derive(Debug, Clone, Default)]
pub struct RuleFilter {
    pub limit: Option<usize>,
    pub min_score: Option<f64>,
    /// Substring match on the antecedent key.
    pub a_filter: Option<String>,
    /// Substring match on the consequent key.
    pub b_filter: Option<String>,
    /// Either side's domain must equal this.
    pub domain_filter: Option<String>,
}

impl RuleFilter {
    pub fn matches(&self, rule: &Rule) -> bool {
        if let Some(min) = self.min_score {
            if rule.score() < min {
                return false;
            }
        }
        if let Some(ref a) = self.a_filter {
            if !rule.a.contains(a.as_str()) {
                return false;
            }
        }
        if let Some(ref b) = self.b_filter {
            if !rule.b.contains(b.as_str()) {
                return false;
            }
        }
        if let Some(ref d) = self.domain_filter {
            if rule.a_domain() != d && rule.b_domain() != d {
                return false;
            }
        }
        true
    }

    pub fn apply<'a>(&self, rules: impl IntoIterator<Item = &'a Rule>) -> Vec<Rule> {
        let iter = rules.into_iter().filter(|r| self.matches(r)).cloned();
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn rule(a: &str, b: &str, n_ab: u64, lb: f64, lift: f64, leverage: f64) -> Rule {
        Rule {
            a: a.into(),
            b: b.into(),
            n_a: n_ab.max(1),
            n_b: n_ab.max(1),
            n_ab,
            n_total: 100,
            dt_sec: 60,
            confidence: 1.0,
            confidence_lb: lb,
            lift,
            leverage,
            evidence: RuleEvidence::default(),
            created_at_ms: 0,
        }
    }

    #[test]
    fn test_score_bounds() {
        let best = rule("a.x:on", "b.y:on", 10, 1.0, f64::MAX, 0.25);
        assert!(best.score() <= 1.0 + 1e-12);
        let worst = rule("a.x:on", "b.y:on", 10, 0.0, 0.5, -0.1);
        assert_eq!(worst.score(), 0.0);
    }

    #[test]
    fn test_score_monotonic_in_each_term() {
        let base = rule("a.x:on", "b.y:on", 10, 0.5, 2.0, 0.05);
        let more_lb = Rule { confidence_lb: 0.6, ..base.clone() };
        let more_lift = Rule { lift: 3.0, ..base.clone() };
        let more_lev = Rule { leverage: 0.1, ..base.clone() };
        assert!(more_lb.score() > base.score());
        assert!(more_lift.score() > base.score());
        assert!(more_lev.score() > base.score());
    }

    #[test]
    fn test_rank_prefers_more_evidence_on_tie() {
        let a = rule("a.x:on", "b.y:on", 10, 0.5, 2.0, 0.05);
        let b = rule("c.x:on", "d.y:on", 20, 0.5, 2.0, 0.05);
        let mut v = vec![a, b];
        v.sort_by(rank_cmp);
        assert_eq!(v[0].n_ab, 20);
    }

    #[test]
    fn test_filter() {
        let rules = vec![
            rule("light.a:on", "switch.b:on", 10, 0.9, 3.0, 0.1),
            rule("light.a:on", "media_player.tv:on", 10, 0.1, 1.0, 0.0),
            rule("sensor.door:open", "light.hall:on", 10, 0.8, 2.0, 0.1),
        ];
        let f = RuleFilter {
            min_score: Some(0.5),
            ..Default::default()
        };
        assert_eq!(f.apply(&rules).len(), 2);

        let f = RuleFilter {
            a_filter: Some("light.a".into()),
            ..Default::default()
        };
        assert_eq!(f.apply(&rules).len(), 2);

        let f = RuleFilter {
            domain_filter: Some("switch".into()),
            ..Default::default()
        };
        assert_eq!(f.apply(&rules).len(), 1);

        let f = RuleFilter {
            limit: Some(1),
            b_filter: Some(":on".into()),
            ..Default::default()
        };
        assert_eq!(f.apply(&rules).len(), 1);
    }

    #[test]
    fn test_anonymized_keeps_stats() {
        let r = rule("light.kitchen:on", "switch.fan:on", 7, 0.7, 2.0, 0.05);
        let anon = r.anonymized();
        assert_ne!(anon.a, r.a);
        assert_eq!(anon.a_domain(), "light");
        assert_eq!(anon.n_ab, 7);
        assert_eq!(anon.score(), r.score());
    }
}
