// src/patterns/miner.rs — Windowed A→B co-occurrence mining

use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

use super::config::MiningConfig;
use super::rule::{rank_cmp, HitExample, LatencyQuantiles, MissExample, Rule, RuleEvidence};
use super::stats::{quantile, wilson_lower_bound};
use crate::events::normalize::NormEvent;
use crate::infra::errors::Result;

const MS_PER_DAY: i64 = 86_400_000;

/// Counters describing one mining pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MiningStats {
    pub events_scanned: usize,
    pub events_filtered_domain: usize,
    pub distinct_keys: usize,
    pub candidate_pairs: usize,
    pub pairs_excluded: usize,
    pub pairs_evaluated: usize,
    pub below_thresholds: usize,
    pub unstable: usize,
    pub rules_emitted: usize,
    pub truncated: usize,
}

#[derive(Debug, Clone)]
pub struct MiningOutcome {
    /// Ranked best first, at most `max_rules`.
    pub rules: Vec<Rule>,
    pub stats: MiningStats,
}

/// Mines association rules from a timestamp-ordered event snapshot.
pub struct PatternMiner<'a> {
    config: &'a MiningConfig,
}

impl<'a> PatternMiner<'a> {
    /// Fails fast on an invalid configuration, before any scan.
    pub fn new(config: &'a MiningConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &MiningConfig {
        self.config
    }

    /// Run one pass. Entity ids in the result are never anonymized here;
    /// see [`apply_output_policy`].
    pub fn mine(&self, events: &[NormEvent], now_ms: i64) -> MiningOutcome {
        let cfg = self.config;
        let mut stats = MiningStats {
            events_scanned: events.len(),
            ..Default::default()
        };

        // 1. Domain filter, then make sure we scan in time order.
        let mut scoped: Vec<&NormEvent> = events
            .iter()
            .filter(|e| cfg.domain_allowed(&e.domain))
            .collect();
        stats.events_filtered_domain = events.len() - scoped.len();
        if !scoped.windows(2).all(|w| w[0].ts_ms <= w[1].ts_ms) {
            scoped.sort_by_key(|e| e.ts_ms);
        }

        let n_total = scoped.len() as u64;
        if n_total == 0 {
            return MiningOutcome {
                rules: Vec::new(),
                stats,
            };
        }

        // 2. Occurrence timestamps per key (ascending).
        let mut occurrences: HashMap<&str, Vec<i64>> = HashMap::new();
        for e in &scoped {
            occurrences.entry(e.key.as_str()).or_default().push(e.ts_ms);
        }
        stats.distinct_keys = occurrences.len();

        // 3. Candidate pairs: B seen after A within the widest window.
        let max_window_ms = cfg.windows_sec.iter().copied().max().unwrap_or(0) as i64 * 1000;
        let support = |key: &str| occurrences.get(key).map_or(0, Vec::len) as u32;
        let mut candidates: BTreeSet<(&str, &str)> = BTreeSet::new();
        let mut excluded: HashSet<(&str, &str)> = HashSet::new();

        for (i, ea) in scoped.iter().enumerate() {
            if support(&ea.key) < cfg.min_support_a {
                continue;
            }
            for eb in scoped[i + 1..].iter() {
                if eb.ts_ms - ea.ts_ms > max_window_ms {
                    break;
                }
                if eb.ts_ms == ea.ts_ms || support(&eb.key) < cfg.min_support_b {
                    continue;
                }
                let pair = (ea.key.as_str(), eb.key.as_str());
                if candidates.contains(&pair) || excluded.contains(&pair) {
                    continue;
                }
                if self.excluded_pair(ea, eb) {
                    excluded.insert(pair);
                } else {
                    candidates.insert(pair);
                }
            }
        }
        stats.candidate_pairs = candidates.len();
        stats.pairs_excluded = excluded.len();

        // 4. Score each pair under each window; keep the best window.
        let mut windows = cfg.windows_sec.clone();
        windows.sort_unstable();
        windows.dedup();

        let mut rules = Vec::new();
        for (a, b) in candidates {
            let a_ts = &occurrences[a];
            let b_ts = &occurrences[b];
            let mut best: Option<Rule> = None;

            for &w in &windows {
                stats.pairs_evaluated += 1;
                let matched = match_occurrences(a_ts, b_ts, w as i64 * 1000);
                let Some(rule) = self.build_rule(a, b, a_ts.len(), b_ts.len(), n_total, w, matched, now_ms) else {
                    continue;
                };
                if !self.passes_thresholds(&rule) {
                    stats.below_thresholds += 1;
                    continue;
                }
                if rule.evidence.stability_days < cfg.min_stability_days {
                    stats.unstable += 1;
                    continue;
                }
                // Windows ascend, so a tie keeps the shorter window.
                if best.as_ref().map_or(true, |b| rule.score() > b.score()) {
                    best = Some(rule);
                }
            }
            rules.extend(best);
        }

        // 5. Rank and truncate.
        rules.sort_by(rank_cmp);
        if rules.len() > cfg.max_rules {
            stats.truncated = rules.len() - cfg.max_rules;
            rules.truncate(cfg.max_rules);
        }
        stats.rules_emitted = rules.len();

        tracing::debug!(
            "Mining pass: {} events, {} keys, {} candidate pairs, {} rules",
            n_total,
            stats.distinct_keys,
            stats.candidate_pairs,
            stats.rules_emitted
        );

        MiningOutcome { rules, stats }
    }

    fn excluded_pair(&self, a: &NormEvent, b: &NormEvent) -> bool {
        (self.config.exclude_self_rules && a.key == b.key)
            || (self.config.exclude_same_entity && a.entity_id == b.entity_id)
    }

    fn passes_thresholds(&self, r: &Rule) -> bool {
        let cfg = self.config;
        r.n_ab >= cfg.min_hits as u64
            && r.confidence >= cfg.min_confidence
            && r.confidence_lb >= cfg.min_confidence_lb
            && r.lift >= cfg.min_lift
            && r.leverage >= cfg.min_leverage
    }

    /// Statistics for one (A, B, window). `None` when a ratio is undefined
    /// (no A, no B, or no hit at all).
    #[allow(clippy::too_many_arguments)]
    fn build_rule(
        &self,
        a: &str,
        b: &str,
        n_a: usize,
        n_b: usize,
        n_total: u64,
        window_sec: u64,
        matched: Matched,
        now_ms: i64,
    ) -> Option<Rule> {
        let (n_a, n_b, n_ab) = (n_a as u64, n_b as u64, matched.hits.len() as u64);
        if n_a == 0 || n_b == 0 || n_ab == 0 {
            return None;
        }
        let n = n_total as f64;
        let confidence = n_ab as f64 / n_a as f64;
        let confidence_lb = wilson_lower_bound(n_ab, n_a, self.config.wilson_z)?;
        let base_rate_b = n_b as f64 / n;
        let lift = confidence / base_rate_b;
        let leverage = n_ab as f64 / n - (n_a as f64 / n) * (n_b as f64 / n);

        Some(Rule {
            a: a.to_string(),
            b: b.to_string(),
            n_a,
            n_b,
            n_ab,
            n_total,
            dt_sec: window_sec,
            confidence,
            confidence_lb,
            lift,
            leverage,
            evidence: evidence_from(&matched, self.config.max_examples),
            created_at_ms: now_ms,
        })
    }
}

/// One-to-one A/B matching for one window.
#[derive(Debug, Default)]
struct Matched {
    hits: Vec<(i64, i64)>,
    misses: Vec<i64>,
}

/// Match each A to the earliest unused B in `(a, a + window]`.
///
/// Every B confirms at most one A, so hits never exceed either count.
fn match_occurrences(a_ts: &[i64], b_ts: &[i64], window_ms: i64) -> Matched {
    let mut matched = Matched::default();
    let mut j = 0;
    for &a in a_ts {
        while j < b_ts.len() && b_ts[j] <= a {
            j += 1;
        }
        if j < b_ts.len() && b_ts[j] - a <= window_ms {
            matched.hits.push((a, b_ts[j]));
            j += 1;
        } else {
            matched.misses.push(a);
        }
    }
    matched
}

fn evidence_from(matched: &Matched, max_examples: usize) -> RuleEvidence {
    let mut latencies: Vec<f64> = matched
        .hits
        .iter()
        .map(|(a, b)| (b - a) as f64 / 1000.0)
        .collect();
    latencies.sort_by(f64::total_cmp);

    let latency = match (
        quantile(&latencies, 0.1),
        quantile(&latencies, 0.5),
        quantile(&latencies, 0.9),
    ) {
        (Some(p10), Some(p50), Some(p90)) => Some(LatencyQuantiles { p10, p50, p90 }),
        _ => None,
    };

    let days: HashSet<i64> = matched
        .hits
        .iter()
        .map(|(a, _)| a.div_euclid(MS_PER_DAY))
        .collect();

    // Most recent examples explain best.
    let hits = matched
        .hits
        .iter()
        .rev()
        .take(max_examples)
        .map(|&(a, b)| HitExample {
            a_ts_ms: a,
            b_ts_ms: b,
            latency_sec: (b - a) as f64 / 1000.0,
        })
        .collect();
    let misses = matched
        .misses
        .iter()
        .rev()
        .take(max_examples)
        .map(|&a| MissExample { a_ts_ms: a })
        .collect();

    RuleEvidence {
        hits,
        misses,
        latency,
        stability_days: days.len() as u32,
    }
}

/// Output-boundary policy: id anonymization when configured.
pub fn apply_output_policy(rules: Vec<Rule>, config: &MiningConfig) -> Vec<Rule> {
    if config.anonymize_entity_ids {
        rules.iter().map(Rule::anonymized).collect()
    } else {
        rules
    }
}
