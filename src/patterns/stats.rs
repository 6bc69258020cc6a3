// src/patterns/stats.rs — Small-sample statistics and id hashing

use sha2::{Digest, Sha256};

use crate::events::normalize::split_key;

/// Wilson-score lower bound of a binomial proportion.
///
/// Returns `None` when `n == 0` (the proportion is undefined).
/// Always within `[0, hits/n]`.
pub fn wilson_lower_bound(hits: u64, n: u64, z: f64) -> Option<f64> {
    if n == 0 {
        return None;
    }
    let n_f = n as f64;
    let p = hits.min(n) as f64 / n_f;
    let z2 = z * z;
    let centre = p + z2 / (2.0 * n_f);
    let margin = z * (p * (1.0 - p) / n_f + z2 / (4.0 * n_f * n_f)).sqrt();
    let lb = (centre - margin) / (1.0 + z2 / n_f);
    Some(lb.clamp(0.0, p))
}

/// Nearest-rank quantile of an ascending slice. `q` in `[0, 1]`.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (q.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize;
    Some(sorted[rank.saturating_sub(1).min(sorted.len() - 1)])
}

fn short_hash(input: &str, hex_len: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = hex::encode(digest);
    out.truncate(hex_len);
    out
}

/// Replace the object part of an entity id with a stable hash:
/// `light.kitchen:on` → `light.<12 hex>:on`.
pub fn anonymize_key(key: &str) -> String {
    let (entity, transition) = split_key(key);
    let anon = anonymize_entity(entity);
    if transition.is_empty() {
        anon
    } else {
        format!("{anon}:{transition}")
    }
}

pub fn anonymize_entity(entity_id: &str) -> String {
    match entity_id.split_once('.') {
        Some((domain, _)) => format!("{domain}.{}", short_hash(entity_id, 12)),
        None => short_hash(entity_id, 12),
    }
}

/// Deterministic id of an A→B pattern.
pub fn pattern_id(a: &str, b: &str) -> String {
    format!("habitus_{}", short_hash(&format!("{a}->{b}"), 16))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wilson_undefined_for_zero_trials() {
        assert_eq!(wilson_lower_bound(0, 0, 1.96), None);
    }

    #[test]
    fn test_wilson_below_proportion() {
        for (hits, n) in [(1, 1), (5, 10), (50, 50), (0, 20), (99, 100)] {
            let lb = wilson_lower_bound(hits, n, 1.96).unwrap();
            let p = hits as f64 / n as f64;
            assert!(lb <= p, "lb {lb} > p {p}");
            assert!(lb >= 0.0);
        }
    }

    #[test]
    fn test_wilson_grows_with_evidence() {
        let small = wilson_lower_bound(4, 5, 1.96).unwrap();
        let large = wilson_lower_bound(80, 100, 1.96).unwrap();
        assert!(large > small);
    }

    #[test]
    fn test_wilson_known_value() {
        // 50/50 at z = 1.96 → n / (n + z²)
        let lb = wilson_lower_bound(50, 50, 1.96).unwrap();
        assert!((lb - 50.0 / (50.0 + 1.96 * 1.96)).abs() < 1e-9);
    }

    #[test]
    fn test_quantile() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        assert_eq!(quantile(&v, 0.5), Some(5.0));
        assert_eq!(quantile(&v, 0.9), Some(9.0));
        assert_eq!(quantile(&v, 0.0), Some(1.0));
        assert_eq!(quantile(&v, 1.0), Some(10.0));
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn test_anonymize_keeps_domain_and_transition() {
        let anon = anonymize_key("light.kitchen:on");
        assert!(anon.starts_with("light."));
        assert!(anon.ends_with(":on"));
        assert!(!anon.contains("kitchen"));
        assert_eq!(anon, anonymize_key("light.kitchen:on"));
        assert_ne!(anon, anonymize_key("light.hall:on"));
    }

    #[test]
    fn test_pattern_id_stable() {
        assert_eq!(pattern_id("a:on", "b:on"), pattern_id("a:on", "b:on"));
        assert_ne!(pattern_id("a:on", "b:on"), pattern_id("b:on", "a:on"));
        assert_eq!(pattern_id("a:on", "b:on").len(), "habitus_".len() + 16);
    }
}
