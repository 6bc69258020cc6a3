// src/experiments/significance.rs — Yates-corrected chi-squared two-proportion test

use serde::{Deserialize, Serialize};

use crate::infra::config::SignificanceConfig;
use crate::infra::errors::{HabitusError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    A,
    B,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" => Some(Self::A),
            "b" => Some(Self::B),
            _ => None,
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome counts of one variant: how often the user overrode it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub overrides: u64,
    pub total: u64,
}

impl Observation {
    pub fn new(overrides: u64, total: u64) -> Self {
        Self { overrides, total }
    }

    /// `None` with no samples.
    pub fn override_rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.overrides as f64 / self.total as f64)
    }

    fn validate(&self, variant: Variant) -> Result<()> {
        if self.overrides > self.total {
            return Err(HabitusError::validation(
                "observation",
                format!(
                    "variant {variant}: {} overrides out of {} samples",
                    self.overrides, self.total
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceResult {
    pub significant: bool,
    pub winner: Option<Variant>,
    pub p_value: f64,
    pub chi_squared: f64,
    pub sample_size_a: u64,
    pub sample_size_b: u64,
    pub override_rate_a: f64,
    pub override_rate_b: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignificanceTester {
    pub min_samples: u64,
    pub alpha: f64,
}

impl Default for SignificanceTester {
    fn default() -> Self {
        Self {
            min_samples: 20,
            alpha: 0.05,
        }
    }
}

impl From<&SignificanceConfig> for SignificanceTester {
    fn from(c: &SignificanceConfig) -> Self {
        Self {
            min_samples: c.min_samples,
            alpha: c.alpha,
        }
    }
}

impl SignificanceTester {
    /// Compare two variants. The null hypothesis (equal override rates) is
    /// rejected only with enough samples on both sides and `p < alpha`.
    pub fn test(&self, a: Observation, b: Observation) -> Result<SignificanceResult> {
        a.validate(Variant::A)?;
        b.validate(Variant::B)?;

        let chi_squared = yates_chi_squared(a, b);
        let p_value = chi_squared.map_or(1.0, chi_squared_p_value);
        let enough = a.total >= self.min_samples && b.total >= self.min_samples;
        let significant = enough && p_value < self.alpha;

        let rate_a = a.override_rate().unwrap_or(0.0);
        let rate_b = b.override_rate().unwrap_or(0.0);
        let winner = significant.then(|| if rate_a <= rate_b { Variant::A } else { Variant::B });

        Ok(SignificanceResult {
            significant,
            winner,
            p_value,
            chi_squared: chi_squared.unwrap_or(0.0),
            sample_size_a: a.total,
            sample_size_b: b.total,
            override_rate_a: rate_a,
            override_rate_b: rate_b,
        })
    }
}

/// Yates-corrected χ² of the 2×2 table (variant × overridden).
///
/// `None` for a degenerate table: no samples, or an empty row or column.
pub fn yates_chi_squared(a: Observation, b: Observation) -> Option<f64> {
    let (oa, ka) = (a.overrides as f64, (a.total - a.overrides.min(a.total)) as f64);
    let (ob, kb) = (b.overrides as f64, (b.total - b.overrides.min(b.total)) as f64);
    let n = oa + ka + ob + kb;

    let rows = [oa + ka, ob + kb];
    let cols = [oa + ob, ka + kb];
    if n == 0.0 || rows.contains(&0.0) || cols.contains(&0.0) {
        return None;
    }

    let diff = ((oa * kb - ka * ob).abs() - n / 2.0).max(0.0);
    Some(n * diff * diff / (rows[0] * rows[1] * cols[0] * cols[1]))
}

/// Upper-tail probability of χ² with one degree of freedom.
pub fn chi_squared_p_value(chi_squared: f64) -> f64 {
    if chi_squared <= 0.0 {
        return 1.0;
    }
    erfc((chi_squared / 2.0).sqrt()).clamp(0.0, 1.0)
}

/// Complementary error function; Chebyshev fit, fractional error < 1.2e-7.
pub fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let ans = t * poly.exp();
    if x >= 0.0 {
        ans
    } else {
        2.0 - ans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erfc_known_values() {
        assert!((erfc(0.0) - 1.0).abs() < 1e-6);
        assert!((erfc(1.0) - 0.157_299_207).abs() < 1e-6);
        assert!((erfc(-1.0) - 1.842_700_793).abs() < 1e-6);
        assert!(erfc(5.0) < 1e-10);
    }

    #[test]
    fn test_p_value_at_critical_value() {
        // χ²(1) = 3.841 is the 5% critical value.
        assert!((chi_squared_p_value(3.841) - 0.05).abs() < 1e-3);
        assert_eq!(chi_squared_p_value(0.0), 1.0);
    }

    #[test]
    fn test_clear_difference() {
        let r = SignificanceTester::default()
            .test(Observation::new(5, 25), Observation::new(20, 25))
            .unwrap();
        assert!((r.chi_squared - 15.68).abs() < 1e-9);
        assert!(r.significant);
        assert_eq!(r.winner, Some(Variant::A));
        assert!(r.p_value < 0.001);
        assert!((r.override_rate_a - 0.2).abs() < 1e-12);
        assert!((r.override_rate_b - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_winner_b() {
        let r = SignificanceTester::default()
            .test(Observation::new(30, 40), Observation::new(5, 40))
            .unwrap();
        assert!(r.significant);
        assert_eq!(r.winner, Some(Variant::B));
    }

    #[test]
    fn test_below_min_samples_never_significant() {
        let r = SignificanceTester::default()
            .test(Observation::new(0, 19), Observation::new(19, 19))
            .unwrap();
        assert!(!r.significant);
        assert_eq!(r.winner, None);
        assert!(r.p_value < 0.05);
    }

    #[test]
    fn test_degenerate_tables() {
        let t = SignificanceTester::default();
        for (a, b) in [
            (Observation::new(0, 0), Observation::new(0, 0)),
            (Observation::new(0, 0), Observation::new(5, 30)),
            (Observation::new(0, 30), Observation::new(0, 30)),
            (Observation::new(30, 30), Observation::new(30, 30)),
        ] {
            let r = t.test(a, b).unwrap();
            assert_eq!(r.p_value, 1.0);
            assert_eq!(r.chi_squared, 0.0);
            assert!(!r.significant);
        }
    }

    #[test]
    fn test_equal_rates_not_significant() {
        let r = SignificanceTester::default()
            .test(Observation::new(10, 50), Observation::new(10, 50))
            .unwrap();
        assert!(!r.significant);
        assert_eq!(r.p_value, 1.0);
    }

    #[test]
    fn test_invalid_observation() {
        assert!(SignificanceTester::default()
            .test(Observation::new(5, 3), Observation::new(1, 30))
            .is_err());
    }

    #[test]
    fn test_variant_parse() {
        assert_eq!(Variant::parse("A"), Some(Variant::A));
        assert_eq!(Variant::parse("b"), Some(Variant::B));
        assert_eq!(Variant::parse("c"), None);
        assert_eq!(serde_json::to_string(&Variant::A).unwrap(), "\"a\"");
    }
}
