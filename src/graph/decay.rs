// src/graph/decay.rs — Half-life decay for node scores and edge weights
//
// Decay is lazy: a stored value is "as of" its updated_at timestamp and is
// brought forward only when it is touched or read.

const MS_PER_HOUR: f64 = 3_600_000.0;

/// A half-life in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalfLife {
    ms: f64,
}

impl HalfLife {
    pub fn from_hours(hours: f64) -> Self {
        Self {
            ms: hours * MS_PER_HOUR,
        }
    }

    pub fn from_millis(ms: f64) -> Self {
        Self { ms }
    }

    pub fn as_millis(&self) -> f64 {
        self.ms
    }

    pub fn as_hours(&self) -> f64 {
        self.ms / MS_PER_HOUR
    }

    /// `2^(-elapsed/half_life)`. A clock that moved backwards decays nothing.
    pub fn factor(&self, elapsed_ms: i64) -> f64 {
        if elapsed_ms <= 0 || self.ms <= 0.0 {
            return 1.0;
        }
        (-(elapsed_ms as f64) / self.ms).exp2()
    }

    /// Value stored at `updated_at_ms`, seen from `now_ms`.
    pub fn decayed(&self, value: f64, updated_at_ms: i64, now_ms: i64) -> f64 {
        value * self.factor(now_ms - updated_at_ms)
    }

    /// Decay-then-accumulate.
    pub fn accumulate(&self, value: f64, updated_at_ms: i64, now_ms: i64, delta: f64) -> f64 {
        self.decayed(value, updated_at_ms, now_ms) + delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_half_life_halves() {
        let hl = HalfLife::from_hours(24.0);
        let one_day = 24 * 3_600_000;
        assert!((hl.decayed(2.0, 0, one_day) - 1.0).abs() < 1e-12);
        assert!((hl.decayed(2.0, 0, 2 * one_day) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_no_elapsed_time() {
        let hl = HalfLife::from_hours(1.0);
        assert_eq!(hl.decayed(3.5, 1_000, 1_000), 3.5);
    }

    #[test]
    fn test_clock_skew_does_not_grow_value() {
        let hl = HalfLife::from_hours(1.0);
        assert_eq!(hl.decayed(3.5, 10_000, 1_000), 3.5);
    }

    #[test]
    fn test_accumulate() {
        let hl = HalfLife::from_millis(1_000.0);
        // 4.0 decays to 2.0 after one half-life, then +1.0
        assert!((hl.accumulate(4.0, 0, 1_000, 1.0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_decay_composes() {
        // Decaying in two steps equals decaying once over the full span.
        let hl = HalfLife::from_hours(6.0);
        let direct = hl.decayed(5.0, 0, 10_000_000);
        let stepped = hl.decayed(hl.decayed(5.0, 0, 4_000_000), 4_000_000, 10_000_000);
        assert!((direct - stepped).abs() < 1e-9);
    }
}
