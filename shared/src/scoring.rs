//! Round scoring: distance and reaction time folded into one penalty.
//!
//! Lower scores are better. A round is worth at most [`MAX_ROUND_SCORE`],
//! which is also what an unanswered round costs.
//!
//! The time penalty uses the power curve `min(t / maxTime, 1) ^ gamma`.

use serde::{Deserialize, Serialize};

/// Highest possible score for one round.
pub const MAX_ROUND_SCORE: f64 = 2000.0;

/// Tunables for [`ScoringConfig::score`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub max_distance_km: f64,
    pub max_time_ms: f64,
    pub distance_weight: f64,
    pub time_weight: f64,
    pub time_gamma: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            max_distance_km: 20_000.0,
            max_time_ms: 20_000.0,
            distance_weight: 1.0,
            time_weight: 0.30,
            time_gamma: 1.0,
        }
    }
}

impl ScoringConfig {
    /// Distance component in `[0, 1]`.
    pub fn distance_penalty(&self, distance_km: f64) -> f64 {
        ratio(distance_km, self.max_distance_km)
    }

    /// Time component in `[0, 1]`.
    pub fn time_penalty(&self, time_ms: f64) -> f64 {
        ratio(time_ms, self.max_time_ms).powf(self.time_gamma)
    }

    /// Scores one answered round. Result lies in `[0, MAX_ROUND_SCORE]`.
    pub fn score(&self, distance_km: f64, time_ms: f64) -> f64 {
        let total_weight = self.distance_weight + self.time_weight;
        if total_weight <= 0.0 {
            return 0.0;
        }

        let weighted = self.distance_weight * self.distance_penalty(distance_km)
            + self.time_weight * self.time_penalty(time_ms);

        (MAX_ROUND_SCORE * weighted / total_weight).clamp(0.0, MAX_ROUND_SCORE)
    }

    /// Score charged for a round that was never answered.
    pub fn timeout_score(&self) -> f64 {
        MAX_ROUND_SCORE
    }
}

/// Scores a round with the default tunables.
pub fn round_score(distance_km: f64, time_ms: f64) -> f64 {
    ScoringConfig::default().score(distance_km, time_ms)
}

fn ratio(value: f64, max: f64) -> f64 {
    if !value.is_finite() || value <= 0.0 || max <= 0.0 {
        // +inf saturates like any value past `max`; NaN and negatives count as zero.
        return if value == f64::INFINITY { 1.0 } else { 0.0 };
    }
    (value / max).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_regression_fixture_34km_5s() {
        let cfg = ScoringConfig::default();
        assert_approx_eq!(cfg.distance_penalty(34.0), 0.0017, 1e-12);
        assert_approx_eq!(cfg.time_penalty(5000.0), 0.25, 1e-12);
        assert_approx_eq!(cfg.score(34.0, 5000.0), 118.0, 1e-9);
    }

    #[test]
    fn test_perfect_answer_scores_zero() {
        assert_eq!(round_score(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_worst_answer_scores_max() {
        assert_approx_eq!(round_score(20_000.0, 20_000.0), MAX_ROUND_SCORE, 1e-9);
        assert_approx_eq!(round_score(50_000.0, 90_000.0), MAX_ROUND_SCORE, 1e-9);
    }

    #[test]
    fn test_score_is_bounded_and_monotonic() {
        let cfg = ScoringConfig::default();
        let distances = [0.0, 1.0, 34.0, 500.0, 5_000.0, 19_999.0, 20_000.0, 25_000.0];
        let times = [0.0, 100.0, 5_000.0, 12_500.0, 20_000.0, 30_000.0];

        for &d in &distances {
            let mut last = -1.0;
            for &t in &times {
                let s = cfg.score(d, t);
                assert!((0.0..=MAX_ROUND_SCORE).contains(&s));
                assert!(s >= last, "not monotonic in time at d={} t={}", d, t);
                last = s;
            }
        }

        for &t in &times {
            let mut last = -1.0;
            for &d in &distances {
                let s = cfg.score(d, t);
                assert!(s >= last, "not monotonic in distance at d={} t={}", d, t);
                last = s;
            }
        }
    }

    #[test]
    fn test_negative_and_nan_inputs_clamp_to_zero() {
        let cfg = ScoringConfig::default();
        assert_eq!(cfg.score(-10.0, -5.0), 0.0);
        assert_eq!(cfg.score(f64::NAN, f64::NAN), 0.0);
    }

    #[test]
    fn test_infinite_inputs_saturate() {
        let cfg = ScoringConfig::default();
        assert_approx_eq!(cfg.score(f64::INFINITY, f64::INFINITY), MAX_ROUND_SCORE, 1e-9);
        assert_eq!(cfg.score(f64::NEG_INFINITY, f64::NEG_INFINITY), 0.0);
    }

    #[test]
    fn test_gamma_shapes_time_curve() {
        let cfg = ScoringConfig {
            time_gamma: 2.0,
            ..ScoringConfig::default()
        };
        assert_approx_eq!(cfg.time_penalty(10_000.0), 0.25, 1e-12);
    }

    #[test]
    fn test_timeout_is_max() {
        assert_eq!(ScoringConfig::default().timeout_score(), MAX_ROUND_SCORE);
    }
}
