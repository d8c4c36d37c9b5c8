//! Typed badge criteria, decoded once when the catalog is loaded.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use shared::Difficulty;

/// Accepts a number, a numeric string, or null.
fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite()))
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Ok(lenient_f64(deserializer)?
        .filter(|n| *n >= 0.0)
        .map(|n| n.trunc() as u64))
}

/// One predicate family. A `None` threshold means "not configured yet" and
/// disables the badge.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rule {
    WinsTotal {
        #[serde(default, deserialize_with = "lenient_u64")]
        min: Option<u64>,
    },
    PlayedTotal {
        #[serde(default, deserialize_with = "lenient_u64")]
        min: Option<u64>,
    },
    WinStreak {
        #[serde(default, deserialize_with = "lenient_u64")]
        min: Option<u64>,
    },
    WinsByDifficulty {
        #[serde(default, deserialize_with = "lenient_u64")]
        min: Option<u64>,
    },
    PlayedByDifficulty {
        #[serde(default, deserialize_with = "lenient_u64")]
        min: Option<u64>,
    },
    PlayedChallengesTotal {
        #[serde(default, deserialize_with = "lenient_u64")]
        min: Option<u64>,
    },
    WinsChallengesTotal {
        #[serde(default, deserialize_with = "lenient_u64")]
        min: Option<u64>,
    },
    StartedMatchesViaQueue {
        #[serde(default, deserialize_with = "lenient_u64")]
        min: Option<u64>,
    },

    WinMatchUnderTotalScore {
        #[serde(default, deserialize_with = "lenient_f64")]
        max_total_score: Option<f64>,
    },
    WinMatchAvgTimeUnderS {
        #[serde(default, deserialize_with = "lenient_f64")]
        max_avg_time_s: Option<f64>,
    },
    WinMatchAllRoundsUnderKm {
        #[serde(default, deserialize_with = "lenient_f64")]
        max_km: Option<f64>,
    },
    WinMatchNoRoundOverKm {
        #[serde(default, deserialize_with = "lenient_f64")]
        max_km: Option<f64>,
    },
    WinMatchMinCapitals {
        #[serde(default, deserialize_with = "lenient_u64")]
        min_capitals: Option<u64>,
    },
    WinMatchMinCitiesOverPopulation {
        #[serde(default, deserialize_with = "lenient_u64")]
        min_population: Option<u64>,
        #[serde(default, deserialize_with = "lenient_u64")]
        min_cities: Option<u64>,
    },
    WinMatchAllCitiesUnderPopulation {
        #[serde(default, deserialize_with = "lenient_u64")]
        max_population: Option<u64>,
    },
    WinMatchClosestToCity {
        #[serde(default)]
        city: Option<String>,
    },
    WinMatchDistanceAnyRoundUnderKm {
        #[serde(default, deserialize_with = "lenient_f64")]
        max_km: Option<f64>,
    },
    WinMatchDistanceRoundsUnderKm {
        #[serde(default, deserialize_with = "lenient_f64")]
        max_km: Option<f64>,
        #[serde(default, deserialize_with = "lenient_u64")]
        min_rounds: Option<u64>,
    },
    WinMatchRoundUnderCombo {
        #[serde(default, deserialize_with = "lenient_f64")]
        max_km: Option<f64>,
        #[serde(default, deserialize_with = "lenient_f64")]
        max_time_s: Option<f64>,
    },
    WinMatchNoRoundOverTimeS {
        #[serde(default, deserialize_with = "lenient_f64")]
        max_time_s: Option<f64>,
    },
    WinsClosestInCountryCities {
        #[serde(default)]
        country: Option<String>,
        #[serde(default, deserialize_with = "lenient_u64")]
        min_cities: Option<u64>,
    },
    WinMatchWithAnyRoundOverKm {
        #[serde(default, deserialize_with = "lenient_f64")]
        min_km: Option<f64>,
    },

    MatchConsecutiveRoundsUnderKm {
        #[serde(default, deserialize_with = "lenient_f64")]
        max_km: Option<f64>,
        #[serde(default, deserialize_with = "lenient_u64")]
        min_rounds: Option<u64>,
    },
    MatchConsecutiveRoundsUnderTimeS {
        #[serde(default, deserialize_with = "lenient_f64")]
        max_time_s: Option<f64>,
        #[serde(default, deserialize_with = "lenient_u64")]
        min_rounds: Option<u64>,
    },

    WinMatchAfterLosingFirstNRounds {
        #[serde(default, deserialize_with = "lenient_u64")]
        n: Option<u64>,
    },
    WinMatchLastRoundDecides,
    WinMatchWithRoundsLostByScore {
        #[serde(default, deserialize_with = "lenient_u64")]
        min_rounds_lost: Option<u64>,
    },

    LoseMatchByMarginUnderScore {
        #[serde(default, deserialize_with = "lenient_f64")]
        max_margin: Option<f64>,
    },

    /// Types this server does not know yet.
    #[serde(other)]
    Unknown,
}

impl Rule {
    /// Predicates that need a per-difficulty lookup key rather than a filter.
    pub fn is_difficulty_keyed(&self) -> bool {
        matches!(
            self,
            Rule::WinsByDifficulty { .. } | Rule::PlayedByDifficulty { .. }
        )
    }

    /// Predicates that only apply to the player who won the match.
    pub fn requires_win(&self) -> bool {
        matches!(
            self,
            Rule::WinMatchUnderTotalScore { .. }
                | Rule::WinMatchAvgTimeUnderS { .. }
                | Rule::WinMatchAllRoundsUnderKm { .. }
                | Rule::WinMatchNoRoundOverKm { .. }
                | Rule::WinMatchMinCapitals { .. }
                | Rule::WinMatchMinCitiesOverPopulation { .. }
                | Rule::WinMatchAllCitiesUnderPopulation { .. }
                | Rule::WinMatchClosestToCity { .. }
                | Rule::WinMatchDistanceAnyRoundUnderKm { .. }
                | Rule::WinMatchDistanceRoundsUnderKm { .. }
                | Rule::WinMatchRoundUnderCombo { .. }
                | Rule::WinMatchNoRoundOverTimeS { .. }
                | Rule::WinsClosestInCountryCities { .. }
                | Rule::WinMatchWithAnyRoundOverKm { .. }
                | Rule::WinMatchAfterLosingFirstNRounds { .. }
                | Rule::WinMatchLastRoundDecides
                | Rule::WinMatchWithRoundsLostByScore { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Criteria {
    pub rule: Rule,
    /// Raw `difficulty` field. Filters match predicates; keys the
    /// per-difficulty totals.
    pub difficulty: Option<String>,
}

impl Criteria {
    /// Decodes the criteria column, which may hold an object or a JSON string.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        let object = match value {
            Value::String(raw) => serde_json::from_str::<Value>(raw)?,
            other => other.clone(),
        };

        let difficulty = object
            .get("difficulty")
            .and_then(Value::as_str)
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        let rule = serde_json::from_value(object)?;

        Ok(Self { rule, difficulty })
    }

    /// True when no filter is set or it names `difficulty`.
    pub fn matches_difficulty(&self, difficulty: Difficulty) -> bool {
        self.difficulty
            .as_deref()
            .map_or(true, |filter| filter.eq_ignore_ascii_case(difficulty.as_str()))
    }

    /// Difficulty a per-difficulty total looks up. An unparseable filter
    /// yields `None`, which disables the badge.
    pub fn lookup_difficulty(&self, fallback: Difficulty) -> Option<Difficulty> {
        match self.difficulty.as_deref() {
            Some(raw) => raw.parse().ok(),
            None => Some(fallback),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decodes_object_and_string_forms() {
        let from_object = Criteria::from_value(&json!({"type": "wins_total", "min": 10})).unwrap();
        let from_string =
            Criteria::from_value(&json!(r#"{"type": "wins_total", "min": "10"}"#)).unwrap();

        assert_eq!(from_object.rule, Rule::WinsTotal { min: Some(10) });
        assert_eq!(from_object, from_string);
    }

    #[test]
    fn test_null_threshold_is_none() {
        let c = Criteria::from_value(&json!({"type": "win_match_avg_time_under_s", "max_avg_time_s": null}))
            .unwrap();
        assert_eq!(c.rule, Rule::WinMatchAvgTimeUnderS { max_avg_time_s: None });
    }

    #[test]
    fn test_unknown_type_decodes_to_unknown() {
        let c = Criteria::from_value(&json!({"type": "collect_all_flags", "flags": 200})).unwrap();
        assert_eq!(c.rule, Rule::Unknown);
    }

    #[test]
    fn test_missing_type_is_an_error() {
        assert!(Criteria::from_value(&json!({"min": 3})).is_err());
        assert!(Criteria::from_value(&json!("not json")).is_err());
    }

    #[test]
    fn test_difficulty_filter() {
        let c = Criteria::from_value(&json!({
            "type": "win_match_under_total_score",
            "max_total_score": 500,
            "difficulty": "HARD"
        }))
        .unwrap();

        assert!(c.matches_difficulty(Difficulty::Hard));
        assert!(!c.matches_difficulty(Difficulty::Easy));
        assert!(c.rule.requires_win());
    }

    #[test]
    fn test_difficulty_lookup_key() {
        let keyed = Criteria::from_value(&json!({"type": "wins_by_difficulty", "difficulty": "easy", "min": 5}))
            .unwrap();
        assert!(keyed.rule.is_difficulty_keyed());
        assert_eq!(keyed.lookup_difficulty(Difficulty::Hard), Some(Difficulty::Easy));

        let unkeyed = Criteria::from_value(&json!({"type": "played_by_difficulty", "min": 5})).unwrap();
        assert_eq!(unkeyed.lookup_difficulty(Difficulty::Hard), Some(Difficulty::Hard));
    }
}
