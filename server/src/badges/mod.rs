//! Badge eligibility.
//!
//! [`evaluate`] is a pure function of the catalog, the player's updated
//! stats and the facts of the match just played. It returns every code the
//! player currently qualifies for, in catalog order; filtering out badges
//! that were already earned is the persistence layer's job.
//!
//! Lower scores are better throughout. A round the player never answered has
//! no distance and never satisfies a distance comparison.

pub mod catalog;
pub mod criteria;

pub use catalog::{
    parse_catalog, BadgeCatalogCache, BadgeCatalogStore, BadgeDefinition, JsonFileCatalogStore,
    StaticCatalogStore,
};
pub use criteria::{Criteria, Rule};

use crate::game::{PlayerReport, RoundFact};
use crate::stats::UserStats;
use shared::Difficulty;
use std::collections::HashSet;
use std::cmp::Ordering;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Match-derived input for one player.
#[derive(Debug, Clone, Copy)]
pub struct MatchFacts<'a> {
    pub is_winner: bool,
    pub is_draw: bool,
    pub difficulty: Difficulty,
    pub total_score: f64,
    pub opponent_total_score: f64,
    pub rounds: &'a [RoundFact],
    pub opponent_rounds: &'a [RoundFact],
}

impl<'a> From<&'a PlayerReport> for MatchFacts<'a> {
    fn from(report: &'a PlayerReport) -> Self {
        Self {
            is_winner: report.is_winner,
            is_draw: report.is_draw,
            difficulty: report.difficulty,
            total_score: report.total_score,
            opponent_total_score: report.opponent_total_score,
            rounds: &report.rounds,
            opponent_rounds: &report.opponent_rounds,
        }
    }
}

/// Lowercased, trimmed, with diacritics removed (`"Malmö"` == `"malmo"`).
pub fn normalize_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect()
}

fn same_city(a: &str, b: &str) -> bool {
    !a.trim().is_empty() && normalize_name(a) == normalize_name(b)
}

fn km_under(round: &RoundFact, max_km: f64) -> bool {
    round.distance_km.map_or(false, |km| km < max_km)
}

fn seconds(round: &RoundFact) -> f64 {
    round.time_ms as f64 / 1000.0
}

/// How round `i` went for the player: `Less` means they won it.
fn round_outcome(facts: &MatchFacts<'_>, i: usize) -> Option<Ordering> {
    let mine = facts.rounds.get(i)?.score;
    let theirs = facts.opponent_rounds.get(i)?.score;
    mine.partial_cmp(&theirs)
}

fn rounds_lost(facts: &MatchFacts<'_>, upto: usize) -> usize {
    (0..upto.min(facts.rounds.len()))
        .filter(|&i| round_outcome(facts, i) == Some(Ordering::Greater))
        .count()
}

/// Closer than the opponent; an unanswered round on either side counts as infinitely far.
fn closer_than_opponent(facts: &MatchFacts<'_>, i: usize) -> bool {
    let mine = facts.rounds[i].distance_km.unwrap_or(f64::INFINITY);
    let theirs = facts
        .opponent_rounds
        .get(i)
        .and_then(|round| round.distance_km)
        .unwrap_or(f64::INFINITY);
    mine < theirs
}

fn longest_run(rounds: &[RoundFact], pred: impl Fn(&RoundFact) -> bool) -> usize {
    let mut best = 0;
    let mut current = 0;
    for round in rounds {
        if pred(round) {
            current += 1;
            best = best.max(current);
        } else {
            current = 0;
        }
    }
    best
}

fn all_rounds(rounds: &[RoundFact], pred: impl Fn(&RoundFact) -> bool) -> bool {
    !rounds.is_empty() && rounds.iter().all(pred)
}

fn meets(value: u64, min: Option<u64>) -> bool {
    min.map_or(false, |min| value >= min)
}

fn is_eligible(criteria: &Criteria, stats: &UserStats, facts: &MatchFacts<'_>) -> bool {
    let rule = &criteria.rule;

    if rule.is_difficulty_keyed() {
        let Some(difficulty) = criteria.lookup_difficulty(facts.difficulty) else {
            return false;
        };
        return match rule {
            Rule::WinsByDifficulty { min } => meets(stats.wins_by_difficulty(difficulty), *min),
            Rule::PlayedByDifficulty { min } => meets(stats.played_by_difficulty(difficulty), *min),
            _ => false,
        };
    }

    if !criteria.matches_difficulty(facts.difficulty) {
        return false;
    }
    if rule.requires_win() && !facts.is_winner {
        return false;
    }

    let rounds = facts.rounds;
    match rule {
        Rule::WinsTotal { min } => meets(stats.wins, *min),
        Rule::PlayedTotal { min } => meets(stats.played, *min),
        Rule::WinStreak { min } => meets(stats.win_streak, *min),
        Rule::PlayedChallengesTotal { min } => meets(stats.played_challenges_total, *min),
        Rule::WinsChallengesTotal { min } => meets(stats.wins_challenges_total, *min),
        Rule::StartedMatchesViaQueue { min } => meets(stats.started_matches_via_queue, *min),

        Rule::WinMatchUnderTotalScore { max_total_score: Some(max) } => facts.total_score < *max,
        Rule::WinMatchAvgTimeUnderS { max_avg_time_s: Some(max) } => {
            !rounds.is_empty()
                && rounds.iter().map(seconds).sum::<f64>() / (rounds.len() as f64) < *max
        }
        Rule::WinMatchAllRoundsUnderKm { max_km: Some(max) } => {
            all_rounds(rounds, |r| km_under(r, *max))
        }
        Rule::WinMatchNoRoundOverKm { max_km: Some(max) } => {
            all_rounds(rounds, |r| r.distance_km.map_or(false, |km| km <= *max))
        }
        Rule::WinMatchMinCapitals { min_capitals: Some(min) } => {
            *min > 0 && rounds.iter().filter(|r| r.city.is_capital).count() as u64 >= *min
        }
        Rule::WinMatchMinCitiesOverPopulation {
            min_population: Some(population),
            min_cities: Some(min),
        } => {
            let count = rounds
                .iter()
                .filter(|r| r.city.population.map_or(false, |p| p > *population))
                .count() as u64;
            *min > 0 && count >= *min
        }
        Rule::WinMatchAllCitiesUnderPopulation { max_population: Some(max) } => {
            all_rounds(rounds, |r| r.city.population.map_or(false, |p| p < *max))
        }
        Rule::WinMatchClosestToCity { city: Some(city) } => (0..rounds.len()).any(|i| {
            let opponent_city = facts.opponent_rounds.get(i).map(|r| r.city.name.as_str());
            let named = same_city(&rounds[i].city.name, city)
                || opponent_city.map_or(false, |name| same_city(name, city));
            named && closer_than_opponent(facts, i)
        }),
        Rule::WinMatchDistanceAnyRoundUnderKm { max_km: Some(max) } => {
            rounds.iter().any(|r| km_under(r, *max))
        }
        Rule::WinMatchDistanceRoundsUnderKm {
            max_km: Some(max),
            min_rounds,
        } => rounds.iter().filter(|r| km_under(r, *max)).count() as u64 >= min_rounds.unwrap_or(0),
        Rule::WinMatchRoundUnderCombo {
            max_km: Some(max_km),
            max_time_s: Some(max_time_s),
        } => rounds
            .iter()
            .any(|r| km_under(r, *max_km) && !r.timed_out && seconds(r) < *max_time_s),
        Rule::WinMatchNoRoundOverTimeS { max_time_s: Some(max) } => {
            all_rounds(rounds, |r| !r.timed_out && seconds(r) <= *max)
        }
        Rule::WinsClosestInCountryCities {
            country: Some(country),
            min_cities: Some(min),
        } => {
            let won: HashSet<String> = (0..rounds.len())
                .filter(|&i| rounds[i].city.country_code.eq_ignore_ascii_case(country.trim()))
                .filter(|&i| closer_than_opponent(facts, i))
                .map(|i| normalize_name(&rounds[i].city.name))
                .collect();
            *min > 0 && won.len() as u64 >= *min
        }
        Rule::WinMatchWithAnyRoundOverKm { min_km: Some(min) } => rounds
            .iter()
            .any(|r| r.distance_km.map_or(false, |km| km > *min)),

        Rule::MatchConsecutiveRoundsUnderKm {
            max_km: Some(max),
            min_rounds: Some(min),
        } => *min > 0 && longest_run(rounds, |r| km_under(r, *max)) as u64 >= *min,
        Rule::MatchConsecutiveRoundsUnderTimeS {
            max_time_s: Some(max),
            min_rounds: Some(min),
        } => {
            *min > 0
                && longest_run(rounds, |r| !r.timed_out && seconds(r) < *max) as u64 >= *min
        }

        Rule::WinMatchAfterLosingFirstNRounds { n: Some(n) } => {
            let n = *n as usize;
            n > 0 && rounds.len() >= n && rounds_lost(facts, n) >= n
        }
        Rule::WinMatchLastRoundDecides => {
            if rounds.is_empty() {
                return false;
            }
            let last = rounds.len() - 1;
            let mine: f64 = rounds[..last].iter().map(|r| r.score).sum();
            let theirs: f64 = facts
                .opponent_rounds
                .iter()
                .take(last)
                .map(|r| r.score)
                .sum();
            mine >= theirs && facts.total_score < facts.opponent_total_score
        }
        Rule::WinMatchWithRoundsLostByScore { min_rounds_lost: Some(min) } => {
            *min > 0 && rounds_lost(facts, rounds.len()) as u64 >= *min
        }

        Rule::LoseMatchByMarginUnderScore { max_margin: Some(max) } => {
            !facts.is_winner
                && !facts.is_draw
                && facts.total_score - facts.opponent_total_score < *max
        }

        // Unconfigured thresholds and unknown types.
        _ => false,
    }
}

/// Codes of every catalog entry the player qualifies for, in catalog order.
pub fn evaluate(catalog: &[BadgeDefinition], stats: &UserStats, facts: &MatchFacts<'_>) -> Vec<String> {
    catalog
        .iter()
        .filter(|badge| is_eligible(&badge.criteria, stats, facts))
        .map(|badge| badge.code.clone())
        .collect()
}
