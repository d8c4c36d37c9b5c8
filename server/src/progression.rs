//! Post-match persistence: stats, match history, rating and earned badges.

use crate::error::ServerError;
use crate::game::MatchSummary;
use crate::matchmaking::MatchSource;
use crate::stats::UserStats;
use log::{debug, info};
use shared::{Difficulty, FinishReason, MatchId, MatchMode};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

pub const STARTING_RATING: i32 = 1000;
/// Matches played before the rating settles to the lower K factor.
pub const PROVISIONAL_MATCHES: u32 = 10;

/// Expected score of a player rated `rating` against `opponent`.
pub fn elo_expected(rating: i32, opponent: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf(f64::from(opponent - rating) / 400.0))
}

pub fn elo_k_factor(rated_matches: u32) -> f64 {
    if rated_matches < PROVISIONAL_MATCHES {
        40.0
    } else {
        24.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Win,
    Loss,
    Draw,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub match_id: MatchId,
    pub username: String,
    pub opponent: String,
    pub result: MatchResult,
    pub total_score: f64,
    pub opponent_total_score: f64,
    pub difficulty: Difficulty,
    pub mode: MatchMode,
    pub reason: FinishReason,
    pub rating_delta: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub username: String,
    pub rating: i32,
    pub wins: u64,
    pub played: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserProgression {
    pub username: String,
    pub stats: UserStats,
    pub rating: i32,
    pub rated_matches: u32,
    pub badges: Vec<String>,
    /// Newest first.
    pub recent: Vec<HistoryRow>,
}

pub trait ProgressionStore: Send {
    /// Applies a finished match and returns the updated stats of every human in it.
    fn record_match(&mut self, summary: &MatchSummary) -> BTreeMap<String, UserStats>;

    /// Stores earned badges and returns the codes that were not held before.
    fn award_badges(&mut self, username: &str, codes: &[String]) -> Vec<String>;

    fn leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry>;

    fn user_progression(&self, username: &str) -> Option<UserProgression>;
}

#[derive(Debug, Clone)]
struct UserRecord {
    stats: UserStats,
    rating: i32,
    rated_matches: u32,
    badges: Vec<String>,
    badge_set: HashSet<String>,
}

impl Default for UserRecord {
    fn default() -> Self {
        Self {
            stats: UserStats::default(),
            rating: STARTING_RATING,
            rated_matches: 0,
            badges: Vec::new(),
            badge_set: HashSet::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryProgressionStore {
    users: HashMap<String, UserRecord>,
    history: Vec<HistoryRow>,
}

impl InMemoryProgressionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON object of `username -> stats`. Older exports with
    /// legacy key spellings load into the same counters.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let seeded: HashMap<String, UserStats> = serde_json::from_str(raw)?;

        let mut store = Self::new();
        for (username, stats) in seeded {
            store.insert_stats(&username, stats);
        }
        Ok(store)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ServerError> {
        let raw = std::fs::read_to_string(path)?;
        let store = Self::from_json(&raw)?;
        info!("Loaded stats for {} users from {}", store.users.len(), path.display());
        Ok(store)
    }

    /// Seeds a user's stats, e.g. from an older export.
    pub fn insert_stats(&mut self, username: &str, stats: UserStats) {
        self.users.entry(username.to_string()).or_default().stats = stats;
    }

    pub fn history(&self) -> &[HistoryRow] {
        &self.history
    }

    fn rating_deltas(&self, summary: &MatchSummary) -> HashMap<String, i32> {
        let mut deltas = HashMap::new();
        let rated = summary.mode == MatchMode::Duel
            && summary.reason == FinishReason::Completed
            && summary.reports.len() == 2;
        if !rated {
            return deltas;
        }

        for report in &summary.reports {
            let me = self.users.get(&report.username).cloned().unwrap_or_default();
            let opponent_rating = self
                .users
                .get(&report.opponent_username)
                .map_or(STARTING_RATING, |record| record.rating);

            let actual = if report.is_winner {
                1.0
            } else if report.is_draw {
                0.5
            } else {
                0.0
            };
            let expected = elo_expected(me.rating, opponent_rating);
            let delta = (elo_k_factor(me.rated_matches) * (actual - expected)).round() as i32;
            deltas.insert(report.username.clone(), delta);
        }
        deltas
    }
}

impl ProgressionStore for InMemoryProgressionStore {
    fn record_match(&mut self, summary: &MatchSummary) -> BTreeMap<String, UserStats> {
        let deltas = self.rating_deltas(summary);
        let mut updated = BTreeMap::new();

        for report in &summary.reports {
            let record = self.users.entry(report.username.clone()).or_default();
            let stats = &mut record.stats;

            let result = if report.is_winner {
                MatchResult::Win
            } else if report.is_draw {
                MatchResult::Draw
            } else {
                MatchResult::Loss
            };

            if summary.mode == MatchMode::Solo {
                stats.solo_played += 1;
            } else {
                stats.record_played(report.difficulty);
                match result {
                    MatchResult::Win => stats.record_win(report.difficulty),
                    MatchResult::Loss => stats.record_loss(),
                    MatchResult::Draw => {}
                }
                match summary.source {
                    MatchSource::Challenge => {
                        stats.played_challenges_total += 1;
                        if result == MatchResult::Win {
                            stats.wins_challenges_total += 1;
                        }
                    }
                    MatchSource::Queue => stats.started_matches_via_queue += 1,
                    MatchSource::Solo => {}
                }
            }

            let rating_delta = deltas.get(&report.username).copied().unwrap_or(0);
            if deltas.contains_key(&report.username) {
                record.rating += rating_delta;
                record.rated_matches += 1;
            }

            debug!(
                "{}: {:?} in match {}, rating {:+}",
                report.username, result, summary.match_id, rating_delta
            );
            updated.insert(report.username.clone(), record.stats.clone());

            self.history.push(HistoryRow {
                match_id: summary.match_id,
                username: report.username.clone(),
                opponent: report.opponent_username.clone(),
                result,
                total_score: report.total_score,
                opponent_total_score: report.opponent_total_score,
                difficulty: report.difficulty,
                mode: report.mode,
                reason: summary.reason,
                rating_delta,
            });
        }
        updated
    }

    fn award_badges(&mut self, username: &str, codes: &[String]) -> Vec<String> {
        let record = self.users.entry(username.to_string()).or_default();
        let mut fresh = Vec::new();
        for code in codes {
            if record.badge_set.insert(code.clone()) {
                record.badges.push(code.clone());
                fresh.push(code.clone());
            }
        }
        if !fresh.is_empty() {
            info!("{} earned badges: {}", username, fresh.join(", "));
        }
        fresh
    }

    fn leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        let mut entries: Vec<LeaderboardEntry> = self
            .users
            .iter()
            .filter(|(_, record)| record.stats.played > 0)
            .map(|(username, record)| LeaderboardEntry {
                username: username.clone(),
                rating: record.rating,
                wins: record.stats.wins,
                played: record.stats.played,
            })
            .collect();

        entries.sort_by(|a, b| {
            b.rating
                .cmp(&a.rating)
                .then(b.wins.cmp(&a.wins))
                .then_with(|| a.username.cmp(&b.username))
        });
        entries.truncate(limit);
        entries
    }

    fn user_progression(&self, username: &str) -> Option<UserProgression> {
        let record = self.users.get(username)?;
        let recent = self
            .history
            .iter()
            .rev()
            .filter(|row| row.username == username)
            .take(20)
            .cloned()
            .collect();

        Some(UserProgression {
            username: username.to_string(),
            stats: record.stats.clone(),
            rating: record.rating,
            rated_matches: record.rated_matches,
            badges: record.badges.clone(),
            recent,
        })
    }
}
