//! Per-user counters read by the badge evaluator.
//!
//! Stored stats have gone through several key spellings over time
//! (`easy_wins`, `wins_easy`, `winsEasy`, ...). They are folded into one
//! canonical shape here, when the JSON is read, and nowhere else.

use serde::{Deserialize, Serialize};
use shared::Difficulty;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserStats {
    pub played: u64,
    pub wins: u64,
    pub losses: u64,
    #[serde(alias = "winStreak")]
    pub win_streak: u64,
    #[serde(alias = "bestWinStreak")]
    pub best_win_streak: u64,

    #[serde(alias = "easy_wins", alias = "winsEasy", alias = "easyWins")]
    pub wins_easy: u64,
    #[serde(alias = "medium_wins", alias = "winsMedium", alias = "mediumWins")]
    pub wins_medium: u64,
    #[serde(alias = "hard_wins", alias = "winsHard", alias = "hardWins")]
    pub wins_hard: u64,

    #[serde(alias = "easy_played", alias = "playedEasy", alias = "easyPlayed")]
    pub played_easy: u64,
    #[serde(alias = "medium_played", alias = "playedMedium", alias = "mediumPlayed")]
    pub played_medium: u64,
    #[serde(alias = "hard_played", alias = "playedHard", alias = "hardPlayed")]
    pub played_hard: u64,

    #[serde(alias = "playedChallengesTotal")]
    pub played_challenges_total: u64,
    #[serde(alias = "winsChallengesTotal")]
    pub wins_challenges_total: u64,
    #[serde(alias = "startedMatchesViaQueue")]
    pub started_matches_via_queue: u64,
    #[serde(alias = "soloPlayed")]
    pub solo_played: u64,
}

impl UserStats {
    pub fn wins_by_difficulty(&self, difficulty: Difficulty) -> u64 {
        match difficulty {
            Difficulty::Easy => self.wins_easy,
            Difficulty::Medium => self.wins_medium,
            Difficulty::Hard => self.wins_hard,
        }
    }

    pub fn played_by_difficulty(&self, difficulty: Difficulty) -> u64 {
        match difficulty {
            Difficulty::Easy => self.played_easy,
            Difficulty::Medium => self.played_medium,
            Difficulty::Hard => self.played_hard,
        }
    }

    pub(crate) fn record_played(&mut self, difficulty: Difficulty) {
        self.played += 1;
        match difficulty {
            Difficulty::Easy => self.played_easy += 1,
            Difficulty::Medium => self.played_medium += 1,
            Difficulty::Hard => self.played_hard += 1,
        }
    }

    pub(crate) fn record_win(&mut self, difficulty: Difficulty) {
        self.wins += 1;
        self.win_streak += 1;
        self.best_win_streak = self.best_win_streak.max(self.win_streak);
        match difficulty {
            Difficulty::Easy => self.wins_easy += 1,
            Difficulty::Medium => self.wins_medium += 1,
            Difficulty::Hard => self.wins_hard += 1,
        }
    }

    pub(crate) fn record_loss(&mut self) {
        self.losses += 1;
        self.win_streak = 0;
    }
}
