//! Per-match round state machine.
//!
//! A [`Match`] never touches the network or spawns tasks. Every transition
//! returns a [`MatchUpdate`] listing the events to send, the timers to arm or
//! cancel, and (once) the summary of the finished match. The engine applies
//! that update, which keeps each transition atomic with respect to the event
//! loop.

use crate::bot::{plan_answer, BotAnswer, BotProfile};
use crate::config::ServerConfig;
use crate::error::ValidationError;
use crate::matchmaking::{MatchPairing, MatchSource};
use log::{debug, info};
use rand::Rng;
use shared::{
    haversine_km, City, Coordinates, Difficulty, FinishReason, MatchId, MatchMode,
    PlayerRoundResult, ScoringConfig, ServerEvent, BOT_NAME,
};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    Starting,
    RoundActive,
    RoundResolving,
    RoundResult,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    RoundDeadline,
    InterRound,
    BotClick,
}

impl TimerKind {
    pub const ALL: [TimerKind; 3] = [
        TimerKind::RoundDeadline,
        TimerKind::InterRound,
        TimerKind::BotClick,
    ];
}

/// Ask the engine to fire `kind` for `round_index` after `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRequest {
    pub kind: TimerKind,
    pub round_index: usize,
    pub delay: Duration,
}

#[derive(Debug, Default)]
pub struct MatchUpdate {
    pub events: Vec<ServerEvent>,
    pub timers: Vec<TimerRequest>,
    pub cancel: Vec<TimerKind>,
    pub summary: Option<MatchSummary>,
}

impl MatchUpdate {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
            && self.timers.is_empty()
            && self.cancel.is_empty()
            && self.summary.is_none()
    }

    fn extend(&mut self, other: MatchUpdate) {
        self.events.extend(other.events);
        self.timers.extend(other.timers);
        self.cancel.extend(other.cancel);
        if other.summary.is_some() {
            self.summary = other.summary;
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoundSpec {
    pub city: City,
    pub deadline_at: Option<Instant>,
}

/// One resolved round from a single player's point of view.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundFact {
    pub city: City,
    pub distance_km: Option<f64>,
    pub time_ms: u64,
    pub score: f64,
    pub timed_out: bool,
}

/// What the persistence collaborator and badge evaluator learn about one human.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerReport {
    pub username: String,
    pub opponent_username: String,
    pub is_winner: bool,
    pub is_draw: bool,
    /// This player left the match early.
    pub forfeited: bool,
    pub total_score: f64,
    pub opponent_total_score: f64,
    pub rounds: Vec<RoundFact>,
    pub opponent_rounds: Vec<RoundFact>,
    pub difficulty: Difficulty,
    pub mode: MatchMode,
    pub source: MatchSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchSummary {
    pub match_id: MatchId,
    pub players: [String; 2],
    pub mode: MatchMode,
    pub source: MatchSource,
    pub difficulty: Difficulty,
    pub winner: Option<String>,
    pub reason: FinishReason,
    pub total_scores: BTreeMap<String, f64>,
    /// Human participants only.
    pub reports: Vec<PlayerReport>,
}

#[derive(Debug)]
pub struct Match {
    id: MatchId,
    players: [String; 2],
    mode: MatchMode,
    source: MatchSource,
    difficulty: Difficulty,
    rounds: Vec<RoundSpec>,
    current_round: usize,
    phase: MatchPhase,
    /// Answers collected for the active round.
    pending: [Option<PlayerRoundResult>; 2],
    /// Resolved rounds, one entry per player each.
    results: Vec<[PlayerRoundResult; 2]>,
    totals: [f64; 2],
    bot_plan: Option<BotAnswer>,
    scoring: ScoringConfig,
    round_timeout: Duration,
    inter_round_delay: Duration,
}

impl Match {
    /// Builds a match over a pre-drawn, non-repeating city sequence.
    pub fn new(id: MatchId, pairing: &MatchPairing, cities: Vec<City>, config: &ServerConfig) -> Self {
        let mode = match pairing.source {
            MatchSource::Solo => MatchMode::Solo,
            MatchSource::Queue | MatchSource::Challenge => MatchMode::Duel,
        };

        Self {
            id,
            players: pairing.players.clone(),
            mode,
            source: pairing.source,
            difficulty: pairing.difficulty,
            rounds: cities
                .into_iter()
                .map(|city| RoundSpec {
                    city,
                    deadline_at: None,
                })
                .collect(),
            current_round: 0,
            phase: MatchPhase::Starting,
            pending: [None, None],
            results: Vec::new(),
            totals: [0.0, 0.0],
            bot_plan: None,
            scoring: config.scoring,
            round_timeout: config.round_timeout,
            inter_round_delay: config.inter_round_delay,
        }
    }

    pub fn id(&self) -> MatchId {
        self.id
    }

    pub fn players(&self) -> &[String; 2] {
        &self.players
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn current_round(&self) -> usize {
        self.current_round
    }

    pub fn total_rounds(&self) -> usize {
        self.rounds.len()
    }

    pub fn rounds(&self) -> &[RoundSpec] {
        &self.rounds
    }

    pub fn is_finished(&self) -> bool {
        self.phase == MatchPhase::Finished
    }

    /// Players that are driven by a real connection.
    pub fn humans(&self) -> impl Iterator<Item = &String> {
        let solo = self.mode == MatchMode::Solo;
        self.players
            .iter()
            .filter(move |name| !(solo && name.as_str() == BOT_NAME))
    }

    fn seat(&self, username: &str) -> Option<usize> {
        if self.mode == MatchMode::Solo && username == BOT_NAME {
            return None;
        }
        self.players.iter().position(|name| name == username)
    }

    pub fn has_player(&self, username: &str) -> bool {
        self.seat(username).is_some()
    }

    /// Announces the match and opens the first round.
    pub fn start<R: Rng + ?Sized>(&mut self, now: Instant, rng: &mut R) -> MatchUpdate {
        if self.phase != MatchPhase::Starting {
            return MatchUpdate::default();
        }

        info!(
            "Match {} started: {} vs {} ({}, {} rounds)",
            self.id,
            self.players[0],
            self.players[1],
            self.difficulty,
            self.rounds.len()
        );

        let mut update = MatchUpdate::default();
        update.events.push(ServerEvent::MatchStarted {
            match_id: self.id,
            players: self.players.clone(),
            total_rounds: self.rounds.len(),
            difficulty: self.difficulty,
            mode: self.mode,
        });

        if self.rounds.is_empty() {
            update.extend(self.finish(FinishReason::Completed, None));
        } else {
            update.extend(self.begin_round(now, rng));
        }
        update
    }

    fn begin_round<R: Rng + ?Sized>(&mut self, now: Instant, rng: &mut R) -> MatchUpdate {
        let round_index = self.current_round;
        self.phase = MatchPhase::RoundActive;
        self.pending = [None, None];
        self.bot_plan = None;

        let mut update = MatchUpdate::default();
        let Some(round) = self.rounds.get_mut(round_index) else {
            return update;
        };
        round.deadline_at = Some(now + self.round_timeout);

        debug!(
            "Match {} round {} -> {}",
            self.id, round_index, round.city.name
        );
        update.events.push(ServerEvent::RoundStarting {
            round_index,
            city_name: round.city.name.clone(),
            deadline_ms: self.round_timeout.as_millis() as u64,
        });
        update.timers.push(TimerRequest {
            kind: TimerKind::RoundDeadline,
            round_index,
            delay: self.round_timeout,
        });

        if self.mode == MatchMode::Solo {
            let profile = BotProfile::for_difficulty(self.difficulty);
            let plan = plan_answer(&profile, &round.city, self.round_timeout, rng);
            update.timers.push(TimerRequest {
                kind: TimerKind::BotClick,
                round_index,
                delay: plan.delay,
            });
            self.bot_plan = Some(plan);
        }
        update
    }

    fn answer(&self, guess: Coordinates, time_ms: f64) -> PlayerRoundResult {
        let limit = self.round_timeout.as_secs_f64() * 1000.0;
        let time_ms = time_ms.clamp(0.0, limit);
        let city = &self.rounds[self.current_round].city;
        let distance_km = haversine_km(city.coordinates(), guess);

        PlayerRoundResult {
            distance_km: Some(distance_km),
            time_ms: time_ms.round() as u64,
            score: self.scoring.score(distance_km, time_ms),
            guess: Some(guess),
            timed_out: false,
        }
    }

    fn timed_out(&self) -> PlayerRoundResult {
        PlayerRoundResult {
            distance_km: None,
            time_ms: self.round_timeout.as_millis() as u64,
            score: self.scoring.timeout_score(),
            guess: None,
            timed_out: true,
        }
    }

    fn record_bot_answer(&mut self) {
        if self.mode != MatchMode::Solo || self.pending[1].is_some() {
            return;
        }
        if let Some(plan) = self.bot_plan {
            let answer = self.answer(plan.guess, plan.delay.as_secs_f64() * 1000.0);
            self.pending[1] = Some(answer);
        }
    }

    /// Accepts one click for the active round.
    ///
    /// `time_ms` is the client-measured reaction time and is clamped to the
    /// round timeout. The round resolves as soon as every participant has
    /// answered; in solo matches that is the human's click.
    pub fn submit_click(
        &mut self,
        username: &str,
        guess: Coordinates,
        time_ms: f64,
        now: Instant,
    ) -> Result<MatchUpdate, ValidationError> {
        let seat = self.seat(username).ok_or(ValidationError::NotInMatch)?;
        if self.phase != MatchPhase::RoundActive {
            return Err(ValidationError::RoundClosed);
        }
        // The deadline timer may not have been processed yet.
        let deadline = self.rounds[self.current_round].deadline_at;
        if deadline.map_or(false, |deadline| now > deadline) {
            return Err(ValidationError::RoundClosed);
        }
        if self.pending[seat].is_some() {
            return Err(ValidationError::AlreadyAnswered);
        }
        if !guess.is_finite() || !time_ms.is_finite() {
            return Err(ValidationError::MalformedClick);
        }

        let answer = self.answer(guess, time_ms);
        debug!(
            "Match {} round {}: {} clicked {:.1} km off",
            self.id,
            self.current_round,
            username,
            answer.distance_km.unwrap_or_default()
        );
        self.pending[seat] = Some(answer);
        self.record_bot_answer();

        if self.pending.iter().all(Option::is_some) {
            Ok(self.resolve_round())
        } else {
            Ok(MatchUpdate::default())
        }
    }

    /// Handles a timer firing. Firings for another round or phase are stale
    /// and produce an empty update.
    pub fn on_timer<R: Rng + ?Sized>(
        &mut self,
        kind: TimerKind,
        round_index: usize,
        now: Instant,
        rng: &mut R,
    ) -> MatchUpdate {
        if round_index != self.current_round {
            return MatchUpdate::default();
        }

        match (kind, self.phase) {
            (TimerKind::RoundDeadline, MatchPhase::RoundActive) => self.resolve_round(),
            (TimerKind::BotClick, MatchPhase::RoundActive) => {
                self.record_bot_answer();
                if self.pending.iter().all(Option::is_some) {
                    self.resolve_round()
                } else {
                    MatchUpdate::default()
                }
            }
            (TimerKind::InterRound, MatchPhase::RoundResult) => {
                self.current_round += 1;
                self.begin_round(now, rng)
            }
            _ => MatchUpdate::default(),
        }
    }

    fn resolve_round(&mut self) -> MatchUpdate {
        self.phase = MatchPhase::RoundResolving;
        let round_index = self.current_round;

        let resolved = [
            self.pending[0].take().unwrap_or_else(|| self.timed_out()),
            self.pending[1].take().unwrap_or_else(|| self.timed_out()),
        ];
        for (total, result) in self.totals.iter_mut().zip(resolved.iter()) {
            *total += result.score;
        }

        let results: BTreeMap<String, PlayerRoundResult> = self
            .players
            .iter()
            .cloned()
            .zip(resolved.iter().cloned())
            .collect();
        self.results.push(resolved);

        let mut update = MatchUpdate {
            cancel: vec![TimerKind::RoundDeadline, TimerKind::BotClick],
            ..MatchUpdate::default()
        };
        update.events.push(ServerEvent::RoundResult {
            round_index,
            city: self.rounds[round_index].city.clone(),
            results,
        });
        self.phase = MatchPhase::RoundResult;

        if round_index + 1 < self.rounds.len() {
            update.timers.push(TimerRequest {
                kind: TimerKind::InterRound,
                round_index,
                delay: self.inter_round_delay,
            });
        } else {
            let winner = if self.totals[0] < self.totals[1] {
                Some(0)
            } else if self.totals[1] < self.totals[0] {
                Some(1)
            } else {
                None
            };
            update.extend(self.finish(FinishReason::Completed, winner));
        }
        update
    }

    /// Ends the match with `username` losing by forfeit. Remaining rounds are
    /// skipped and every timer is cancelled. No-op once finished.
    pub fn forfeit(&mut self, username: &str) -> Result<MatchUpdate, ValidationError> {
        let seat = self.seat(username).ok_or(ValidationError::NotInMatch)?;
        if self.is_finished() {
            return Ok(MatchUpdate::default());
        }

        info!("Match {}: {} forfeited", self.id, username);
        self.pending = [None, None];
        Ok(self.finish(FinishReason::Forfeit, Some(1 - seat)))
    }

    fn finish(&mut self, reason: FinishReason, winner: Option<usize>) -> MatchUpdate {
        if self.is_finished() {
            return MatchUpdate::default();
        }
        self.phase = MatchPhase::Finished;

        let total_scores: BTreeMap<String, f64> = self
            .players
            .iter()
            .cloned()
            .zip(self.totals.iter().copied())
            .collect();
        let winner_name = winner.map(|seat| self.players[seat].clone());

        info!(
            "Match {} finished ({:?}), winner: {}",
            self.id,
            reason,
            winner_name.as_deref().unwrap_or("draw")
        );

        let reports = (0..2)
            .filter(|&seat| self.mode == MatchMode::Duel || self.players[seat] != BOT_NAME)
            .map(|seat| self.report(seat, winner, reason))
            .collect();

        let summary = MatchSummary {
            match_id: self.id,
            players: self.players.clone(),
            mode: self.mode,
            source: self.source,
            difficulty: self.difficulty,
            winner: winner_name.clone(),
            reason,
            total_scores: total_scores.clone(),
            reports,
        };

        MatchUpdate {
            events: vec![ServerEvent::MatchFinished {
                match_id: self.id,
                total_scores,
                winner: winner_name,
                reason,
            }],
            timers: Vec::new(),
            cancel: TimerKind::ALL.to_vec(),
            summary: Some(summary),
        }
    }

    fn facts_for(&self, seat: usize) -> Vec<RoundFact> {
        self.results
            .iter()
            .zip(self.rounds.iter())
            .map(|(results, round)| {
                let result = &results[seat];
                RoundFact {
                    city: round.city.clone(),
                    distance_km: result.distance_km,
                    time_ms: result.time_ms,
                    score: result.score,
                    timed_out: result.timed_out,
                }
            })
            .collect()
    }

    fn report(&self, seat: usize, winner: Option<usize>, reason: FinishReason) -> PlayerReport {
        let other = 1 - seat;
        PlayerReport {
            username: self.players[seat].clone(),
            opponent_username: self.players[other].clone(),
            is_winner: winner == Some(seat),
            is_draw: winner.is_none(),
            forfeited: reason == FinishReason::Forfeit && winner == Some(other),
            total_score: self.totals[seat],
            opponent_total_score: self.totals[other],
            rounds: self.facts_for(seat),
            opponent_rounds: self.facts_for(other),
            difficulty: self.difficulty,
            mode: self.mode,
            source: self.source,
        }
    }
}
