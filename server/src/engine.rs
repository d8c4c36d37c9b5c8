//! The single owner of all game state.
//!
//! Every inbound event, timer firing and connection change is funnelled
//! through one `&mut GameEngine` on the server's event loop. Handlers are
//! synchronous, so no other event can observe a half-applied transition.

use crate::badges::{self, BadgeCatalogCache, BadgeCatalogStore, MatchFacts, StaticCatalogStore};
use crate::cities::CityPools;
use crate::config::ServerConfig;
use crate::error::{AuthError, EngineError, ValidationError};
use crate::game::{Match, MatchSummary, MatchUpdate, TimerKind};
use crate::matchmaking::{ChallengeRequest, MatchPairing, MatchmakingCoordinator, PlayerDirectory};
use crate::network::{Outbound, ServerMessage};
use crate::presence::{ConnectionId, PresenceRegistry};
use crate::progression::{InMemoryProgressionStore, ProgressionStore};
use crate::projection::{Equirectangular, MapProjection};
use crate::sessions::{InMemorySessionStore, SessionStore};
use crate::timers::MatchTimers;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{ClientEvent, FinishReason, MatchId, MatchMode, ServerEvent};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc;

/// External systems the engine talks to.
pub struct Collaborators {
    pub sessions: Box<dyn SessionStore>,
    pub progression: Box<dyn ProgressionStore>,
    pub catalog: Box<dyn BadgeCatalogStore>,
    pub cities: CityPools,
    pub projection: Box<dyn MapProjection>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            sessions: Box::new(InMemorySessionStore::new()),
            progression: Box::new(InMemoryProgressionStore::new()),
            catalog: Box::new(StaticCatalogStore::default()),
            cities: CityPools::builtin(),
            projection: Box::new(Equirectangular),
        }
    }
}

struct MatchEntry {
    state: Match,
    timers: MatchTimers,
}

/// Liveness view handed to the matchmaking coordinator.
struct Directory<'a> {
    presence: &'a PresenceRegistry,
    active: &'a HashMap<String, MatchId>,
}

impl PlayerDirectory for Directory<'_> {
    fn is_online(&self, username: &str) -> bool {
        self.presence.is_online(username)
    }

    fn is_busy(&self, username: &str) -> bool {
        self.active.contains_key(username)
    }
}

pub struct GameEngine {
    config: ServerConfig,
    presence: PresenceRegistry,
    outbound: HashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>,
    sessions: Box<dyn SessionStore>,
    matchmaking: MatchmakingCoordinator,
    matches: HashMap<MatchId, MatchEntry>,
    active_match_by_user: HashMap<String, MatchId>,
    cities: CityPools,
    projection: Box<dyn MapProjection>,
    badges: BadgeCatalogCache<Box<dyn BadgeCatalogStore>>,
    progression: Box<dyn ProgressionStore>,
    rng: StdRng,
    timer_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl GameEngine {
    pub fn new(
        config: ServerConfig,
        collaborators: Collaborators,
        timer_tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            presence: PresenceRegistry::new(config.max_connections),
            outbound: HashMap::new(),
            sessions: collaborators.sessions,
            matchmaking: MatchmakingCoordinator::new(config.challenge_ttl),
            matches: HashMap::new(),
            active_match_by_user: HashMap::new(),
            cities: collaborators.cities,
            projection: collaborators.projection,
            badges: BadgeCatalogCache::new(collaborators.catalog, config.catalog_ttl),
            progression: collaborators.progression,
            rng,
            timer_tx,
            config,
        }
    }

    pub fn online_count(&self) -> usize {
        self.presence.online_count()
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn match_of(&self, username: &str) -> Option<MatchId> {
        self.active_match_by_user.get(username).copied()
    }

    pub fn match_state(&self, match_id: MatchId) -> Option<&Match> {
        self.matches.get(&match_id).map(|entry| &entry.state)
    }

    pub fn progression(&self) -> &dyn ProgressionStore {
        self.progression.as_ref()
    }

    pub fn invalidate_badge_catalog(&mut self) {
        self.badges.invalidate();
    }

    /// Registers a new socket and the channel its writer task drains.
    /// Returns `None` when the server is full.
    pub fn open_connection(
        &mut self,
        addr: SocketAddr,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Option<ConnectionId> {
        let connection_id = self.presence.open_connection(addr)?;
        self.outbound.insert(connection_id, outbound);
        Some(connection_id)
    }

    pub fn connection_closed(&mut self, connection_id: ConnectionId) {
        self.outbound.remove(&connection_id);
        if let Some(username) = self.presence.disconnect(connection_id) {
            self.user_departed(&username);
            self.broadcast_lobby();
        }
    }

    pub fn malformed_frame(&mut self, connection_id: ConnectionId, reason: String) {
        warn!("Malformed frame from connection {}: {}", connection_id, reason);
        self.report_error(connection_id, ValidationError::MalformedFrame(reason).into());
    }

    pub fn handle_event(&mut self, connection_id: ConnectionId, event: ClientEvent) {
        let result = match event {
            ClientEvent::Auth { session_id } => self.on_auth(connection_id, &session_id),
            other => match self.presence.username_of(connection_id).map(str::to_owned) {
                Some(username) => self.on_user_event(connection_id, &username, other),
                None => Err(AuthError::NotAuthenticated.into()),
            },
        };

        if let Err(e) = result {
            self.report_error(connection_id, e);
        }
    }

    pub fn timer_fired(&mut self, match_id: MatchId, kind: TimerKind, round_index: usize) {
        let Some(entry) = self.matches.get_mut(&match_id) else {
            debug!("Timer {:?} for finished match {}", kind, match_id);
            return;
        };
        let update = entry
            .state
            .on_timer(kind, round_index, Instant::now(), &mut self.rng);
        self.apply_update(match_id, update);
    }

    /// Sweeps challenges whose deadline passed and tells their senders.
    pub fn expire_challenges(&mut self) {
        for request in self.matchmaking.expire_challenges(Instant::now()) {
            debug!("Challenge {} -> {} expired", request.from, request.to);
            self.send_to_user(&request.from, ServerEvent::ChallengeExpired { to: request.to });
        }
    }

    fn report_error(&self, connection_id: ConnectionId, error: EngineError) {
        debug!("Connection {}: {}", connection_id, error);
        let event = match error {
            EngineError::Auth(e) => ServerEvent::AuthError {
                message: e.to_string(),
            },
            other => ServerEvent::Error {
                kind: other.kind(),
                message: other.to_string(),
            },
        };
        self.send_to(connection_id, event);
    }

    fn on_auth(&mut self, connection_id: ConnectionId, session_id: &str) -> Result<(), EngineError> {
        let previous = self.presence.username_of(connection_id).map(str::to_owned);
        let outcome = self
            .presence
            .authenticate(connection_id, session_id, self.sessions.as_ref())?;

        if let Some(previous) = previous.filter(|p| *p != outcome.username) {
            self.user_departed(&previous);
        }

        if let Some(evicted) = outcome.evicted {
            self.send_to(
                evicted,
                ServerEvent::LoggedInElsewhere {
                    message: "You logged in from another location.".to_string(),
                },
            );
            if let Some(tx) = self.outbound.remove(&evicted) {
                let _ = tx.send(Outbound::Close);
            }
            self.presence.disconnect(evicted);
        }

        self.send_to(
            connection_id,
            ServerEvent::Authenticated {
                username: outcome.username,
            },
        );
        self.broadcast_lobby();
        Ok(())
    }

    fn on_user_event(
        &mut self,
        connection_id: ConnectionId,
        username: &str,
        event: ClientEvent,
    ) -> Result<(), EngineError> {
        let now = Instant::now();

        match event {
            ClientEvent::Auth { session_id } => return self.on_auth(connection_id, &session_id),

            ClientEvent::StartRandomMatch { difficulty } => {
                let difficulty = difficulty.unwrap_or_default();
                let directory = Directory {
                    presence: &self.presence,
                    active: &self.active_match_by_user,
                };
                let pairings = self
                    .matchmaking
                    .enqueue_random(username, difficulty, &directory)?;

                let queued = self.matchmaking.queued_difficulty(username);
                self.send_to(
                    connection_id,
                    ServerEvent::QueueState {
                        queued: queued.is_some(),
                        difficulty: queued,
                    },
                );
                for pairing in pairings {
                    self.start_match(pairing);
                }
                self.broadcast_lobby();
            }

            ClientEvent::LeaveQueue => {
                self.matchmaking.leave_queue(username);
                self.send_to(
                    connection_id,
                    ServerEvent::QueueState {
                        queued: false,
                        difficulty: None,
                    },
                );
                self.broadcast_lobby();
            }

            ClientEvent::StartSoloMatch { difficulty } => {
                let directory = Directory {
                    presence: &self.presence,
                    active: &self.active_match_by_user,
                };
                let pairing = self.matchmaking.start_solo(
                    username,
                    difficulty.unwrap_or_default(),
                    &directory,
                )?;
                self.start_match(pairing);
                self.broadcast_lobby();
            }

            ClientEvent::ChallengePlayer {
                username: target,
                difficulty,
            } => {
                let directory = Directory {
                    presence: &self.presence,
                    active: &self.active_match_by_user,
                };
                let issued = self.matchmaking.challenge(
                    username,
                    target.trim(),
                    difficulty.unwrap_or_default(),
                    now,
                    &directory,
                )?;
                if let Some(superseded) = issued.superseded {
                    self.notify_cancelled(username, vec![superseded]);
                }
                self.notify_challenge(&issued.request);
                self.arm_challenge_timer();
                self.broadcast_lobby();
            }

            ClientEvent::AcceptChallenge { username: from } => {
                let directory = Directory {
                    presence: &self.presence,
                    active: &self.active_match_by_user,
                };
                let pairing = self
                    .matchmaking
                    .accept_challenge(username, from.trim(), now, &directory)?;
                self.start_match(pairing);
                self.broadcast_lobby();
            }

            ClientEvent::DeclineChallenge { username: from } => {
                let request = self.matchmaking.decline_challenge(username, from.trim())?;
                self.send_to_user(
                    &request.from,
                    ServerEvent::ChallengeDeclined {
                        by: username.to_string(),
                    },
                );
            }

            ClientEvent::PlayerClick {
                match_id,
                x,
                y,
                time_ms,
            } => {
                let projection = &self.projection;
                let entry = self
                    .matches
                    .get_mut(&match_id)
                    .ok_or(ValidationError::UnknownMatch)?;
                if !entry.state.has_player(username) {
                    return Err(ValidationError::NotInMatch.into());
                }
                let guess = projection
                    .unproject(x, y)
                    .ok_or(ValidationError::MalformedClick)?;
                let update = entry.state.submit_click(username, guess, time_ms, now)?;
                self.apply_update(match_id, update);
            }

            ClientEvent::LeaveMatch { match_id } => {
                let entry = self
                    .matches
                    .get_mut(&match_id)
                    .ok_or(ValidationError::UnknownMatch)?;
                let update = entry.state.forfeit(username)?;
                self.apply_update(match_id, update);
            }

            ClientEvent::Logout => {
                if let Some(binding) = self.presence.release(connection_id) {
                    self.sessions.revoke(&binding.session_id);
                    info!("{} logged out", binding.username);
                }
                self.user_departed(username);
                self.broadcast_lobby();
            }
        }
        Ok(())
    }

    fn notify_challenge(&self, request: &ChallengeRequest) {
        self.send_to_user(
            &request.from,
            ServerEvent::ChallengeSent {
                to: request.to.clone(),
                difficulty: request.difficulty,
            },
        );
        self.send_to_user(
            &request.to,
            ServerEvent::ChallengeReceived {
                from: request.from.clone(),
                difficulty: request.difficulty,
            },
        );
    }

    fn arm_challenge_timer(&self) {
        let tx = self.timer_tx.clone();
        let ttl = self.matchmaking.challenge_ttl();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let _ = tx.send(ServerMessage::ChallengeTimeout);
        });
    }

    /// The user is no longer available: withdraw their challenges and
    /// queue entry, and forfeit any match in progress.
    fn user_departed(&mut self, username: &str) {
        let cancelled = self.matchmaking.cancel_for_user(username);
        self.notify_cancelled(username, cancelled);

        if let Some(match_id) = self.active_match_by_user.get(username).copied() {
            let update = match self.matches.get_mut(&match_id) {
                Some(entry) => entry.state.forfeit(username),
                None => return,
            };
            match update {
                Ok(update) => self.apply_update(match_id, update),
                Err(e) => warn!("Could not forfeit {} in match {}: {}", username, match_id, e),
            }
        }
    }

    fn notify_cancelled(&self, username: &str, cancelled: Vec<ChallengeRequest>) {
        for request in cancelled {
            let other = if request.from == username {
                &request.to
            } else {
                &request.from
            };
            self.send_to_user(
                other,
                ServerEvent::ChallengeCancelled {
                    by: username.to_string(),
                },
            );
        }
    }

    fn next_match_id(&mut self) -> MatchId {
        loop {
            let id: MatchId = self.rng.gen_range(1..=MatchId::MAX);
            if !self.matches.contains_key(&id) {
                return id;
            }
        }
    }

    fn start_match(&mut self, pairing: MatchPairing) {
        let match_id = self.next_match_id();
        let cities = self
            .cities
            .draw(pairing.difficulty, self.config.total_rounds, &mut self.rng);
        let mut state = Match::new(match_id, &pairing, cities, &self.config);

        let humans: Vec<String> = state.humans().cloned().collect();
        for username in &humans {
            let cancelled = self.matchmaking.cancel_for_user(username);
            self.notify_cancelled(username, cancelled);
            self.active_match_by_user.insert(username.clone(), match_id);
        }

        let update = state.start(Instant::now(), &mut self.rng);
        self.matches.insert(
            match_id,
            MatchEntry {
                state,
                timers: MatchTimers::new(),
            },
        );
        self.apply_update(match_id, update);
    }

    /// Arms and cancels timers, delivers events, and tears the match down
    /// once it has produced its summary.
    fn apply_update(&mut self, match_id: MatchId, update: MatchUpdate) {
        let Some(entry) = self.matches.get_mut(&match_id) else {
            return;
        };

        for kind in &update.cancel {
            entry.timers.cancel(*kind);
        }
        for request in update.timers {
            entry.timers.arm(match_id, request, &self.timer_tx);
        }
        let recipients: Vec<String> = entry.state.humans().cloned().collect();

        for event in update.events {
            for username in &recipients {
                self.send_to_user(username, event.clone());
            }
        }

        if let Some(summary) = update.summary {
            // Dropping the entry aborts whatever timers are still pending.
            self.matches.remove(&match_id);
            for username in &recipients {
                if self.active_match_by_user.get(username) == Some(&match_id) {
                    self.active_match_by_user.remove(username);
                }
            }
            self.complete_match(summary);
        }
    }

    /// Hands the result to persistence, then evaluates and awards badges.
    ///
    /// Walkovers and practice games against the bot count towards stats but
    /// never earn badges.
    fn complete_match(&mut self, summary: MatchSummary) {
        let stats = self.progression.record_match(&summary);
        if summary.reason == FinishReason::Forfeit || summary.mode == MatchMode::Solo {
            debug!(
                "Match {} finished by {:?} in {:?} mode, skipping badges",
                summary.match_id, summary.reason, summary.mode
            );
            return;
        }

        let catalog = self.badges.get(Instant::now());

        for report in &summary.reports {
            let Some(user_stats) = stats.get(&report.username) else {
                continue;
            };
            let eligible = badges::evaluate(&catalog, user_stats, &MatchFacts::from(report));
            let earned = self.progression.award_badges(&report.username, &eligible);
            if !earned.is_empty() {
                self.send_to_user(&report.username, ServerEvent::BadgesAwarded { codes: earned });
            }
        }
    }

    fn broadcast_lobby(&self) {
        let event = ServerEvent::LobbyState {
            online_count: self.presence.online_count(),
            online_users: self.presence.online_users(),
            queue_counts: self.matchmaking.queue_counts(),
        };
        for connection_id in self.presence.authenticated_connections() {
            self.send_to(connection_id, event.clone());
        }
    }

    fn send_to_user(&self, username: &str, event: ServerEvent) {
        if let Some(connection_id) = self.presence.connection_of(username) {
            self.send_to(connection_id, event);
        }
    }

    fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) {
        if let Some(tx) = self.outbound.get(&connection_id) {
            if tx.send(Outbound::Event(event)).is_err() {
                debug!("Connection {} writer is gone", connection_id);
            }
        }
    }
}
