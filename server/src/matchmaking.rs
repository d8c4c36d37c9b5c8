//! Matchmaking: random queues, direct challenges and solo practice.
//!
//! The coordinator only decides *who* plays; building and running the match
//! is left to the engine. Liveness questions (is a user online, already in a
//! match) are answered by a [`PlayerDirectory`] the engine passes in.

use crate::error::MatchmakingError;
use log::{debug, info};
use shared::{Difficulty, BOT_NAME};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

pub trait PlayerDirectory {
    fn is_online(&self, username: &str) -> bool;
    fn is_busy(&self, username: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    Queue,
    Challenge,
    Solo,
}

/// Two players the engine should put into a new match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPairing {
    pub players: [String; 2],
    pub difficulty: Difficulty,
    pub source: MatchSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    Pending,
    /// Kept around briefly so a late accept can say "expired" instead of "invalid".
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRequest {
    pub from: String,
    pub to: String,
    pub difficulty: Difficulty,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub state: ChallengeState,
}

impl ChallengeRequest {
    pub fn is_pending(&self, now: Instant) -> bool {
        self.state == ChallengeState::Pending && now < self.expires_at
    }

    pub fn involves(&self, username: &str) -> bool {
        self.from == username || self.to == username
    }
}

/// Result of sending a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedChallenge {
    pub request: ChallengeRequest,
    /// A pending request the target had sent the other way, now withdrawn.
    pub superseded: Option<ChallengeRequest>,
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

pub struct MatchmakingCoordinator {
    queues: BTreeMap<Difficulty, VecDeque<String>>,
    challenges: HashMap<(String, String), ChallengeRequest>,
    challenge_ttl: Duration,
}

impl MatchmakingCoordinator {
    pub fn new(challenge_ttl: Duration) -> Self {
        let queues = Difficulty::ALL
            .iter()
            .map(|difficulty| (*difficulty, VecDeque::new()))
            .collect();

        Self {
            queues,
            challenges: HashMap::new(),
            challenge_ttl,
        }
    }

    pub fn challenge_ttl(&self) -> Duration {
        self.challenge_ttl
    }

    /// Puts `username` into the queue for `difficulty` and returns every
    /// pairing that can now be formed, oldest waiters first.
    ///
    /// A user already waiting in that queue keeps their place; waiting in a
    /// different tier moves them.
    pub fn enqueue_random(
        &mut self,
        username: &str,
        difficulty: Difficulty,
        directory: &dyn PlayerDirectory,
    ) -> Result<Vec<MatchPairing>, MatchmakingError> {
        if directory.is_busy(username) {
            return Err(MatchmakingError::AlreadyInMatch);
        }

        if self.queued_difficulty(username) != Some(difficulty) {
            self.leave_queue(username);
            self.queues
                .entry(difficulty)
                .or_default()
                .push_back(username.to_string());
            debug!("{} joined the {} queue", username, difficulty);
        }

        Ok(self.drain_pairs(difficulty, directory))
    }

    fn drain_pairs(
        &mut self,
        difficulty: Difficulty,
        directory: &dyn PlayerDirectory,
    ) -> Vec<MatchPairing> {
        let queue = self.queues.entry(difficulty).or_default();
        queue.retain(|user| directory.is_online(user) && !directory.is_busy(user));

        let mut pairings = Vec::new();
        while queue.len() >= 2 {
            if let (Some(first), Some(second)) = (queue.pop_front(), queue.pop_front()) {
                info!("Queue paired {} and {} ({})", first, second, difficulty);
                pairings.push(MatchPairing {
                    players: [first, second],
                    difficulty,
                    source: MatchSource::Queue,
                });
            }
        }
        pairings
    }

    /// Removes the user from whichever queue they are in.
    pub fn leave_queue(&mut self, username: &str) -> bool {
        let mut removed = false;
        for queue in self.queues.values_mut() {
            let before = queue.len();
            queue.retain(|user| user != username);
            removed |= queue.len() != before;
        }
        removed
    }

    pub fn queued_difficulty(&self, username: &str) -> Option<Difficulty> {
        self.queues
            .iter()
            .find(|(_, queue)| queue.iter().any(|user| user == username))
            .map(|(difficulty, _)| *difficulty)
    }

    pub fn queue_counts(&self) -> BTreeMap<Difficulty, usize> {
        self.queues
            .iter()
            .map(|(difficulty, queue)| (*difficulty, queue.len()))
            .collect()
    }

    pub fn start_solo(
        &mut self,
        username: &str,
        difficulty: Difficulty,
        directory: &dyn PlayerDirectory,
    ) -> Result<MatchPairing, MatchmakingError> {
        if directory.is_busy(username) {
            return Err(MatchmakingError::AlreadyInMatch);
        }
        self.leave_queue(username);

        Ok(MatchPairing {
            players: [username.to_string(), BOT_NAME.to_string()],
            difficulty,
            source: MatchSource::Solo,
        })
    }

    /// Records a challenge from `from` to `to`. Replaces any earlier request
    /// between the same two users; a pending one sent by `to` is handed back
    /// as superseded so its sender can be told.
    pub fn challenge(
        &mut self,
        from: &str,
        to: &str,
        difficulty: Difficulty,
        now: Instant,
        directory: &dyn PlayerDirectory,
    ) -> Result<IssuedChallenge, MatchmakingError> {
        if from == to {
            return Err(MatchmakingError::SelfChallenge);
        }
        if directory.is_busy(from) {
            return Err(MatchmakingError::AlreadyInMatch);
        }
        if to == BOT_NAME || !directory.is_online(to) {
            return Err(MatchmakingError::TargetOffline);
        }
        if directory.is_busy(to) {
            return Err(MatchmakingError::TargetBusy);
        }

        self.leave_queue(from);

        let request = ChallengeRequest {
            from: from.to_string(),
            to: to.to_string(),
            difficulty,
            created_at: now,
            expires_at: now + self.challenge_ttl,
            state: ChallengeState::Pending,
        };
        let superseded = self
            .challenges
            .insert(pair_key(from, to), request.clone())
            .filter(|previous| previous.from == to && previous.is_pending(now));
        if superseded.is_some() {
            debug!("{} challenged {} back, withdrawing their request", from, to);
        }
        info!("{} challenged {} ({})", from, to, difficulty);
        Ok(IssuedChallenge {
            request,
            superseded,
        })
    }

    /// `to` accepts the request `from` sent them. The request is consumed
    /// whether or not a match results.
    pub fn accept_challenge(
        &mut self,
        to: &str,
        from: &str,
        now: Instant,
        directory: &dyn PlayerDirectory,
    ) -> Result<MatchPairing, MatchmakingError> {
        let key = pair_key(from, to);
        let request = self
            .challenges
            .get(&key)
            .ok_or(MatchmakingError::ChallengeInvalid)?;

        if request.to != to || request.from != from {
            return Err(MatchmakingError::NotAddressedToYou);
        }
        if !request.is_pending(now) {
            self.challenges.remove(&key);
            return Err(MatchmakingError::ChallengeExpired);
        }
        if directory.is_busy(to) {
            return Err(MatchmakingError::AlreadyInMatch);
        }

        let difficulty = request.difficulty;
        self.challenges.remove(&key);

        if !directory.is_online(from) {
            return Err(MatchmakingError::ChallengerOffline);
        }
        if directory.is_busy(from) {
            return Err(MatchmakingError::ChallengerBusy);
        }

        self.leave_queue(from);
        self.leave_queue(to);
        info!("{} accepted the challenge from {}", to, from);

        Ok(MatchPairing {
            players: [from.to_string(), to.to_string()],
            difficulty,
            source: MatchSource::Challenge,
        })
    }

    pub fn decline_challenge(
        &mut self,
        to: &str,
        from: &str,
    ) -> Result<ChallengeRequest, MatchmakingError> {
        let key = pair_key(from, to);
        let request = self
            .challenges
            .get(&key)
            .ok_or(MatchmakingError::ChallengeInvalid)?;

        if request.to != to || request.from != from {
            return Err(MatchmakingError::NotAddressedToYou);
        }
        if request.state == ChallengeState::Expired {
            self.challenges.remove(&key);
            return Err(MatchmakingError::ChallengeExpired);
        }

        self.challenges
            .remove(&key)
            .ok_or(MatchmakingError::ChallengeInvalid)
    }

    /// Drops the user from the queues and withdraws every pending challenge
    /// they are part of. Returns the withdrawn requests so the other party
    /// can be told.
    pub fn cancel_for_user(&mut self, username: &str) -> Vec<ChallengeRequest> {
        self.leave_queue(username);

        let keys: Vec<(String, String)> = self
            .challenges
            .iter()
            .filter(|(_, request)| request.involves(username))
            .map(|(key, _)| key.clone())
            .collect();

        let mut cancelled: Vec<ChallengeRequest> = keys
            .iter()
            .filter_map(|key| self.challenges.remove(key))
            .filter(|request| request.state == ChallengeState::Pending)
            .collect();
        cancelled.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        cancelled
    }

    /// Marks requests whose deadline passed as expired and returns them.
    /// Expired entries older than one more TTL are forgotten.
    pub fn expire_challenges(&mut self, now: Instant) -> Vec<ChallengeRequest> {
        let mut expired = Vec::new();
        for request in self.challenges.values_mut() {
            if request.state == ChallengeState::Pending && now >= request.expires_at {
                request.state = ChallengeState::Expired;
                expired.push(request.clone());
            }
        }

        let ttl = self.challenge_ttl;
        self.challenges.retain(|_, request| {
            request.state == ChallengeState::Pending || now < request.expires_at + ttl
        });

        expired.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        expired
    }

    pub fn challenge_between(&self, a: &str, b: &str) -> Option<&ChallengeRequest> {
        self.challenges.get(&pair_key(a, b))
    }

    pub fn pending_challenges(&self) -> usize {
        self.challenges
            .values()
            .filter(|request| request.state == ChallengeState::Pending)
            .count()
    }
}
