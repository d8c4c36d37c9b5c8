//! Runtime tunables for the duel server.

use shared::{ScoringConfig, DEFAULT_TOTAL_ROUNDS, ROUND_TIMEOUT_MS};
use std::time::Duration;

/// Badge catalog entries are reloaded at most this often.
pub const CATALOG_TTL: Duration = Duration::from_secs(60);
pub const CHALLENGE_TTL: Duration = Duration::from_secs(30);
pub const INTER_ROUND_DELAY: Duration = Duration::from_millis(3_000);
pub const MAX_CONNECTIONS: usize = 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub total_rounds: usize,
    pub round_timeout: Duration,
    pub inter_round_delay: Duration,
    pub challenge_ttl: Duration,
    pub catalog_ttl: Duration,
    pub max_connections: usize,
    pub scoring: ScoringConfig,
    /// Fixed seed for match ids, city draws and bot answers. `None` seeds from entropy.
    pub rng_seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            total_rounds: DEFAULT_TOTAL_ROUNDS,
            round_timeout: Duration::from_millis(ROUND_TIMEOUT_MS),
            inter_round_delay: INTER_ROUND_DELAY,
            challenge_ttl: CHALLENGE_TTL,
            catalog_ttl: CATALOG_TTL,
            max_connections: MAX_CONNECTIONS,
            scoring: ScoringConfig::default(),
            rng_seed: None,
        }
    }
}

impl ServerConfig {
    pub fn round_timeout_ms(&self) -> u64 {
        self.round_timeout.as_millis().min(u64::MAX as u128) as u64
    }
}

/// Command line parser for the rounds per match. A match needs at least one.
pub fn parse_total_rounds(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("a match needs at least one round".to_string()),
        Ok(rounds) => Ok(rounds),
        Err(e) => Err(e.to_string()),
    }
}
