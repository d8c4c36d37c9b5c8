//! Practice opponent for solo matches.

use rand::Rng;
use shared::{destination_point, City, Coordinates, Difficulty};
use std::ops::Range;
use std::time::Duration;

/// How far off and how slow the bot is at a given difficulty.
#[derive(Debug, Clone, PartialEq)]
pub struct BotProfile {
    pub error_km: Range<f64>,
    pub delay_ms: Range<f64>,
}

impl BotProfile {
    pub fn for_difficulty(difficulty: Difficulty) -> Self {
        match difficulty {
            Difficulty::Easy => Self {
                error_km: 300.0..2500.0,
                delay_ms: 6_000.0..14_000.0,
            },
            Difficulty::Medium => Self {
                error_km: 150.0..1200.0,
                delay_ms: 4_000.0..11_000.0,
            },
            Difficulty::Hard => Self {
                error_km: 20.0..600.0,
                delay_ms: 2_500.0..8_000.0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BotAnswer {
    pub guess: Coordinates,
    pub delay: Duration,
}

/// Picks where and when the bot clicks for one round. The delay always
/// lands before `deadline`.
pub fn plan_answer<R: Rng + ?Sized>(
    profile: &BotProfile,
    city: &City,
    deadline: Duration,
    rng: &mut R,
) -> BotAnswer {
    let error_km = rng.gen_range(profile.error_km.clone());
    let bearing = rng.gen_range(0.0..360.0);
    let guess = destination_point(city.coordinates(), bearing, error_km);

    let latest_ms = deadline.as_secs_f64() * 1000.0 * 0.9;
    let delay_ms = rng.gen_range(profile.delay_ms.clone()).min(latest_ms).max(0.0);

    BotAnswer {
        guess,
        delay: Duration::from_secs_f64(delay_ms / 1000.0),
    }
}
