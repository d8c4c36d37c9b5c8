//! Performance benchmarks for hot paths in scoring and match completion

use rand::rngs::StdRng;
use rand::SeedableRng;
use server::badges::{evaluate, parse_catalog, MatchFacts};
use server::cities::CityPools;
use server::game::RoundFact;
use server::stats::UserStats;
use shared::{
    decode_payload, destination_point, encode_frame, haversine_km, City, Coordinates, Difficulty,
    PlayerRoundResult, ScoringConfig, ServerEvent,
};
use std::collections::BTreeMap;
use std::time::Instant;

fn sample_rounds(count: usize) -> Vec<RoundFact> {
    (0..count)
        .map(|i| RoundFact {
            city: City {
                name: format!("City {}", i),
                lat: 10.0 + i as f64,
                lon: 20.0 - i as f64,
                country_code: "SE".to_string(),
                population: Some(150_000 * (i as u64 + 1)),
                is_capital: i % 3 == 0,
            },
            distance_km: Some(40.0 * i as f64),
            time_ms: 1_200 + 100 * i as u64,
            score: 30.0 * i as f64,
            timed_out: false,
        })
        .collect()
}

/// Benchmarks great-circle distance
#[test]
fn benchmark_haversine() {
    let origin = Coordinates::new(59.33, 18.07);
    let iterations = 100_000;
    let start = Instant::now();

    let mut total = 0.0;
    for i in 0..iterations {
        let other = Coordinates::new(-33.87, (i % 360) as f64 - 180.0);
        total += haversine_km(origin, other);
    }

    let duration = start.elapsed();
    println!(
        "Haversine: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(total > 0.0);
    assert!(duration.as_millis() < 200);
}

/// Benchmarks round scoring including the bot's destination-point offset
#[test]
fn benchmark_round_scoring() {
    let scoring = ScoringConfig::default();
    let city = Coordinates::new(48.85, 2.35);
    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let guess = destination_point(city, (i % 360) as f64, (i % 500) as f64);
        let score = scoring.score(haversine_km(city, guess), (i % 20_000) as f64);
        assert!((0.0..=shared::MAX_ROUND_SCORE).contains(&score));
    }

    let duration = start.elapsed();
    println!(
        "Round scoring: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 500);
}

/// Benchmarks evaluating the shipped catalog against a ten-round match
#[test]
fn benchmark_badge_evaluation() {
    let catalog = parse_catalog(include_str!("../data/badges.json")).unwrap();
    assert!(!catalog.is_empty());

    let rounds = sample_rounds(10);
    let opponent_rounds = sample_rounds(10);
    let stats = UserStats {
        played: 40,
        wins: 22,
        win_streak: 4,
        ..UserStats::default()
    };
    let facts = MatchFacts {
        is_winner: true,
        is_draw: false,
        difficulty: Difficulty::Hard,
        total_score: 480.0,
        opponent_total_score: 1_900.0,
        rounds: &rounds,
        opponent_rounds: &opponent_rounds,
    };

    let iterations = 10_000;
    let start = Instant::now();
    for _ in 0..iterations {
        let earned = evaluate(&catalog, &stats, &facts);
        assert!(earned.contains(&"first_win".to_string()));
    }

    let duration = start.elapsed();
    println!(
        "Badge evaluation: {} iterations over {} badges in {:?} ({:.2} μs/iter)",
        iterations,
        catalog.len(),
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2_000);
}

/// Benchmarks drawing cities for new matches
#[test]
fn benchmark_city_draws() {
    let pools = CityPools::builtin();
    let mut rng = StdRng::seed_from_u64(3);
    let iterations = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        let difficulty = Difficulty::ALL[i % Difficulty::ALL.len()];
        let cities = pools.draw(difficulty, 10, &mut rng);
        assert_eq!(cities.len(), 10);
    }

    let duration = start.elapsed();
    println!("City draws: {} iterations in {:?}", iterations, duration);
    assert!(duration.as_millis() < 1_000);
}

/// Benchmarks encoding and decoding the largest regular event
#[test]
fn benchmark_round_result_frames() {
    let results: BTreeMap<String, PlayerRoundResult> = ["alice", "bob"]
        .iter()
        .map(|name| {
            (
                name.to_string(),
                PlayerRoundResult {
                    distance_km: Some(123.4),
                    time_ms: 4_321,
                    score: 27.5,
                    guess: Some(Coordinates::new(1.0, 2.0)),
                    timed_out: false,
                },
            )
        })
        .collect();
    let event = ServerEvent::RoundResult {
        round_index: 4,
        city: sample_rounds(1).remove(0).city,
        results,
    };

    let iterations = 10_000;
    let start = Instant::now();
    for _ in 0..iterations {
        let frame = encode_frame(&event).unwrap();
        let decoded: ServerEvent = decode_payload(&frame[4..]).unwrap();
        assert_eq!(decoded, event);
    }

    let duration = start.elapsed();
    println!(
        "RoundResult frames: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );
    assert!(duration.as_millis() < 1_000);
}
