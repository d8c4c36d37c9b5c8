//! City dataset split into difficulty pools.
//!
//! Easy rounds only use capitals and cities of a million or more, medium adds
//! anything above 200k, hard draws from every city in the dataset.

use crate::error::ServerError;
use log::{info, warn};
use rand::seq::index;
use rand::Rng;
use shared::{City, Difficulty};
use std::collections::HashSet;
use std::path::Path;

pub const EASY_MIN_POPULATION: u64 = 1_000_000;
pub const MEDIUM_MIN_POPULATION: u64 = 200_000;

fn in_tier(city: &City, difficulty: Difficulty) -> bool {
    let population = city.population.unwrap_or(0);
    match difficulty {
        Difficulty::Easy => city.is_capital || population >= EASY_MIN_POPULATION,
        Difficulty::Medium => city.is_capital || population >= MEDIUM_MIN_POPULATION,
        Difficulty::Hard => true,
    }
}

#[derive(Debug, Clone)]
pub struct CityPools {
    cities: Vec<City>,
    easy: Vec<usize>,
    medium: Vec<usize>,
}

impl CityPools {
    /// Builds the pools, dropping duplicate keys and records without usable
    /// coordinates.
    pub fn new(records: Vec<City>) -> Self {
        let mut seen = HashSet::new();
        let mut cities = Vec::with_capacity(records.len());

        for city in records {
            if !city.coordinates().is_finite() || city.name.trim().is_empty() {
                warn!("Skipping city record without usable coordinates: {:?}", city.name);
                continue;
            }
            if seen.insert(city.key()) {
                cities.push(city);
            }
        }

        let tier = |difficulty| {
            cities
                .iter()
                .enumerate()
                .filter(|(_, city)| in_tier(city, difficulty))
                .map(|(i, _)| i)
                .collect::<Vec<_>>()
        };
        let easy = tier(Difficulty::Easy);
        let medium = tier(Difficulty::Medium);

        Self { cities, easy, medium }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ServerError> {
        let raw = std::fs::read_to_string(path)?;
        let records: Vec<City> = serde_json::from_str(&raw)?;
        let pools = Self::new(records);
        if pools.is_empty() {
            return Err(ServerError::InvalidData {
                path: path.display().to_string(),
                reason: "no usable cities".to_string(),
            });
        }
        info!(
            "Loaded {} cities from {} ({} easy, {} medium)",
            pools.len(),
            path.display(),
            pools.easy.len(),
            pools.medium.len()
        );
        Ok(pools)
    }

    /// Small dataset compiled into the binary.
    pub fn builtin() -> Self {
        let city = |name: &str, cc: &str, lat: f64, lon: f64, population: u64, is_capital: bool| City {
            name: name.to_string(),
            lat,
            lon,
            country_code: cc.to_string(),
            population: Some(population),
            is_capital,
        };

        Self::new(vec![
            city("Stockholm", "SE", 59.3293, 18.0686, 975_551, true),
            city("Göteborg", "SE", 57.7089, 11.9746, 583_056, false),
            city("Malmö", "SE", 55.6050, 13.0038, 351_749, false),
            city("Uppsala", "SE", 59.8586, 17.6389, 177_074, false),
            city("Kiruna", "SE", 67.8558, 20.2253, 22_423, false),
            city("Oslo", "NO", 59.9139, 10.7522, 709_037, true),
            city("Bergen", "NO", 60.3913, 5.3221, 285_911, false),
            city("Tromsø", "NO", 69.6492, 18.9553, 77_544, false),
            city("Copenhagen", "DK", 55.6761, 12.5683, 660_193, true),
            city("Helsinki", "FI", 60.1699, 24.9384, 658_864, true),
            city("London", "GB", 51.5074, -0.1278, 8_982_000, true),
            city("Paris", "FR", 48.8566, 2.3522, 2_148_000, true),
            city("Lyon", "FR", 45.7640, 4.8357, 516_092, false),
            city("Berlin", "DE", 52.5200, 13.4050, 3_645_000, true),
            city("Madrid", "ES", 40.4168, -3.7038, 3_223_000, true),
            city("Rome", "IT", 41.9028, 12.4964, 2_873_000, true),
            city("Reykjavík", "IS", 64.1466, -21.9426, 131_136, true),
            city("New York", "US", 40.7128, -74.0060, 8_336_817, false),
            city("Anchorage", "US", 61.2181, -149.9003, 291_247, false),
            city("São Paulo", "BR", -23.5505, -46.6333, 12_330_000, false),
            city("Ushuaia", "AR", -54.8019, -68.3030, 56_956, false),
            city("Cairo", "EG", 30.0444, 31.2357, 9_540_000, true),
            city("Nairobi", "KE", -1.2921, 36.8219, 4_397_000, true),
            city("Tokyo", "JP", 35.6762, 139.6503, 13_960_000, true),
            city("Sydney", "AU", -33.8688, 151.2093, 5_312_000, false),
            city("Hobart", "AU", -42.8821, 147.3272, 206_097, false),
        ])
    }

    fn pool(&self, difficulty: Difficulty) -> Option<&[usize]> {
        match difficulty {
            Difficulty::Easy => Some(&self.easy),
            Difficulty::Medium => Some(&self.medium),
            Difficulty::Hard => None,
        }
    }

    /// Draws up to `count` distinct cities for one match.
    ///
    /// A tier that cannot cover `count` rounds falls back to the whole
    /// dataset; if even that is too small every city is used once.
    pub fn draw<R: Rng + ?Sized>(&self, difficulty: Difficulty, count: usize, rng: &mut R) -> Vec<City> {
        match self.pool(difficulty) {
            Some(pool) if pool.len() >= count => index::sample(rng, pool.len(), count)
                .into_iter()
                .map(|i| self.cities[pool[i]].clone())
                .collect(),
            _ => {
                let amount = count.min(self.cities.len());
                index::sample(rng, self.cities.len(), amount)
                    .into_iter()
                    .map(|i| self.cities[i].clone())
                    .collect()
            }
        }
    }

    pub fn pool_size(&self, difficulty: Difficulty) -> usize {
        self.pool(difficulty).map_or(self.cities.len(), |pool| pool.len())
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn city(name: &str, cc: &str, population: Option<u64>, is_capital: bool) -> City {
        City {
            name: name.to_string(),
            lat: 10.0,
            lon: 20.0,
            country_code: cc.to_string(),
            population,
            is_capital,
        }
    }

    #[test]
    fn test_tiers() {
        let pools = CityPools::new(vec![
            city("Capital", "AA", Some(5_000), true),
            city("Big", "AA", Some(2_000_000), false),
            city("Mid", "AA", Some(300_000), false),
            city("Small", "AA", Some(10_000), false),
            city("Unknown", "AA", None, false),
        ]);

        assert_eq!(pools.pool_size(Difficulty::Easy), 2);
        assert_eq!(pools.pool_size(Difficulty::Medium), 3);
        assert_eq!(pools.pool_size(Difficulty::Hard), 5);
    }

    #[test]
    fn test_duplicates_and_bad_coordinates_are_dropped() {
        let mut broken = city("Nowhere", "ZZ", Some(1), false);
        broken.lat = f64::NAN;
        let pools = CityPools::new(vec![
            city("Lund", "se", Some(90_000), false),
            city("LUND", "SE", Some(90_000), false),
            broken,
        ]);
        assert_eq!(pools.len(), 1);
    }

    #[test]
    fn test_draw_never_repeats() {
        let pools = CityPools::builtin();
        let mut rng = StdRng::seed_from_u64(7);

        for difficulty in Difficulty::ALL {
            for _ in 0..50 {
                let drawn = pools.draw(difficulty, 10, &mut rng);
                assert_eq!(drawn.len(), 10);
                let keys: HashSet<String> = drawn.iter().map(City::key).collect();
                assert_eq!(keys.len(), drawn.len());
            }
        }
    }

    #[test]
    fn test_easy_draw_respects_tier() {
        let pools = CityPools::builtin();
        let mut rng = StdRng::seed_from_u64(1);
        let drawn = pools.draw(Difficulty::Easy, 5, &mut rng);
        assert!(drawn.iter().all(|c| in_tier(c, Difficulty::Easy)));
    }

    #[test]
    fn test_small_pool_falls_back() {
        let pools = CityPools::new(vec![
            city("Capital", "AA", Some(5_000), true),
            city("Small", "AA", Some(10_000), false),
            city("Tiny", "AA", Some(100), false),
        ]);
        let mut rng = StdRng::seed_from_u64(3);

        assert_eq!(pools.draw(Difficulty::Easy, 3, &mut rng).len(), 3);
        assert_eq!(pools.draw(Difficulty::Hard, 10, &mut rng).len(), 3);
    }
}
