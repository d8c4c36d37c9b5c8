//! Protocol types and game rules shared between the duel server and clients.
//!
//! Frames on the wire are a big-endian `u32` length followed by a bincode
//! payload holding a [`ClientEvent`] or a [`ServerEvent`].

pub mod geo;
pub mod scoring;

pub use geo::{destination_point, haversine_km, Coordinates, EARTH_RADIUS_KM};
pub use scoring::{round_score, ScoringConfig, MAX_ROUND_SCORE};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Username of the synthetic opponent in solo matches.
pub const BOT_NAME: &str = "BOT";
pub const DEFAULT_TOTAL_ROUNDS: usize = 10;
pub const ROUND_TIMEOUT_MS: u64 = 20_000;
/// Largest payload accepted in a single frame.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

pub type MatchId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty '{}'", other)),
        }
    }
}

/// One entry of the city dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct City {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub country_code: String,
    #[serde(default)]
    pub population: Option<u64>,
    #[serde(default)]
    pub is_capital: bool,
}

impl City {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lon)
    }

    /// Identity used to keep cities unique within a match.
    pub fn key(&self) -> String {
        format!(
            "{}|{}",
            self.name.trim().to_lowercase(),
            self.country_code.trim().to_uppercase()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMode {
    Duel,
    Solo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    Completed,
    Forfeit,
}

/// Outcome of one round for one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRoundResult {
    /// `None` when the player never answered.
    pub distance_km: Option<f64>,
    pub time_ms: u64,
    pub score: f64,
    pub guess: Option<Coordinates>,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Auth,
    Matchmaking,
    Validation,
}

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientEvent {
    Auth {
        session_id: String,
    },
    StartRandomMatch {
        difficulty: Option<Difficulty>,
    },
    LeaveQueue,
    StartSoloMatch {
        difficulty: Option<Difficulty>,
    },
    ChallengePlayer {
        username: String,
        difficulty: Option<Difficulty>,
    },
    AcceptChallenge {
        username: String,
    },
    DeclineChallenge {
        username: String,
    },
    /// `x` and `y` are normalized map coordinates in `[0, 1]`.
    PlayerClick {
        match_id: MatchId,
        x: f64,
        y: f64,
        time_ms: f64,
    },
    LeaveMatch {
        match_id: MatchId,
    },
    Logout,
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerEvent {
    Authenticated {
        username: String,
    },
    AuthError {
        message: String,
    },
    LoggedInElsewhere {
        message: String,
    },
    LobbyState {
        online_count: usize,
        online_users: Vec<String>,
        queue_counts: BTreeMap<Difficulty, usize>,
    },
    QueueState {
        queued: bool,
        difficulty: Option<Difficulty>,
    },
    ChallengeSent {
        to: String,
        difficulty: Difficulty,
    },
    ChallengeReceived {
        from: String,
        difficulty: Difficulty,
    },
    ChallengeDeclined {
        by: String,
    },
    ChallengeExpired {
        to: String,
    },
    ChallengeCancelled {
        by: String,
    },
    MatchStarted {
        match_id: MatchId,
        players: [String; 2],
        total_rounds: usize,
        difficulty: Difficulty,
        mode: MatchMode,
    },
    RoundStarting {
        round_index: usize,
        city_name: String,
        deadline_ms: u64,
    },
    RoundResult {
        round_index: usize,
        city: City,
        results: BTreeMap<String, PlayerRoundResult>,
    },
    MatchFinished {
        match_id: MatchId,
        total_scores: BTreeMap<String, f64>,
        winner: Option<String>,
        reason: FinishReason,
    },
    BadgesAwarded {
        codes: Vec<String>,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    TooLarge(usize),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Serializes `message` and prepends the length header.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, FrameError> {
    let payload = bincode::serialize(message)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decodes a frame payload (without its length header).
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, FrameError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(payload.len()));
    }
    Ok(bincode::deserialize(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_city() -> City {
        City {
            name: "Malmö".to_string(),
            lat: 55.605,
            lon: 13.0038,
            country_code: "se".to_string(),
            population: Some(351_749),
            is_capital: false,
        }
    }

    #[test]
    fn test_difficulty_parsing() {
        assert_eq!("EASY".parse::<Difficulty>(), Ok(Difficulty::Easy));
        assert_eq!(" hard ".parse::<Difficulty>(), Ok(Difficulty::Hard));
        assert!("nightmare".parse::<Difficulty>().is_err());
        assert_eq!(Difficulty::default(), Difficulty::Medium);
    }

    #[test]
    fn test_city_key_normalizes_case() {
        assert_eq!(sample_city().key(), "malmö|SE");
    }

    #[test]
    fn test_frame_has_length_prefix() {
        let event = ClientEvent::Auth {
            session_id: "abc".to_string(),
        };
        let frame = encode_frame(&event).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);

        match decode_payload::<ClientEvent>(&frame[4..]).unwrap() {
            ClientEvent::Auth { session_id } => assert_eq!(session_id, "abc"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_round_result_survives_wire() {
        let mut results = BTreeMap::new();
        results.insert(
            "alice".to_string(),
            PlayerRoundResult {
                distance_km: Some(12.5),
                time_ms: 3200,
                score: 50.0,
                guess: Some(Coordinates::new(55.6, 13.0)),
                timed_out: false,
            },
        );
        results.insert(
            "bob".to_string(),
            PlayerRoundResult {
                distance_km: None,
                time_ms: ROUND_TIMEOUT_MS,
                score: MAX_ROUND_SCORE,
                guess: None,
                timed_out: true,
            },
        );
        let event = ServerEvent::RoundResult {
            round_index: 3,
            city: sample_city(),
            results,
        };

        let frame = encode_frame(&event).unwrap();
        let decoded: ServerEvent = decode_payload(&frame[4..]).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let frame = encode_frame(&ClientEvent::LeaveQueue).unwrap();
        let mut corrupted = frame[4..].to_vec();
        corrupted[0] = 0xFF;
        assert!(decode_payload::<ClientEvent>(&corrupted).is_err());
        assert!(decode_payload::<ClientEvent>(&[]).is_err());
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let big = vec![0u8; MAX_FRAME_LEN + 1];
        assert!(matches!(
            decode_payload::<ClientEvent>(&big),
            Err(FrameError::TooLarge(_))
        ));
    }
}
