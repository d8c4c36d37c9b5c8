//! Error types. Player-facing errors render as the message sent back to
//! the originating connection; they never abort a match.

use shared::{ErrorKind, FrameError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid or expired session, please log in again.")]
    InvalidSession,

    #[error("You need to log in first.")]
    NotAuthenticated,

    #[error("Server is full, try again later.")]
    ServerFull,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchmakingError {
    #[error("You cannot challenge yourself.")]
    SelfChallenge,

    #[error("That player is not online.")]
    TargetOffline,

    #[error("That player is busy in a match.")]
    TargetBusy,

    #[error("You are already in a match.")]
    AlreadyInMatch,

    #[error("The challenge has expired.")]
    ChallengeExpired,

    #[error("The challenge is invalid or no longer exists.")]
    ChallengeInvalid,

    #[error("That challenge is not addressed to you.")]
    NotAddressedToYou,

    #[error("The challenger is no longer online.")]
    ChallengerOffline,

    #[error("The challenger is busy in a match.")]
    ChallengerBusy,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Malformed click.")]
    MalformedClick,

    #[error("No such match.")]
    UnknownMatch,

    #[error("You are not a player in this match.")]
    NotInMatch,

    #[error("The round is closed.")]
    RoundClosed,

    #[error("You already answered this round.")]
    AlreadyAnswered,

    #[error("Malformed message: {0}")]
    MalformedFrame(String),
}

/// Any error raised while handling one inbound event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Matchmaking(#[from] MatchmakingError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Auth(_) => ErrorKind::Auth,
            EngineError::Matchmaking(_) => ErrorKind::Matchmaking,
            EngineError::Validation(_) => ErrorKind::Validation,
        }
    }
}

/// Infrastructure failures: sockets, codecs and data files.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid data in {path}: {reason}")]
    InvalidData { path: String, reason: String },
}
