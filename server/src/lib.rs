//! # Geography Duel Server Library
//!
//! This library provides the authoritative server for a real-time geography
//! guessing game. Two players (or one player and a bot) are shown the same
//! city name and race to click its location on a world map. The server owns
//! every rule decision: who is online, who plays whom, when rounds open and
//! close, how answers are scored, and which badges a finished match earns.
//!
//! ## Core Responsibilities
//!
//! ### Presence
//! Tracks connections and the single live session each user may hold:
//! - Session validation against the session store
//! - Evicting an older connection when a user logs in elsewhere
//! - Lobby broadcasts with online users and queue sizes
//!
//! ### Matchmaking
//! Pairs players through one of three paths:
//! - FIFO queues per difficulty tier
//! - Direct challenges with a 30 second expiry
//! - Solo matches against the built-in bot
//!
//! ### Round State Machine
//! Each match runs a fixed number of rounds. A round resolves as soon as all
//! participants have answered or its deadline fires, whichever comes first.
//! Leaving or disconnecting forfeits the match immediately.
//!
//! ### Progression
//! Finished matches are handed to the progression store, which updates
//! counters and ratings. The badge evaluator then checks the catalog against
//! the fresh counters and the match's round-by-round facts.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! Connection readers, per-match timers and challenge timers all feed one
//! channel. The loop hands each message to [`engine::GameEngine`], whose
//! handlers are synchronous, so every transition is atomic with respect to
//! every other event.
//!
//! ### Framed TCP Transport
//! Each message is a bincode payload prefixed with its big-endian `u32`
//! length. Frames above 64 KiB close the connection.
//!
//! ### Pure Match Logic
//! [`game::Match`] never touches sockets or spawns tasks. It returns a
//! [`game::MatchUpdate`] describing events to send and timers to arm or
//! cancel, and the engine applies it.
//!
//! ## Module Organization
//!
//! - `presence`: connection and session bindings
//! - `matchmaking`: queues and challenges
//! - `game`: the per-match round state machine
//! - `bot`: the solo opponent's answers
//! - `cities`: difficulty-tiered city pools
//! - `badges`: catalog loading, criteria decoding and evaluation
//! - `progression`: stats, ratings and awarded badges
//! - `engine`: glues the above together
//! - `network`: sockets, frame codec tasks and the main loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::engine::Collaborators;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         ServerConfig::default(),
//!         Collaborators::default(),
//!     )
//!     .await?;
//!
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod badges;
pub mod bot;
pub mod cities;
pub mod config;
pub mod engine;
pub mod error;
pub mod game;
pub mod matchmaking;
pub mod network;
pub mod presence;
pub mod progression;
pub mod projection;
pub mod sessions;
pub mod stats;
pub mod timers;
