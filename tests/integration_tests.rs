//! Integration tests for the duel server
//!
//! These tests run a real server on a loopback port and talk to it over TCP
//! with the same frame codec the clients use.

use server::badges::StaticCatalogStore;
use server::config::ServerConfig;
use server::engine::Collaborators;
use server::network::Server;
use server::sessions::InMemorySessionStore;
use shared::{
    decode_payload, encode_frame, ClientEvent, Difficulty, ErrorKind, FinishReason, MatchId,
    MatchMode, ServerEvent,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const CATALOG: &str = r#"[
    {"code": "first_win", "groupKey": "wins", "name": "First win",
     "criteria": {"type": "wins_total", "min": 1}}
]"#;

fn fast_config(total_rounds: usize) -> ServerConfig {
    ServerConfig {
        total_rounds,
        round_timeout: Duration::from_secs(2),
        inter_round_delay: Duration::from_millis(50),
        rng_seed: Some(11),
        ..ServerConfig::default()
    }
}

async fn spawn_server(config: ServerConfig) -> SocketAddr {
    let mut sessions = InMemorySessionStore::new();
    for name in ["alice", "bob", "carol"] {
        sessions.insert(format!("sess-{}", name), name, None);
    }
    let collaborators = Collaborators {
        sessions: Box::new(sessions),
        catalog: Box::new(StaticCatalogStore::from_json(CATALOG).unwrap()),
        ..Collaborators::default()
    };

    let mut server = Server::new("127.0.0.1:0", config, collaborators)
        .await
        .expect("Failed to start server");
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move { server.run().await });
    addr
}

struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("Failed to connect");
        Self { stream }
    }

    async fn login(addr: SocketAddr, name: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client
            .send(&ClientEvent::Auth {
                session_id: format!("sess-{}", name),
            })
            .await;
        client
            .recv_until(|e| matches!(e, ServerEvent::Authenticated { .. }))
            .await;
        client
    }

    async fn send(&mut self, event: &ClientEvent) {
        let frame = encode_frame(event).unwrap();
        self.stream.write_all(&frame).await.unwrap();
    }

    async fn try_recv(&mut self, wait: Duration) -> Option<ServerEvent> {
        let read = async {
            let len = self.stream.read_u32().await.ok()? as usize;
            let mut payload = vec![0u8; len];
            self.stream.read_exact(&mut payload).await.ok()?;
            decode_payload::<ServerEvent>(&payload).ok()
        };
        timeout(wait, read).await.ok().flatten()
    }

    /// Reads events until one satisfies `predicate`. Returns the events
    /// skipped on the way and the match.
    async fn recv_until<F: Fn(&ServerEvent) -> bool>(
        &mut self,
        predicate: F,
    ) -> (Vec<ServerEvent>, ServerEvent) {
        let mut skipped = Vec::new();
        loop {
            let event = self
                .try_recv(Duration::from_secs(5))
                .await
                .expect("Timed out waiting for event");
            if predicate(&event) {
                return (skipped, event);
            }
            skipped.push(event);
        }
    }

    async fn click(&mut self, match_id: MatchId, time_ms: f64) {
        self.send(&ClientEvent::PlayerClick {
            match_id,
            x: 0.5,
            y: 0.5,
            time_ms,
        })
        .await;
    }
}

fn match_id_of(event: &ServerEvent) -> MatchId {
    match event {
        ServerEvent::MatchStarted { match_id, .. } => *match_id,
        other => panic!("Expected MatchStarted, got {:?}", other),
    }
}

async fn queue_duel(alice: &mut TestClient, bob: &mut TestClient) -> MatchId {
    let queue = ClientEvent::StartRandomMatch {
        difficulty: Some(Difficulty::Easy),
    };
    alice.send(&queue).await;
    bob.send(&queue).await;

    let (_, started) = alice
        .recv_until(|e| matches!(e, ServerEvent::MatchStarted { .. }))
        .await;
    bob.recv_until(|e| matches!(e, ServerEvent::MatchStarted { .. }))
        .await;
    match_id_of(&started)
}

fn is_round_starting(index: usize) -> impl Fn(&ServerEvent) -> bool {
    move |e| matches!(e, ServerEvent::RoundStarting { round_index, .. } if *round_index == index)
}

/// SESSION AND LOBBY TESTS
mod lobby_tests {
    use super::*;

    /// Tests that a bad session is refused and a good one is accepted
    #[tokio::test]
    async fn authentication_over_tcp() {
        let addr = spawn_server(fast_config(3)).await;
        let mut client = TestClient::connect(addr).await;

        client
            .send(&ClientEvent::Auth {
                session_id: "bogus".to_string(),
            })
            .await;
        let event = client.try_recv(Duration::from_secs(5)).await.unwrap();
        assert!(matches!(event, ServerEvent::AuthError { .. }));

        client
            .send(&ClientEvent::Auth {
                session_id: "sess-carol".to_string(),
            })
            .await;
        let (_, event) = client
            .recv_until(|e| matches!(e, ServerEvent::Authenticated { .. }))
            .await;
        assert_eq!(
            event,
            ServerEvent::Authenticated {
                username: "carol".to_string()
            }
        );

        let (_, lobby) = client
            .recv_until(|e| matches!(e, ServerEvent::LobbyState { .. }))
            .await;
        match lobby {
            ServerEvent::LobbyState {
                online_count,
                online_users,
                ..
            } => {
                assert_eq!(online_count, 1);
                assert_eq!(online_users, vec!["carol".to_string()]);
            }
            _ => unreachable!(),
        }
    }

    /// Tests that a second login kicks the first connection
    #[tokio::test]
    async fn login_elsewhere_closes_old_connection() {
        let addr = spawn_server(fast_config(3)).await;
        let mut first = TestClient::login(addr, "alice").await;
        let _second = TestClient::login(addr, "alice").await;

        first
            .recv_until(|e| matches!(e, ServerEvent::LoggedInElsewhere { .. }))
            .await;
        assert!(first.try_recv(Duration::from_secs(2)).await.is_none());
    }

    /// Tests the connection cap
    #[tokio::test]
    async fn full_server_rejects_connection() {
        let config = ServerConfig {
            max_connections: 1,
            ..fast_config(3)
        };
        let addr = spawn_server(config).await;
        let _alice = TestClient::login(addr, "alice").await;

        let mut extra = TestClient::connect(addr).await;
        let event = extra.try_recv(Duration::from_secs(5)).await.unwrap();
        assert!(matches!(event, ServerEvent::AuthError { .. }));
        assert!(extra.try_recv(Duration::from_secs(2)).await.is_none());
    }

    /// Tests that garbage frames are answered with a validation error
    #[tokio::test]
    async fn malformed_frame_is_reported() {
        let addr = spawn_server(fast_config(3)).await;
        let mut client = TestClient::login(addr, "alice").await;

        client
            .stream
            .write_all(&[0, 0, 0, 3, 0xde, 0xad, 0xbe])
            .await
            .unwrap();
        let (_, event) = client
            .recv_until(|e| matches!(e, ServerEvent::Error { .. }))
            .await;
        assert!(matches!(
            event,
            ServerEvent::Error {
                kind: ErrorKind::Validation,
                ..
            }
        ));
    }
}

/// MATCH FLOW TESTS
mod match_flow_tests {
    use super::*;

    /// Tests a complete two-round duel through to badge awards
    #[tokio::test]
    async fn queued_duel_runs_to_completion() {
        let addr = spawn_server(fast_config(2)).await;
        let mut alice = TestClient::login(addr, "alice").await;
        let mut bob = TestClient::login(addr, "bob").await;
        let match_id = queue_duel(&mut alice, &mut bob).await;

        for round in 0..2 {
            alice.recv_until(is_round_starting(round)).await;
            bob.recv_until(is_round_starting(round)).await;

            // Same spot, but alice answers faster.
            alice.click(match_id, 300.0).await;
            bob.click(match_id, 1_500.0).await;

            let (_, result) = alice
                .recv_until(|e| matches!(e, ServerEvent::RoundResult { .. }))
                .await;
            match result {
                ServerEvent::RoundResult {
                    round_index,
                    results,
                    ..
                } => {
                    assert_eq!(round_index, round);
                    assert!(results["alice"].score < results["bob"].score);
                    assert!(!results["bob"].timed_out);
                }
                _ => unreachable!(),
            }
        }

        let (_, finished) = alice
            .recv_until(|e| matches!(e, ServerEvent::MatchFinished { .. }))
            .await;
        assert!(matches!(
            finished,
            ServerEvent::MatchFinished {
                winner: Some(ref w),
                reason: FinishReason::Completed,
                ..
            } if w == "alice"
        ));

        let (_, badges) = alice
            .recv_until(|e| matches!(e, ServerEvent::BadgesAwarded { .. }))
            .await;
        assert_eq!(
            badges,
            ServerEvent::BadgesAwarded {
                codes: vec!["first_win".to_string()]
            }
        );
    }

    /// Tests that disconnecting in round 2 of 5 forfeits immediately
    #[tokio::test]
    async fn disconnect_mid_match_forfeits() {
        let addr = spawn_server(fast_config(5)).await;
        let mut alice = TestClient::login(addr, "alice").await;
        let mut bob = TestClient::login(addr, "bob").await;
        let match_id = queue_duel(&mut alice, &mut bob).await;

        alice.click(match_id, 400.0).await;
        bob.click(match_id, 400.0).await;
        alice.recv_until(is_round_starting(1)).await;
        bob.recv_until(is_round_starting(1)).await;

        drop(alice);

        let (skipped, finished) = bob
            .recv_until(|e| matches!(e, ServerEvent::MatchFinished { .. }))
            .await;
        assert!(!skipped
            .iter()
            .any(|e| matches!(e, ServerEvent::RoundStarting { .. })));
        assert!(matches!(
            finished,
            ServerEvent::MatchFinished {
                winner: Some(ref w),
                reason: FinishReason::Forfeit,
                ..
            } if w == "bob"
        ));

        // Nothing from the dead match may follow, even after the deadline.
        while let Some(event) = bob.try_recv(Duration::from_millis(2_500)).await {
            assert!(
                !matches!(
                    event,
                    ServerEvent::RoundStarting { .. } | ServerEvent::RoundResult { .. }
                ),
                "Unexpected {:?} after forfeit",
                event
            );
        }
    }

    /// Tests that an unanswered round resolves on its deadline
    #[tokio::test]
    async fn silent_round_times_out() {
        let config = ServerConfig {
            round_timeout: Duration::from_millis(300),
            ..fast_config(1)
        };
        let addr = spawn_server(config).await;
        let mut alice = TestClient::login(addr, "alice").await;
        let mut bob = TestClient::login(addr, "bob").await;
        let match_id = queue_duel(&mut alice, &mut bob).await;

        alice.click(match_id, 100.0).await;

        let (_, result) = bob
            .recv_until(|e| matches!(e, ServerEvent::RoundResult { .. }))
            .await;
        match result {
            ServerEvent::RoundResult { results, .. } => {
                assert!(results["bob"].timed_out);
                assert!(results["bob"].distance_km.is_none());
                assert!(!results["alice"].timed_out);
            }
            _ => unreachable!(),
        }
        bob.recv_until(|e| matches!(e, ServerEvent::MatchFinished { .. }))
            .await;
    }

    /// Tests a solo match against the bot
    #[tokio::test]
    async fn solo_match_against_bot() {
        let addr = spawn_server(fast_config(2)).await;
        let mut alice = TestClient::login(addr, "alice").await;

        alice
            .send(&ClientEvent::StartSoloMatch {
                difficulty: Some(Difficulty::Medium),
            })
            .await;
        let (_, started) = alice
            .recv_until(|e| matches!(e, ServerEvent::MatchStarted { .. }))
            .await;
        let match_id = match_id_of(&started);
        match &started {
            ServerEvent::MatchStarted { mode, players, .. } => {
                assert_eq!(*mode, MatchMode::Solo);
                assert_eq!(players[1], shared::BOT_NAME);
            }
            _ => unreachable!(),
        }

        for round in 0..2 {
            alice.recv_until(is_round_starting(round)).await;
            alice.click(match_id, 800.0).await;
            let (_, result) = alice
                .recv_until(|e| matches!(e, ServerEvent::RoundResult { .. }))
                .await;
            match result {
                ServerEvent::RoundResult { results, .. } => {
                    assert!(results.contains_key(shared::BOT_NAME));
                }
                _ => unreachable!(),
            }
        }
        alice
            .recv_until(|e| matches!(e, ServerEvent::MatchFinished { .. }))
            .await;
    }

    /// Tests challenging a player directly
    #[tokio::test]
    async fn challenge_and_accept() {
        let addr = spawn_server(fast_config(1)).await;
        let mut alice = TestClient::login(addr, "alice").await;
        let mut bob = TestClient::login(addr, "bob").await;

        alice
            .send(&ClientEvent::ChallengePlayer {
                username: "bob".to_string(),
                difficulty: Some(Difficulty::Hard),
            })
            .await;
        bob.recv_until(|e| matches!(e, ServerEvent::ChallengeReceived { .. }))
            .await;
        bob.send(&ClientEvent::AcceptChallenge {
            username: "alice".to_string(),
        })
        .await;

        let (_, started) = alice
            .recv_until(|e| matches!(e, ServerEvent::MatchStarted { .. }))
            .await;
        assert!(matches!(
            started,
            ServerEvent::MatchStarted {
                difficulty: Difficulty::Hard,
                mode: MatchMode::Duel,
                ..
            }
        ));
    }
}
