//! Server network layer: TCP connections, frame codec tasks and the event loop

use crate::config::ServerConfig;
use crate::engine::{Collaborators, GameEngine};
use crate::error::{AuthError, ServerError};
use crate::game::TimerKind;
use crate::presence::ConnectionId;
use log::{debug, error, info, warn};
use shared::{decode_payload, encode_frame, ClientEvent, MatchId, ServerEvent, MAX_FRAME_LEN};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Messages sent from connection and timer tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    EventReceived {
        connection_id: ConnectionId,
        event: ClientEvent,
    },
    MalformedFrame {
        connection_id: ConnectionId,
        reason: String,
    },
    ConnectionClosed {
        connection_id: ConnectionId,
    },
    TimerFired {
        match_id: MatchId,
        kind: TimerKind,
        round_index: usize,
    },
    ChallengeTimeout,
    Shutdown,
}

/// Messages sent from the server loop to a connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(ServerEvent),
    /// Flush what was queued so far, then close the socket.
    Close,
}

/// Main server accepting connections and driving the game engine
pub struct Server {
    listener: TcpListener,
    engine: GameEngine,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        config: ServerConfig,
        collaborators: Collaborators,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let engine = GameEngine::new(config, collaborators, server_tx.clone());

        Ok(Server {
            listener,
            engine,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Sender into the event loop, e.g. for requesting shutdown.
    pub fn handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Registers the socket with the engine and spawns its reader and writer
    fn accept_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let Some(connection_id) = self.engine.open_connection(addr, outbound_tx) else {
            warn!("Rejecting {}: server full", addr);
            tokio::spawn(reject_connection(stream));
            return;
        };

        let (read_half, write_half) = stream.into_split();
        let reader = tokio::spawn(read_frames(read_half, connection_id, self.server_tx.clone()));
        tokio::spawn(write_frames(write_half, connection_id, outbound_rx, reader));
    }

    /// Main server loop
    pub async fn run(&mut self) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept_connection(stream, addr),
                    Err(e) => error!("Failed to accept connection: {}", e),
                },

                message = self.server_rx.recv() => match message {
                    Some(ServerMessage::EventReceived { connection_id, event }) => {
                        self.engine.handle_event(connection_id, event);
                    }
                    Some(ServerMessage::MalformedFrame { connection_id, reason }) => {
                        self.engine.malformed_frame(connection_id, reason);
                    }
                    Some(ServerMessage::ConnectionClosed { connection_id }) => {
                        self.engine.connection_closed(connection_id);
                    }
                    Some(ServerMessage::TimerFired { match_id, kind, round_index }) => {
                        self.engine.timer_fired(match_id, kind, round_index);
                    }
                    Some(ServerMessage::ChallengeTimeout) => {
                        self.engine.expire_challenges();
                    }
                    Some(ServerMessage::Shutdown) | None => {
                        info!("Server shutting down");
                        break;
                    }
                },
            }
        }
    }
}

/// Reads length-prefixed frames until the peer goes away
///
/// A frame that fails to decode is reported and skipped; an oversized
/// length header ends the connection since the stream can't be resynced.
async fn read_frames(
    mut reader: OwnedReadHalf,
    connection_id: ConnectionId,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    loop {
        let len = match reader.read_u32().await {
            Ok(len) => len as usize,
            Err(e) => {
                debug!("Connection {} read ended: {}", connection_id, e);
                break;
            }
        };
        if len > MAX_FRAME_LEN {
            warn!(
                "Connection {} sent a {} byte frame, closing",
                connection_id, len
            );
            break;
        }

        let mut payload = vec![0u8; len];
        if let Err(e) = reader.read_exact(&mut payload).await {
            debug!("Connection {} truncated frame: {}", connection_id, e);
            break;
        }

        let message = match decode_payload::<ClientEvent>(&payload) {
            Ok(event) => ServerMessage::EventReceived {
                connection_id,
                event,
            },
            Err(e) => ServerMessage::MalformedFrame {
                connection_id,
                reason: e.to_string(),
            },
        };
        if server_tx.send(message).is_err() {
            return;
        }
    }

    let _ = server_tx.send(ServerMessage::ConnectionClosed { connection_id });
}

/// Drains the connection's outbound queue onto the socket
///
/// On [`Outbound::Close`] the engine has already forgotten the connection,
/// so the reader is aborted without reporting a close.
async fn write_frames(
    mut writer: OwnedWriteHalf,
    connection_id: ConnectionId,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    reader: JoinHandle<()>,
) {
    while let Some(message) = outbound_rx.recv().await {
        let event = match message {
            Outbound::Event(event) => event,
            Outbound::Close => {
                reader.abort();
                break;
            }
        };

        match encode_frame(&event) {
            Ok(frame) => {
                if let Err(e) = writer.write_all(&frame).await {
                    warn!("Failed to write to connection {}: {}", connection_id, e);
                    break;
                }
            }
            Err(e) => error!("Failed to encode {:?}: {}", event, e),
        }
    }

    let _ = writer.shutdown().await;
}

async fn reject_connection(mut stream: TcpStream) {
    let event = ServerEvent::AuthError {
        message: AuthError::ServerFull.to_string(),
    };
    if let Ok(frame) = encode_frame(&event) {
        let _ = stream.write_all(&frame).await;
    }
    let _ = stream.shutdown().await;
}
