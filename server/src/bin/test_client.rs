//! Scripted client for poking a running server by hand.
//!
//! Authenticates, starts a match and answers every round with a random
//! click after a short pause. Start the server with `--demo-users alice` and
//! pass the logged session id here.

use clap::Parser;
use rand::Rng;
use shared::{decode_payload, encode_frame, ClientEvent, Difficulty, ServerEvent, MAX_FRAME_LEN};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:8080")]
    server: String,
    /// Session id to authenticate with
    #[clap(long)]
    session: String,
    /// easy, medium or hard
    #[clap(short, long, default_value = "easy")]
    difficulty: Difficulty,
    /// Queue for a human opponent instead of playing the bot
    #[clap(long)]
    queue: bool,
}

async fn send(stream: &mut TcpStream, event: &ClientEvent) -> Result<(), Box<dyn std::error::Error>> {
    let frame = encode_frame(event)?;
    stream.write_all(&frame).await?;
    Ok(())
}

async fn receive(stream: &mut TcpStream) -> Result<ServerEvent, Box<dyn std::error::Error>> {
    let len = stream.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(format!("server sent a {} byte frame", len).into());
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(decode_payload(&payload)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut stream = TcpStream::connect(&args.server).await?;
    println!("Connected to {}", args.server);

    send(
        &mut stream,
        &ClientEvent::Auth {
            session_id: args.session.clone(),
        },
    )
    .await?;

    let mut current_match = None;
    loop {
        let event = receive(&mut stream).await?;
        println!("<- {:?}", event);

        match event {
            ServerEvent::Authenticated { username } => {
                println!("Logged in as {}", username);
                let request = if args.queue {
                    ClientEvent::StartRandomMatch {
                        difficulty: Some(args.difficulty),
                    }
                } else {
                    ClientEvent::StartSoloMatch {
                        difficulty: Some(args.difficulty),
                    }
                };
                send(&mut stream, &request).await?;
            }
            ServerEvent::AuthError { message } => {
                return Err(format!("authentication failed: {}", message).into());
            }
            ServerEvent::MatchStarted { match_id, .. } => current_match = Some(match_id),
            ServerEvent::RoundStarting { city_name, .. } => {
                let Some(match_id) = current_match else {
                    continue;
                };
                println!("Where is {}?", city_name);

                let started = Instant::now();
                let (x, y, pause) = {
                    let mut rng = rand::thread_rng();
                    (rng.gen::<f64>(), rng.gen::<f64>(), rng.gen_range(300..2_000))
                };
                sleep(Duration::from_millis(pause)).await;
                send(
                    &mut stream,
                    &ClientEvent::PlayerClick {
                        match_id,
                        x,
                        y,
                        time_ms: started.elapsed().as_secs_f64() * 1000.0,
                    },
                )
                .await?;
            }
            ServerEvent::MatchFinished {
                winner,
                total_scores,
                ..
            } => {
                println!("Winner: {:?}, scores: {:?}", winner, total_scores);
                break;
            }
            _ => {}
        }
    }

    send(&mut stream, &ClientEvent::Logout).await?;
    Ok(())
}
