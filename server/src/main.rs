use clap::Parser;
use log::info;
use server::badges::{BadgeCatalogStore, JsonFileCatalogStore, StaticCatalogStore};
use server::cities::CityPools;
use server::config::{parse_total_rounds, ServerConfig};
use server::engine::Collaborators;
use server::network::{Server, ServerMessage};
use server::progression::InMemoryProgressionStore;
use server::sessions::InMemorySessionStore;
use std::path::PathBuf;
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Rounds per match
    #[clap(short, long, default_value = "10", value_parser = parse_total_rounds)]
    rounds: usize,
    /// Time allowed to answer one round
    #[clap(long, default_value = "20000")]
    round_timeout_ms: u64,
    /// Pause between a round result and the next round
    #[clap(long, default_value = "3000")]
    inter_round_delay_ms: u64,
    /// Seconds before an unanswered challenge expires
    #[clap(long, default_value = "30")]
    challenge_ttl_secs: u64,
    /// JSON array of cities; the built-in list is used when omitted
    #[clap(long)]
    cities: Option<PathBuf>,
    /// JSON badge catalog, re-read once a minute
    #[clap(long)]
    badges: Option<PathBuf>,
    /// JSON object mapping session ids to usernames
    #[clap(long)]
    sessions: Option<PathBuf>,
    /// JSON object mapping usernames to previously earned stats
    #[clap(long)]
    stats: Option<PathBuf>,
    /// Issue sessions for these users at startup and log them
    #[clap(long, value_delimiter = ',')]
    demo_users: Vec<String>,
    /// Fixed RNG seed for reproducible matches
    #[clap(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ServerConfig {
        total_rounds: args.rounds,
        round_timeout: Duration::from_millis(args.round_timeout_ms),
        inter_round_delay: Duration::from_millis(args.inter_round_delay_ms),
        challenge_ttl: Duration::from_secs(args.challenge_ttl_secs),
        rng_seed: args.seed,
        ..ServerConfig::default()
    };

    let mut sessions = match &args.sessions {
        Some(path) => InMemorySessionStore::from_json_file(path)?,
        None => InMemorySessionStore::new(),
    };
    for username in &args.demo_users {
        let session_id = sessions.issue(username, None);
        info!("Session for {}: {}", username, session_id);
    }

    let cities = match &args.cities {
        Some(path) => CityPools::from_json_file(path)?,
        None => CityPools::builtin(),
    };

    let catalog: Box<dyn BadgeCatalogStore> = match args.badges {
        Some(path) => Box::new(JsonFileCatalogStore::new(path)),
        None => Box::new(StaticCatalogStore::default()),
    };

    let progression = match &args.stats {
        Some(path) => InMemoryProgressionStore::from_json_file(path)?,
        None => InMemoryProgressionStore::new(),
    };

    let collaborators = Collaborators {
        sessions: Box::new(sessions),
        progression: Box::new(progression),
        catalog,
        cities,
        ..Collaborators::default()
    };

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, config, collaborators).await?;
    let shutdown = server.handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            let _ = shutdown.send(ServerMessage::Shutdown);
        }
    });

    server.run().await;
    Ok(())
}
