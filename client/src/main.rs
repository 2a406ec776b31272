use clap::{Parser, Subcommand};
use client::network::GameClient;
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8081")]
    server: String,

    /// Player id to bind this connection to (server-assigned if omitted)
    #[arg(short = 'p', long)]
    player: Option<String>,

    /// Display name shown to the opponent
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Signal ready this many seconds after entering the session
    #[arg(short = 'r', long)]
    ready_after: Option<u64>,

    /// Seconds between heartbeats
    #[arg(long, default_value = "5")]
    heartbeat: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a session, optionally under a chosen code
    Create { session: Option<String> },
    /// Join an existing session
    Join { session: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut client =
        GameClient::connect(&args.server, args.player.as_deref(), args.name.as_deref()).await?;

    let session = match &args.command {
        Command::Create { session } => client.create(session.as_deref()).await?,
        Command::Join { session } => client.join(session).await?,
    };
    info!("In session {}", session);

    let ready_after = args.ready_after.map(Duration::from_secs);
    let heartbeat = Duration::from_secs(args.heartbeat.max(1));

    tokio::select! {
        outcome = client.run(ready_after, heartbeat) => {
            let outcome = outcome?;
            info!(
                "Finished: winner {:?} ({}) after {:.1}s",
                outcome.winner, outcome.reason, outcome.duration_secs
            );
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, leaving session");
        }
    }

    client.disconnect().await;
    Ok(())
}
