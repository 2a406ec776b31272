use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,
    /// Port to listen on
    #[clap(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,
    /// Concurrent connections accepted before new ones are closed
    #[clap(long, default_value_t = shared::MAX_CONNECTIONS)]
    max_connections: usize,
    /// Session ticks per second
    #[clap(short, long, default_value_t = shared::TICK_RATE)]
    tick_rate: u32,
    /// Drop peers that send nothing for this many seconds
    #[clap(long)]
    idle_timeout_secs: Option<u64>,
    /// Persist profiles and score records as JSON under this directory
    #[clap(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        max_connections: args.max_connections,
        tick_rate: args.tick_rate,
        max_missed_sends: 2 * args.tick_rate.max(1),
        idle_timeout: args.idle_timeout_secs.map(Duration::from_secs),
        data_dir: args.data_dir,
        ..ServerConfig::default()
    };

    let server = Server::bind(config).await?;

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
