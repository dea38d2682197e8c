use clap::Parser;
use log::info;
use server::network::Server;
use shared::{IdPolicy, SessionConfig};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Full-state broadcast period in milliseconds
    #[arg(long, default_value = "33")]
    broadcast_ms: u64,

    /// Liveness probe period in milliseconds
    #[arg(long, default_value = "5000")]
    probe_ms: u64,

    /// Evict participants silent for longer than this many milliseconds
    #[arg(long, default_value = "10000")]
    eviction_threshold_ms: u64,

    /// How often to check for silent participants, in milliseconds
    #[arg(long, default_value = "10000")]
    eviction_ms: u64,

    /// Hand out ids of departed participants again
    #[arg(long)]
    reuse_ids: bool,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            broadcast_period: Duration::from_millis(self.broadcast_ms),
            probe_period: Duration::from_millis(self.probe_ms),
            eviction_threshold: Duration::from_millis(self.eviction_threshold_ms),
            eviction_period: Duration::from_millis(self.eviction_ms),
            id_policy: if self.reuse_ids {
                IdPolicy::Reuse
            } else {
                IdPolicy::Monotonic
            },
            ..SessionConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = args.session_config();
    info!(
        "Broadcasting every {:?}, probing every {:?}, evicting after {:?} ({:?})",
        config.broadcast_period, config.probe_period, config.eviction_threshold, config.id_policy
    );

    let address = format!("{}:{}", args.host, args.port);
    let server = Server::bind(&address, config).await?;

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
