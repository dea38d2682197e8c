use clap::Parser;
use client::network::{ClientState, SessionClient};
use log::{info, warn};
use rand::Rng;
use shared::{AnimationState, Orientation, Position, StateRecord};
use std::f32::consts::TAU;
use std::time::Duration;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};

/// Headless participant that walks in a circle, for exercising a server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Session server URL
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:8080/network")]
    server: String,

    /// Give up joining after this many milliseconds
    #[arg(short = 't', long, default_value = "5000")]
    timeout_ms: u64,

    /// State updates sent per second
    #[arg(short = 'r', long, default_value = "30")]
    rate: u32,

    /// Radius of the walked circle
    #[arg(long, default_value = "5.0")]
    radius: f32,

    /// Walking speed in units per second
    #[arg(long, default_value = "2.0")]
    speed: f32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    tokio::select! {
        _ = run(&args) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    Ok(())
}

async fn run(args: &Args) {
    let timeout = Duration::from_millis(args.timeout_ms);
    let mut client = SessionClient::new();
    let start_angle = rand::thread_rng().gen_range(0.0..TAU);

    loop {
        match client.connect(&args.server, timeout).await {
            Ok(id) => {
                walk(&client, id, start_angle, args).await;
                warn!("Lost connection, reconnecting...");
            }
            Err(e) => warn!("Could not join: {}", e),
        }
        sleep(Duration::from_secs(1)).await;
    }
}

/// Sends circle-walk updates until the connection drops.
async fn walk(client: &SessionClient, id: u16, start_angle: f32, args: &Args) {
    let period = Duration::from_secs_f32(1.0 / args.rate.max(1) as f32);
    let angular_speed = args.speed / args.radius.max(0.1);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let started = Instant::now();
    let mut last_report = started;

    while client.state() == ClientState::Joined {
        ticker.tick().await;

        let angle = start_angle + started.elapsed().as_secs_f32() * angular_speed;
        let record = StateRecord {
            id,
            position: Position::new(args.radius * angle.cos(), 0.0, args.radius * angle.sin()),
            // facing along the tangent
            orientation: Orientation::from_yaw(-angle),
            state: AnimationState::Walking,
        };
        client.send_update(&record);

        if last_report.elapsed() >= Duration::from_secs(2) {
            last_report = Instant::now();
            info!(
                "Participant {}: {} others, receiving {:.0} B/s",
                id,
                client.roster().len().await,
                client.received_bytes_per_second().await
            );
        }
    }
}
