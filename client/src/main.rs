use clap::Parser;
use client::config::RaceConfig;
use client::driver::{RaceDriver, RaceServices};
use client::input::{Gesture, SteeringMode};
use client::network::RemoteStore;
use client::services::{ChallengeRecord, ConnectivitySignal, Garage, DEFAULT_CAR};
use client::store::{MemoryStore, SessionStore};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Session to join; a fresh one is generated when omitted
    #[arg(short = 'u', long)]
    uuid: Option<Uuid>,

    /// Create the session and drive the countdown
    #[arg(short = 'c', long)]
    challenger: bool,

    /// Car skin shown to the opponent
    #[arg(long, default_value = DEFAULT_CAR)]
    car: String,

    /// Steering scheme used by the autopilot
    #[arg(long, value_enum, default_value_t = SteeringMode::Tilt)]
    steering: SteeringMode,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Simulation ticks per second
    #[arg(short = 't', long, default_value = "60")]
    tick_rate: u32,

    /// Race alone without a relay
    #[arg(long)]
    offline: bool,
}

/// Feeds a wandering driver into the race: speeds up to the middle tier and
/// nudges the steering back and forth.
fn spawn_autopilot(controls: mpsc::UnboundedSender<Gesture>, steering: SteeringMode) {
    tokio::spawn(async move {
        let mut rng = StdRng::from_entropy();
        let mut nudge = tokio::time::interval(Duration::from_millis(250));

        for _ in 0..2 {
            if controls.send(Gesture::Accelerate).is_err() {
                return;
            }
        }
        loop {
            nudge.tick().await;
            let amount: f32 = rng.gen_range(-4.0..=4.0);
            let gesture = match steering {
                SteeringMode::Tilt => Gesture::GyroRate { rate: amount },
                SteeringMode::Drag => Gesture::Drag { dx: amount * 2.0 },
            };
            if controls.send(gesture).is_err() {
                return;
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let uuid = args.uuid.unwrap_or_else(Uuid::new_v4);
    let seed = ChallengeRecord {
        uuid,
        challenger_tag: "challenger".to_string(),
        challenged_tag: "challenged".to_string(),
        is_challenger: args.challenger || args.offline,
    };
    let mut config = RaceConfig::default().with_tick_rate(args.tick_rate);
    if args.offline {
        config = config.offline();
    }

    let connectivity = ConnectivitySignal::new(true);
    let store: Arc<dyn SessionStore> = if args.offline {
        info!("Starting offline race");
        Arc::new(MemoryStore::new())
    } else {
        info!("Connecting to: {}", args.server);
        if args.fake_ping > 0 {
            info!("Simulating {}ms latency", args.fake_ping);
        }
        Arc::new(RemoteStore::connect(&args.server, args.fake_ping, connectivity.clone()).await?)
    };

    if !args.offline {
        println!("Session: {}", uuid);
        if args.challenger {
            println!("Opponent joins with: client --uuid {}", uuid);
        }
    }

    let services = RaceServices {
        store,
        connectivity,
        catalog: Arc::new(Garage::new()),
    };
    let mut driver = RaceDriver::new(&seed, args.car, args.steering, config, services);
    spawn_autopilot(driver.controller(), args.steering);

    let result = tokio::select! {
        result = driver.run() => result,
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl+C, leaving race");
            return Ok(());
        }
    };

    println!("{}", result.headline());
    info!("{}", result);
    Ok(())
}
