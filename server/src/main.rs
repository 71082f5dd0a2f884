use clap::Parser;
use log::{error, info};
use server::network::{Server, ServerMessage};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Maximum number of connected clients
    #[arg(short, long, default_value = "64")]
    max_clients: usize,

    /// Seconds of silence before a client is dropped
    #[arg(long, default_value = "5")]
    client_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);

    let mut server = Server::new(
        &address,
        args.max_clients,
        Duration::from_secs(args.client_timeout),
    )
    .await?;
    let control = server.control();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            if control.send(ServerMessage::Shutdown).is_err() {
                error!("Relay already stopped");
            }
        }
    });

    server.run().await
}
