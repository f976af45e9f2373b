mod host;
mod network;

use clap::Parser;
use host::HeadlessHost;
use log::info;
use shared::ProtocolMode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Protocol mode ("server-centric" or "distributed")
    #[arg(short = 'm', long, default_value = "server-centric")]
    mode: String,

    /// Host tick rate (frames per second)
    #[arg(short = 't', long, default_value = "30")]
    tick_rate: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let mode: ProtocolMode = args.mode.parse()?;

    info!("Connecting to: {}", args.server);
    let client = network::Client::connect(&args.server, mode).await?;

    tokio::select! {
        _ = client.run(Box::new(HeadlessHost::new()), args.tick_rate) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
