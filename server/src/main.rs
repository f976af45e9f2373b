mod orchestrator;
mod rules;
mod world;

use clap::Parser;
use log::{error, info};
use orchestrator::Orchestrator;
use rules::resolve_rules;
use shared::{ProtocolMode, SyncContext, AUTHORITY_PEER};
use tokio::net::TcpListener;
use world::{run_world_loop, World};

/// Parses command-line arguments, builds the authority-side synchronization
/// context and runs the accept loop and world simulation until shutdown.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Tick rate (updates per second)
        #[clap(short, long, default_value = "30")]
        tick_rate: u32,
        /// Protocol mode ("server-centric" or "distributed")
        #[clap(short, long, default_value = "server-centric")]
        mode: String,
        /// Game variant ("deathmatch" or "sandbox")
        #[clap(short, long, default_value = "deathmatch")]
        variant: String,
    }

    env_logger::init();
    let args = Args::parse();

    let mode: ProtocolMode = args.mode.parse()?;
    let rules = resolve_rules(&args.variant)?;

    let ctx = SyncContext::new(mode, AUTHORITY_PEER);
    let dispatch_handle = ctx.events.spawn_dispatch();

    let world = World::new(ctx.clone(), rules.clone());
    let pause = world.pause_state();
    let (orchestrator, notices) = Orchestrator::new(ctx.clone(), rules, pause);

    let address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&address).await?;
    info!("Authority listening on {} in {:?} mode", address, mode);

    let accept_handle = tokio::spawn(orchestrator.run(listener, notices));
    let world_handle = tokio::spawn(run_world_loop(world, args.tick_rate));

    tokio::select! {
        result = accept_handle => {
            match result {
                Ok(Err(e)) => error!("Server stopped: {}", e),
                Err(e) => error!("Accept task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        result = world_handle => {
            if let Err(e) = result {
                error!("World loop panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    ctx.events.shutdown();
    let _ = dispatch_handle.await;
    Ok(())
}
