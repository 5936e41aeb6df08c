//! simgame - a stand-in game server embedding the hosting SDK
//!
//! Starts the SDK, logs every lifecycle event it surfaces, and runs until
//! the platform (or the operator) terminates it. Useful for smoke testing a
//! fleet configuration against a local proxy without a real game build.
//!
//! Usage:
//!   simgame --config /path/to/server.json --max-players 16

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use hosting_sdk::{Server, ServerOptions, ServerType};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "simgame")]
#[command(about = "Minimal game server for exercising the hosting SDK")]
struct Args {
    /// Path to the platform-maintained configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run as a reservation-based server instead of an allocation-based one
    #[arg(long)]
    reservation: bool,

    /// Maximum player count to report in queries
    #[arg(long, default_value = "16")]
    max_players: i32,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("simgame=debug".parse().expect("valid directive"))
                .add_directive("hosting_sdk=debug".parse().expect("valid directive"))
                .add_directive("info".parse().expect("valid directive")),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let args = Args::parse();

    let mut options = ServerOptions::default();
    if let Some(config) = args.config {
        options.config_path = config;
    }

    let server_type = if args.reservation {
        ServerType::Reservation
    } else {
        ServerType::Allocation
    };

    let server = Server::with_options(server_type, options);

    // Consume lifecycle events before start: the server may already be
    // allocated when it comes up.
    let mut allocated = server
        .take_allocate_receiver()
        .context("allocate receiver already taken")?;
    let mut deallocated = server
        .take_deallocate_receiver()
        .context("deallocate receiver already taken")?;
    let mut config_changes = server
        .take_configuration_receiver()
        .context("configuration receiver already taken")?;
    let mut errors = server
        .take_error_receiver()
        .context("error receiver already taken")?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(allocation_id) = allocated.recv() => {
                    info!(%allocation_id, "allocated");
                }
                Some(allocation_id) = deallocated.recv() => {
                    info!(%allocation_id, "deallocated");
                }
                Some(config) = config_changes.recv() => {
                    info!(query_type = %config.query_type, "configuration changed");
                }
                Some(e) = errors.recv() => {
                    error!(error = %e, "sdk error");
                }
                else => break,
            }
        }
    });

    server.start().await.context("starting the hosting SDK")?;
    server.set_server_name("simgame");
    server.set_game_map("lobby");
    server.set_game_type("deathmatch");
    server.set_max_players(args.max_players);

    info!("simgame running, waiting for termination");
    server
        .wait_until_terminated()
        .await
        .context("waiting for termination")?;

    Ok(())
}
