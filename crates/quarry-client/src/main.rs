//! Quarry headless client.
//!
//! Run with: `cargo run -p quarry-client -- alice localhost`

use std::process::ExitCode;

use clap::Parser;
use quarry_client::{ClientError, GameClient, LocalWorld, WorldEvent};
use quarry_config::{ClientArgs, Config};
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = ClientArgs::parse();
    let mut config = Config::default();
    config.apply_client_args(&args);
    quarry_log::init_logging(None, cfg!(debug_assertions), Some(&config));

    match play(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn play(args: &ClientArgs) -> Result<(), ClientError> {
    let address = args.server_address();
    info!("Connecting to {address} as {}", args.name);
    let mut client = GameClient::connect(address.as_str(), &args.name, None).await?;
    let session = client.session().clone();
    let mut world = LocalWorld::new(session.seed, session.player_id);
    info!("Mirroring the world as player {}", world.local_player());

    loop {
        tokio::select! {
            packet = client.next_packet() => {
                let Some(packet) = packet else {
                    info!("Connection closed");
                    return Ok(());
                };
                match world.apply(&packet) {
                    Some(WorldEvent::ChunkLoaded { coord, stock }) => {
                        debug!("Chunk {coord:?} loaded (stock: {stock})");
                    }
                    Some(WorldEvent::BlockChanged { pos, block, tick }) => {
                        info!("Tick {tick}: {pos:?} is now {block:?}");
                    }
                    Some(WorldEvent::PlayerJoined { player_id, name }) => {
                        info!("{name} joined as player {player_id}");
                    }
                    Some(WorldEvent::PlayerMoved { player_id, position }) => {
                        debug!("Player {player_id} at {position:?}");
                    }
                    Some(WorldEvent::PlayerLeft { player_id }) => {
                        info!("Player {player_id} left");
                    }
                    Some(WorldEvent::Rejected { seq, reason }) => {
                        info!("Intent {seq} rejected: {reason}");
                    }
                    None => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, {} chunks mirrored", world.chunk_count());
                client.disconnect("goodbye").await;
                return Ok(());
            }
        }
    }
}
