//! TCP game server: the accept loop plus the tick-loop task.

use std::sync::Arc;

use quarry_config::Config;
use quarry_world::{WorldBounds, WorldGenerator, WorldStore};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::connection::{ConnectionContext, handle_connection};
use crate::error::ServerError;
use crate::platform::{SocketConfig, create_listener};
use crate::session::IdGenerator;
use crate::tick::{TickBroadcaster, TickSettings};

/// Handshaken connections waiting for the next tick.
const JOIN_QUEUE_CAPACITY: usize = 64;

/// Accepts connections and runs the simulation until [`GameServer::shutdown`].
pub struct GameServer {
    config: Config,
    id_gen: Arc<IdGenerator>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GameServer {
    pub fn new(config: Config) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            id_gen: Arc::new(IdGenerator::new()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let bind = self.config.network.bind_address();
        let addr = tokio::net::lookup_host(&bind)
            .await?
            .next()
            .ok_or_else(|| ServerError::Fatal(format!("{bind} resolved to no address")))?;

        let socket = SocketConfig::from_network(&self.config.network);
        let listener = create_listener(addr, &socket)
            .map_err(|e| ServerError::Fatal(format!("failed to bind {addr}: {e}")))?;
        info!("Server listening on {addr}");
        self.run_with_listener(listener).await
    }

    /// Serve on a pre-bound listener (useful for tests).
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), ServerError> {
        let world = WorldStore::new(
            WorldGenerator::new(self.config.world.seed),
            WorldBounds {
                min_y: self.config.world.min_y,
                max_y: self.config.world.max_y,
                horizontal_limit: self.config.world.horizontal_limit,
            },
        );
        let (join_tx, join_rx) = mpsc::channel(JOIN_QUEUE_CAPACITY);
        let broadcaster = TickBroadcaster::new(TickSettings::from_config(&self.config), world, join_rx);
        let tick_task = tokio::spawn(broadcaster.run(self.shutdown_rx.clone()));

        let ctx = Arc::new(ConnectionContext::new(&self.config.network, join_tx));
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let id = self.id_gen.next_id();
                            info!("Accepted connection {id:?} from {peer_addr}");
                            tokio::spawn(handle_connection(
                                id,
                                stream,
                                peer_addr,
                                Arc::clone(&ctx),
                                self.shutdown_rx.clone(),
                            ));
                        }
                        Err(e) => warn!("Accept failed: {e}"),
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Server shutting down");
                        break;
                    }
                }
            }
        }

        tick_task
            .await
            .map_err(|e| ServerError::Fatal(format!("tick loop failed: {e}")))
    }

    /// Signal the server to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
