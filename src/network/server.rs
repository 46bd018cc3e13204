//! WebSocket Hub Server
//!
//! Async WebSocket server tying the pieces together: the admission gate
//! runs in the upgrade callback, every admitted socket gets its own task,
//! and inbound text frames are handed to the broadcast relay.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, instrument, warn};

use crate::network::auth::{AuthError, Identity, TokenVerifier};
use crate::network::connection::{Connection, ConnectionId};
use crate::network::gate::AdmissionGate;
use crate::network::lifecycle::{CloseReason, LifecycleManager};
use crate::network::player::{PlayerDirectory, SpawnPlayers};
use crate::network::protocol::{BroadcastMessage, DEFAULT_BROADCAST_PREFIX};
use crate::network::registry::ConnectionRegistry;
use crate::network::relay::{BroadcastRelay, RelayPolicy};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-connection outbound frame buffer.
    pub outbound_buffer: usize,
    /// Broadcast behavior.
    pub relay: RelayPolicy,
    /// Attach spawned player metadata to admitted connections.
    pub attach_players: bool,
    /// Server version string.
    pub version: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            outbound_buffer: 64,
            relay: RelayPolicy::default(),
            attach_players: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl HubConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, HubError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, HubError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let flag = |key: &str| parse_flag(key, lookup(key));

        Ok(Self {
            bind_addr: parse_value("HUB_BIND_ADDR", lookup("HUB_BIND_ADDR"))?
                .unwrap_or(defaults.bind_addr),
            max_connections: match parse_value::<usize>("HUB_MAX_CONNECTIONS", lookup("HUB_MAX_CONNECTIONS"))? {
                Some(0) => {
                    return Err(HubError::InvalidConfig(
                        "HUB_MAX_CONNECTIONS must be greater than zero".into(),
                    ))
                }
                Some(n) => n,
                None => defaults.max_connections,
            },
            outbound_buffer: match parse_value::<usize>("HUB_OUTBOUND_BUFFER", lookup("HUB_OUTBOUND_BUFFER"))? {
                Some(0) => {
                    return Err(HubError::InvalidConfig(
                        "HUB_OUTBOUND_BUFFER must be greater than zero".into(),
                    ))
                }
                Some(n) => n,
                None => defaults.outbound_buffer,
            },
            relay: RelayPolicy {
                include_origin: flag("HUB_INCLUDE_ORIGIN")?
                    .unwrap_or(defaults.relay.include_origin),
                prefix: match lookup("HUB_BROADCAST_PREFIX") {
                    Some(p) if p.is_empty() => None,
                    Some(p) => Some(p),
                    None => Some(DEFAULT_BROADCAST_PREFIX.to_string()),
                },
                evict_on_failure: flag("HUB_EVICT_ON_FAILURE")?
                    .unwrap_or(defaults.relay.evict_on_failure),
            },
            attach_players: flag("HUB_ATTACH_PLAYERS")?.unwrap_or(defaults.attach_players),
            version: defaults.version,
        })
    }
}

fn parse_value<T>(key: &str, raw: Option<String>) -> Result<Option<T>, HubError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| HubError::InvalidConfig(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(None),
    }
}

fn parse_flag(key: &str, raw: Option<String>) -> Result<Option<bool>, HubError> {
    match raw {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(HubError::InvalidConfig(format!("{}={:?}: expected a boolean", key, raw))),
        },
        None => Ok(None),
    }
}

/// Hub server errors.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// Configuration could not be parsed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Token verifier has no usable trust root.
    #[error("Token verifier unavailable: {0}")]
    VerifierUnavailable(#[from] AuthError),
}

/// The hub server.
pub struct HubServer {
    /// Server configuration.
    config: HubConfig,
    /// Live connections.
    registry: Arc<ConnectionRegistry>,
    /// Handshake authentication.
    gate: AdmissionGate,
    /// Registration bookkeeping.
    lifecycle: LifecycleManager,
    /// Fan-out.
    relay: BroadcastRelay,
    /// Player metadata source.
    players: Option<Arc<dyn PlayerDirectory>>,
    /// Connection slots, reserved before the handshake.
    slots: Arc<Semaphore>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl HubServer {
    /// Create a new hub server.
    pub fn new(config: HubConfig, verifier: Arc<dyn TokenVerifier>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let registry = Arc::new(ConnectionRegistry::new());
        let players: Option<Arc<dyn PlayerDirectory>> = if config.attach_players {
            Some(Arc::new(SpawnPlayers))
        } else {
            None
        };

        Self {
            gate: AdmissionGate::new(verifier),
            lifecycle: LifecycleManager::new(registry.clone()),
            relay: BroadcastRelay::new(registry.clone(), config.relay.clone()),
            registry,
            players,
            slots: Arc::new(Semaphore::new(config.max_connections)),
            config,
            shutdown_tx,
        }
    }

    /// Replace the player metadata source.
    pub fn with_player_directory(mut self, players: Arc<dyn PlayerDirectory>) -> Self {
        self.players = Some(players);
        self
    }

    /// Bind the configured address and run until shutdown.
    pub async fn run(&self) -> Result<(), HubError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the accept loop on an already bound listener.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), HubError> {
        info!(
            "Session hub v{} listening on {}",
            self.config.version,
            listener.local_addr()?
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let permit = match self.slots.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!("Connection limit reached, rejecting {}", addr);
                                    continue;
                                }
                            };

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr, permit);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new TCP connection: admission, registration, read loop.
    /// The slot permit is held until the connection task ends.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, permit: OwnedSemaphorePermit) {
        let gate = self.gate.clone();
        let lifecycle = self.lifecycle.clone();
        let relay = self.relay.clone();
        let players = self.players.clone();
        let outbound_buffer = self.config.outbound_buffer;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _permit = permit;
            let admitted = Arc::new(OnceLock::new());
            let slot = admitted.clone();

            let ws_stream = match accept_hdr_async(
                stream,
                move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    gate.on_handshake(req, resp, &slot)
                },
            )
            .await
            {
                Ok(ws) => ws,
                Err(e) => {
                    debug!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let identity: Identity = match admitted.get() {
                Some(identity) => identity.clone(),
                None => {
                    error!("Handshake with {} completed without an identity", addr);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<Message>(outbound_buffer);

            let player = players.as_ref().and_then(|p| p.lookup(&identity));
            let connection = Arc::new(
                Connection::new(ConnectionId::next(), msg_tx)
                    .with_identity(identity)
                    .with_player(player)
                    .with_peer_addr(addr),
            );
            let conn_id = connection.id();

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let closing = matches!(msg, Message::Close(_));
                    if ws_sender.send(msg).await.is_err() || closing {
                        break;
                    }
                }
            });

            lifecycle.on_established(connection.clone());

            // Handle incoming messages
            let reason = loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let report = relay.relay(&BroadcastMessage::new(conn_id, text));
                                if !report.failed.is_empty() {
                                    debug!("{} of {} deliveries from {} failed",
                                        report.failed.len(), report.recipients, conn_id);
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                debug!("Binary frame from {}, closing", conn_id);
                                connection.close(CloseCode::Unsupported, "text frames only");
                                break CloseReason::Unsupported;
                            }
                            Some(Ok(Message::Close(_))) => {
                                break CloseReason::ClientClosed;
                            }
                            None => {
                                break CloseReason::StreamEnded;
                            }
                            Some(Err(e)) => {
                                break CloseReason::TransportError(e.to_string());
                            }
                            // Pings are answered by tungstenite
                            Some(Ok(_)) => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        connection.close(CloseCode::Away, "Server shutting down");
                        break CloseReason::ServerShutdown;
                    }
                }
            };

            lifecycle.on_closed(&connection, reason);

            // Let a queued close frame drain before tearing down the writer
            drop(connection);
            let writer = sender_task.abort_handle();
            if tokio::time::timeout(std::time::Duration::from_secs(1), sender_task)
                .await
                .is_err()
            {
                debug!("Writer for {} did not finish, aborting", conn_id);
                writer.abort();
            }
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Shared registry of live connections.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }
}
