//! Reference relay server with one room per board.
//!
//! Architecture:
//! ```text
//! Client A ──┐                      ┌──► Client A  (echo, versioned)
//!            ├── /ws/board/{id} ── BoardRoom ──┼──► Client B
//! Client B ──┘       │              └──► Client C
//!                    ├── BoardState (canonical, versioned)
//!                    └── BroadcastGroup
//! ```
//!
//! - Content mutations are applied to the room's state, stamped with the
//!   next version and broadcast to every connection, originator included.
//! - `sync.request` is answered with a snapshot to the requester only.
//! - `board.reset` wipes the room, then broadcasts `board.reset` and the
//!   empty snapshot.
//! - A connection that lags behind the broadcast buffer is resynced with a
//!   fresh snapshot.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::RoomManager;
use crate::protocol::{BoardEvent, WireMessage};

/// Path prefix of board channels.
pub const CHANNEL_PREFIX: &str = "/ws/board/";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per board
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub rejected_frames: u64,
    pub active_rooms: usize,
}

pub struct BoardServer {
    config: ServerConfig,
    rooms: Arc<RoomManager>,
    stats: Arc<RwLock<ServerStats>>,
}

impl BoardServer {
    pub fn new(config: ServerConfig) -> Self {
        let rooms = Arc::new(RoomManager::new(config.broadcast_capacity));
        Self {
            config,
            rooms,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        log::info!("Board server listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, rooms, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        rooms: Arc<RoomManager>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut path = String::new();
        let ws_stream = tokio_tungstenite::accept_hdr_async(
            stream,
            |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                path = req.uri().path().to_string();
                Ok(resp)
            },
        )
        .await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let Some(board_id) = board_id_from_path(&path) else {
            log::warn!("Rejecting {addr}: unknown channel {path:?}");
            let _ = ws_sender.send(Message::Close(None)).await;
            return Ok(());
        };

        let room = rooms.get_or_create(board_id).await;
        let conn_id = Uuid::new_v4();
        let mut broadcast_rx = room.group().add_peer(conn_id, addr).await;

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
            s.active_rooms = rooms.room_count().await;
        }
        log::info!("{addr} joined board {board_id}");

        let result = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let msg = match WireMessage::decode(&text) {
                                Ok(msg) => msg,
                                Err(e) => {
                                    log::warn!("Failed to decode frame from {addr}: {e}");
                                    stats.write().await.rejected_frames += 1;
                                    continue;
                                }
                            };
                            stats.write().await.total_messages += 1;

                            match msg.event {
                                BoardEvent::SyncRequest => {
                                    let frame = room.snapshot().await.encode()?;
                                    ws_sender.send(Message::Text(frame.into())).await?;
                                }
                                BoardEvent::BoardReset => {
                                    let version = room.reset().await?;
                                    log::info!("Board {board_id} reset by {addr} (v{version})");
                                }
                                BoardEvent::SyncState { .. } => {
                                    log::warn!("Ignoring sync.state from client {addr}");
                                }
                                event => {
                                    let kind = event.kind();
                                    match room.apply(event).await? {
                                        Some(version) => log::trace!("{kind} -> v{version}"),
                                        None => {
                                            log::debug!("Rejected {kind} from {addr}");
                                            stats.write().await.rejected_frames += 1;
                                        }
                                    }
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }
                        _ => {}
                    },

                    frame = broadcast_rx.recv() => match frame {
                        Ok(data) => {
                            ws_sender.send(Message::Text(data.as_str().into())).await?;
                        }
                        Err(RecvError::Lagged(n)) => {
                            log::warn!("{addr} lagged by {n} messages, resyncing");
                            let frame = room.snapshot().await.encode()?;
                            ws_sender.send(Message::Text(frame.into())).await?;
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
            Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
        }
        .await;

        room.group().remove_peer(&conn_id).await;
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }
        result
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }
}

/// `/ws/board/{id}` → `id`. The id must be a single non-empty segment.
pub fn board_id_from_path(path: &str) -> Option<&str> {
    let id = path.strip_prefix(CHANNEL_PREFIX)?;
    if id.is_empty() || id.contains('/') {
        None
    } else {
        Some(id)
    }
}
