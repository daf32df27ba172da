//! Per-board rooms: canonical state plus fan-out to every connection.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers. Each
//! connection gets an independent receiver that buffers up to `capacity`
//! frames. The originator of an event receives it too; clients rely on the
//! echo to learn the server version of their own edits.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, RwLock};
use uuid::Uuid;

use crate::protocol::{BoardEvent, ProtocolError, WireMessage};
use crate::store::BoardState;

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub active_peers: usize,
}

/// Fan-out group for one board.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<String>>,
    peers: RwLock<HashMap<Uuid, SocketAddr>>,
    capacity: usize,
    messages_sent: AtomicU64,
}

impl BroadcastGroup {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            peers: RwLock::new(HashMap::new()),
            capacity,
            messages_sent: AtomicU64::new(0),
        }
    }

    /// Register a connection. Returns its receiver.
    pub async fn add_peer(&self, id: Uuid, addr: SocketAddr) -> broadcast::Receiver<Arc<String>> {
        self.peers.write().await.insert(id, addr);
        self.sender.subscribe()
    }

    pub async fn remove_peer(&self, id: &Uuid) -> Option<SocketAddr> {
        self.peers.write().await.remove(id)
    }

    /// Encode once and send to every connection.
    ///
    /// Returns the number of receivers.
    pub fn broadcast(&self, msg: &WireMessage) -> Result<usize, ProtocolError> {
        let encoded = Arc::new(msg.encode()?);
        Ok(self.broadcast_raw(encoded))
    }

    /// Send a pre-encoded frame.
    pub fn broadcast_raw(&self, encoded: Arc<String>) -> usize {
        let count = self.sender.send(encoded).unwrap_or(0);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn has_peer(&self, id: &Uuid) -> bool {
        self.peers.read().await.contains_key(id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            active_peers: self.peers.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// One board: authoritative state and its broadcast group.
///
/// The state lock is held while broadcasting, so frames leave in version
/// order.
pub struct BoardRoom {
    state: Mutex<BoardState>,
    group: BroadcastGroup,
}

impl BoardRoom {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BoardState::new()),
            group: BroadcastGroup::new(capacity),
        }
    }

    pub fn group(&self) -> &BroadcastGroup {
        &self.group
    }

    /// Current full state, for `sync.request`.
    pub async fn snapshot(&self) -> WireMessage {
        self.state.lock().await.snapshot()
    }

    pub async fn version(&self) -> u64 {
        self.state.lock().await.version()
    }

    pub async fn note_count(&self) -> usize {
        self.state.lock().await.len()
    }

    /// Apply a client mutation, stamp it with the next version and fan it
    /// out. Returns `None` if the mutation was rejected (duplicate add,
    /// unknown note, control event).
    pub async fn apply(&self, event: BoardEvent) -> Result<Option<u64>, ProtocolError> {
        let mut state = self.state.lock().await;
        if !state.apply(&event) {
            return Ok(None);
        }
        let version = state.version() + 1;
        state.advance_version(version);
        self.group
            .broadcast(&WireMessage::versioned(version, event))?;
        Ok(Some(version))
    }

    /// Wipe the board. Broadcasts `board.reset` then the empty snapshot.
    pub async fn reset(&self) -> Result<u64, ProtocolError> {
        let mut state = self.state.lock().await;
        state.clear();
        let version = state.version() + 1;
        state.advance_version(version);
        self.group
            .broadcast(&WireMessage::versioned(version, BoardEvent::BoardReset))?;
        self.group.broadcast(&state.snapshot())?;
        Ok(version)
    }
}

/// Maps board ids to rooms. Rooms live for the server's lifetime.
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Arc<BoardRoom>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    pub async fn get_or_create(&self, board_id: &str) -> Arc<BoardRoom> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(board_id) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(board_id.to_string())
            .or_insert_with(|| Arc::new(BoardRoom::new(self.default_capacity)))
            .clone()
    }

    pub async fn get(&self, board_id: &str) -> Option<Arc<BoardRoom>> {
        self.rooms.read().await.get(board_id).cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_boards(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}
