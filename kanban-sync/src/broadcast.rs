//! Per-board fan-out with bounded per-connection outboxes.
//!
//! Every connection owns one bounded mpsc outbox. A room holds a clone of
//! the sender of each joined connection, so one connection can sit in
//! several rooms while its socket task drains a single queue.
//!
//! Delivery is fire-and-forget: a full or closed outbox drops the frame
//! and bumps `messages_dropped`. Nothing is buffered for replay.
//!
//! The actor's own connection is a peer like any other and receives the
//! echo of its mutation; clients dedup it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::Identity;
use crate::protocol::{BoardEvent, ProtocolError, ServerMessage};

/// Identifies one live connection.
pub type ConnectionId = Uuid;

/// Pre-encoded frame shared by every recipient.
pub type Frame = Arc<Vec<u8>>;

pub type OutboxSender = mpsc::Sender<Frame>;
pub type OutboxReceiver = mpsc::Receiver<Frame>;

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BroadcastStats {
    /// Frames queued to a peer outbox
    pub messages_sent: u64,
    /// Frames lost to a full or closed outbox
    pub messages_dropped: u64,
    pub active_peers: usize,
}

#[derive(Default)]
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

/// A joined connection as seen by a room.
#[derive(Debug, Clone)]
pub struct Peer {
    pub identity: Identity,
    outbox: OutboxSender,
}

impl Peer {
    pub fn new(identity: Identity, outbox: OutboxSender) -> Self {
        Self { identity, outbox }
    }
}

/// The room of one board.
pub struct BroadcastGroup {
    board_id: Uuid,
    peers: RwLock<HashMap<ConnectionId, Peer>>,
    stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    pub fn new(board_id: Uuid) -> Self {
        Self {
            board_id,
            peers: RwLock::new(HashMap::new()),
            stats: AtomicBroadcastStats::default(),
        }
    }

    pub fn board_id(&self) -> Uuid {
        self.board_id
    }

    /// Add a peer. Returns false if it was already present (the entry is
    /// left untouched).
    pub async fn add_peer(&self, connection_id: ConnectionId, peer: Peer) -> bool {
        let mut peers = self.peers.write().await;
        if peers.contains_key(&connection_id) {
            return false;
        }
        peers.insert(connection_id, peer);
        true
    }

    pub async fn remove_peer(&self, connection_id: &ConnectionId) -> Option<Peer> {
        self.peers.write().await.remove(connection_id)
    }

    /// Encode once and fan out to every peer, the actor included.
    ///
    /// Returns the number of outboxes the frame was queued to.
    pub async fn broadcast(&self, event: &BoardEvent) -> Result<usize, ProtocolError> {
        let encoded = ServerMessage::Event(event.clone()).encode()?;
        Ok(self.broadcast_raw(Arc::new(encoded)).await)
    }

    /// Fan out pre-encoded bytes.
    pub async fn broadcast_raw(&self, frame: Frame) -> usize {
        let peers = self.peers.read().await;
        let mut delivered = 0;
        for (connection_id, peer) in peers.iter() {
            match peer.outbox.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "Outbox full for connection {connection_id} on board {}, frame dropped",
                        self.board_id
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Connection {connection_id} closed before disconnect cleanup");
                }
            }
        }
        self.stats
            .messages_sent
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn has_peer(&self, connection_id: &ConnectionId) -> bool {
        self.peers.read().await.contains_key(connection_id)
    }

    /// Identities currently in the room.
    pub async fn identities(&self) -> Vec<Identity> {
        self.peers
            .read()
            .await
            .values()
            .map(|p| p.identity.clone())
            .collect()
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.stats.messages_dropped.load(Ordering::Relaxed),
            active_peers: self.peers.read().await.len(),
        }
    }
}

/// Board id → room.
///
/// Rooms are created on first join and removed when the last peer leaves.
/// Counters of removed rooms are folded into `retired`.
pub struct RoomManager {
    rooms: RwLock<HashMap<Uuid, Arc<BroadcastGroup>>>,
    retired: AtomicBroadcastStats,
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomManager {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            retired: AtomicBroadcastStats::default(),
        }
    }

    pub async fn get(&self, board_id: &Uuid) -> Option<Arc<BroadcastGroup>> {
        self.rooms.read().await.get(board_id).cloned()
    }

    pub async fn get_or_create(&self, board_id: Uuid) -> Arc<BroadcastGroup> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(&board_id) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(board_id)
            .or_insert_with(|| Arc::new(BroadcastGroup::new(board_id)))
            .clone()
    }

    pub async fn remove_if_empty(&self, board_id: &Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(board_id) {
            if room.peer_count().await == 0 {
                let final_stats = room.stats().await;
                self.retired
                    .messages_sent
                    .fetch_add(final_stats.messages_sent, Ordering::Relaxed);
                self.retired
                    .messages_dropped
                    .fetch_add(final_stats.messages_dropped, Ordering::Relaxed);
                rooms.remove(board_id);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_boards(&self) -> Vec<Uuid> {
        self.rooms.read().await.keys().cloned().collect()
    }

    /// Totals since start, including rooms that have since closed.
    /// `active_peers` counts live rooms only.
    pub async fn stats(&self) -> BroadcastStats {
        let rooms: Vec<Arc<BroadcastGroup>> = self.rooms.read().await.values().cloned().collect();
        let mut total = BroadcastStats {
            messages_sent: self.retired.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.retired.messages_dropped.load(Ordering::Relaxed),
            active_peers: 0,
        };
        for room in rooms {
            let stats = room.stats().await;
            total.messages_sent += stats.messages_sent;
            total.messages_dropped += stats.messages_dropped;
            total.active_peers += stats.active_peers;
        }
        total
    }
}
