//! Live connection pool and per-board rooms.
//!
//! ```text
//!  credential ──► handshake ──► connect ──► join_room / leave_room ──► disconnect
//!                     │             │
//!                IdentityProvider   └── outbox (bounded mpsc) ◄── broadcast_to_board
//! ```
//!
//! Room membership changes (connect, join, leave, disconnect) all go
//! through the `connections` write lock, so there is one writer at a time.
//! Broadcasting only takes read locks.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::authz::AccessGate;
use crate::broadcast::{
    BroadcastStats, ConnectionId, OutboxReceiver, OutboxSender, Peer, RoomManager,
};
use crate::error::SyncError;
use crate::identity::IdentityProvider;
use crate::model::Identity;
use crate::protocol::{BoardEvent, EventPayload, RejectReason};

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Frames buffered per connection before events are dropped
    pub outbox_capacity: usize,
    /// Time a new connection has to send its `Hello`
    pub handshake_timeout: Duration,
    /// Re-run the access gate when a connection joins a board room.
    /// Off by default: any authenticated connection may join by id.
    /// When on, joins fail with `NotReady` until a gate is attached.
    pub verify_membership_on_join: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: 256,
            handshake_timeout: Duration::from_secs(10),
            verify_membership_on_join: false,
        }
    }
}

struct ConnectionEntry {
    identity: Identity,
    outbox: OutboxSender,
    rooms: HashSet<Uuid>,
}

pub struct ChannelManager {
    identity_provider: Arc<dyn IdentityProvider>,
    gate: Option<AccessGate>,
    config: ChannelConfig,
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
    rooms: RoomManager,
}

impl ChannelManager {
    pub fn new(identity_provider: Arc<dyn IdentityProvider>, config: ChannelConfig) -> Self {
        Self {
            identity_provider,
            gate: None,
            config,
            connections: RwLock::new(HashMap::new()),
            rooms: RoomManager::new(),
        }
    }

    /// Gate used for join-time checks when `verify_membership_on_join` is set.
    pub fn with_gate(mut self, gate: AccessGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Verify a bearer credential.
    ///
    /// Provider failures are logged here and surface only as
    /// `AuthenticationFailed`.
    pub async fn handshake(&self, credential: Option<&str>) -> Result<Identity, SyncError> {
        let credential = match credential.map(str::trim) {
            Some(c) if !c.is_empty() => c,
            _ => return Err(SyncError::AuthenticationRequired),
        };

        match self.identity_provider.verify(credential).await {
            Ok(Some(identity)) => Ok(identity),
            Ok(None) => Err(SyncError::InvalidCredential),
            Err(e) => {
                log::error!("Identity provider failed during handshake: {e}");
                Err(SyncError::AuthenticationFailed)
            }
        }
    }

    /// Register an authenticated connection and hand back its outbox.
    pub async fn connect(&self, identity: Identity) -> (ConnectionId, OutboxReceiver) {
        let (tx, rx) = mpsc::channel(self.config.outbox_capacity.max(1));
        let connection_id = Uuid::new_v4();
        log::info!(
            "Connection {connection_id} authenticated as {} ({})",
            identity.display_name,
            identity.user_id
        );
        self.connections.write().await.insert(
            connection_id,
            ConnectionEntry {
                identity,
                outbox: tx,
                rooms: HashSet::new(),
            },
        );
        (connection_id, rx)
    }

    /// Subscribe a connection to a board's events. Idempotent: returns
    /// false if it was already joined.
    pub async fn join_room(
        &self,
        connection_id: ConnectionId,
        board_id: Uuid,
    ) -> Result<bool, SyncError> {
        if self.config.verify_membership_on_join {
            let user_id = self
                .identity_of(connection_id)
                .await
                .ok_or(SyncError::NotFound("Connection"))?
                .user_id;
            let Some(gate) = &self.gate else {
                log::error!("Join of board:{board_id} refused: verification enabled without a gate");
                return Err(SyncError::NotReady);
            };
            gate.require(board_id, user_id, None).await?;
        }

        let mut connections = self.connections.write().await;
        let entry = connections
            .get_mut(&connection_id)
            .ok_or(SyncError::NotFound("Connection"))?;
        if !entry.rooms.insert(board_id) {
            return Ok(false);
        }

        let room = self.rooms.get_or_create(board_id).await;
        room.add_peer(
            connection_id,
            Peer::new(entry.identity.clone(), entry.outbox.clone()),
        )
        .await;
        log::debug!("Connection {connection_id} joined board:{board_id}");
        Ok(true)
    }

    /// Idempotent: returns false if the connection was not in the room.
    pub async fn leave_room(&self, connection_id: ConnectionId, board_id: Uuid) -> bool {
        let mut connections = self.connections.write().await;
        let Some(entry) = connections.get_mut(&connection_id) else {
            return false;
        };
        if !entry.rooms.remove(&board_id) {
            return false;
        }
        self.detach(connection_id, board_id).await;
        log::debug!("Connection {connection_id} left board:{board_id}");
        true
    }

    /// Drop a connection and remove it from every room it was in.
    /// Returns the boards it had joined.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> Vec<Uuid> {
        let mut connections = self.connections.write().await;
        let Some(entry) = connections.remove(&connection_id) else {
            return Vec::new();
        };
        let rooms: Vec<Uuid> = entry.rooms.into_iter().collect();
        for board_id in &rooms {
            self.detach(connection_id, *board_id).await;
        }
        log::info!(
            "Connection {connection_id} ({}) disconnected, left {} room(s)",
            entry.identity.display_name,
            rooms.len()
        );
        rooms
    }

    /// Caller must hold the `connections` write lock.
    async fn detach(&self, connection_id: ConnectionId, board_id: Uuid) {
        if let Some(room) = self.rooms.get(&board_id).await {
            room.remove_peer(&connection_id).await;
            if self.rooms.remove_if_empty(&board_id).await {
                log::debug!("Room board:{board_id} closed");
            }
        }
    }

    /// Fan an event out to every connection in the board's room.
    /// Returns the number of connections it was queued to.
    pub async fn broadcast_to_board(
        &self,
        board_id: Uuid,
        payload: EventPayload,
    ) -> Result<usize, SyncError> {
        let Some(room) = self.rooms.get(&board_id).await else {
            return Ok(0);
        };
        let event = BoardEvent::new(board_id, payload);
        let delivered = room.broadcast(&event).await?;
        log::debug!(
            "{} on board:{board_id} delivered to {delivered} connection(s)",
            event.kind().wire_name()
        );
        Ok(delivered)
    }

    pub async fn identity_of(&self, connection_id: ConnectionId) -> Option<Identity> {
        self.connections
            .read()
            .await
            .get(&connection_id)
            .map(|e| e.identity.clone())
    }

    pub async fn rooms_of(&self, connection_id: ConnectionId) -> Vec<Uuid> {
        self.connections
            .read()
            .await
            .get(&connection_id)
            .map(|e| e.rooms.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.room_count().await
    }

    pub async fn room_size(&self, board_id: Uuid) -> usize {
        match self.rooms.get(&board_id).await {
            Some(room) => room.peer_count().await,
            None => 0,
        }
    }

    pub async fn stats(&self) -> BroadcastStats {
        self.rooms.stats().await
    }
}

/// Map a handshake failure onto its wire reason.
pub fn reject_reason(err: &SyncError) -> RejectReason {
    match err {
        SyncError::AuthenticationRequired => RejectReason::AuthenticationRequired,
        SyncError::InvalidCredential => RejectReason::InvalidCredential,
        _ => RejectReason::AuthenticationFailed,
    }
}

/// Holder for the process's channel manager.
///
/// Constructed empty and installed once at startup; anything that
/// broadcasts before that gets `SyncError::NotReady`.
#[derive(Default)]
pub struct ChannelSlot {
    manager: OnceLock<Arc<ChannelManager>>,
}

impl ChannelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn installed(manager: Arc<ChannelManager>) -> Self {
        let slot = Self::new();
        let _ = slot.manager.set(manager);
        slot
    }

    /// Install the manager. Fails with the rejected manager if one is
    /// already installed.
    pub fn install(&self, manager: Arc<ChannelManager>) -> Result<(), Arc<ChannelManager>> {
        self.manager.set(manager)
    }

    pub fn get(&self) -> Result<&Arc<ChannelManager>, SyncError> {
        self.manager.get().ok_or(SyncError::NotReady)
    }

    pub fn is_ready(&self) -> bool {
        self.manager.get().is_some()
    }

    pub async fn broadcast_to_board(
        &self,
        board_id: Uuid,
        payload: EventPayload,
    ) -> Result<usize, SyncError> {
        self.get()?.broadcast_to_board(board_id, payload).await
    }
}
