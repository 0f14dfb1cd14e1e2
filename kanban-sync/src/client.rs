//! WebSocket client for the board event channel.
//!
//! Provides:
//! - Connection lifecycle with the `Hello` handshake
//! - Board room join/leave, remembered across reconnects
//! - An event stream (`ClientEvent`) for the application
//!
//! Events missed while disconnected are gone. After a reconnect the
//! client rejoins its boards and emits `ResyncRequired` for each, and the
//! application re-fetches the board snapshot.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::model::Identity;
use crate::protocol::{BoardEvent, ClientMessage, ProtocolError, RejectReason, ServerMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Handshake accepted
    Connected {
        connection_id: Uuid,
        identity: Identity,
    },
    /// Handshake refused; the socket is closed
    Rejected {
        reason: RejectReason,
        message: String,
    },
    Event(BoardEvent),
    Joined(Uuid),
    Left(Uuid),
    Pong,
    /// Server refused a request on an open connection
    ServerError(String),
    /// Local state for this board may be stale: re-fetch it
    ResyncRequired { board_id: Uuid },
    Disconnected,
}

/// The sync client.
pub struct SyncClient {
    server_url: String,
    token: Option<String>,

    state: Arc<RwLock<ConnectionState>>,
    /// Bumped on every `connect`; a reader task only reports the close of
    /// its own connection.
    generation: Arc<AtomicU64>,
    identity: Arc<RwLock<Option<Identity>>>,

    /// Boards to (re)join on every connect
    boards: Arc<RwLock<HashSet<Uuid>>>,
    /// Set once the first handshake succeeded
    ever_connected: bool,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,

    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    event_tx: mpsc::Sender<ClientEvent>,

    handshake_timeout: Duration,
}

impl SyncClient {
    pub fn new(server_url: impl Into<String>, token: Option<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            token,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            generation: Arc::new(AtomicU64::new(0)),
            identity: Arc::new(RwLock::new(None)),
            boards: Arc::new(RwLock::new(HashSet::new())),
            ever_connected: false,
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            handshake_timeout: Duration::from_secs(5),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Connect and authenticate.
    ///
    /// On a reconnect, previously joined boards are rejoined and a
    /// `ResyncRequired` event is emitted for each.
    pub async fn connect(&mut self) -> Result<Identity, ProtocolError> {
        let reconnecting = self.ever_connected;
        let generation = {
            let mut state = self.state.write().await;
            *state = if reconnecting {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            };
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let ws_stream = match tokio_tungstenite::connect_async(&self.server_url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::warn!("Failed to connect to {}: {e}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let hello = ClientMessage::Hello {
            token: self.token.clone(),
        };
        if ws_writer
            .send(Message::Binary(hello.encode()?.into()))
            .await
            .is_err()
        {
            *self.state.write().await = ConnectionState::Disconnected;
            return Err(ProtocolError::ConnectionClosed);
        }

        let reply = tokio::time::timeout(self.handshake_timeout, async {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        return ServerMessage::decode(&bytes);
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            Err(ProtocolError::ConnectionClosed)
        })
        .await;

        let (connection_id, identity) = match reply {
            Ok(Ok(ServerMessage::Welcome {
                connection_id,
                identity,
            })) => (connection_id, identity),
            Ok(Ok(ServerMessage::Rejected { reason, message })) => {
                *self.state.write().await = ConnectionState::Disconnected;
                let _ = self
                    .event_tx
                    .send(ClientEvent::Rejected {
                        reason,
                        message: message.clone(),
                    })
                    .await;
                return Err(ProtocolError::Rejected { reason, message });
            }
            Ok(Ok(other)) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::UnexpectedMessage(format!("{other:?}")));
            }
            Ok(Err(e)) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(e);
            }
            Err(_) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::Timeout);
            }
        };

        // Writer task: forward outgoing channel to WebSocket, close when
        // the client drops its sender.
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    return;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });
        self.outgoing_tx = Some(out_tx);

        *self.identity.write().await = Some(identity.clone());
        *self.state.write().await = ConnectionState::Connected;
        self.ever_connected = true;
        let _ = self
            .event_tx
            .send(ClientEvent::Connected {
                connection_id,
                identity: identity.clone(),
            })
            .await;

        // Reader task
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let current = self.generation.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        let event = match ServerMessage::decode(&bytes) {
                            Ok(ServerMessage::Event(event)) => Some(ClientEvent::Event(event)),
                            Ok(ServerMessage::Joined { board_id }) => {
                                Some(ClientEvent::Joined(board_id))
                            }
                            Ok(ServerMessage::Left { board_id }) => Some(ClientEvent::Left(board_id)),
                            Ok(ServerMessage::Pong) => Some(ClientEvent::Pong),
                            Ok(ServerMessage::Error { message }) => {
                                Some(ClientEvent::ServerError(message))
                            }
                            Ok(other) => {
                                log::debug!("Ignoring unexpected server message: {other:?}");
                                None
                            }
                            Err(e) => {
                                log::warn!("Failed to decode server message: {e}");
                                None
                            }
                        };
                        if let Some(evt) = event {
                            let _ = event_tx.send(evt).await;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            if close_generation(&state, &current, generation).await {
                let _ = event_tx.send(ClientEvent::Disconnected).await;
            }
        });

        if reconnecting {
            let boards: Vec<Uuid> = self.boards.read().await.iter().copied().collect();
            if !boards.is_empty() {
                log::info!("Rejoining {} board(s) after reconnect", boards.len());
            }
            for board_id in boards {
                let _ = self
                    .event_tx
                    .send(ClientEvent::ResyncRequired { board_id })
                    .await;
                self.send(&ClientMessage::JoinBoard { board_id }).await?;
            }
        }

        Ok(identity)
    }

    /// Close the connection. Joined boards are remembered for the next
    /// `connect`.
    pub fn disconnect(&mut self) {
        self.outgoing_tx = None;
    }

    /// Subscribe to a board's events. The server acks with `Joined`.
    pub async fn join_board(&self, board_id: Uuid) -> Result<(), ProtocolError> {
        self.boards.write().await.insert(board_id);
        self.send(&ClientMessage::JoinBoard { board_id }).await
    }

    pub async fn leave_board(&self, board_id: Uuid) -> Result<(), ProtocolError> {
        self.boards.write().await.remove(&board_id);
        self.send(&ClientMessage::LeaveBoard { board_id }).await
    }

    pub async fn ping(&self) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::Ping).await
    }

    async fn send(&self, msg: &ClientMessage) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        let encoded = msg.encode()?;
        match self.outgoing_tx {
            Some(ref tx) => tx
                .send(encoded)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.identity.read().await.clone()
    }

    pub async fn joined_boards(&self) -> Vec<Uuid> {
        self.boards.read().await.iter().copied().collect()
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

/// Mark the connection of `generation` closed. Returns false, leaving the
/// state alone, when a newer connection has started since.
async fn close_generation(
    state: &RwLock<ConnectionState>,
    current: &AtomicU64,
    generation: u64,
) -> bool {
    let mut state = state.write().await;
    if current.load(Ordering::SeqCst) != generation {
        return false;
    }
    *state = ConnectionState::Disconnected;
    true
}
