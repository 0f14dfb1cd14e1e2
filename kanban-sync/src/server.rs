//! WebSocket front of the channel manager.
//!
//! Architecture:
//! ```text
//! Client A ──┐  Hello{token}            ┌── board:{id} room ──┐
//!            ├──────────────► handshake │                     ├──► outbox A
//! Client B ──┘      │                   └─────────────────────┘──► outbox B
//!                   ▼                             ▲
//!            Welcome / Rejected          BoardService::broadcast
//! ```
//!
//! One task per connection. The task first waits for `Hello` (bounded by
//! the handshake timeout), then multiplexes inbound frames with the
//! connection's outbox until either side closes.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::channel::{reject_reason, ChannelConfig, ChannelManager};
use crate::protocol::{ClientMessage, ProtocolError, ServerMessage};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames buffered per connection before events are dropped
    pub outbox_capacity: usize,
    /// Seconds a new connection has to authenticate
    pub handshake_timeout_secs: u64,
    /// Run the access gate on every room join
    pub verify_membership_on_join: bool,
    /// Activity log directory (None = in-memory log)
    pub activity_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            outbox_capacity: 256,
            handshake_timeout_secs: 10,
            verify_membership_on_join: false,
            activity_path: None,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `KANBAN_*` environment variables.
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = lookup("KANBAN_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(capacity) = parse_var(&lookup, "KANBAN_OUTBOX_CAPACITY") {
            config.outbox_capacity = capacity;
        }
        if let Some(secs) = parse_var(&lookup, "KANBAN_HANDSHAKE_TIMEOUT_SECS") {
            config.handshake_timeout_secs = secs;
        }
        if let Some(verify) = parse_var(&lookup, "KANBAN_VERIFY_JOIN") {
            config.verify_membership_on_join = verify;
        }
        if let Some(path) = lookup("KANBAN_ACTIVITY_PATH").filter(|p| !p.is_empty()) {
            config.activity_path = Some(PathBuf::from(path));
        }
        config
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            outbox_capacity: self.outbox_capacity,
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            verify_membership_on_join: self.verify_membership_on_join,
        }
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring {key}={raw:?}: not a valid value");
            None
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_handshakes: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    channel: Arc<ChannelManager>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    pub fn new(config: ServerConfig, channel: Arc<ChannelManager>) -> Self {
        Self {
            config,
            channel,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        let handshake_timeout = self.channel.config().handshake_timeout;
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let channel = self.channel.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, channel, stats, handshake_timeout).await
                {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        channel: Arc<ChannelManager>,
        stats: Arc<RwLock<ServerStats>>,
        handshake_timeout: Duration,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        stats.write().await.total_connections += 1;

        // Handshake: nothing else is processed before a verified identity.
        let credential = match read_hello(&mut ws_receiver, handshake_timeout).await {
            Ok(token) => token,
            Err(ProtocolError::ConnectionClosed) => {
                log::debug!("Connection from {addr} closed before handshake");
                return Ok(());
            }
            Err(e) => {
                log::warn!("Handshake from {addr} failed: {e}");
                None
            }
        };

        let identity = match channel.handshake(credential.as_deref()).await {
            Ok(identity) => identity,
            Err(err) => {
                stats.write().await.rejected_handshakes += 1;
                log::info!("Rejected connection from {addr}: {err}");
                let rejected = ServerMessage::Rejected {
                    reason: reject_reason(&err),
                    message: err.to_string(),
                };
                ws_sender.send(Message::Binary(rejected.encode()?.into())).await?;
                let _ = ws_sender.send(Message::Close(None)).await;
                return Ok(());
            }
        };

        let (connection_id, mut outbox) = channel.connect(identity.clone()).await;
        let welcome = ServerMessage::Welcome {
            connection_id,
            identity,
        };
        if let Err(e) = ws_sender.send(Message::Binary(welcome.encode()?.into())).await {
            channel.disconnect(connection_id).await;
            return Err(e.into());
        }
        stats.write().await.active_connections += 1;

        let result = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Binary(data))) => {
                                let bytes: Vec<u8> = data.into();
                                {
                                    let mut s = stats.write().await;
                                    s.total_messages += 1;
                                    s.total_bytes += bytes.len() as u64;
                                }

                                let reply = match ClientMessage::decode(&bytes) {
                                    Ok(ClientMessage::JoinBoard { board_id }) => {
                                        match channel.join_room(connection_id, board_id).await {
                                            Ok(_) => ServerMessage::Joined { board_id },
                                            Err(e) => {
                                                log::info!("Join of board:{board_id} refused for {connection_id}: {e}");
                                                ServerMessage::Error { message: e.public_message() }
                                            }
                                        }
                                    }
                                    Ok(ClientMessage::LeaveBoard { board_id }) => {
                                        channel.leave_room(connection_id, board_id).await;
                                        ServerMessage::Left { board_id }
                                    }
                                    Ok(ClientMessage::Ping) => ServerMessage::Pong,
                                    Ok(ClientMessage::Hello { .. }) => ServerMessage::Error {
                                        message: "Already authenticated".to_string(),
                                    },
                                    Err(e) => {
                                        log::warn!("Failed to decode message from {addr}: {e}");
                                        continue;
                                    }
                                };
                                ws_sender.send(Message::Binary(reply.encode()?.into())).await?;
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
                        }
                    }

                    frame = outbox.recv() => {
                        match frame {
                            Some(data) => {
                                ws_sender.send(Message::Binary(data.to_vec().into())).await?;
                            }
                            None => break,
                        }
                    }
                }
            }
            Ok::<(), BoxError>(())
        }
        .await;

        // Cleanup runs on every exit path, including send errors.
        channel.disconnect(connection_id).await;
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }

        result
    }

    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_rooms = self.channel.room_count().await;
        stats
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn channel(&self) -> &Arc<ChannelManager> {
        &self.channel
    }
}

/// Wait for the first binary frame and expect a `Hello`.
///
/// Returns the presented token, `None` when the client sent none.
async fn read_hello(
    ws_receiver: &mut SplitStream<WebSocketStream<TcpStream>>,
    limit: Duration,
) -> Result<Option<String>, ProtocolError> {
    let first = async {
        loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Binary(data))) => {
                    let bytes: Vec<u8> = data.into();
                    return match ClientMessage::decode(&bytes) {
                        Ok(ClientMessage::Hello { token }) => Ok(token),
                        Ok(other) => Err(ProtocolError::UnexpectedMessage(format!("{other:?}"))),
                        Err(e) => Err(e),
                    };
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                    return Err(ProtocolError::ConnectionClosed);
                }
                // Control frames before Hello are tolerated.
                Some(Ok(_)) => {}
            }
        }
    };

    tokio::time::timeout(limit, first)
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticTokenProvider;
    use std::collections::HashMap;

    fn server(config: ServerConfig) -> SyncServer {
        let channel = ChannelManager::new(
            Arc::new(StaticTokenProvider::new()),
            config.channel_config(),
        );
        SyncServer::new(config, Arc::new(channel))
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.outbox_capacity, 256);
        assert_eq!(config.handshake_timeout_secs, 10);
        assert!(!config.verify_membership_on_join);
        assert!(config.activity_path.is_none());
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("KANBAN_BIND_ADDR", "0.0.0.0:8080"),
            ("KANBAN_OUTBOX_CAPACITY", "32"),
            ("KANBAN_HANDSHAKE_TIMEOUT_SECS", "soon"),
            ("KANBAN_VERIFY_JOIN", "true"),
            ("KANBAN_ACTIVITY_PATH", "/var/lib/kanban"),
        ]
        .into_iter()
        .collect();
        let config = ServerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.outbox_capacity, 32);
        // Unparseable value keeps the default.
        assert_eq!(config.handshake_timeout_secs, 10);
        assert!(config.verify_membership_on_join);
        assert_eq!(config.activity_path, Some(PathBuf::from("/var/lib/kanban")));

        let channel = config.channel_config();
        assert_eq!(channel.outbox_capacity, 32);
        assert!(channel.verify_membership_on_join);
    }

    #[tokio::test]
    async fn test_silent_connection_rejected_after_channel_timeout() {
        let channel = ChannelManager::new(
            Arc::new(StaticTokenProvider::new()),
            ChannelConfig {
                handshake_timeout: Duration::from_millis(100),
                ..ChannelConfig::default()
            },
        );
        let server = SyncServer::new(ServerConfig::default(), Arc::new(channel));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}"))
            .await
            .unwrap();
        let (_writer, mut reader) = ws.split();

        // Well inside the 10s server-level default.
        let first = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match reader.next().await {
                    Some(Ok(Message::Binary(data))) => {
                        let bytes: Vec<u8> = data.into();
                        return ServerMessage::decode(&bytes).unwrap();
                    }
                    Some(Ok(_)) => continue,
                    other => panic!("connection ended early: {other:?}"),
                }
            }
        })
        .await
        .unwrap();
        assert!(matches!(
            first,
            ServerMessage::Rejected {
                reason: crate::protocol::RejectReason::AuthenticationRequired,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = server(ServerConfig::default());
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.rejected_handshakes, 0);
        assert_eq!(stats.active_rooms, 0);
        assert_eq!(server.bind_addr(), "127.0.0.1:9090");
    }
}
