//! Binary wire protocol for board event fan-out.
//!
//! Every WebSocket frame is a single bincode-encoded message:
//!
//! ```text
//! client ──► server   Hello{token} │ JoinBoard │ LeaveBoard │ Ping
//! server ──► client   Welcome │ Rejected │ Joined │ Left │ Event │ Error │ Pong
//! ```
//!
//! The first client frame must be `Hello`. Until the server answers with
//! `Welcome` no other message is processed.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{Board, BoardMember, Identity, List, Task};

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(value, bincode_config())
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode_config())
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    Ok(value)
}

// ───────────────────────────────────────────────────────────────────
// Event catalog
// ───────────────────────────────────────────────────────────────────

/// The fixed set of board events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    TaskMoved,
    ListCreated,
    ListUpdated,
    ListDeleted,
    BoardUpdated,
    MemberAdded,
    MemberRemoved,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::TaskCreated,
        EventKind::TaskUpdated,
        EventKind::TaskDeleted,
        EventKind::TaskMoved,
        EventKind::ListCreated,
        EventKind::ListUpdated,
        EventKind::ListDeleted,
        EventKind::BoardUpdated,
        EventKind::MemberAdded,
        EventKind::MemberRemoved,
    ];

    pub fn wire_name(&self) -> &'static str {
        match self {
            EventKind::TaskCreated => "task:created",
            EventKind::TaskUpdated => "task:updated",
            EventKind::TaskDeleted => "task:deleted",
            EventKind::TaskMoved => "task:moved",
            EventKind::ListCreated => "list:created",
            EventKind::ListUpdated => "list:updated",
            EventKind::ListDeleted => "list:deleted",
            EventKind::BoardUpdated => "board:updated",
            EventKind::MemberAdded => "member:added",
            EventKind::MemberRemoved => "member:removed",
        }
    }
}

/// Authoritative, re-contiguated task order of one list after a move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListOrder {
    pub list_id: Uuid,
    pub tasks: Vec<Task>,
}

/// Typed event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    TaskCreated {
        task: Task,
    },
    TaskUpdated {
        task: Task,
    },
    TaskDeleted {
        task_id: Uuid,
        list_id: Uuid,
    },
    /// `task` carries its new list id and position. `source` is the full
    /// order of the list it left, `target` the list it entered (absent for
    /// a reorder within one list).
    TaskMoved {
        task: Task,
        source: ListOrder,
        target: Option<ListOrder>,
    },
    ListCreated {
        list: List,
    },
    /// `order` is the board's full list order when positions changed.
    ListUpdated {
        list: List,
        order: Option<Vec<List>>,
    },
    ListDeleted {
        list_id: Uuid,
    },
    BoardUpdated {
        board: Board,
    },
    MemberAdded {
        member: BoardMember,
    },
    MemberRemoved {
        user_id: Uuid,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::TaskCreated { .. } => EventKind::TaskCreated,
            EventPayload::TaskUpdated { .. } => EventKind::TaskUpdated,
            EventPayload::TaskDeleted { .. } => EventKind::TaskDeleted,
            EventPayload::TaskMoved { .. } => EventKind::TaskMoved,
            EventPayload::ListCreated { .. } => EventKind::ListCreated,
            EventPayload::ListUpdated { .. } => EventKind::ListUpdated,
            EventPayload::ListDeleted { .. } => EventKind::ListDeleted,
            EventPayload::BoardUpdated { .. } => EventKind::BoardUpdated,
            EventPayload::MemberAdded { .. } => EventKind::MemberAdded,
            EventPayload::MemberRemoved { .. } => EventKind::MemberRemoved,
        }
    }
}

/// An event scoped to one board's room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardEvent {
    pub board_id: Uuid,
    pub payload: EventPayload,
}

impl BoardEvent {
    pub fn new(board_id: Uuid, payload: EventPayload) -> Self {
        Self { board_id, payload }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

// ───────────────────────────────────────────────────────────────────
// Frames
// ───────────────────────────────────────────────────────────────────

/// Frames sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Handshake: bearer credential, `None` when the client has none.
    Hello { token: Option<String> },
    JoinBoard { board_id: Uuid },
    LeaveBoard { board_id: Uuid },
    Ping,
}

impl ClientMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

/// Why a handshake was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    AuthenticationRequired,
    InvalidCredential,
    AuthenticationFailed,
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    Welcome {
        connection_id: Uuid,
        identity: Identity,
    },
    Rejected {
        reason: RejectReason,
        message: String,
    },
    Joined {
        board_id: Uuid,
    },
    Left {
        board_id: Uuid,
    },
    Event(BoardEvent),
    Error {
        message: String,
    },
    Pong,
}

impl ServerMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

/// Protocol errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Connection timeout")]
    Timeout,
    #[error("Connection rejected: {message}")]
    Rejected {
        reason: RejectReason,
        message: String,
    },
}
