//! # kanban-sync: Real-time ordering and sync engine for kanban boards
//!
//! Boards hold ordered lists, lists hold ordered tasks. Every mutation is
//! authorized, committed to the canonical store, then fanned out to the
//! clients watching that board.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌──────────────────┐
//! │ SyncClient  │ ◄─────────────────► │ SyncServer       │
//! │ + BoardView │     Binary Proto    │ + ChannelManager │
//! └─────────────┘                     └────────┬─────────┘
//!                                              │ broadcast
//! ┌─────────────┐   gate → store     ┌────────┴─────────┐
//! │ caller      │ ─────────────────► │ BoardService     │
//! └─────────────┘                    └────────┬─────────┘
//!                                              │
//!                              ┌───────────────┴──────────────┐
//!                              │ BoardStore     ActivityLog    │
//!                              └──────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`authz`]: Board access gate (owner fast-path, role checks)
//! - [`ordering`]: Contiguous 0-based positions, reorder and transfer
//! - [`storage`]: Canonical store trait, in-memory store, activity log
//! - [`service`]: Mutation path: gate → store → broadcast → activity
//! - [`channel`]: Authenticated connections and per-board rooms
//! - [`broadcast`]: Room fan-out with backpressure
//! - [`protocol`]: Binary wire protocol (bincode-encoded frames)
//! - [`server`]: WebSocket event server
//! - [`client`]: WebSocket client with rejoin on reconnect
//! - [`reconcile`]: Client-side board view: events, optimistic edits, rollback

pub mod authz;
pub mod broadcast;
pub mod channel;
pub mod client;
pub mod error;
pub mod identity;
pub mod model;
pub mod ordering;
pub mod protocol;
pub mod reconcile;
pub mod server;
pub mod service;
pub mod storage;

// Re-exports for convenience
pub use authz::{Access, AccessGate};
pub use broadcast::{BroadcastGroup, BroadcastStats, RoomManager};
pub use channel::{ChannelConfig, ChannelManager, ChannelSlot};
pub use client::{ClientEvent, ConnectionState, SyncClient};
pub use error::{IdentityError, StoreError, SyncError};
pub use identity::{IdentityProvider, StaticTokenProvider};
pub use model::{
    ActivityEntry, Board, BoardMember, BoardSnapshot, Identity, List, ListWithTasks, NewTask,
    Priority, Role, Task,
};
pub use ordering::{MoveOutcome, MovePlan};
pub use protocol::{
    BoardEvent, ClientMessage, EventKind, EventPayload, ListOrder, ProtocolError, RejectReason,
    ServerMessage,
};
pub use reconcile::{Applied, BoardView};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use service::BoardService;
pub use storage::{
    AccessLookup, ActivityLog, ActivityLogConfig, BoardStore, ListMove, MemoryActivityLog,
    MemoryStore, RocksActivityLog, TaskMove,
};
