//! Collaborator interfaces for canonical board state and the activity log.
//!
//! ```text
//! ┌──────────────┐   check()    ┌──────────────┐
//! │ AccessGate   │ ───────────► │ AccessLookup │  board + member lookups
//! └──────────────┘              └──────┬───────┘
//!                                      │ supertrait
//! ┌──────────────┐   mutate     ┌──────┴───────┐
//! │ BoardService │ ───────────► │ BoardStore   │  MemoryStore
//! └──────┬───────┘              └──────────────┘
//!        │ record
//!        ▼
//! ┌──────────────┐
//! │ ActivityLog  │  RocksActivityLog (RocksDB + LZ4) │ MemoryActivityLog
//! └──────────────┘
//! ```
//!
//! The store is the single writer of positions and memberships. Every
//! mutation that touches ordering returns the full re-contiguated sibling
//! lists, never a diff.

pub mod activity;
pub mod memory;

pub use activity::{ActivityLog, ActivityLogConfig, MemoryActivityLog, RocksActivityLog};
pub use memory::MemoryStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{
    Board, BoardMember, BoardPatch, BoardSnapshot, List, ListPatch, NewTask, Task, TaskPatch,
};
use crate::ordering::MoveOutcome;
use crate::protocol::ListOrder;

/// Result of a task move as committed by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskMove {
    /// The task after the move (unchanged on a no-op).
    pub task: Task,
    pub outcome: MoveOutcome,
    /// Full order of the list the task left.
    pub source: ListOrder,
    /// Full order of the list the task entered, for cross-list moves.
    pub target: Option<ListOrder>,
}

/// Result of a list reorder within its board.
#[derive(Debug, Clone, PartialEq)]
pub struct ListMove {
    pub list: List,
    pub outcome: MoveOutcome,
    /// Full list order of the board.
    pub order: Vec<List>,
}

/// The lookups the authorization gate needs, and nothing else.
#[async_trait]
pub trait AccessLookup: Send + Sync {
    async fn board(&self, board_id: Uuid) -> Result<Option<Board>, StoreError>;

    async fn member(&self, board_id: Uuid, user_id: Uuid)
        -> Result<Option<BoardMember>, StoreError>;
}

/// Canonical record store for boards, members, lists and tasks.
///
/// `Ok(None)` means the addressed record does not exist; `Err` means the
/// store could not answer.
#[async_trait]
pub trait BoardStore: AccessLookup {
    async fn create_board(&self, board: Board) -> Result<Board, StoreError>;
    async fn update_board(&self, board_id: Uuid, patch: &BoardPatch)
        -> Result<Option<Board>, StoreError>;
    /// Removes the board with its members, lists and tasks.
    async fn delete_board(&self, board_id: Uuid) -> Result<Option<Board>, StoreError>;
    /// Boards `user_id` owns or is a member of, most recently updated first.
    async fn boards_for(&self, user_id: Uuid) -> Result<Vec<Board>, StoreError>;

    async fn members(&self, board_id: Uuid) -> Result<Vec<BoardMember>, StoreError>;
    /// Insert or replace the `(board_id, user_id)` membership.
    async fn add_member(&self, member: BoardMember) -> Result<Option<BoardMember>, StoreError>;
    async fn remove_member(&self, board_id: Uuid, user_id: Uuid)
        -> Result<Option<BoardMember>, StoreError>;

    async fn list(&self, list_id: Uuid) -> Result<Option<List>, StoreError>;
    /// All lists of a board, ordered by position.
    async fn lists(&self, board_id: Uuid) -> Result<Vec<List>, StoreError>;
    /// Appends at the end of the board's lists.
    async fn create_list(&self, board_id: Uuid, name: &str) -> Result<Option<List>, StoreError>;
    async fn update_list(&self, list_id: Uuid, patch: &ListPatch)
        -> Result<Option<List>, StoreError>;
    async fn move_list(&self, list_id: Uuid, position: i64)
        -> Result<Option<ListMove>, StoreError>;
    /// Removes the list with its tasks and re-contiguates the remaining lists.
    async fn delete_list(&self, list_id: Uuid) -> Result<Option<List>, StoreError>;

    async fn task(&self, task_id: Uuid) -> Result<Option<Task>, StoreError>;
    /// Full ordered task list of one list, in one call.
    async fn list_tasks(&self, list_id: Uuid) -> Result<Vec<Task>, StoreError>;
    /// Appends at the end of the target list.
    async fn create_task(&self, created_by: Uuid, input: NewTask)
        -> Result<Option<Task>, StoreError>;
    async fn update_task(&self, task_id: Uuid, patch: &TaskPatch)
        -> Result<Option<Task>, StoreError>;
    /// Removes the task and re-contiguates its former siblings.
    async fn delete_task(&self, task_id: Uuid) -> Result<Option<Task>, StoreError>;
    /// Move a task to `target_list` at `position` (clamped). No-ops write nothing.
    async fn move_task(&self, task_id: Uuid, target_list: Uuid, position: i64)
        -> Result<Option<TaskMove>, StoreError>;

    async fn assign(&self, task_id: Uuid, user_id: Uuid) -> Result<Option<Task>, StoreError>;
    async fn unassign(&self, task_id: Uuid, user_id: Uuid) -> Result<Option<Task>, StoreError>;

    /// Everything a client needs to rebuild its view of a board.
    async fn snapshot(&self, board_id: Uuid) -> Result<Option<BoardSnapshot>, StoreError>;
}
