//! Board → list → task records shared by the store, the wire protocol
//! and the client-side view.
//!
//! Positions are `u32` and contiguous from 0 within their parent
//! (lists within a board, tasks within a list). Timestamps are seconds
//! since the UNIX epoch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;

/// Seconds since the UNIX epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ───────────────────────────────────────────────────────────────────
// Roles & identities
// ───────────────────────────────────────────────────────────────────

/// Privilege level of a board member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Editor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Admin => "admin",
        }
    }

    /// Roles allowed to change lists and tasks.
    pub const WRITERS: &'static [Role] = &[Role::Admin, Role::Editor];

    /// Roles allowed to change the board itself and its membership.
    pub const ADMINS: &'static [Role] = &[Role::Admin];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verified principal, attached to a connection after the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: String,
}

impl Identity {
    pub fn new(user_id: Uuid, email: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
            display_name: display_name.into(),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Boards & members
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: Uuid,
    /// Owner always holds admin privilege, with or without a member row.
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub is_archived: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Board {
    pub fn new(owner_id: Uuid, name: impl Into<String>) -> Self {
        let now = now_secs();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name: name.into(),
            description: None,
            color: None,
            is_archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Shallow merge: every field the patch carries overwrites ours.
    pub fn apply_patch(&mut self, patch: &BoardPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(color) = &patch.color {
            self.color = color.clone();
        }
        if let Some(archived) = patch.is_archived {
            self.is_archived = archived;
        }
    }
}

/// Partial board update. `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub color: Option<Option<String>>,
    pub is_archived: Option<bool>,
}

/// Membership row, unique per `(board_id, user_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardMember {
    pub board_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub display_name: String,
    pub email: String,
    pub joined_at: u64,
}

impl BoardMember {
    pub fn new(board_id: Uuid, identity: &Identity, role: Role) -> Self {
        Self {
            board_id,
            user_id: identity.user_id,
            role,
            display_name: identity.display_name.clone(),
            email: identity.email.clone(),
            joined_at: now_secs(),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Lists & tasks
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct List {
    pub id: Uuid,
    pub board_id: Uuid,
    pub name: String,
    pub position: u32,
    pub created_at: u64,
    pub updated_at: u64,
}

impl List {
    pub fn new(board_id: Uuid, name: impl Into<String>) -> Self {
        let now = now_secs();
        Self {
            id: Uuid::new_v4(),
            board_id,
            name: name.into(),
            position: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListPatch {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub list_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub position: u32,
    pub priority: Priority,
    /// Calendar date, `YYYY-MM-DD`. Opaque to the sync engine.
    pub due_date: Option<String>,
    pub is_completed: bool,
    pub created_by: Uuid,
    /// Assigned user ids (unordered).
    pub assignees: Vec<Uuid>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Task {
    pub fn new(list_id: Uuid, created_by: Uuid, title: impl Into<String>) -> Self {
        let now = now_secs();
        Self {
            id: Uuid::new_v4(),
            list_id,
            title: title.into(),
            description: None,
            position: 0,
            priority: Priority::default(),
            due_date: None,
            is_completed: false,
            created_by,
            assignees: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply_patch(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(due_date) = &patch.due_date {
            self.due_date = due_date.clone();
        }
        if let Some(done) = patch.is_completed {
            self.is_completed = done;
        }
    }
}

/// Partial task update. Position and list are changed only through a move.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<Priority>,
    pub due_date: Option<Option<String>>,
    pub is_completed: Option<bool>,
}

/// Input for creating a task; it is appended at the end of its list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub list_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub due_date: Option<String>,
}

impl NewTask {
    pub fn titled(list_id: Uuid, title: impl Into<String>) -> Self {
        Self {
            list_id,
            title: title.into(),
            description: None,
            priority: Priority::default(),
            due_date: None,
        }
    }
}

/// A list together with its ordered tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListWithTasks {
    pub list: List,
    pub tasks: Vec<Task>,
}

/// Full board state as returned by a re-fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub board: Board,
    pub lists: Vec<ListWithTasks>,
    pub members: Vec<BoardMember>,
}

impl BoardSnapshot {
    pub fn task(&self, task_id: Uuid) -> Option<&Task> {
        self.lists
            .iter()
            .flat_map(|l| l.tasks.iter())
            .find(|t| t.id == task_id)
    }

    pub fn list(&self, list_id: Uuid) -> Option<&ListWithTasks> {
        self.lists.iter().find(|l| l.list.id == list_id)
    }
}

// ───────────────────────────────────────────────────────────────────
// Activity log
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
    Move,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Board,
    List,
    Task,
    Member,
}

/// One changed field in an activity entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub from: Option<String>,
    pub to: Option<String>,
}

impl FieldChange {
    pub fn new(field: impl Into<String>, from: Option<String>, to: Option<String>) -> Self {
        Self {
            field: field.into(),
            from,
            to,
        }
    }

    pub fn set(field: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(field, None, Some(to.into()))
    }
}

/// Append-only audit record. Never read back by the ordering or sync paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: Uuid,
    pub board_id: Uuid,
    pub task_id: Option<Uuid>,
    pub user_id: Uuid,
    pub action: ActionKind,
    pub entity: EntityKind,
    pub changes: Vec<FieldChange>,
    pub created_at: u64,
}

impl ActivityEntry {
    pub fn new(
        board_id: Uuid,
        user_id: Uuid,
        action: ActionKind,
        entity: EntityKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            board_id,
            task_id: None,
            user_id,
            action,
            entity,
            changes: Vec::new(),
            created_at: now_secs(),
        }
    }

    pub fn for_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_changes(mut self, changes: Vec<FieldChange>) -> Self {
        self.changes = changes;
        self
    }
}
