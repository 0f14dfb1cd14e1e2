//! Mutation path: access gate → store → broadcast → activity log.
//!
//! Every mutation is committed by the store before anything is broadcast.
//! Broadcasts are fire-and-forget; a failed broadcast or activity write
//! is logged and never fails a mutation that already committed.
//! No-op moves stop after the store call: nothing is broadcast and no
//! activity is recorded.

use std::sync::Arc;
use uuid::Uuid;

use crate::authz::{Access, AccessGate};
use crate::channel::ChannelSlot;
use crate::error::SyncError;
use crate::model::{
    ActionKind, ActivityEntry, Board, BoardMember, BoardPatch, BoardSnapshot, EntityKind,
    FieldChange, Identity, List, ListPatch, NewTask, Role, Task, TaskPatch,
};
use crate::ordering::MoveOutcome;
use crate::protocol::EventPayload;
use crate::storage::{ActivityLog, BoardStore, ListMove, TaskMove};

pub struct BoardService<S: BoardStore> {
    store: Arc<S>,
    gate: AccessGate,
    channel: Arc<ChannelSlot>,
    activity: Arc<dyn ActivityLog>,
}

impl<S: BoardStore + 'static> BoardService<S> {
    pub fn new(store: Arc<S>, channel: Arc<ChannelSlot>, activity: Arc<dyn ActivityLog>) -> Self {
        let gate = AccessGate::new(store.clone());
        Self {
            store,
            gate,
            channel,
            activity,
        }
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // ── tasks ────────────────────────────────────────────────────────

    pub async fn create_task(&self, actor: Uuid, input: NewTask) -> Result<Task, SyncError> {
        let list = self.list_of(input.list_id).await?;
        self.gate
            .require(list.board_id, actor, Some(Role::WRITERS))
            .await?;

        let task = self
            .store
            .create_task(actor, input)
            .await?
            .ok_or(SyncError::NotFound("List"))?;

        self.broadcast(list.board_id, EventPayload::TaskCreated { task: task.clone() })
            .await;
        self.record(
            ActivityEntry::new(list.board_id, actor, ActionKind::Create, EntityKind::Task)
                .for_task(task.id)
                .with_changes(vec![FieldChange::set("title", task.title.clone())]),
        );
        Ok(task)
    }

    pub async fn update_task(
        &self,
        actor: Uuid,
        task_id: Uuid,
        patch: &TaskPatch,
    ) -> Result<Task, SyncError> {
        let (before, board_id) = self.task_of(task_id).await?;
        self.gate.require(board_id, actor, Some(Role::WRITERS)).await?;

        let task = self
            .store
            .update_task(task_id, patch)
            .await?
            .ok_or(SyncError::NotFound("Task"))?;

        self.broadcast(board_id, EventPayload::TaskUpdated { task: task.clone() })
            .await;
        let changes = task_changes(&before, &task);
        if !changes.is_empty() {
            self.record(
                ActivityEntry::new(board_id, actor, ActionKind::Update, EntityKind::Task)
                    .for_task(task_id)
                    .with_changes(changes),
            );
        }
        Ok(task)
    }

    pub async fn delete_task(&self, actor: Uuid, task_id: Uuid) -> Result<Task, SyncError> {
        let (_, board_id) = self.task_of(task_id).await?;
        self.gate.require(board_id, actor, Some(Role::WRITERS)).await?;

        let task = self
            .store
            .delete_task(task_id)
            .await?
            .ok_or(SyncError::NotFound("Task"))?;

        self.broadcast(
            board_id,
            EventPayload::TaskDeleted {
                task_id,
                list_id: task.list_id,
            },
        )
        .await;
        self.record(
            ActivityEntry::new(board_id, actor, ActionKind::Delete, EntityKind::Task)
                .for_task(task_id)
                .with_changes(vec![FieldChange::new("title", Some(task.title.clone()), None)]),
        );
        Ok(task)
    }

    /// Move a task to `target_list` at `position` (clamped).
    ///
    /// The target list must belong to the task's board.
    pub async fn move_task(
        &self,
        actor: Uuid,
        task_id: Uuid,
        target_list: Uuid,
        position: i64,
    ) -> Result<TaskMove, SyncError> {
        let (_, board_id) = self.task_of(task_id).await?;
        let target = self.list_of(target_list).await?;
        if target.board_id != board_id {
            return Err(SyncError::NotFound("List"));
        }
        self.gate.require(board_id, actor, Some(Role::WRITERS)).await?;

        let moved = self
            .store
            .move_task(task_id, target_list, position)
            .await?
            .ok_or(SyncError::NotFound("Task"))?;
        if moved.outcome.is_noop() {
            return Ok(moved);
        }

        self.broadcast(
            board_id,
            EventPayload::TaskMoved {
                task: moved.task.clone(),
                source: moved.source.clone(),
                target: moved.target.clone(),
            },
        )
        .await;

        // Prior placement comes from the store's plan, taken under the
        // board lock, not from the unlocked read above.
        let mut changes = Vec::new();
        if moved.source.list_id != moved.task.list_id {
            changes.push(FieldChange::new(
                "list_id",
                Some(moved.source.list_id.to_string()),
                Some(moved.task.list_id.to_string()),
            ));
        }
        changes.push(position_change(&moved.outcome, moved.task.position));
        self.record(
            ActivityEntry::new(board_id, actor, ActionKind::Move, EntityKind::Task)
                .for_task(task_id)
                .with_changes(changes),
        );
        Ok(moved)
    }

    /// Assign a board member (or the owner) to a task. Idempotent.
    pub async fn assign_user(
        &self,
        actor: Uuid,
        task_id: Uuid,
        user_id: Uuid,
    ) -> Result<Task, SyncError> {
        let (_, board_id) = self.task_of(task_id).await?;
        self.gate.require(board_id, actor, Some(Role::WRITERS)).await?;
        self.gate
            .require(board_id, user_id, None)
            .await
            .map_err(|e| match e {
                SyncError::NotMember => SyncError::NotFound("Member"),
                other => other,
            })?;

        let task = self
            .store
            .assign(task_id, user_id)
            .await?
            .ok_or(SyncError::NotFound("Task"))?;

        self.broadcast(board_id, EventPayload::TaskUpdated { task: task.clone() })
            .await;
        self.record(
            ActivityEntry::new(board_id, actor, ActionKind::Update, EntityKind::Task)
                .for_task(task_id)
                .with_changes(vec![FieldChange::set("assignee", user_id.to_string())]),
        );
        Ok(task)
    }

    pub async fn unassign_user(
        &self,
        actor: Uuid,
        task_id: Uuid,
        user_id: Uuid,
    ) -> Result<Task, SyncError> {
        let (_, board_id) = self.task_of(task_id).await?;
        self.gate.require(board_id, actor, Some(Role::WRITERS)).await?;

        let task = self
            .store
            .unassign(task_id, user_id)
            .await?
            .ok_or(SyncError::NotFound("Task"))?;

        self.broadcast(board_id, EventPayload::TaskUpdated { task: task.clone() })
            .await;
        self.record(
            ActivityEntry::new(board_id, actor, ActionKind::Update, EntityKind::Task)
                .for_task(task_id)
                .with_changes(vec![FieldChange::new(
                    "assignee",
                    Some(user_id.to_string()),
                    None,
                )]),
        );
        Ok(task)
    }

    // ── lists ────────────────────────────────────────────────────────

    pub async fn create_list(
        &self,
        actor: Uuid,
        board_id: Uuid,
        name: &str,
    ) -> Result<List, SyncError> {
        self.gate.require(board_id, actor, Some(Role::WRITERS)).await?;

        let list = self
            .store
            .create_list(board_id, name)
            .await?
            .ok_or(SyncError::NotFound("Board"))?;

        self.broadcast(board_id, EventPayload::ListCreated { list: list.clone() })
            .await;
        self.record(
            ActivityEntry::new(board_id, actor, ActionKind::Create, EntityKind::List)
                .with_changes(vec![FieldChange::set("name", list.name.clone())]),
        );
        Ok(list)
    }

    pub async fn update_list(
        &self,
        actor: Uuid,
        list_id: Uuid,
        patch: &ListPatch,
    ) -> Result<List, SyncError> {
        let before = self.list_of(list_id).await?;
        self.gate
            .require(before.board_id, actor, Some(Role::WRITERS))
            .await?;

        let list = self
            .store
            .update_list(list_id, patch)
            .await?
            .ok_or(SyncError::NotFound("List"))?;

        self.broadcast(
            list.board_id,
            EventPayload::ListUpdated {
                list: list.clone(),
                order: None,
            },
        )
        .await;
        if before.name != list.name {
            self.record(
                ActivityEntry::new(list.board_id, actor, ActionKind::Update, EntityKind::List)
                    .with_changes(vec![FieldChange::new(
                        "name",
                        Some(before.name),
                        Some(list.name.clone()),
                    )]),
            );
        }
        Ok(list)
    }

    /// Reorder a list within its board. The broadcast carries the board's
    /// full list order.
    pub async fn move_list(
        &self,
        actor: Uuid,
        list_id: Uuid,
        position: i64,
    ) -> Result<ListMove, SyncError> {
        let before = self.list_of(list_id).await?;
        self.gate
            .require(before.board_id, actor, Some(Role::WRITERS))
            .await?;

        let moved = self
            .store
            .move_list(list_id, position)
            .await?
            .ok_or(SyncError::NotFound("List"))?;
        if moved.outcome.is_noop() {
            return Ok(moved);
        }

        self.broadcast(
            before.board_id,
            EventPayload::ListUpdated {
                list: moved.list.clone(),
                order: Some(moved.order.clone()),
            },
        )
        .await;
        self.record(
            ActivityEntry::new(before.board_id, actor, ActionKind::Move, EntityKind::List)
                .with_changes(vec![position_change(&moved.outcome, moved.list.position)]),
        );
        Ok(moved)
    }

    /// Delete a list together with its tasks.
    pub async fn delete_list(&self, actor: Uuid, list_id: Uuid) -> Result<List, SyncError> {
        let list = self.list_of(list_id).await?;
        self.gate
            .require(list.board_id, actor, Some(Role::WRITERS))
            .await?;

        let list = self
            .store
            .delete_list(list_id)
            .await?
            .ok_or(SyncError::NotFound("List"))?;

        self.broadcast(list.board_id, EventPayload::ListDeleted { list_id })
            .await;
        self.record(
            ActivityEntry::new(list.board_id, actor, ActionKind::Delete, EntityKind::List)
                .with_changes(vec![FieldChange::new("name", Some(list.name.clone()), None)]),
        );
        Ok(list)
    }

    // ── board & membership ───────────────────────────────────────────

    /// Create a board owned by `actor`. Nobody can be watching it yet, so
    /// nothing is broadcast.
    pub async fn create_board(&self, actor: Uuid, name: &str) -> Result<Board, SyncError> {
        let board = self.store.create_board(Board::new(actor, name)).await?;
        self.record(
            ActivityEntry::new(board.id, actor, ActionKind::Create, EntityKind::Board)
                .with_changes(vec![FieldChange::set("name", board.name.clone())]),
        );
        Ok(board)
    }

    pub async fn update_board(
        &self,
        actor: Uuid,
        board_id: Uuid,
        patch: &BoardPatch,
    ) -> Result<Board, SyncError> {
        self.gate.require(board_id, actor, Some(Role::ADMINS)).await?;

        let board = self
            .store
            .update_board(board_id, patch)
            .await?
            .ok_or(SyncError::NotFound("Board"))?;

        self.broadcast(board_id, EventPayload::BoardUpdated { board: board.clone() })
            .await;
        let mut changes = Vec::new();
        if let Some(name) = &patch.name {
            changes.push(FieldChange::set("name", name.clone()));
        }
        if let Some(archived) = patch.is_archived {
            changes.push(FieldChange::set("is_archived", archived.to_string()));
        }
        self.record(
            ActivityEntry::new(board_id, actor, ActionKind::Update, EntityKind::Board)
                .with_changes(changes),
        );
        Ok(board)
    }

    /// Delete a board with its lists, tasks and members. Admins only.
    ///
    /// Nothing is broadcast; the board's room drains as watchers leave.
    pub async fn delete_board(&self, actor: Uuid, board_id: Uuid) -> Result<Board, SyncError> {
        self.gate.require(board_id, actor, Some(Role::ADMINS)).await?;

        let board = self
            .store
            .delete_board(board_id)
            .await?
            .ok_or(SyncError::NotFound("Board"))?;

        log::info!("Board {board_id} deleted by {actor}");
        self.record(
            ActivityEntry::new(board_id, actor, ActionKind::Delete, EntityKind::Board)
                .with_changes(vec![FieldChange::new("name", Some(board.name.clone()), None)]),
        );
        Ok(board)
    }

    /// Add or re-role a member.
    pub async fn add_member(
        &self,
        actor: Uuid,
        board_id: Uuid,
        identity: &Identity,
        role: Role,
    ) -> Result<BoardMember, SyncError> {
        self.gate.require(board_id, actor, Some(Role::ADMINS)).await?;

        let member = self
            .store
            .add_member(BoardMember::new(board_id, identity, role))
            .await?
            .ok_or(SyncError::NotFound("Board"))?;

        self.broadcast(board_id, EventPayload::MemberAdded { member: member.clone() })
            .await;
        self.record(
            ActivityEntry::new(board_id, actor, ActionKind::Create, EntityKind::Member)
                .with_changes(vec![
                    FieldChange::set("user_id", member.user_id.to_string()),
                    FieldChange::set("role", role.as_str()),
                ]),
        );
        Ok(member)
    }

    pub async fn remove_member(
        &self,
        actor: Uuid,
        board_id: Uuid,
        user_id: Uuid,
    ) -> Result<BoardMember, SyncError> {
        self.gate.require(board_id, actor, Some(Role::ADMINS)).await?;

        let member = self
            .store
            .remove_member(board_id, user_id)
            .await?
            .ok_or(SyncError::NotFound("Member"))?;

        self.broadcast(board_id, EventPayload::MemberRemoved { user_id })
            .await;
        self.record(
            ActivityEntry::new(board_id, actor, ActionKind::Delete, EntityKind::Member)
                .with_changes(vec![FieldChange::new(
                    "user_id",
                    Some(user_id.to_string()),
                    None,
                )]),
        );
        Ok(member)
    }

    // ── reads ────────────────────────────────────────────────────────

    /// Full board state, for first load and for recovery after a missed
    /// event or a failed optimistic edit.
    pub async fn snapshot(&self, actor: Uuid, board_id: Uuid) -> Result<BoardSnapshot, SyncError> {
        self.gate.require(board_id, actor, None).await?;
        self.store
            .snapshot(board_id)
            .await?
            .ok_or(SyncError::NotFound("Board"))
    }

    /// Boards `actor` owns or belongs to, most recently updated first.
    pub async fn boards_for(&self, actor: Uuid) -> Result<Vec<Board>, SyncError> {
        Ok(self.store.boards_for(actor).await?)
    }

    /// Access level of `actor` on a board.
    pub async fn access(&self, actor: Uuid, board_id: Uuid) -> Result<Access, SyncError> {
        self.gate.require(board_id, actor, None).await
    }

    /// Newest activity entries of a board.
    pub async fn board_activity(
        &self,
        actor: Uuid,
        board_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ActivityEntry>, SyncError> {
        self.gate.require(board_id, actor, None).await?;
        Ok(self.activity.recent(board_id, limit)?)
    }

    /// Newest activity entries touching one task.
    pub async fn task_activity(
        &self,
        actor: Uuid,
        task_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ActivityEntry>, SyncError> {
        let (_, board_id) = self.task_of(task_id).await?;
        self.gate.require(board_id, actor, None).await?;
        Ok(self.activity.for_task(task_id, limit)?)
    }

    // ── helpers ──────────────────────────────────────────────────────

    async fn list_of(&self, list_id: Uuid) -> Result<List, SyncError> {
        self.store
            .list(list_id)
            .await?
            .ok_or(SyncError::NotFound("List"))
    }

    async fn task_of(&self, task_id: Uuid) -> Result<(Task, Uuid), SyncError> {
        let task = self
            .store
            .task(task_id)
            .await?
            .ok_or(SyncError::NotFound("Task"))?;
        let list = self.list_of(task.list_id).await?;
        Ok((task, list.board_id))
    }

    async fn broadcast(&self, board_id: Uuid, payload: EventPayload) {
        let kind = payload.kind();
        if let Err(e) = self.channel.broadcast_to_board(board_id, payload).await {
            log::warn!(
                "{} for board:{board_id} not broadcast: {e}",
                kind.wire_name()
            );
        }
    }

    fn record(&self, entry: ActivityEntry) {
        if let Err(e) = self.activity.record(&entry) {
            log::error!(
                "Failed to record activity for board {}: {e}",
                entry.board_id
            );
        }
    }
}

fn position_change(outcome: &MoveOutcome, to: u32) -> FieldChange {
    let from = match outcome {
        MoveOutcome::Moved(plan) => plan.from_position,
        MoveOutcome::Unchanged => to,
    };
    FieldChange::new("position", Some(from.to_string()), Some(to.to_string()))
}

fn task_changes(before: &Task, after: &Task) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    if before.title != after.title {
        changes.push(FieldChange::new(
            "title",
            Some(before.title.clone()),
            Some(after.title.clone()),
        ));
    }
    if before.description != after.description {
        changes.push(FieldChange::new(
            "description",
            before.description.clone(),
            after.description.clone(),
        ));
    }
    if before.priority != after.priority {
        changes.push(FieldChange::new(
            "priority",
            Some(format!("{:?}", before.priority).to_lowercase()),
            Some(format!("{:?}", after.priority).to_lowercase()),
        ));
    }
    if before.due_date != after.due_date {
        changes.push(FieldChange::new(
            "due_date",
            before.due_date.clone(),
            after.due_date.clone(),
        ));
    }
    if before.is_completed != after.is_completed {
        changes.push(FieldChange::new(
            "is_completed",
            Some(before.is_completed.to_string()),
            Some(after.is_completed.to_string()),
        ));
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::OutboxReceiver;
    use crate::channel::{ChannelConfig, ChannelManager};
    use crate::error::StoreError;
    use crate::identity::StaticTokenProvider;
    use crate::model::Priority;
    use crate::protocol::{EventKind, ServerMessage};
    use crate::storage::{AccessLookup, MemoryActivityLog, MemoryStore};

    struct Harness {
        service: BoardService<MemoryStore>,
        store: Arc<MemoryStore>,
        activity: Arc<MemoryActivityLog>,
        manager: Arc<ChannelManager>,
        owner: Identity,
        board: Board,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let activity = Arc::new(MemoryActivityLog::new());
        let manager = Arc::new(ChannelManager::new(
            Arc::new(StaticTokenProvider::new()),
            ChannelConfig::default(),
        ));
        let slot = Arc::new(ChannelSlot::installed(manager.clone()));
        let service = BoardService::new(store.clone(), slot, activity.clone());

        let owner = Identity::new(Uuid::new_v4(), "owner@example.com", "Owner");
        let board = store
            .create_board(Board::new(owner.user_id, "Launch"))
            .await
            .unwrap();
        Harness {
            service,
            store,
            activity,
            manager,
            owner,
            board,
        }
    }

    impl Harness {
        async fn watch(&self) -> OutboxReceiver {
            let (conn, rx) = self.manager.connect(self.owner.clone()).await;
            self.manager.join_room(conn, self.board.id).await.unwrap();
            rx
        }

        async fn member(&self, name: &str, role: Role) -> Uuid {
            let identity = Identity::new(Uuid::new_v4(), format!("{name}@example.com"), name);
            self.service
                .add_member(self.owner.user_id, self.board.id, &identity, role)
                .await
                .unwrap();
            identity.user_id
        }
    }

    fn next_kind(rx: &mut OutboxReceiver) -> Option<EventKind> {
        let frame = rx.try_recv().ok()?;
        match ServerMessage::decode(&frame).ok()? {
            ServerMessage::Event(event) => Some(event.kind()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_create_and_move_broadcast_full_orders() {
        let h = harness().await;
        let owner = h.owner.user_id;
        let todo = h.service.create_list(owner, h.board.id, "Todo").await.unwrap();
        let done = h.service.create_list(owner, h.board.id, "Done").await.unwrap();
        let x = h.service.create_task(owner, NewTask::titled(todo.id, "X")).await.unwrap();
        let y = h.service.create_task(owner, NewTask::titled(todo.id, "Y")).await.unwrap();
        assert_eq!((x.position, y.position), (0, 1));

        let mut rx = h.watch().await;
        let moved = h.service.move_task(owner, x.id, done.id, 0).await.unwrap();
        assert_eq!(moved.source.tasks.len(), 1);
        assert_eq!(moved.source.tasks[0].id, y.id);
        assert_eq!(moved.source.tasks[0].position, 0);
        let target = moved.target.unwrap();
        assert_eq!(target.tasks[0].id, x.id);
        assert_eq!(next_kind(&mut rx), Some(EventKind::TaskMoved));

        let entries = h.activity.for_task(x.id, 10).unwrap();
        assert_eq!(entries[0].action, ActionKind::Move);
        assert_eq!(entries[0].changes[0].field, "list_id");
    }

    #[tokio::test]
    async fn test_noop_move_is_silent() {
        let h = harness().await;
        let owner = h.owner.user_id;
        let todo = h.service.create_list(owner, h.board.id, "Todo").await.unwrap();
        let _x = h.service.create_task(owner, NewTask::titled(todo.id, "X")).await.unwrap();
        let y = h.service.create_task(owner, NewTask::titled(todo.id, "Y")).await.unwrap();
        let logged = h.activity.len();

        let mut rx = h.watch().await;
        let moved = h.service.move_task(owner, y.id, todo.id, 2).await.unwrap();
        assert!(moved.outcome.is_noop());
        assert_eq!(next_kind(&mut rx), None);
        assert_eq!(h.activity.len(), logged);

        let list_move = h.service.move_list(owner, todo.id, 0).await.unwrap();
        assert!(list_move.outcome.is_noop());
        assert_eq!(next_kind(&mut rx), None);
    }

    #[tokio::test]
    async fn test_viewer_cannot_mutate() {
        let h = harness().await;
        let owner = h.owner.user_id;
        let viewer = h.member("viewer", Role::Viewer).await;
        let todo = h.service.create_list(owner, h.board.id, "Todo").await.unwrap();

        let err = h
            .service
            .create_task(viewer, NewTask::titled(todo.id, "nope"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Requires one of: admin, editor");
        assert!(h.store.list_tasks(todo.id).await.unwrap().is_empty());

        // Viewers can still read.
        let snapshot = h.service.snapshot(viewer, h.board.id).await.unwrap();
        assert_eq!(snapshot.lists.len(), 1);
    }

    #[tokio::test]
    async fn test_editor_cannot_manage_board() {
        let h = harness().await;
        let editor = h.member("editor", Role::Editor).await;
        let err = h
            .service
            .update_board(
                editor,
                h.board.id,
                &BoardPatch {
                    name: Some("Mine".into()),
                    ..BoardPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::RoleMismatch(vec![Role::Admin]));
    }

    #[tokio::test]
    async fn test_update_records_field_changes() {
        let h = harness().await;
        let owner = h.owner.user_id;
        let todo = h.service.create_list(owner, h.board.id, "Todo").await.unwrap();
        let task = h.service.create_task(owner, NewTask::titled(todo.id, "Draft")).await.unwrap();

        let mut rx = h.watch().await;
        let updated = h
            .service
            .update_task(
                owner,
                task.id,
                &TaskPatch {
                    title: Some("Final".into()),
                    priority: Some(Priority::High),
                    ..TaskPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "Final");
        assert_eq!(next_kind(&mut rx), Some(EventKind::TaskUpdated));

        let entry = &h.activity.for_task(task.id, 1).unwrap()[0];
        let fields: Vec<&str> = entry.changes.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["title", "priority"]);
        assert_eq!(entry.changes[1].to.as_deref(), Some("high"));
    }

    #[tokio::test]
    async fn test_assignment_requires_board_member() {
        let h = harness().await;
        let owner = h.owner.user_id;
        let editor = h.member("editor", Role::Editor).await;
        let todo = h.service.create_list(owner, h.board.id, "Todo").await.unwrap();
        let task = h.service.create_task(owner, NewTask::titled(todo.id, "T")).await.unwrap();

        let assigned = h.service.assign_user(owner, task.id, editor).await.unwrap();
        assert_eq!(assigned.assignees, vec![editor]);
        let again = h.service.assign_user(owner, task.id, editor).await.unwrap();
        assert_eq!(again.assignees, vec![editor]);

        let err = h
            .service
            .assign_user(owner, task.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::NotFound("Member"));

        let cleared = h.service.unassign_user(owner, task.id, editor).await.unwrap();
        assert!(cleared.assignees.is_empty());
    }

    #[tokio::test]
    async fn test_member_lifecycle_broadcasts() {
        let h = harness().await;
        let mut rx = h.watch().await;
        let user = h.member("new", Role::Editor).await;
        assert_eq!(next_kind(&mut rx), Some(EventKind::MemberAdded));

        h.service
            .remove_member(h.owner.user_id, h.board.id, user)
            .await
            .unwrap();
        assert_eq!(next_kind(&mut rx), Some(EventKind::MemberRemoved));

        let err = h
            .service
            .remove_member(h.owner.user_id, h.board.id, user)
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::NotFound("Member"));
    }

    #[tokio::test]
    async fn test_move_to_other_board_list_rejected() {
        let h = harness().await;
        let owner = h.owner.user_id;
        let todo = h.service.create_list(owner, h.board.id, "Todo").await.unwrap();
        let task = h.service.create_task(owner, NewTask::titled(todo.id, "T")).await.unwrap();

        let other = h.store.create_board(Board::new(owner, "Other")).await.unwrap();
        let foreign = h.service.create_list(owner, other.id, "Elsewhere").await.unwrap();

        let err = h
            .service
            .move_task(owner, task.id, foreign.id, 0)
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::NotFound("List"));
    }

    #[tokio::test]
    async fn test_store_outage_is_indeterminate() {
        let h = harness().await;
        h.store.set_available(false);
        let err = h
            .service
            .snapshot(h.owner.user_id, h.board.id)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Store(StoreError::Unavailable(_))));
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_mutation_succeeds_before_channel_install() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let board = store.create_board(Board::new(owner, "Early")).await.unwrap();
        let service = BoardService::new(
            store.clone(),
            Arc::new(ChannelSlot::new()),
            Arc::new(MemoryActivityLog::new()),
        );

        let list = service.create_list(owner, board.id, "Todo").await.unwrap();
        assert_eq!(store.lists(board.id).await.unwrap(), vec![list]);
    }

    #[tokio::test]
    async fn test_delete_list_and_activity_feed() {
        let h = harness().await;
        let owner = h.owner.user_id;
        let a = h.service.create_list(owner, h.board.id, "A").await.unwrap();
        let b = h.service.create_list(owner, h.board.id, "B").await.unwrap();
        h.service.create_task(owner, NewTask::titled(a.id, "t")).await.unwrap();

        h.service.delete_list(owner, a.id).await.unwrap();
        let lists = h.store.lists(h.board.id).await.unwrap();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].id, b.id);
        assert_eq!(lists[0].position, 0);

        let feed = h.service.board_activity(owner, h.board.id, 2).await.unwrap();
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].action, ActionKind::Delete);
        assert_eq!(feed[0].entity, EntityKind::List);
    }

    #[tokio::test]
    async fn test_move_activity_uses_committed_positions() {
        let h = harness().await;
        let owner = h.owner.user_id;
        let todo = h.service.create_list(owner, h.board.id, "Todo").await.unwrap();
        let done = h.service.create_list(owner, h.board.id, "Done").await.unwrap();
        for title in ["a", "b"] {
            h.service.create_task(owner, NewTask::titled(todo.id, title)).await.unwrap();
        }
        let c = h.service.create_task(owner, NewTask::titled(todo.id, "c")).await.unwrap();

        h.service.move_task(owner, c.id, todo.id, 0).await.unwrap();
        let entry = &h.activity.for_task(c.id, 1).unwrap()[0];
        assert_eq!(entry.changes.len(), 1);
        assert_eq!(entry.changes[0].from.as_deref(), Some("2"));
        assert_eq!(entry.changes[0].to.as_deref(), Some("0"));

        h.service.move_task(owner, c.id, done.id, 5).await.unwrap();
        let entry = &h.activity.for_task(c.id, 1).unwrap()[0];
        assert_eq!(entry.changes[0].from, Some(todo.id.to_string()));
        assert_eq!(entry.changes[1].from.as_deref(), Some("0"));
        assert_eq!(entry.changes[1].to.as_deref(), Some("0"));

        h.service.move_list(owner, done.id, 0).await.unwrap();
        let entry = &h.activity.recent(h.board.id, 1).unwrap()[0];
        assert_eq!(entry.entity, EntityKind::List);
        assert_eq!(entry.changes[0].from.as_deref(), Some("1"));
        assert_eq!(entry.changes[0].to.as_deref(), Some("0"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_moves_never_record_a_standstill() {
        let h = harness().await;
        let owner = h.owner.user_id;
        let todo = h.service.create_list(owner, h.board.id, "Todo").await.unwrap();
        let mut tasks = Vec::new();
        for title in ["a", "b", "c", "d"] {
            tasks.push(h.service.create_task(owner, NewTask::titled(todo.id, title)).await.unwrap());
        }
        let moving = tasks[0].id;
        let service = Arc::new(h.service);

        let mut handles = Vec::new();
        for i in 0..20i64 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.move_task(owner, moving, todo.id, (i % 2) * 3).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let entries = h.activity.for_task(moving, 100).unwrap();
        let moves: Vec<_> = entries
            .iter()
            .filter(|e| e.action == ActionKind::Move)
            .collect();
        assert!(!moves.is_empty());
        for entry in moves {
            assert_ne!(entry.changes[0].from, entry.changes[0].to);
        }
    }

    #[tokio::test]
    async fn test_delete_board_requires_admin() {
        let h = harness().await;
        let owner = h.owner.user_id;
        let editor = h.member("editor", Role::Editor).await;
        let todo = h.service.create_list(owner, h.board.id, "Todo").await.unwrap();
        let task = h.service.create_task(owner, NewTask::titled(todo.id, "t")).await.unwrap();

        let err = h.service.delete_board(editor, h.board.id).await.unwrap_err();
        assert_eq!(err, SyncError::RoleMismatch(vec![Role::Admin]));
        assert!(h.store.board(h.board.id).await.unwrap().is_some());

        let deleted = h.service.delete_board(owner, h.board.id).await.unwrap();
        assert_eq!(deleted.id, h.board.id);
        assert_eq!(
            h.service.snapshot(owner, h.board.id).await.unwrap_err(),
            SyncError::NotFound("Board")
        );
        assert_eq!(
            h.service.update_task(owner, task.id, &TaskPatch::default()).await.unwrap_err(),
            SyncError::NotFound("Task")
        );
        assert!(h.service.boards_for(editor).await.unwrap().is_empty());

        let trail = h.activity.recent(h.board.id, 1).unwrap();
        assert_eq!(trail[0].action, ActionKind::Delete);
        assert_eq!(trail[0].entity, EntityKind::Board);
    }

    #[tokio::test]
    async fn test_boards_for_lists_owned_and_shared() {
        let h = harness().await;
        let owner = h.owner.user_id;
        let viewer = h.member("viewer", Role::Viewer).await;
        let own = h.service.create_board(viewer, "Personal").await.unwrap();

        let boards = h.service.boards_for(viewer).await.unwrap();
        let ids: Vec<Uuid> = boards.iter().map(|b| b.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&own.id) && ids.contains(&h.board.id));

        let boards = h.service.boards_for(owner).await.unwrap();
        assert_eq!(boards, vec![h.board.clone()]);
    }
}
