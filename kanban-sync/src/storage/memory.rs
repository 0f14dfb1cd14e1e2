//! In-memory authoritative store.
//!
//! Each board lives behind its own `Mutex`, which is the critical section
//! for every position-changing mutation on that board (list reorders and
//! task moves across lists alike). Two index maps route list and task ids
//! to their board without taking the board lock.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{AccessLookup, BoardStore, ListMove, TaskMove};
use crate::error::StoreError;
use crate::model::{
    now_secs, Board, BoardMember, BoardPatch, BoardSnapshot, List, ListPatch, ListWithTasks,
    NewTask, Task, TaskPatch,
};
use crate::ordering::{self, MoveOutcome};
use crate::protocol::ListOrder;

struct BoardState {
    board: Board,
    members: Vec<BoardMember>,
    /// Sorted by position.
    lists: Vec<List>,
    /// list id → tasks sorted by position
    tasks: HashMap<Uuid, Vec<Task>>,
}

impl BoardState {
    fn new(board: Board) -> Self {
        Self {
            board,
            members: Vec::new(),
            lists: Vec::new(),
            tasks: HashMap::new(),
        }
    }

    /// (list id, index) of a task.
    fn locate(&self, task_id: Uuid) -> Option<(Uuid, usize)> {
        self.tasks.iter().find_map(|(list_id, tasks)| {
            tasks
                .iter()
                .position(|t| t.id == task_id)
                .map(|index| (*list_id, index))
        })
    }

    fn task_mut(&mut self, task_id: Uuid) -> Option<&mut Task> {
        self.tasks
            .values_mut()
            .flat_map(|tasks| tasks.iter_mut())
            .find(|t| t.id == task_id)
    }

    fn order(&self, list_id: Uuid) -> ListOrder {
        ListOrder {
            list_id,
            tasks: self.tasks.get(&list_id).cloned().unwrap_or_default(),
        }
    }
}

type SharedBoard = Arc<Mutex<BoardState>>;

/// Process-local `BoardStore`.
pub struct MemoryStore {
    boards: RwLock<HashMap<Uuid, SharedBoard>>,
    /// list id → board id
    list_boards: RwLock<HashMap<Uuid, Uuid>>,
    /// task id → board id
    task_boards: RwLock<HashMap<Uuid, Uuid>>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            boards: RwLock::new(HashMap::new()),
            list_boards: RwLock::new(HashMap::new()),
            task_boards: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate a backend outage: while unavailable every call fails
    /// with `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }

    async fn shared_board(&self, board_id: Uuid) -> Option<SharedBoard> {
        self.boards.read().await.get(&board_id).cloned()
    }

    async fn board_of_list(&self, list_id: Uuid) -> Option<SharedBoard> {
        let board_id = *self.list_boards.read().await.get(&list_id)?;
        self.shared_board(board_id).await
    }

    async fn board_of_task(&self, task_id: Uuid) -> Option<SharedBoard> {
        let board_id = *self.task_boards.read().await.get(&task_id)?;
        self.shared_board(board_id).await
    }
}

#[async_trait]
impl AccessLookup for MemoryStore {
    async fn board(&self, board_id: Uuid) -> Result<Option<Board>, StoreError> {
        self.ensure_available()?;
        match self.shared_board(board_id).await {
            Some(shared) => Ok(Some(shared.lock().await.board.clone())),
            None => Ok(None),
        }
    }

    async fn member(
        &self,
        board_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<BoardMember>, StoreError> {
        self.ensure_available()?;
        let Some(shared) = self.shared_board(board_id).await else {
            return Ok(None);
        };
        let state = shared.lock().await;
        Ok(state.members.iter().find(|m| m.user_id == user_id).cloned())
    }
}

#[async_trait]
impl BoardStore for MemoryStore {
    async fn create_board(&self, board: Board) -> Result<Board, StoreError> {
        self.ensure_available()?;
        let mut boards = self.boards.write().await;
        boards.insert(board.id, Arc::new(Mutex::new(BoardState::new(board.clone()))));
        Ok(board)
    }

    async fn update_board(
        &self,
        board_id: Uuid,
        patch: &BoardPatch,
    ) -> Result<Option<Board>, StoreError> {
        self.ensure_available()?;
        let Some(shared) = self.shared_board(board_id).await else {
            return Ok(None);
        };
        let mut state = shared.lock().await;
        state.board.apply_patch(patch);
        state.board.updated_at = now_secs();
        Ok(Some(state.board.clone()))
    }

    async fn delete_board(&self, board_id: Uuid) -> Result<Option<Board>, StoreError> {
        self.ensure_available()?;
        let Some(shared) = self.boards.write().await.remove(&board_id) else {
            return Ok(None);
        };
        // Pending mutations on this board finish before the indexes go.
        let state = shared.lock().await;

        let mut list_boards = self.list_boards.write().await;
        for list in &state.lists {
            list_boards.remove(&list.id);
        }
        let mut task_boards = self.task_boards.write().await;
        for task in state.tasks.values().flatten() {
            task_boards.remove(&task.id);
        }
        Ok(Some(state.board.clone()))
    }

    async fn boards_for(&self, user_id: Uuid) -> Result<Vec<Board>, StoreError> {
        self.ensure_available()?;
        let shared: Vec<SharedBoard> = self.boards.read().await.values().cloned().collect();
        let mut boards = Vec::new();
        for board in shared {
            let state = board.lock().await;
            if state.board.owner_id == user_id
                || state.members.iter().any(|m| m.user_id == user_id)
            {
                boards.push(state.board.clone());
            }
        }
        boards.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(boards)
    }

    async fn members(&self, board_id: Uuid) -> Result<Vec<BoardMember>, StoreError> {
        self.ensure_available()?;
        match self.shared_board(board_id).await {
            Some(shared) => Ok(shared.lock().await.members.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn add_member(&self, member: BoardMember) -> Result<Option<BoardMember>, StoreError> {
        self.ensure_available()?;
        let Some(shared) = self.shared_board(member.board_id).await else {
            return Ok(None);
        };
        let mut state = shared.lock().await;
        match state.members.iter_mut().find(|m| m.user_id == member.user_id) {
            Some(existing) => *existing = member.clone(),
            None => state.members.push(member.clone()),
        }
        Ok(Some(member))
    }

    async fn remove_member(
        &self,
        board_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<BoardMember>, StoreError> {
        self.ensure_available()?;
        let Some(shared) = self.shared_board(board_id).await else {
            return Ok(None);
        };
        let mut state = shared.lock().await;
        let index = state.members.iter().position(|m| m.user_id == user_id);
        Ok(index.map(|i| state.members.remove(i)))
    }

    async fn list(&self, list_id: Uuid) -> Result<Option<List>, StoreError> {
        self.ensure_available()?;
        let Some(shared) = self.board_of_list(list_id).await else {
            return Ok(None);
        };
        let state = shared.lock().await;
        Ok(state.lists.iter().find(|l| l.id == list_id).cloned())
    }

    async fn lists(&self, board_id: Uuid) -> Result<Vec<List>, StoreError> {
        self.ensure_available()?;
        match self.shared_board(board_id).await {
            Some(shared) => Ok(shared.lock().await.lists.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn create_list(&self, board_id: Uuid, name: &str) -> Result<Option<List>, StoreError> {
        self.ensure_available()?;
        let Some(shared) = self.shared_board(board_id).await else {
            return Ok(None);
        };
        let mut state = shared.lock().await;
        let mut list = List::new(board_id, name);
        list.position = ordering::append(&mut state.lists, list.clone());
        state.tasks.insert(list.id, Vec::new());
        self.list_boards.write().await.insert(list.id, board_id);
        Ok(Some(list))
    }

    async fn update_list(
        &self,
        list_id: Uuid,
        patch: &ListPatch,
    ) -> Result<Option<List>, StoreError> {
        self.ensure_available()?;
        let Some(shared) = self.board_of_list(list_id).await else {
            return Ok(None);
        };
        let mut state = shared.lock().await;
        let Some(list) = state.lists.iter_mut().find(|l| l.id == list_id) else {
            return Ok(None);
        };
        if let Some(name) = &patch.name {
            list.name = name.clone();
        }
        list.updated_at = now_secs();
        Ok(Some(list.clone()))
    }

    async fn move_list(
        &self,
        list_id: Uuid,
        position: i64,
    ) -> Result<Option<ListMove>, StoreError> {
        self.ensure_available()?;
        let Some(shared) = self.board_of_list(list_id).await else {
            return Ok(None);
        };
        let mut state = shared.lock().await;
        let Some(outcome) = ordering::reorder(&mut state.lists, list_id, position) else {
            return Ok(None);
        };
        let now = now_secs();
        let Some(list) = state.lists.iter_mut().find(|l| l.id == list_id) else {
            return Ok(None);
        };
        if !outcome.is_noop() {
            list.updated_at = now;
        }
        let list = list.clone();
        Ok(Some(ListMove {
            list,
            outcome,
            order: state.lists.clone(),
        }))
    }

    async fn delete_list(&self, list_id: Uuid) -> Result<Option<List>, StoreError> {
        self.ensure_available()?;
        let Some(shared) = self.board_of_list(list_id).await else {
            return Ok(None);
        };
        let mut state = shared.lock().await;
        let Some(list) = ordering::remove(&mut state.lists, list_id) else {
            return Ok(None);
        };
        let tasks = state.tasks.remove(&list_id).unwrap_or_default();

        self.list_boards.write().await.remove(&list_id);
        let mut task_boards = self.task_boards.write().await;
        for task in &tasks {
            task_boards.remove(&task.id);
        }
        Ok(Some(list))
    }

    async fn task(&self, task_id: Uuid) -> Result<Option<Task>, StoreError> {
        self.ensure_available()?;
        let Some(shared) = self.board_of_task(task_id).await else {
            return Ok(None);
        };
        let mut state = shared.lock().await;
        Ok(state.task_mut(task_id).map(|t| t.clone()))
    }

    async fn list_tasks(&self, list_id: Uuid) -> Result<Vec<Task>, StoreError> {
        self.ensure_available()?;
        let Some(shared) = self.board_of_list(list_id).await else {
            return Ok(Vec::new());
        };
        let state = shared.lock().await;
        Ok(state.tasks.get(&list_id).cloned().unwrap_or_default())
    }

    async fn create_task(
        &self,
        created_by: Uuid,
        input: NewTask,
    ) -> Result<Option<Task>, StoreError> {
        self.ensure_available()?;
        let Some(shared) = self.board_of_list(input.list_id).await else {
            return Ok(None);
        };
        let mut state = shared.lock().await;
        let board_id = state.board.id;
        let Some(siblings) = state.tasks.get_mut(&input.list_id) else {
            return Ok(None);
        };

        let mut task = Task::new(input.list_id, created_by, input.title);
        task.description = input.description;
        task.priority = input.priority;
        task.due_date = input.due_date;
        task.position = ordering::append(siblings, task.clone());

        self.task_boards.write().await.insert(task.id, board_id);
        Ok(Some(task))
    }

    async fn update_task(
        &self,
        task_id: Uuid,
        patch: &TaskPatch,
    ) -> Result<Option<Task>, StoreError> {
        self.ensure_available()?;
        let Some(shared) = self.board_of_task(task_id).await else {
            return Ok(None);
        };
        let mut state = shared.lock().await;
        let Some(task) = state.task_mut(task_id) else {
            return Ok(None);
        };
        task.apply_patch(patch);
        task.updated_at = now_secs();
        Ok(Some(task.clone()))
    }

    async fn delete_task(&self, task_id: Uuid) -> Result<Option<Task>, StoreError> {
        self.ensure_available()?;
        let Some(shared) = self.board_of_task(task_id).await else {
            return Ok(None);
        };
        let mut state = shared.lock().await;
        let Some((list_id, _)) = state.locate(task_id) else {
            return Ok(None);
        };
        let removed = state
            .tasks
            .get_mut(&list_id)
            .and_then(|siblings| ordering::remove(siblings, task_id));
        if removed.is_some() {
            self.task_boards.write().await.remove(&task_id);
        }
        Ok(removed)
    }

    async fn move_task(
        &self,
        task_id: Uuid,
        target_list: Uuid,
        position: i64,
    ) -> Result<Option<TaskMove>, StoreError> {
        self.ensure_available()?;
        let Some(shared) = self.board_of_task(task_id).await else {
            return Ok(None);
        };
        let mut state = shared.lock().await;
        let Some((source_list, _)) = state.locate(task_id) else {
            return Ok(None);
        };
        // Target must be a list of the same board.
        if !state.tasks.contains_key(&target_list) {
            return Ok(None);
        }

        let outcome = if source_list == target_list {
            let Some(siblings) = state.tasks.get_mut(&source_list) else {
                return Ok(None);
            };
            ordering::reorder(siblings, task_id, position)
        } else {
            let mut source = state.tasks.remove(&source_list).unwrap_or_default();
            let outcome = match state.tasks.get_mut(&target_list) {
                Some(target) => {
                    ordering::transfer(&mut source, target, task_id, target_list, position)
                }
                None => None,
            };
            state.tasks.insert(source_list, source);
            outcome
        };
        let Some(outcome) = outcome else {
            return Ok(None);
        };

        let Some(task) = state.task_mut(task_id) else {
            return Ok(None);
        };
        if !outcome.is_noop() {
            task.updated_at = now_secs();
        }
        let task = task.clone();

        let target = (source_list != target_list).then(|| state.order(target_list));
        Ok(Some(TaskMove {
            task,
            outcome,
            source: state.order(source_list),
            target,
        }))
    }

    async fn assign(&self, task_id: Uuid, user_id: Uuid) -> Result<Option<Task>, StoreError> {
        self.ensure_available()?;
        let Some(shared) = self.board_of_task(task_id).await else {
            return Ok(None);
        };
        let mut state = shared.lock().await;
        let Some(task) = state.task_mut(task_id) else {
            return Ok(None);
        };
        if !task.assignees.contains(&user_id) {
            task.assignees.push(user_id);
            task.updated_at = now_secs();
        }
        Ok(Some(task.clone()))
    }

    async fn unassign(&self, task_id: Uuid, user_id: Uuid) -> Result<Option<Task>, StoreError> {
        self.ensure_available()?;
        let Some(shared) = self.board_of_task(task_id).await else {
            return Ok(None);
        };
        let mut state = shared.lock().await;
        let Some(task) = state.task_mut(task_id) else {
            return Ok(None);
        };
        let before = task.assignees.len();
        task.assignees.retain(|id| *id != user_id);
        if task.assignees.len() != before {
            task.updated_at = now_secs();
        }
        Ok(Some(task.clone()))
    }

    async fn snapshot(&self, board_id: Uuid) -> Result<Option<BoardSnapshot>, StoreError> {
        self.ensure_available()?;
        let Some(shared) = self.shared_board(board_id).await else {
            return Ok(None);
        };
        let state = shared.lock().await;
        let lists = state
            .lists
            .iter()
            .map(|list| ListWithTasks {
                list: list.clone(),
                tasks: state.tasks.get(&list.id).cloned().unwrap_or_default(),
            })
            .collect();
        Ok(Some(BoardSnapshot {
            board: state.board.clone(),
            lists,
            members: state.members.clone(),
        }))
    }
}
