//! Client-side merge of board events into a locally held board.
//!
//! The acting client writes its own change immediately (the `optimistic_*`
//! helpers). When the server's echo of that change arrives it finds the
//! state already in place and reports `Applied::Duplicate`. Events from
//! other users are merged the same way, so local and remote edits go
//! through one path.
//!
//! Nothing here returns an error. An event naming an entity we do not
//! hold is simply not relevant to this view.
//!
//! Recovery after a failed mutation is coarse: `replace_snapshot` with a
//! fresh server snapshot, or `rollback` to the state captured by
//! `begin_edit`.

use uuid::Uuid;

use crate::model::{BoardSnapshot, ListWithTasks, Task, TaskPatch};
use crate::ordering::{self, MoveOutcome};
use crate::protocol::{BoardEvent, EventPayload, ListOrder};

/// What an inbound event did to the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    /// Already reflected locally (typically our own echo)
    Duplicate,
    /// Other board, or nothing here refers to it
    Ignored,
}

#[derive(Debug, Clone)]
struct Checkpoint {
    snapshot: BoardSnapshot,
    selected: Option<Task>,
}

/// The board a client is looking at, plus the task open in its detail view.
#[derive(Debug, Clone)]
pub struct BoardView {
    snapshot: BoardSnapshot,
    selected: Option<Task>,
    checkpoint: Option<Checkpoint>,
}

impl BoardView {
    pub fn new(snapshot: BoardSnapshot) -> Self {
        Self {
            snapshot,
            selected: None,
            checkpoint: None,
        }
    }

    pub fn board_id(&self) -> Uuid {
        self.snapshot.board.id
    }

    pub fn snapshot(&self) -> &BoardSnapshot {
        &self.snapshot
    }

    pub fn selected(&self) -> Option<&Task> {
        self.selected.as_ref()
    }

    pub fn tasks(&self, list_id: Uuid) -> Option<&[Task]> {
        self.snapshot.list(list_id).map(|l| l.tasks.as_slice())
    }

    /// Open a task in the detail view.
    pub fn select_task(&mut self, task: Task) {
        self.selected = Some(task);
    }

    pub fn close_task(&mut self) {
        self.selected = None;
    }

    /// Merge one inbound event.
    pub fn apply(&mut self, event: &BoardEvent) -> Applied {
        if event.board_id != self.board_id() {
            return Applied::Ignored;
        }

        match &event.payload {
            EventPayload::TaskCreated { task } => self.task_created(task),
            EventPayload::TaskUpdated { task } => self.task_updated(task),
            EventPayload::TaskDeleted { task_id, .. } => self.task_deleted(*task_id),
            EventPayload::TaskMoved {
                task,
                source,
                target,
            } => self.task_moved(task, source, target.as_ref()),
            EventPayload::ListCreated { list } => {
                if self.snapshot.list(list.id).is_some() {
                    return Applied::Duplicate;
                }
                let entry = ListWithTasks {
                    list: list.clone(),
                    tasks: Vec::new(),
                };
                ordering::insert_at(&mut self.snapshot.lists, entry, i64::from(list.position));
                Applied::Changed
            }
            EventPayload::ListUpdated { list, order } => {
                let mut changed = false;
                if let Some(local) = self.list_mut(list.id) {
                    if local.list.name != list.name || local.list.updated_at != list.updated_at {
                        local.list.name = list.name.clone();
                        local.list.updated_at = list.updated_at;
                        changed = true;
                    }
                }
                if let Some(order) = order {
                    changed |= self.adopt_list_order(order.iter().map(|l| l.id));
                }
                if changed {
                    Applied::Changed
                } else if self.snapshot.list(list.id).is_some() {
                    Applied::Duplicate
                } else {
                    Applied::Ignored
                }
            }
            EventPayload::ListDeleted { list_id } => {
                let Some(removed) = ordering::remove(&mut self.snapshot.lists, *list_id) else {
                    return Applied::Ignored;
                };
                if let Some(selected) = &self.selected {
                    if selected.list_id == removed.list.id {
                        self.selected = None;
                    }
                }
                Applied::Changed
            }
            EventPayload::BoardUpdated { board } => {
                if self.snapshot.board == *board {
                    return Applied::Duplicate;
                }
                self.snapshot.board = board.clone();
                Applied::Changed
            }
            EventPayload::MemberAdded { member } => {
                if self
                    .snapshot
                    .members
                    .iter()
                    .any(|m| m.user_id == member.user_id)
                {
                    return Applied::Duplicate;
                }
                self.snapshot.members.push(member.clone());
                Applied::Changed
            }
            EventPayload::MemberRemoved { user_id } => {
                let before = self.snapshot.members.len();
                self.snapshot.members.retain(|m| m.user_id != *user_id);
                if self.snapshot.members.len() == before {
                    Applied::Ignored
                } else {
                    Applied::Changed
                }
            }
        }
    }

    fn task_created(&mut self, task: &Task) -> Applied {
        if self.snapshot.task(task.id).is_some() {
            return Applied::Duplicate;
        }
        let Some(list) = self.list_mut(task.list_id) else {
            return Applied::Ignored;
        };
        ordering::insert_at(&mut list.tasks, task.clone(), i64::from(task.position));
        Applied::Changed
    }

    /// Shallow merge into every holder. Ordering fields are left alone;
    /// only moves change them.
    fn task_updated(&mut self, incoming: &Task) -> Applied {
        let mut found = false;
        let mut changed = false;

        let holders = self
            .snapshot
            .lists
            .iter_mut()
            .flat_map(|l| l.tasks.iter_mut())
            .chain(self.selected.iter_mut())
            .filter(|t| t.id == incoming.id);
        for held in holders {
            found = true;
            changed |= merge_task(held, incoming);
        }

        match (found, changed) {
            (false, _) => Applied::Ignored,
            (true, false) => Applied::Duplicate,
            (true, true) => Applied::Changed,
        }
    }

    fn task_deleted(&mut self, task_id: Uuid) -> Applied {
        let mut removed = false;
        for list in self.snapshot.lists.iter_mut() {
            removed |= ordering::remove(&mut list.tasks, task_id).is_some();
        }
        if self.selected.as_ref().is_some_and(|t| t.id == task_id) {
            self.selected = None;
            removed = true;
        }
        if removed {
            Applied::Changed
        } else {
            Applied::Ignored
        }
    }

    /// Remove from every list, insert at the target index, renumber. Then
    /// adopt the authoritative orders the event carries for lists we hold.
    fn task_moved(&mut self, task: &Task, source: &ListOrder, target: Option<&ListOrder>) -> Applied {
        let affected: Vec<Uuid> = std::iter::once(source.list_id)
            .chain(target.map(|t| t.list_id))
            .chain(std::iter::once(task.list_id))
            .collect();
        let before: Vec<Option<Vec<Task>>> = affected
            .iter()
            .map(|id| self.tasks(*id).map(<[Task]>::to_vec))
            .collect();

        let mut moving = None;
        for list in self.snapshot.lists.iter_mut() {
            if let Some(local) = ordering::remove(&mut list.tasks, task.id) {
                moving = Some(local);
            }
        }

        if let Some(list) = self.list_mut(task.list_id) {
            let mut placed = match moving {
                Some(mut local) => {
                    merge_task(&mut local, task);
                    local
                }
                None => task.clone(),
            };
            placed.list_id = task.list_id;
            ordering::insert_at(&mut list.tasks, placed, i64::from(task.position));
        }

        for order in std::iter::once(source).chain(target) {
            if let Some(list) = self.list_mut(order.list_id) {
                list.tasks = order.tasks.clone();
                ordering::recontiguate(&mut list.tasks);
            }
        }

        if let Some(selected) = self.selected.as_mut().filter(|t| t.id == task.id) {
            selected.list_id = task.list_id;
            selected.position = task.position;
        }

        let after: Vec<Option<Vec<Task>>> = affected
            .iter()
            .map(|id| self.tasks(*id).map(<[Task]>::to_vec))
            .collect();
        if before.iter().all(Option::is_none) {
            Applied::Ignored
        } else if before == after {
            Applied::Duplicate
        } else {
            Applied::Changed
        }
    }

    /// Reorder local lists to follow `ids`. Unknown ids are skipped,
    /// local lists missing from `ids` keep their relative order at the end.
    fn adopt_list_order(&mut self, ids: impl Iterator<Item = Uuid>) -> bool {
        let before: Vec<Uuid> = self.snapshot.lists.iter().map(|l| l.list.id).collect();
        let mut remaining = std::mem::take(&mut self.snapshot.lists);
        let mut ordered = Vec::with_capacity(remaining.len());
        for id in ids {
            if let Some(index) = remaining.iter().position(|l| l.list.id == id) {
                ordered.push(remaining.remove(index));
            }
        }
        ordered.extend(remaining);
        ordering::recontiguate(&mut ordered);
        self.snapshot.lists = ordered;
        let after: Vec<Uuid> = self.snapshot.lists.iter().map(|l| l.list.id).collect();
        before != after
    }

    fn list_mut(&mut self, list_id: Uuid) -> Option<&mut ListWithTasks> {
        self.snapshot.lists.iter_mut().find(|l| l.list.id == list_id)
    }

    // ── optimistic writes by the acting client ──────────────────────

    /// Show a task before the server confirms it. Returns false if the
    /// list is unknown or the task is already present.
    pub fn optimistic_create_task(&mut self, task: Task) -> bool {
        if self.snapshot.task(task.id).is_some() {
            return false;
        }
        match self.list_mut(task.list_id) {
            Some(list) => {
                ordering::append(&mut list.tasks, task);
                true
            }
            None => false,
        }
    }

    /// Apply a move locally with the same rules the store uses.
    pub fn optimistic_move_task(
        &mut self,
        task_id: Uuid,
        target_list: Uuid,
        position: i64,
    ) -> Option<MoveOutcome> {
        let source_index = self
            .snapshot
            .lists
            .iter()
            .position(|l| l.tasks.iter().any(|t| t.id == task_id))?;
        let target_index = self
            .snapshot
            .lists
            .iter()
            .position(|l| l.list.id == target_list)?;

        let outcome = if source_index == target_index {
            ordering::reorder(&mut self.snapshot.lists[source_index].tasks, task_id, position)?
        } else {
            let (source, target) = pair_mut(&mut self.snapshot.lists, source_index, target_index);
            ordering::transfer(&mut source.tasks, &mut target.tasks, task_id, target_list, position)?
        };

        if let Some(moved) = self.snapshot.task(task_id).cloned() {
            if let Some(selected) = self.selected.as_mut().filter(|t| t.id == task_id) {
                selected.list_id = moved.list_id;
                selected.position = moved.position;
            }
        }
        Some(outcome)
    }

    /// Apply a field patch to every local copy of a task.
    pub fn optimistic_update_task(&mut self, task_id: Uuid, patch: &TaskPatch) -> bool {
        let mut found = false;
        let holders = self
            .snapshot
            .lists
            .iter_mut()
            .flat_map(|l| l.tasks.iter_mut())
            .chain(self.selected.iter_mut())
            .filter(|t| t.id == task_id);
        for held in holders {
            held.apply_patch(patch);
            found = true;
        }
        found
    }

    // ── recovery ─────────────────────────────────────────────────────

    /// Capture the current state before an optimistic edit.
    pub fn begin_edit(&mut self) {
        self.checkpoint = Some(Checkpoint {
            snapshot: self.snapshot.clone(),
            selected: self.selected.clone(),
        });
    }

    /// The server accepted the edit; forget the checkpoint.
    pub fn commit_edit(&mut self) {
        self.checkpoint = None;
    }

    /// Restore the state captured by `begin_edit`. Returns false when
    /// there is no checkpoint; the caller should then re-fetch.
    pub fn rollback(&mut self) -> bool {
        match self.checkpoint.take() {
            Some(checkpoint) => {
                self.snapshot = checkpoint.snapshot;
                self.selected = checkpoint.selected;
                true
            }
            None => false,
        }
    }

    /// Replace everything with a freshly fetched snapshot, discarding
    /// optimistic state. The detail view follows the new snapshot.
    pub fn replace_snapshot(&mut self, snapshot: BoardSnapshot) {
        self.checkpoint = None;
        self.selected = self
            .selected
            .take()
            .and_then(|selected| snapshot.task(selected.id).cloned());
        self.snapshot = snapshot;
    }
}

/// Copy payload fields of `incoming` into `held`. Returns true if
/// anything changed.
fn merge_task(held: &mut Task, incoming: &Task) -> bool {
    let merged = Task {
        list_id: held.list_id,
        position: held.position,
        ..incoming.clone()
    };
    if *held == merged {
        return false;
    }
    *held = merged;
    true
}

fn pair_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    if a < b {
        let (left, right) = items.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = items.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}
