//! Position management for ordered siblings.
//!
//! Every parent (a board for lists, a list for tasks) keeps its children
//! in a `Vec` sorted by position, and positions always equal the vector
//! index: `{0, 1, …, n-1}`, no gaps, no duplicates.
//!
//! Target positions are *final* positions: moving an item to position `p`
//! means that after the move it sits at index `p` of its new sibling list.
//! The target is clamped to `[0, len_after_removal]`, so an item already at
//! the end of its list asked to move one slot further resolves to its own
//! position and is a no-op.
//!
//! ```text
//!  move X → B@0                 reorder X → 1
//!  A: [X0, Y1]   B: []          A: [X0, Y1]
//!  A: [Y0]       B: [X0]        A: [Y0, X1]
//! ```

use uuid::Uuid;

use crate::model::{List, ListWithTasks, Task};

/// An entity with a position among its siblings.
pub trait Ordered {
    fn id(&self) -> Uuid;
    fn position(&self) -> u32;
    fn set_position(&mut self, position: u32);
}

/// An ordered entity that can change parents.
pub trait Nested: Ordered {
    fn parent_id(&self) -> Uuid;
    fn set_parent_id(&mut self, parent_id: Uuid);
}

impl Ordered for Task {
    fn id(&self) -> Uuid {
        self.id
    }
    fn position(&self) -> u32 {
        self.position
    }
    fn set_position(&mut self, position: u32) {
        self.position = position;
    }
}

impl Nested for Task {
    fn parent_id(&self) -> Uuid {
        self.list_id
    }
    fn set_parent_id(&mut self, parent_id: Uuid) {
        self.list_id = parent_id;
    }
}

impl Ordered for List {
    fn id(&self) -> Uuid {
        self.id
    }
    fn position(&self) -> u32 {
        self.position
    }
    fn set_position(&mut self, position: u32) {
        self.position = position;
    }
}

impl Nested for List {
    fn parent_id(&self) -> Uuid {
        self.board_id
    }
    fn set_parent_id(&mut self, parent_id: Uuid) {
        self.board_id = parent_id;
    }
}

impl Ordered for ListWithTasks {
    fn id(&self) -> Uuid {
        self.list.id
    }
    fn position(&self) -> u32 {
        self.list.position
    }
    fn set_position(&mut self, position: u32) {
        self.list.position = position;
    }
}

/// Where an item will land, after clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovePlan {
    pub from_position: u32,
    pub to_position: u32,
    pub same_parent: bool,
}

impl MovePlan {
    /// Same parent, same final position: nothing to write, nothing to broadcast.
    pub fn is_noop(&self) -> bool {
        self.same_parent && self.from_position == self.to_position
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Target resolved to the current position; siblings untouched.
    Unchanged,
    Moved(MovePlan),
}

impl MoveOutcome {
    pub fn is_noop(&self) -> bool {
        matches!(self, MoveOutcome::Unchanged)
    }
}

/// Clamp a requested position to `[0, upper]`.
pub fn clamp_position(requested: i64, upper: usize) -> u32 {
    let upper = i64::try_from(upper).unwrap_or(i64::MAX);
    requested.clamp(0, upper) as u32
}

/// Compute the landing spot of a move.
///
/// `target_len` is the current child count of the target parent, which
/// includes the moving item when `same_parent` is true.
pub fn plan_move(
    from_position: u32,
    same_parent: bool,
    target_len: usize,
    requested: i64,
) -> MovePlan {
    let len_after_removal = if same_parent {
        target_len.saturating_sub(1)
    } else {
        target_len
    };
    MovePlan {
        from_position,
        to_position: clamp_position(requested, len_after_removal),
        same_parent,
    }
}

/// Renumber siblings to `0..n-1` in vector order.
pub fn recontiguate<T: Ordered>(siblings: &mut [T]) {
    for (index, sibling) in siblings.iter_mut().enumerate() {
        sibling.set_position(index as u32);
    }
}

/// Stable sort by stored position, then renumber. Use on lists loaded
/// from an untrusted or concurrent source.
pub fn normalize<T: Ordered>(siblings: &mut [T]) {
    siblings.sort_by_key(|s| s.position());
    recontiguate(siblings);
}

/// True when positions are exactly `{0, …, n-1}`.
pub fn is_contiguous<T: Ordered>(siblings: &[T]) -> bool {
    let mut positions: Vec<u32> = siblings.iter().map(Ordered::position).collect();
    positions.sort_unstable();
    positions
        .iter()
        .enumerate()
        .all(|(index, &position)| position as usize == index)
}

/// Place `item` at the end of its siblings. Returns the assigned position.
pub fn append<T: Ordered>(siblings: &mut Vec<T>, mut item: T) -> u32 {
    let position = siblings.len() as u32;
    item.set_position(position);
    siblings.push(item);
    position
}

/// Insert `item` at a clamped position and renumber everything after it.
pub fn insert_at<T: Ordered>(siblings: &mut Vec<T>, item: T, requested: i64) -> u32 {
    let position = clamp_position(requested, siblings.len());
    siblings.insert(position as usize, item);
    recontiguate(siblings);
    position
}

/// Remove an item and close the gap it leaves.
pub fn remove<T: Ordered>(siblings: &mut Vec<T>, id: Uuid) -> Option<T> {
    let index = siblings.iter().position(|s| s.id() == id)?;
    let item = siblings.remove(index);
    recontiguate(siblings);
    Some(item)
}

/// Move an item within its own parent.
///
/// Returns `None` if the item is not among `siblings`.
pub fn reorder<T: Ordered>(siblings: &mut Vec<T>, id: Uuid, requested: i64) -> Option<MoveOutcome> {
    let index = siblings.iter().position(|s| s.id() == id)?;
    let plan = plan_move(index as u32, true, siblings.len(), requested);
    if plan.is_noop() {
        return Some(MoveOutcome::Unchanged);
    }

    let item = siblings.remove(index);
    siblings.insert(plan.to_position as usize, item);
    recontiguate(siblings);
    Some(MoveOutcome::Moved(plan))
}

/// Move an item from `source` into a different parent's `target` list.
///
/// Both lists are fully renumbered. Returns `None` if the item is not
/// among `source`.
pub fn transfer<T: Nested>(
    source: &mut Vec<T>,
    target: &mut Vec<T>,
    id: Uuid,
    target_parent: Uuid,
    requested: i64,
) -> Option<MoveOutcome> {
    let index = source.iter().position(|s| s.id() == id)?;
    let plan = plan_move(index as u32, false, target.len(), requested);

    let mut item = source.remove(index);
    recontiguate(source);

    item.set_parent_id(target_parent);
    target.insert(plan.to_position as usize, item);
    recontiguate(target);
    Some(MoveOutcome::Moved(plan))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tasks(list_id: Uuid, titles: &[&str]) -> Vec<Task> {
        let mut out = Vec::new();
        for title in titles {
            append(&mut out, Task::new(list_id, Uuid::nil(), *title));
        }
        out
    }

    fn titles(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.title.as_str()).collect()
    }

    fn positions(tasks: &[Task]) -> Vec<u32> {
        tasks.iter().map(|t| t.position).collect()
    }

    #[test]
    fn test_append_assigns_next_position() {
        let list = Uuid::new_v4();
        let mut siblings = tasks(list, &["a", "b"]);
        let pos = append(&mut siblings, Task::new(list, Uuid::nil(), "c"));
        assert_eq!(pos, 2);
        assert_eq!(positions(&siblings), vec![0, 1, 2]);
    }

    #[test]
    fn test_remove_closes_gap() {
        let list = Uuid::new_v4();
        let mut siblings = tasks(list, &["a", "b", "c", "d"]);
        let b = siblings[1].id;

        let removed = remove(&mut siblings, b).unwrap();
        assert_eq!(removed.title, "b");
        assert_eq!(titles(&siblings), vec!["a", "c", "d"]);
        assert_eq!(positions(&siblings), vec![0, 1, 2]);
        assert!(remove(&mut siblings, b).is_none());
    }

    #[test]
    fn test_cross_container_move() {
        let a_id = Uuid::new_v4();
        let b_id = Uuid::new_v4();
        let mut a = tasks(a_id, &["X", "Y"]);
        let mut b: Vec<Task> = Vec::new();
        let x = a[0].id;

        let outcome = transfer(&mut a, &mut b, x, b_id, 0).unwrap();
        assert!(!outcome.is_noop());
        assert_eq!(titles(&a), vec!["Y"]);
        assert_eq!(positions(&a), vec![0]);
        assert_eq!(titles(&b), vec!["X"]);
        assert_eq!(positions(&b), vec![0]);
        assert_eq!(b[0].list_id, b_id);
    }

    #[test]
    fn test_same_container_reorder() {
        let list = Uuid::new_v4();
        let mut a = tasks(list, &["X", "Y"]);
        let x = a[0].id;

        let outcome = reorder(&mut a, x, 1).unwrap();
        assert_eq!(
            outcome,
            MoveOutcome::Moved(MovePlan {
                from_position: 0,
                to_position: 1,
                same_parent: true
            })
        );
        assert_eq!(titles(&a), vec!["Y", "X"]);
        assert_eq!(positions(&a), vec![0, 1]);
    }

    #[test]
    fn test_move_to_own_position_is_noop() {
        let list = Uuid::new_v4();
        let mut a = tasks(list, &["X", "Y", "Z"]);
        let before = a.clone();
        let y = a[1].id;

        assert_eq!(reorder(&mut a, y, 1), Some(MoveOutcome::Unchanged));
        assert_eq!(a, before);
    }

    #[test]
    fn test_move_last_item_one_past_itself_is_noop() {
        // The off-by-one case: [X, Y], Y → 2 clamps to 1, which is where Y is.
        let list = Uuid::new_v4();
        let mut a = tasks(list, &["X", "Y"]);
        let before = a.clone();
        let y = a[1].id;

        assert_eq!(reorder(&mut a, y, 2), Some(MoveOutcome::Unchanged));
        assert_eq!(reorder(&mut a, y, 99), Some(MoveOutcome::Unchanged));
        assert_eq!(a, before);
    }

    #[test]
    fn test_move_one_after_itself_mid_list_moves() {
        let list = Uuid::new_v4();
        let mut a = tasks(list, &["X", "Y", "Z"]);
        let x = a[0].id;

        let outcome = reorder(&mut a, x, 1).unwrap();
        assert!(!outcome.is_noop());
        assert_eq!(titles(&a), vec!["Y", "X", "Z"]);
    }

    #[test]
    fn test_out_of_range_targets_clamp() {
        let a_id = Uuid::new_v4();
        let b_id = Uuid::new_v4();
        let mut a = tasks(a_id, &["X", "Y", "Z"]);
        let mut b = tasks(b_id, &["P", "Q"]);
        let z = a[2].id;
        let x = a[0].id;

        reorder(&mut a, z, -5).unwrap();
        assert_eq!(titles(&a), vec!["Z", "X", "Y"]);

        transfer(&mut a, &mut b, x, b_id, 1_000).unwrap();
        assert_eq!(titles(&a), vec!["Z", "Y"]);
        assert_eq!(titles(&b), vec!["P", "Q", "X"]);
        assert_eq!(positions(&b), vec![0, 1, 2]);
    }

    #[test]
    fn test_transfer_shifts_following_siblings() {
        let a_id = Uuid::new_v4();
        let b_id = Uuid::new_v4();
        let mut a = tasks(a_id, &["X"]);
        let mut b = tasks(b_id, &["P", "Q", "R"]);
        let x = a[0].id;

        transfer(&mut a, &mut b, x, b_id, 1).unwrap();
        assert!(a.is_empty());
        assert_eq!(titles(&b), vec!["P", "X", "Q", "R"]);
        assert_eq!(positions(&b), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_missing_item_returns_none() {
        let list = Uuid::new_v4();
        let mut a = tasks(list, &["X"]);
        let mut b = Vec::new();
        assert!(reorder(&mut a, Uuid::new_v4(), 0).is_none());
        assert!(transfer(&mut a, &mut b, Uuid::new_v4(), Uuid::new_v4(), 0).is_none());
    }

    #[test]
    fn test_insert_at_clamps() {
        let list = Uuid::new_v4();
        let mut a = tasks(list, &["X", "Y"]);
        let pos = insert_at(&mut a, Task::new(list, Uuid::nil(), "Z"), 7);
        assert_eq!(pos, 2);
        let pos = insert_at(&mut a, Task::new(list, Uuid::nil(), "W"), -1);
        assert_eq!(pos, 0);
        assert_eq!(titles(&a), vec!["W", "X", "Y", "Z"]);
        assert!(is_contiguous(&a));
    }

    #[test]
    fn test_normalize_repairs_gaps() {
        let list = Uuid::new_v4();
        let mut a = tasks(list, &["X", "Y", "Z"]);
        a[0].position = 7;
        a[1].position = 2;
        a[2].position = 2;
        assert!(!is_contiguous(&a));

        normalize(&mut a);
        assert_eq!(titles(&a), vec!["Y", "Z", "X"]);
        assert!(is_contiguous(&a));
    }

    #[test]
    fn test_contiguity_holds_under_mixed_operations() {
        // Deterministic LCG so the sequence is reproducible.
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = move |bound: u64| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) % bound.max(1)
        };

        let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let mut lists: Vec<Vec<Task>> = vec![Vec::new(), Vec::new(), Vec::new()];

        for step in 0..2_000 {
            let l = next(3) as usize;
            match next(4) {
                0 => {
                    append(&mut lists[l], Task::new(ids[l], Uuid::nil(), format!("t{step}")));
                }
                1 if !lists[l].is_empty() => {
                    let victim = lists[l][next(lists[l].len() as u64) as usize].id;
                    remove(&mut lists[l], victim);
                }
                2 if !lists[l].is_empty() => {
                    let id = lists[l][next(lists[l].len() as u64) as usize].id;
                    let target = next(lists[l].len() as u64 + 3) as i64 - 1;
                    reorder(&mut lists[l], id, target);
                }
                _ if !lists[l].is_empty() => {
                    let t = (l + 1 + next(2) as usize) % 3;
                    let id = lists[l][next(lists[l].len() as u64) as usize].id;
                    let target = next(lists[t].len() as u64 + 3) as i64 - 1;
                    let (src, dst) = pair_mut(&mut lists, l, t);
                    transfer(src, dst, id, ids[t], target);
                }
                _ => {}
            }

            for (index, list) in lists.iter().enumerate() {
                assert!(is_contiguous(list), "list {index} lost contiguity at step {step}");
                assert!(list.iter().all(|t| t.list_id == ids[index]));
            }
        }
    }

    fn pair_mut<T>(v: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
        assert_ne!(a, b);
        if a < b {
            let (lo, hi) = v.split_at_mut(b);
            (&mut lo[a], &mut hi[0])
        } else {
            let (lo, hi) = v.split_at_mut(a);
            (&mut hi[0], &mut lo[b])
        }
    }
}
