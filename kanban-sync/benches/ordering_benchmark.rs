use criterion::{criterion_group, criterion_main, Criterion};
use kanban_sync::broadcast::{BroadcastGroup, Peer};
use kanban_sync::model::{
    ActionKind, ActivityEntry, Board, BoardSnapshot, EntityKind, FieldChange, Identity, List,
    ListWithTasks, Task,
};
use kanban_sync::ordering;
use kanban_sync::protocol::{BoardEvent, EventPayload, ListOrder, ServerMessage};
use kanban_sync::reconcile::BoardView;
use kanban_sync::storage::{ActivityLog, ActivityLogConfig, RocksActivityLog};
use std::hint::black_box;
use tokio::sync::mpsc;
use uuid::Uuid;

fn tasks(list_id: Uuid, n: usize) -> Vec<Task> {
    let creator = Uuid::new_v4();
    (0..n)
        .map(|i| {
            let mut task = Task::new(list_id, creator, format!("Task {i}"));
            task.position = i as u32;
            task
        })
        .collect()
}

fn bench_reorder_1000(c: &mut Criterion) {
    let list_id = Uuid::new_v4();
    let siblings = tasks(list_id, 1000);
    let last = siblings[999].id;

    c.bench_function("reorder_last_to_first_1000", |b| {
        b.iter(|| {
            let mut siblings = siblings.clone();
            black_box(ordering::reorder(&mut siblings, black_box(last), 0));
        })
    });
}

fn bench_transfer_1000(c: &mut Criterion) {
    let from = Uuid::new_v4();
    let to = Uuid::new_v4();
    let source = tasks(from, 1000);
    let target = tasks(to, 1000);
    let moving = source[0].id;

    c.bench_function("transfer_between_1000_lists", |b| {
        b.iter(|| {
            let mut source = source.clone();
            let mut target = target.clone();
            black_box(ordering::transfer(
                &mut source,
                &mut target,
                black_box(moving),
                to,
                500,
            ));
        })
    });
}

fn bench_normalize_gapped(c: &mut Criterion) {
    let list_id = Uuid::new_v4();
    let mut gapped = tasks(list_id, 1000);
    for (i, task) in gapped.iter_mut().enumerate() {
        task.position = (i as u32) * 3 + 7;
    }
    gapped.reverse();

    c.bench_function("normalize_1000_gapped", |b| {
        b.iter(|| {
            let mut siblings = gapped.clone();
            ordering::normalize(&mut siblings);
            black_box(siblings);
        })
    });
}

fn move_event(size: usize) -> BoardEvent {
    let from = Uuid::new_v4();
    let to = Uuid::new_v4();
    let source = tasks(from, size);
    let target = tasks(to, size);
    BoardEvent::new(
        Uuid::new_v4(),
        EventPayload::TaskMoved {
            task: target[0].clone(),
            source: ListOrder {
                list_id: from,
                tasks: source,
            },
            target: Some(ListOrder {
                list_id: to,
                tasks: target,
            }),
        },
    )
}

fn bench_move_event_encode(c: &mut Criterion) {
    let message = ServerMessage::Event(move_event(50));

    c.bench_function("task_moved_encode_2x50", |b| {
        b.iter(|| {
            black_box(black_box(&message).encode().unwrap());
        })
    });
}

fn bench_broadcast_100_peers(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let event = move_event(20);

    c.bench_function("broadcast_move_100_peers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let group = BroadcastGroup::new(event.board_id);
                let mut receivers = Vec::new();
                for i in 0..100 {
                    let (tx, rx) = mpsc::channel(16);
                    let identity =
                        Identity::new(Uuid::new_v4(), format!("p{i}@example.com"), format!("Peer{i}"));
                    group.add_peer(Uuid::new_v4(), Peer::new(identity, tx)).await;
                    receivers.push(rx);
                }
                black_box(group.broadcast(black_box(&event)).await.unwrap());
            });
        })
    });
}

fn bench_view_apply_move(c: &mut Criterion) {
    let owner = Uuid::new_v4();
    let board = Board::new(owner, "Bench");
    let mut from = List::new(board.id, "From");
    let mut to = List::new(board.id, "To");
    from.position = 0;
    to.position = 1;
    let source = tasks(from.id, 200);
    let moving = source[100].id;
    let snapshot = BoardSnapshot {
        board: board.clone(),
        lists: vec![
            ListWithTasks {
                list: from.clone(),
                tasks: source.clone(),
            },
            ListWithTasks {
                list: to.clone(),
                tasks: Vec::new(),
            },
        ],
        members: Vec::new(),
    };

    let mut after_source = source.clone();
    let mut after_target = Vec::new();
    ordering::transfer(&mut after_source, &mut after_target, moving, to.id, 0);
    let event = BoardEvent::new(
        board.id,
        EventPayload::TaskMoved {
            task: after_target[0].clone(),
            source: ListOrder {
                list_id: from.id,
                tasks: after_source,
            },
            target: Some(ListOrder {
                list_id: to.id,
                tasks: after_target,
            }),
        },
    );

    c.bench_function("view_apply_cross_list_move_200", |b| {
        b.iter(|| {
            let mut view = BoardView::new(snapshot.clone());
            black_box(view.apply(black_box(&event)));
        })
    });
}

fn bench_activity_record(c: &mut Criterion) {
    let dir = std::env::temp_dir().join(format!("kanban_bench_activity_{}", Uuid::new_v4()));
    let log = RocksActivityLog::open(ActivityLogConfig::for_testing(&dir)).unwrap();
    let board_id = Uuid::new_v4();
    let task_id = Uuid::new_v4();
    let actor = Uuid::new_v4();

    c.bench_function("activity_record_move", |b| {
        b.iter(|| {
            let entry = ActivityEntry::new(board_id, actor, ActionKind::Move, EntityKind::Task)
                .for_task(task_id)
                .with_changes(vec![FieldChange::new(
                    "position",
                    Some("3".into()),
                    Some("0".into()),
                )]);
            black_box(log.record(&entry).unwrap());
        })
    });

    drop(log);
    let _ = std::fs::remove_dir_all(&dir);
}

fn bench_activity_recent(c: &mut Criterion) {
    let dir = std::env::temp_dir().join(format!("kanban_bench_recent_{}", Uuid::new_v4()));
    let log = RocksActivityLog::open(ActivityLogConfig::for_testing(&dir)).unwrap();
    let board_id = Uuid::new_v4();
    let actor = Uuid::new_v4();
    for _ in 0..1000 {
        let entry = ActivityEntry::new(board_id, actor, ActionKind::Update, EntityKind::Task);
        log.record(&entry).unwrap();
    }

    c.bench_function("activity_recent_50_of_1000", |b| {
        b.iter(|| {
            black_box(log.recent(black_box(board_id), 50).unwrap());
        })
    });

    drop(log);
    let _ = std::fs::remove_dir_all(&dir);
}

criterion_group!(
    benches,
    bench_reorder_1000,
    bench_transfer_1000,
    bench_normalize_gapped,
    bench_move_event_encode,
    bench_broadcast_100_peers,
    bench_view_apply_move,
    bench_activity_record,
    bench_activity_recent,
);
criterion_main!(benches);
