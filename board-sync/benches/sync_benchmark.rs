use std::hint::black_box;
use std::time::Duration;

use board_sync::{
    BoardEvent, CompositionBuffer, DebugFlags, GridMode, LinkMachine, Note, NoteColor, Reconciler,
    WireMessage,
};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

fn note_move(version: u64) -> WireMessage {
    WireMessage::versioned(
        version,
        BoardEvent::NoteMove {
            id: format!("note-{}", version % 64),
            x: version as f64,
            y: 42.0,
        },
    )
}

fn bench_encode_decode(c: &mut Criterion) {
    let msg = note_move(7);
    let encoded = msg.encode().unwrap();

    c.bench_function("note_move_encode", |b| {
        b.iter(|| black_box(black_box(&msg).encode().unwrap()))
    });
    c.bench_function("note_move_decode", |b| {
        b.iter(|| black_box(WireMessage::decode(black_box(&encoded)).unwrap()))
    });
}

/// Benchmark: stream of versioned moves through the reconciler.
fn bench_reconcile_moves(c: &mut Criterion) {
    let messages: Vec<WireMessage> = (1..=1_000).map(note_move).collect();

    c.bench_function("reconcile_1000_moves", |b| {
        b.iter_batched(
            || {
                let mut rec = Reconciler::new(DebugFlags::default());
                let mut drafts = CompositionBuffer::new(Duration::from_millis(300));
                let notes = (0..64)
                    .map(|i| Note::new(format!("note-{i}"), 0.0, 0.0, NoteColor::Yellow))
                    .collect();
                rec.apply_remote(
                    WireMessage::versioned(
                        0,
                        BoardEvent::SyncState {
                            notes,
                            grid_mode: GridMode::None,
                            section_titles: Default::default(),
                        },
                    ),
                    &mut drafts,
                );
                (rec, drafts, messages.clone())
            },
            |(mut rec, mut drafts, msgs)| {
                for msg in msgs {
                    black_box(rec.apply_remote(msg, &mut drafts));
                }
            },
            BatchSize::SmallInput,
        )
    });
}

/// Benchmark: full snapshot replace for boards of N notes.
fn bench_snapshot_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_apply");

    for count in [10, 100, 1_000] {
        let notes: Vec<Note> = (0..count)
            .map(|i| {
                Note::new(format!("n{i}"), i as f64, i as f64, NoteColor::Mint).with_text("idea")
            })
            .collect();
        let snapshot = WireMessage::versioned(
            1,
            BoardEvent::SyncState {
                notes,
                grid_mode: GridMode::FourGrid,
                section_titles: Default::default(),
            },
        );

        group.bench_with_input(BenchmarkId::from_parameter(count), &snapshot, |b, s| {
            b.iter_batched(
                || {
                    (
                        Reconciler::new(DebugFlags::default()),
                        CompositionBuffer::new(Duration::from_millis(300)),
                        s.clone(),
                    )
                },
                |(mut rec, mut drafts, msg)| black_box(rec.apply_remote(msg, &mut drafts)),
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

/// Benchmark: queue 1000 frames offline, then drain them on open.
fn bench_queue_replay(c: &mut Criterion) {
    let frames: Vec<String> = (1..=1_000)
        .map(|v| note_move(v).encode().unwrap())
        .collect();

    c.bench_function("queue_replay_1000", |b| {
        b.iter(|| {
            let mut link = LinkMachine::new(5, Duration::from_secs(3), 10_000);
            link.connect();
            for frame in &frames {
                black_box(link.send(frame.clone()).unwrap());
            }
            black_box(link.on_open());
        })
    });
}

criterion_group!(
    benches,
    bench_encode_decode,
    bench_reconcile_moves,
    bench_snapshot_apply,
    bench_queue_replay,
);
criterion_main!(benches);
