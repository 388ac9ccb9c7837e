use criterion::{criterion_group, criterion_main, Criterion};
use rank_tracker::db::FirestoreDb;
use rank_tracker::services::{EventBus, LeaderboardRanker, RetryPolicy, TierLadder};
use std::hint::black_box;
use std::time::Duration;

fn benchmark_classify(c: &mut Criterion) {
    let ladder = TierLadder::default();

    let mut group = c.benchmark_group("classify");

    group.bench_function("bottom_tier", |b| b.iter(|| ladder.classify(black_box(42))));

    group.bench_function("top_tier", |b| {
        b.iter(|| ladder.classify(black_box(250_000)))
    });

    group.bench_function("sweep_0_to_12000", |b| {
        b.iter(|| {
            (0..12_000u64)
                .step_by(13)
                .map(|p| ladder.classify(black_box(p)))
                .max()
        })
    });

    group.finish();
}

fn benchmark_recalculate(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Failed to build runtime");

    // 2,000 entries inserted lowest first, so every incremental position is stale.
    let ranker = rt.block_on(async {
        let (events, rx) = EventBus::local(RetryPolicy {
            max_retries: 0,
            backoff: Duration::from_millis(0),
        });
        // Published position changes are irrelevant here.
        drop(rx);

        let ranker = LeaderboardRanker::new(FirestoreDb::new_in_memory(), events);
        for i in 0..2_000u64 {
            ranker
                .upsert(&format!("user-{:05}", i), i * 3)
                .await
                .expect("upsert failed");
        }
        ranker
    });

    c.bench_function("recalculate_all_2000_entries", |b| {
        b.iter(|| rt.block_on(ranker.recalculate_all()).expect("recalculate failed"))
    });
}

criterion_group!(benches, benchmark_classify, benchmark_recalculate);
criterion_main!(benches);
