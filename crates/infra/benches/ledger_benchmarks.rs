use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;
use std::thread;

use serde_json::Value as JsonValue;
use stockforge_core::ItemId;
use stockforge_events::{EventBus, EventEnvelope, InMemoryEventBus};
use stockforge_infra::ledger::MovementLedger;
use stockforge_infra::projections::ProjectionSet;
use stockforge_infra::retry::RetryPolicy;
use stockforge_inventory::{MovementCause, MovementDraft, MovementKind};

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

fn ledger_with_items(count: usize) -> (MovementLedger<Bus>, Vec<ItemId>) {
    let ledger = MovementLedger::new(Arc::new(InMemoryEventBus::new()));
    let items: Vec<ItemId> = (0..count).map(|_| ItemId::new()).collect();
    for (i, id) in items.iter().enumerate() {
        ledger.register_item(*id, format!("MAT-{:04}", i + 1));
    }
    (ledger, items)
}

fn bench_single_append_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_append_latency");
    group.sample_size(1000);

    group.bench_function("append_load", |b| {
        let (ledger, items) = ledger_with_items(1);
        b.iter(|| {
            black_box(
                ledger
                    .append(items[0], MovementKind::Load, 1, MovementCause::Purchase, None)
                    .unwrap(),
            );
        });
    });

    group.bench_function("append_unload_permissive", |b| {
        let (ledger, items) = ledger_with_items(1);
        b.iter(|| {
            black_box(
                ledger
                    .append(items[0], MovementKind::Unload, 1, MovementCause::Sale, None)
                    .unwrap(),
            );
        });
    });

    group.finish();
}

fn bench_multi_item_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("multi_item_commit");

    for width in [1usize, 4, 16, 64].iter() {
        group.throughput(Throughput::Elements(*width as u64));
        group.bench_with_input(BenchmarkId::new("commit", width), width, |b, &width| {
            let (ledger, items) = ledger_with_items(width);
            let drafts: Vec<MovementDraft> = items
                .iter()
                .map(|id| MovementDraft::new(*id, MovementKind::Unload, 2, MovementCause::InternalConsumption))
                .collect();

            b.iter(|| {
                // A fresh key per iteration so nothing is served from the idempotency table.
                black_box(ledger.commit(&drafts, None).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_contended_appends(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_appends");

    for threads in [1usize, 4, 8].iter() {
        group.throughput(Throughput::Elements((*threads * 100) as u64));
        group.bench_with_input(BenchmarkId::new("same_item", threads), threads, |b, &threads| {
            let (ledger, items) = ledger_with_items(1);
            let ledger = Arc::new(ledger.with_retry(RetryPolicy::fixed(50, std::time::Duration::from_micros(50))));
            let item = items[0];

            b.iter(|| {
                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let ledger = ledger.clone();
                        thread::spawn(move || {
                            for _ in 0..100 {
                                ledger
                                    .append_with_retry(item, MovementKind::Load, 1, MovementCause::Purchase, None)
                                    .unwrap();
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
            });
        });
    }

    group.finish();
}

fn bench_projection_rebuild_speed(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection_rebuild_speed");

    for movement_count in [10usize, 100, 1000, 10000].iter() {
        group.bench_with_input(
            BenchmarkId::new("rebuild_stock_levels", movement_count),
            movement_count,
            |b, &count| {
                let bus: Bus = Arc::new(InMemoryEventBus::new());
                let sub = bus.subscribe();
                let ledger = MovementLedger::new(bus.clone());
                let items: Vec<ItemId> = (0..10).map(|_| ItemId::new()).collect();
                for id in &items {
                    ledger.register_item(*id, id.to_string());
                }
                for i in 0..count {
                    ledger
                        .append(items[i % items.len()], MovementKind::Load, (i % 7) as i64 + 1, MovementCause::Purchase, None)
                        .unwrap();
                }
                let envelopes = sub.drain();
                let projections = ProjectionSet::new();

                b.iter(|| {
                    projections
                        .stock_levels
                        .rebuild_from_scratch(black_box(envelopes.clone()))
                        .unwrap();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_single_append_latency,
    bench_multi_item_commit,
    bench_contended_appends,
    bench_projection_rebuild_speed
);
criterion_main!(benches);
