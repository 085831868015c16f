use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use stockledger_core::{ActorId, ItemId, LotId, SystemClock};
use stockledger_costing::{AllocationRequest, FifoAllocator, ItemHistory, PurchaseLot, SaleUnit};
use stockledger_events::NoopEventBus;
use stockledger_infra::{EngineConfig, InMemoryTransactionStore, InventoryEngine};
use stockledger_inventory::{ItemCategory, MovementKind, MovementLedger, MovementRequest};

fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
}

fn lot(prefix: &str, n: usize) -> LotId {
    LotId::new(format!("{prefix}-{n}")).unwrap()
}

/// `len` purchases of 10 units followed by `len` sales of 9 units.
fn history(item: ItemId, len: usize) -> ItemHistory {
    let purchases = (0..len).map(|n| {
        PurchaseLot::new(item, 10, Decimal::from(20 + (n % 7) as i64), lot("PB", n), at(n as i64)).unwrap()
    });
    let sales = (0..len).map(|n| {
        SaleUnit::new(item, 9, Decimal::from(40), lot("SB", n), at((len + n) as i64)).unwrap()
    });
    ItemHistory::new(item, purchases, sales, Vec::new())
}

/// FIFO replay cost grows with the number of prior purchases and sales.
fn bench_fifo_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("fifo_replay");
    let allocator = FifoAllocator::default();

    for len in [10usize, 100, 1000, 10000].iter() {
        let item = ItemId::new();
        let history = history(item, *len);
        let request = AllocationRequest::new(item, 25, Decimal::from(40));

        group.throughput(Throughput::Elements(*len as u64 * 2));
        group.bench_with_input(BenchmarkId::new("allocate", len), &history, |b, history| {
            b.iter(|| black_box(allocator.allocate(history, &request).unwrap()));
        });
    }

    group.finish();
}

fn bench_ledger_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_append");

    for batch in [1usize, 10, 100].iter() {
        group.throughput(Throughput::Elements(*batch as u64));
        group.bench_with_input(BenchmarkId::new("record_batch", batch), batch, |b, &size| {
            let ledger = MovementLedger::new(Arc::new(SystemClock));
            let items: Vec<ItemId> = (0..size).map(|_| ItemId::new()).collect();
            let actor = ActorId::new();
            let reference = lot("ADJ", 0);

            b.iter(|| {
                let requests = items
                    .iter()
                    .map(|item| MovementRequest::new(*item, 1, MovementKind::Adjustment, reference.clone(), actor))
                    .collect();
                black_box(ledger.record_batch(requests).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_recalculation(c: &mut Criterion) {
    let mut group = c.benchmark_group("recalculate_all_cost_basis");
    group.sample_size(10);

    for sales in [10usize, 100, 500].iter() {
        group.bench_with_input(BenchmarkId::new("sales", sales), sales, |b, &count| {
            let engine = InventoryEngine::new(
                Arc::new(InMemoryTransactionStore::new()),
                NoopEventBus,
                Arc::new(SystemClock),
                &EngineConfig::default(),
            )
            .unwrap();
            let actor = ActorId::new();
            let item = engine
                .register_item("Preform", ItemCategory::Raw, "pcs")
                .unwrap()
                .id_typed();
            for n in 0..count {
                engine
                    .create_purchase(item, 10, Decimal::from(20), lot("PB", n), at(n as i64), actor)
                    .unwrap();
                engine
                    .create_sale(item, 9, Decimal::from(40), lot("SB", n), at(n as i64 + 1), actor)
                    .unwrap();
            }

            b.iter(|| black_box(engine.recalculate_all_cost_basis().unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fifo_replay, bench_ledger_append, bench_recalculation);
criterion_main!(benches);
