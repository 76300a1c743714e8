use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rxstock_core::{BranchId, CompanyId, ExpectedVersion, ItemId, UserId};
use rxstock_infra::ledger_store::{InMemoryLedgerStore, LedgerStore};
use rxstock_infra::ports::{InMemoryCatalog, ItemProfile};
use rxstock_infra::services::{AllocationRequest, InventoryService};
use rxstock_ledger::{ItemUnits, NewLedgerEntry, Reference, StockKey, StockPosition, TransactionType};
use std::sync::Arc;

fn receipt(key: StockKey, batch: usize, qty: i64) -> NewLedgerEntry {
    let expiry = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap() + Duration::days(batch as i64 % 365);
    NewLedgerEntry {
        key,
        batch_number: Some(format!("B{batch:05}")),
        expiry_date: Some(expiry),
        transaction_type: TransactionType::Purchase,
        reference: Reference::new("purchase_invoice", format!("PI-{batch}")),
        quantity_delta: qty,
        unit_cost: 30,
        created_by: UserId::new(),
        created_at: Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap(),
    }
}

fn key() -> StockKey {
    StockKey::new(CompanyId::new(), BranchId::new(), ItemId::new())
}

/// Stream with `n` batches of 100 units each.
fn seeded(n: usize) -> (Arc<InMemoryLedgerStore>, StockKey) {
    let store = Arc::new(InMemoryLedgerStore::new());
    let key = key();
    for i in 0..n {
        store.append(vec![receipt(key, i, 100)], ExpectedVersion::Any).unwrap();
    }
    (store, key)
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");
    for size in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("receipts", size), &size, |b, &size| {
            b.iter_batched(
                || (InMemoryLedgerStore::new(), key()),
                |(store, key)| {
                    for i in 0..size {
                        store.append(vec![receipt(key, i, 10)], ExpectedVersion::Any).unwrap();
                    }
                    black_box(store)
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_balance(c: &mut Criterion) {
    let mut group = c.benchmark_group("balance");
    for size in [10usize, 100, 1000] {
        let (store, key) = seeded(size);
        let entries = store.load_stream(key).unwrap();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("fold", size), &entries, |b, entries| {
            b.iter(|| black_box(StockPosition::from_entries(entries).balance()));
        });
    }
    group.finish();
}

fn bench_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate");
    for size in [10usize, 100] {
        group.bench_with_input(BenchmarkId::new("fefo_across_batches", size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let (store, key) = seeded(size);
                    let catalog = InMemoryCatalog::new();
                    catalog.add_branch(key.company_id, key.branch_id);
                    catalog.add_item(key.company_id, key.item_id, ItemProfile::new(ItemUnits::new("tablet")));
                    (InventoryService::new(store, Arc::new(catalog)), key)
                },
                |(service, key)| {
                    // Spans roughly half the batches.
                    let allocation = service
                        .allocate(AllocationRequest {
                            key,
                            quantity: size as i64 * 50,
                            unit: "tablet".to_string(),
                            transaction_type: TransactionType::Sale,
                            reference: Reference::new("sales_invoice", "SI-BENCH"),
                            created_by: UserId::new(),
                            occurred_at: Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
                        })
                        .unwrap();
                    black_box(allocation)
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_append, bench_balance, bench_allocate);
criterion_main!(benches);
