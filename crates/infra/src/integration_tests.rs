//! End-to-end scenarios across the services.
//!
//! Covers:
//! - FEFO allocation and the insufficient-stock refusal
//! - Concurrent allocation never overdrawing a stream
//! - The stock-take lifecycle from session creation to reconciliation
//! - Resuming an interrupted reconciliation from the ledger
//! - Repeated completion after trading resumed, and sales after a shortfall
//! - Reorder runs feeding one PENDING row per item

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use proptest::prelude::*;

    use rxstock_core::{
        BranchId, CompanyId, DomainError, ExpectedVersion, ItemId, SessionId, UserId,
    };
    use rxstock_ledger::{
        ItemUnits, NewLedgerEntry, REF_STOCK_TAKE, Reference, StockKey, TransactionType,
    };
    use rxstock_reorder::OrderStatus;
    use rxstock_stocktake::{CountSubmission, SessionStatus};

    use crate::ledger_store::{InMemoryLedgerStore, LedgerFilter, LedgerStore, Pagination};
    use crate::ports::{InMemoryCatalog, ItemProfile};
    use crate::services::{
        AllocationRequest, InventoryService, ReorderService, ServiceError, StockTakeService,
    };

    struct Pharmacy {
        ledger: Arc<InMemoryLedgerStore>,
        catalog: Arc<InMemoryCatalog>,
        inventory: InventoryService,
        stocktake: StockTakeService,
        reorder: ReorderService,
        company: CompanyId,
        branch: BranchId,
    }

    impl Pharmacy {
        fn open() -> Self {
            let (company, branch) = (CompanyId::new(), BranchId::new());
            let ledger = Arc::new(InMemoryLedgerStore::new());
            let catalog = Arc::new(InMemoryCatalog::new());
            catalog.add_branch(company, branch);
            catalog.set_shelves(company, branch, ["A1", "A2", "B1"]);

            Self {
                inventory: InventoryService::new(ledger.clone(), catalog.clone()).with_max_retries(50),
                stocktake: StockTakeService::new(ledger.clone(), catalog.clone()),
                reorder: ReorderService::new(ledger.clone(), catalog.clone()),
                ledger,
                catalog,
                company,
                branch,
            }
        }

        fn stock_item(&self) -> StockKey {
            let item = ItemId::new();
            self.catalog.add_item(
                self.company,
                item,
                ItemProfile::new(ItemUnits::new("tablet").with_unit("box", 10).unwrap()),
            );
            StockKey::new(self.company, self.branch, item)
        }

        fn receive(&self, key: StockKey, batch: &str, expiry: NaiveDate, qty: i64) {
            self.inventory
                .append(NewLedgerEntry {
                    key,
                    batch_number: Some(batch.to_string()),
                    expiry_date: Some(expiry),
                    transaction_type: TransactionType::Purchase,
                    reference: Reference::new("purchase_invoice", format!("PI-{batch}")),
                    quantity_delta: qty,
                    unit_cost: 25,
                    created_by: UserId::new(),
                    created_at: at(1, 0),
                })
                .unwrap();
        }

        fn sell(&self, key: StockKey, qty: i64, when: DateTime<Utc>) -> Result<(), ServiceError> {
            self.inventory
                .allocate(AllocationRequest {
                    key,
                    quantity: qty,
                    unit: "tablet".to_string(),
                    transaction_type: TransactionType::Sale,
                    reference: Reference::new("sales_invoice", "SI-1"),
                    created_by: UserId::new(),
                    occurred_at: when,
                })
                .map(|_| ())
        }

        fn count(&self, session: SessionId, key: StockKey, counter: UserId, shelf: &str, qty: i64) {
            self.stocktake
                .submit_count(
                    self.company,
                    CountSubmission {
                        session_id: session,
                        item_id: key.item_id,
                        counted_by: counter,
                        shelf_location: shelf.to_string(),
                        quantity_in_unit: qty,
                        unit_name: "tablet".to_string(),
                        batch_number: None,
                        expiry_date: None,
                    },
                    at(2, 10),
                )
                .unwrap();
        }
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn fefo_allocation_and_refusal() {
        let shop = Pharmacy::open();
        let key = shop.stock_item();
        shop.receive(key, "LATE", ymd(2025, 12, 31), 10);
        shop.receive(key, "EARLY", ymd(2025, 6, 30), 5);

        let allocation = shop
            .inventory
            .allocate(AllocationRequest {
                key,
                quantity: 7,
                unit: "tablet".to_string(),
                transaction_type: TransactionType::Sale,
                reference: Reference::new("sales_invoice", "SI-7"),
                created_by: UserId::new(),
                occurred_at: at(2, 9),
            })
            .unwrap();
        let split: Vec<(Option<&str>, i64)> = allocation
            .lines
            .iter()
            .map(|l| (l.batch_number.as_deref(), l.quantity))
            .collect();
        assert_eq!(split, vec![(Some("EARLY"), 5), (Some("LATE"), 2)]);
        assert_eq!(shop.inventory.balance_of(key).unwrap(), 8);

        let refused = shop.sell(key, 100, at(2, 10));
        assert!(matches!(
            refused,
            Err(ServiceError::Domain(DomainError::InsufficientStock { requested: 100, available: 8, .. }))
        ));
        assert_eq!(shop.inventory.balance_of(key).unwrap(), 8);
    }

    #[test]
    fn concurrent_sales_never_overdraw() {
        let shop = Arc::new(Pharmacy::open());
        let key = shop.stock_item();
        shop.receive(key, "B1", ymd(2026, 1, 1), 10);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let shop = Arc::clone(&shop);
                thread::spawn(move || shop.sell(key, 2, at(3, 9)).is_ok())
            })
            .collect();
        let sold = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count() as i64;

        let balance = shop.inventory.balance_of(key).unwrap();
        assert!(balance >= 0);
        assert_eq!(balance, 10 - 2 * sold);
    }

    #[test]
    fn full_stock_take_reconciles_each_item_once() {
        let shop = Pharmacy::open();
        let (amox, para) = (shop.stock_item(), shop.stock_item());
        shop.receive(amox, "AMX1", ymd(2025, 9, 1), 40);
        shop.receive(para, "PAR1", ymd(2025, 9, 1), 12);

        let manager = UserId::new();
        let (alice, bob) = (UserId::new(), UserId::new());
        let session = shop
            .stocktake
            .create_session(shop.company, shop.branch, manager, at(2, 8))
            .unwrap()
            .id_typed();
        shop.stocktake
            .assign_counter(shop.company, session, alice, ["A1"], manager, at(2, 8))
            .unwrap();
        shop.stocktake
            .assign_counter(shop.company, session, bob, ["A2"], manager, at(2, 8))
            .unwrap();
        shop.stocktake.start(shop.company, session, manager, at(2, 9)).unwrap();

        // The same item lies on two shelves; shelf totals are summed.
        shop.count(session, amox, alice, "A1", 30);
        shop.count(session, amox, bob, "A2", 8);
        shop.count(session, para, alice, "A1", 12);

        let outside = shop.stocktake.submit_count(
            shop.company,
            CountSubmission {
                session_id: session,
                item_id: para.item_id,
                counted_by: bob,
                shelf_location: "A1".to_string(),
                quantity_in_unit: 1,
                unit_name: "tablet".to_string(),
                batch_number: None,
                expiry_date: None,
            },
            at(2, 10),
        );
        assert!(matches!(outside, Err(ServiceError::Domain(DomainError::Unauthorized(_)))));

        // Sales keep flowing; reconciliation must use the live balance.
        shop.sell(amox, 5, at(2, 11)).unwrap();

        shop.stocktake.pause(shop.company, session, manager, at(2, 12)).unwrap();
        shop.stocktake
            .approve_shelf(shop.company, session, "A1", manager, at(2, 12))
            .unwrap();
        shop.stocktake
            .approve_shelf(shop.company, session, "A2", manager, at(2, 12))
            .unwrap();

        let adjustments = shop.stocktake.complete(shop.company, session, manager, at(2, 13)).unwrap();
        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].item_id, amox.item_id);
        assert_eq!(adjustments[0].adjustment_quantity, 3);
        assert_eq!(shop.inventory.balance_of(amox).unwrap(), 38);
        assert_eq!(shop.inventory.balance_of(para).unwrap(), 12);

        let retried = shop.stocktake.complete(shop.company, session, manager, at(2, 14)).unwrap();
        assert_eq!(retried, adjustments);
        let stock_take_entries = shop
            .ledger
            .load_stream(amox)
            .unwrap()
            .into_iter()
            .filter(|e| e.references(REF_STOCK_TAKE, &session.to_string()))
            .count();
        assert_eq!(stock_take_entries, 1);

        let session = shop.stocktake.session(shop.company, session).unwrap();
        assert_eq!(session.status(), SessionStatus::Completed);
        assert!(!session.is_open());
        shop.stocktake
            .create_session(shop.company, shop.branch, manager, at(3, 8))
            .unwrap();
    }

    #[test]
    fn interrupted_reconciliation_resumes_from_the_ledger() {
        let shop = Pharmacy::open();
        let key = shop.stock_item();
        shop.receive(key, "B1", ymd(2025, 9, 1), 20);

        let manager = UserId::new();
        let session = shop
            .stocktake
            .create_session(shop.company, shop.branch, manager, at(2, 8))
            .unwrap()
            .id_typed();
        shop.stocktake.start(shop.company, session, manager, at(2, 9)).unwrap();
        shop.count(session, key, UserId::new(), "B1", 18);
        shop.stocktake
            .approve_shelf(shop.company, session, "B1", manager, at(2, 10))
            .unwrap();

        // A previous completion wrote the ledger entry and died before
        // recording the adjustment row.
        shop.ledger
            .append(
                vec![NewLedgerEntry {
                    key,
                    batch_number: None,
                    expiry_date: None,
                    transaction_type: TransactionType::Adjustment,
                    reference: Reference::new(REF_STOCK_TAKE, session.to_string()),
                    quantity_delta: -2,
                    unit_cost: 25,
                    created_by: manager,
                    created_at: at(2, 11),
                }],
                ExpectedVersion::Any,
            )
            .unwrap();

        let adjustments = shop.stocktake.complete(shop.company, session, manager, at(2, 12)).unwrap();
        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].adjustment_quantity, -2);
        assert_eq!(shop.ledger.load_stream(key).unwrap().len(), 2);
        assert_eq!(shop.inventory.balance_of(key).unwrap(), 18);
    }

    #[test]
    fn completing_again_after_trading_resumes_changes_nothing() {
        let shop = Pharmacy::open();
        let key = shop.stock_item();
        shop.receive(key, "B1", ymd(2025, 9, 1), 10);

        let manager = UserId::new();
        let session = shop
            .stocktake
            .create_session(shop.company, shop.branch, manager, at(2, 8))
            .unwrap()
            .id_typed();
        shop.stocktake.start(shop.company, session, manager, at(2, 9)).unwrap();
        shop.count(session, key, UserId::new(), "B1", 10);
        shop.stocktake
            .approve_shelf(shop.company, session, "B1", manager, at(2, 10))
            .unwrap();
        assert!(shop.stocktake.complete(shop.company, session, manager, at(2, 11)).unwrap().is_empty());

        shop.sell(key, 4, at(2, 12)).unwrap();
        assert_eq!(shop.inventory.balance_of(key).unwrap(), 6);

        assert!(shop.stocktake.complete(shop.company, session, manager, at(2, 13)).unwrap().is_empty());
        assert_eq!(shop.inventory.balance_of(key).unwrap(), 6);
    }

    #[test]
    fn unbatched_shortfall_caps_later_sales() {
        let shop = Pharmacy::open();
        let key = shop.stock_item();
        shop.receive(key, "B1", ymd(2025, 9, 1), 10);

        let manager = UserId::new();
        let session = shop
            .stocktake
            .create_session(shop.company, shop.branch, manager, at(2, 8))
            .unwrap()
            .id_typed();
        shop.stocktake.start(shop.company, session, manager, at(2, 9)).unwrap();
        shop.count(session, key, UserId::new(), "B1", 7);
        shop.stocktake
            .approve_shelf(shop.company, session, "B1", manager, at(2, 10))
            .unwrap();
        let adjustments = shop.stocktake.complete(shop.company, session, manager, at(2, 11)).unwrap();
        assert_eq!(adjustments[0].adjustment_quantity, -3);

        let position = shop.inventory.position(key).unwrap();
        assert_eq!((position.balance(), position.allocatable()), (7, 7));

        let refused = shop.sell(key, 10, at(2, 12));
        assert!(matches!(
            refused,
            Err(ServiceError::Domain(DomainError::InsufficientStock { requested: 10, available: 7, .. }))
        ));
        shop.sell(key, 7, at(2, 12)).unwrap();
        assert_eq!(shop.inventory.balance_of(key).unwrap(), 0);
    }

    #[test]
    fn cancelled_sessions_leave_no_trace_in_the_ledger() {
        let shop = Pharmacy::open();
        let key = shop.stock_item();
        shop.receive(key, "B1", ymd(2025, 9, 1), 20);

        let manager = UserId::new();
        let session = shop
            .stocktake
            .create_session(shop.company, shop.branch, manager, at(2, 8))
            .unwrap()
            .id_typed();
        shop.stocktake.start(shop.company, session, manager, at(2, 9)).unwrap();
        shop.count(session, key, UserId::new(), "B1", 3);
        shop.stocktake
            .cancel(shop.company, session, manager, None, at(2, 10))
            .unwrap();

        assert!(shop.stocktake.complete(shop.company, session, manager, at(2, 11)).is_err());
        assert_eq!(shop.inventory.balance_of(key).unwrap(), 20);
        assert!(shop.stocktake.counts(shop.company, session).unwrap().is_empty());
    }

    #[test]
    fn reorder_after_heavy_sales() {
        let shop = Pharmacy::open();
        let item = ItemId::new();
        shop.catalog.add_item(
            shop.company,
            item,
            ItemProfile::new(ItemUnits::new("tablet")).with_pack_size(30),
        );
        let key = StockKey::new(shop.company, shop.branch, item);
        shop.receive(key, "B1", ymd(2026, 1, 1), 175);
        shop.sell(key, 150, at(10, 12)).unwrap();

        let now = at(20, 18);
        let first = shop.reorder.run(shop.company, shop.branch, now).unwrap();
        assert_eq!(first.run.proposals[0].balance, 25);
        assert_eq!(first.run.proposals[0].sales_units, 150);
        assert!(first.run.proposals[0].explanation.contains("2 pack(s) of 30"));
        assert_eq!(first.entries.len(), 1);
        assert_eq!(first.entries[0].quantity_needed, 50);

        let second = shop.reorder.run(shop.company, shop.branch, now + Duration::hours(1)).unwrap();
        assert_eq!(second.entries[0].id, first.entries[0].id);
        let pending = shop
            .reorder
            .list(shop.company, shop.branch, Some(OrderStatus::Pending))
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].quantity_needed, 50);
        assert_eq!(shop.inventory.balance_of(key).unwrap(), 25);
    }

    #[test]
    fn ledger_queries_filter_and_page() {
        let shop = Pharmacy::open();
        let key = shop.stock_item();
        shop.receive(key, "B1", ymd(2026, 1, 1), 30);
        for _ in 0..3 {
            shop.sell(key, 2, at(4, 9)).unwrap();
        }

        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let page = runtime
            .block_on(shop.inventory.query(
                shop.company,
                LedgerFilter {
                    transaction_type: Some(TransactionType::Sale),
                    ..LedgerFilter::default()
                },
                Pagination::new(Some(2), None),
            ))
            .unwrap();

        assert_eq!(page.total, 3);
        assert_eq!(page.entries.len(), 2);
        assert!(page.has_more);
    }

    #[derive(Debug, Clone)]
    enum Movement {
        Receive(i64),
        Sell(i64),
    }

    fn movement() -> impl Strategy<Value = Movement> {
        prop_oneof![
            (1i64..50).prop_map(Movement::Receive),
            (1i64..60).prop_map(Movement::Sell),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn balance_is_the_sum_of_deltas_and_never_negative(moves in prop::collection::vec(movement(), 1..25)) {
            let shop = Pharmacy::open();
            let key = shop.stock_item();
            let mut expected = 0i64;

            for (i, m) in moves.iter().enumerate() {
                match m {
                    Movement::Receive(q) => {
                        shop.receive(key, &format!("B{i}"), ymd(2026, 1, 1) + Duration::days(i as i64), *q);
                        expected += q;
                    }
                    Movement::Sell(q) => {
                        if shop.sell(key, *q, at(5, 9)).is_ok() {
                            expected -= q;
                        } else {
                            prop_assert!(*q > expected);
                        }
                    }
                }
            }

            let position = shop.inventory.position(key).unwrap();
            prop_assert_eq!(position.balance(), expected);
            prop_assert!(position.balance() >= 0);
            let by_batch: i64 = position.batches().iter().map(|b| b.remaining).sum();
            prop_assert_eq!(by_batch, expected);
        }
    }
}
