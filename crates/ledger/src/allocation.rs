//! First-expiry-first-out allocation planning.
//!
//! Planning is pure: it reads a `StockPosition` and returns the lines to debit.
//! Writing the resulting entries (atomically, against the stream version the
//! plan was computed from) is the caller's job.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use rxstock_core::{DomainError, DomainResult, UserId};

use crate::batch::StockPosition;
use crate::entry::{NewLedgerEntry, Reference, StockKey, TransactionType};

/// One batch's share of an allocation (positive base units).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub quantity: i64,
    pub unit_cost: i64,
}

impl AllocationLine {
    /// The negative ledger entry that debits this line.
    pub fn to_entry(
        &self,
        key: StockKey,
        transaction_type: TransactionType,
        reference: Reference,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> NewLedgerEntry {
        NewLedgerEntry {
            key,
            batch_number: self.batch_number.clone(),
            expiry_date: self.expiry_date,
            transaction_type,
            reference,
            quantity_delta: -self.quantity,
            unit_cost: self.unit_cost,
            created_by,
            created_at,
        }
    }
}

/// Plan which batches satisfy `requested` base units, earliest expiry first.
///
/// All-or-nothing: if the positive batch remainders cannot cover the request
/// the plan fails with `InsufficientStock` and nothing should be written.
pub fn plan_fefo(
    key: &StockKey,
    position: &StockPosition,
    requested: i64,
) -> DomainResult<Vec<AllocationLine>> {
    if requested <= 0 {
        return Err(DomainError::validation("allocation quantity must be positive"));
    }

    let available = position.allocatable();
    if available < requested {
        return Err(DomainError::InsufficientStock {
            item_id: key.item_id,
            branch_id: key.branch_id,
            requested,
            available,
        });
    }

    let mut still_needed = requested;
    let mut lines = Vec::new();
    for batch in position.batches().iter().filter(|b| b.is_available()) {
        if still_needed == 0 {
            break;
        }
        let take = batch.remaining.min(still_needed);
        lines.push(AllocationLine {
            batch_number: batch.batch_number.clone(),
            expiry_date: batch.expiry_date,
            quantity: take,
            unit_cost: batch.unit_cost,
        });
        still_needed -= take;
    }

    if still_needed != 0 {
        return Err(DomainError::invariant(
            "allocatable total did not cover the planned lines",
        ));
    }

    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rxstock_core::{BranchId, CompanyId, EntryId, ItemId};

    use crate::entry::LedgerEntry;

    fn key() -> StockKey {
        StockKey::new(CompanyId::new(), BranchId::new(), ItemId::new())
    }

    fn receive(key: StockKey, seq: u64, batch: &str, expiry: NaiveDate, qty: i64) -> LedgerEntry {
        let new = NewLedgerEntry {
            key,
            batch_number: Some(batch.to_string()),
            expiry_date: Some(expiry),
            transaction_type: TransactionType::Purchase,
            reference: Reference::new("purchase_invoice", format!("PI-{seq}")),
            quantity_delta: qty,
            unit_cost: 50,
            created_by: UserId::new(),
            created_at: Utc::now(),
        };
        LedgerEntry::commit(new, EntryId::new(), seq).unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn draws_earliest_expiry_first() {
        let k = key();
        let entries = vec![
            receive(k, 1, "B2", ymd(2024, 6, 1), 10),
            receive(k, 2, "B1", ymd(2024, 1, 1), 5),
        ];
        let pos = StockPosition::from_entries(&entries);

        let lines = plan_fefo(&k, &pos, 7).unwrap();
        let got: Vec<(&str, i64)> = lines
            .iter()
            .map(|l| (l.batch_number.as_deref().unwrap(), l.quantity))
            .collect();
        assert_eq!(got, vec![("B1", 5), ("B2", 2)]);
    }

    #[test]
    fn insufficient_stock_reports_requested_and_available() {
        let k = key();
        let entries = vec![receive(k, 1, "B1", ymd(2024, 1, 1), 8)];
        let pos = StockPosition::from_entries(&entries);

        let err = plan_fefo(&k, &pos, 100).unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientStock {
                item_id: k.item_id,
                branch_id: k.branch_id,
                requested: 100,
                available: 8,
            }
        );
    }

    #[test]
    fn unbatched_shortfall_limits_what_can_be_sold() {
        let k = key();
        let shortfall = NewLedgerEntry {
            key: k,
            batch_number: None,
            expiry_date: None,
            transaction_type: TransactionType::Adjustment,
            reference: Reference::new("stock_take", "ST-1"),
            quantity_delta: -3,
            unit_cost: 50,
            created_by: UserId::new(),
            created_at: Utc::now(),
        };
        let entries = vec![
            receive(k, 1, "B1", ymd(2024, 1, 1), 10),
            LedgerEntry::commit(shortfall, EntryId::new(), 2).unwrap(),
        ];
        let pos = StockPosition::from_entries(&entries);
        assert_eq!(pos.balance(), 7);

        assert!(matches!(
            plan_fefo(&k, &pos, 10),
            Err(DomainError::InsufficientStock { requested: 10, available: 7, .. })
        ));
        let lines = plan_fefo(&k, &pos, 7).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 7);
    }

    #[test]
    fn non_positive_request_is_rejected() {
        let pos = StockPosition::default();
        assert!(matches!(
            plan_fefo(&key(), &pos, 0),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn lines_become_negative_entries() {
        let k = key();
        let line = AllocationLine {
            batch_number: Some("B1".to_string()),
            expiry_date: Some(ymd(2024, 1, 1)),
            quantity: 5,
            unit_cost: 50,
        };
        let entry = line.to_entry(
            k,
            TransactionType::Sale,
            Reference::new("sales_invoice", "SI-1"),
            UserId::new(),
            Utc::now(),
        );
        assert_eq!(entry.quantity_delta, -5);
        assert!(entry.validate().is_ok());
    }

    proptest! {
        /// Any satisfiable request is covered exactly, in FEFO order, without
        /// overdrawing a batch.
        #[test]
        fn plan_conserves_quantity_and_respects_order(
            qtys in prop::collection::vec(1i64..40, 1..8),
            pick in 1i64..300,
        ) {
            let k = key();
            let entries: Vec<LedgerEntry> = qtys
                .iter()
                .enumerate()
                .map(|(i, q)| receive(k, i as u64 + 1, &format!("B{i}"), ymd(2024, 1 + (i as u32 % 12), 1), *q))
                .collect();
            let pos = StockPosition::from_entries(&entries);
            let total: i64 = qtys.iter().sum();

            match plan_fefo(&k, &pos, pick) {
                Ok(lines) => {
                    prop_assert!(pick <= total);
                    prop_assert_eq!(lines.iter().map(|l| l.quantity).sum::<i64>(), pick);
                    for pair in lines.windows(2) {
                        prop_assert!(pair[0].expiry_date <= pair[1].expiry_date);
                    }
                    for line in &lines {
                        let batch = pos.batches().iter().find(|b| b.batch_number == line.batch_number).unwrap();
                        prop_assert!(line.quantity <= batch.remaining);
                    }
                }
                Err(DomainError::InsufficientStock { available, .. }) => {
                    prop_assert!(pick > total);
                    prop_assert_eq!(available, total);
                }
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }
    }
}
