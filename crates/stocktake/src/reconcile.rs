//! Reconciliation planning: approved counts versus the live ledger balance.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use rxstock_core::{AdjustmentId, DomainError, DomainResult, EntryId, ItemId, SessionId, UserId};
use rxstock_ledger::{LedgerEntry, NewLedgerEntry, REF_STOCK_TAKE, Reference, StockKey, TransactionType};

use crate::count::Count;

/// Stock-take adjustment, one per (session, item).
///
/// An item whose count agreed with the ledger still gets a row, with zero
/// quantity and no ledger entry, so a repeated completion treats it as
/// settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub id: AdjustmentId,
    pub session_id: SessionId,
    pub item_id: ItemId,
    pub adjustment_quantity: i64,
    pub reason: String,
    pub approved_by: UserId,
    /// The mirrored ADJUSTMENT ledger entry; `None` for a matched count.
    pub ledger_entry_id: Option<EntryId>,
    pub created_at: DateTime<Utc>,
}

impl Adjustment {
    /// Record the adjustment mirrored by `entry`.
    ///
    /// Also used to rebuild a missing row from an entry that was already
    /// appended by an interrupted completion.
    pub fn mirroring(
        id: AdjustmentId,
        session_id: SessionId,
        entry: &LedgerEntry,
        reason: impl Into<String>,
        approved_by: UserId,
    ) -> DomainResult<Self> {
        if !entry.references(REF_STOCK_TAKE, &session_id.to_string()) {
            return Err(DomainError::invariant(format!(
                "ledger entry {} does not belong to stock-take {session_id}",
                entry.id
            )));
        }
        Ok(Self {
            id,
            session_id,
            item_id: entry.item_id,
            adjustment_quantity: entry.quantity_delta,
            reason: reason.into(),
            approved_by,
            ledger_entry_id: Some(entry.id),
            created_at: entry.created_at,
        })
    }

    /// Record that the count for `item_id` matched the ledger.
    pub fn matched(
        id: AdjustmentId,
        session_id: SessionId,
        item_id: ItemId,
        reason: impl Into<String>,
        approved_by: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            session_id,
            item_id,
            adjustment_quantity: 0,
            reason: reason.into(),
            approved_by,
            ledger_entry_id: None,
            created_at,
        }
    }

    /// Whether this adjustment moved stock.
    pub fn moved_stock(&self) -> bool {
        self.ledger_entry_id.is_some()
    }
}

/// Approved physical quantity of one item, ready to reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountedItem {
    pub item_id: ItemId,
    pub counted_quantity: i64,
    /// Set only when every contributing count names the same batch.
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    /// Verifier of the most recently verified contributing count.
    pub approved_by: UserId,
}

impl CountedItem {
    /// Signed correction to bring `live_balance` to the counted quantity.
    ///
    /// `None` when the ledger already agrees.
    pub fn adjustment_against(&self, live_balance: i64) -> Option<i64> {
        let delta = self.counted_quantity - live_balance;
        (delta != 0).then_some(delta)
    }

    /// The ADJUSTMENT entry mirroring this item's reconciliation.
    pub fn adjustment_entry(
        &self,
        key: StockKey,
        session_id: SessionId,
        delta: i64,
        unit_cost: i64,
        created_at: DateTime<Utc>,
    ) -> NewLedgerEntry {
        NewLedgerEntry {
            key,
            batch_number: self.batch_number.clone(),
            expiry_date: self.expiry_date,
            transaction_type: TransactionType::Adjustment,
            reference: Reference::new(REF_STOCK_TAKE, session_id.to_string()),
            quantity_delta: delta,
            unit_cost,
            created_by: self.approved_by,
            created_at,
        }
    }
}

/// Fold approved counts into one counted quantity per item.
///
/// Per (item, shelf) the most recently verified approved count wins, then
/// shelves are summed.
pub fn counted_items(counts: &[Count]) -> Vec<CountedItem> {
    let mut latest: BTreeMap<(ItemId, &str), &Count> = BTreeMap::new();
    for count in counts.iter().filter(|c| c.is_approved()) {
        let slot = latest.entry((count.item_id, count.shelf_location.as_str())).or_insert(count);
        if (count.verified_at, count.version) > (slot.verified_at, slot.version) {
            *slot = count;
        }
    }

    let mut by_item: BTreeMap<ItemId, Vec<&Count>> = BTreeMap::new();
    for ((item_id, _), count) in latest {
        by_item.entry(item_id).or_default().push(count);
    }

    by_item
        .into_iter()
        .filter_map(|(item_id, chosen)| {
            let newest = chosen.iter().max_by_key(|c| c.verified_at)?;
            let approved_by = newest.verified_by.unwrap_or(newest.counted_by);
            let first = chosen.first()?;
            let same_batch = chosen
                .iter()
                .all(|c| c.batch_number == first.batch_number && c.expiry_date == first.expiry_date);
            let (batch_number, expiry_date) = if same_batch && first.batch_number.is_some() {
                (first.batch_number.clone(), first.expiry_date)
            } else {
                (None, None)
            };

            Some(CountedItem {
                item_id,
                counted_quantity: chosen.iter().map(|c| c.counted_quantity).sum(),
                batch_number,
                expiry_date,
                approved_by,
            })
        })
        .collect()
}
