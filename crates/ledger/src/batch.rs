//! Batch derivation: batches are groupings over ledger entries, never stored.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use rxstock_core::ValueObject;

use crate::entry::LedgerEntry;

/// Grouping key of a batch within one stock stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchKey {
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
}

impl ValueObject for BatchKey {}

/// A lot of an item at a branch with its remaining quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    /// Sum of the batch's deltas (may be zero or negative after adjustments).
    pub remaining: i64,
    /// Unit cost of the earliest inbound entry of the batch.
    pub unit_cost: i64,
    pub first_sequence: u64,
    pub first_seen_at: DateTime<Utc>,
}

impl Batch {
    pub fn key(&self) -> BatchKey {
        BatchKey {
            batch_number: self.batch_number.clone(),
            expiry_date: self.expiry_date,
        }
    }

    pub fn is_available(&self) -> bool {
        self.remaining > 0
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date.is_some_and(|d| d < today)
    }
}

/// Balance and batches of one (company, branch, item) stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockPosition {
    balance: i64,
    version: u64,
    batches: Vec<Batch>,
}

impl StockPosition {
    /// Fold a stream (in sequence order) into its current position.
    ///
    /// Batches come out in FEFO order: expiry ascending with undated batches
    /// last, ties broken by the batch's first appearance in the stream.
    pub fn from_entries(entries: &[LedgerEntry]) -> Self {
        let mut balance: i64 = 0;
        let mut version = 0;
        // (batch, inbound seen)
        let mut by_key: HashMap<BatchKey, (Batch, bool)> = HashMap::new();

        for e in entries {
            balance += e.quantity_delta;
            version = version.max(e.sequence);

            let key = BatchKey {
                batch_number: e.batch_number.clone(),
                expiry_date: e.expiry_date,
            };
            let (batch, inbound_seen) = by_key.entry(key).or_insert_with(|| {
                (
                    Batch {
                        batch_number: e.batch_number.clone(),
                        expiry_date: e.expiry_date,
                        remaining: 0,
                        unit_cost: e.unit_cost,
                        first_sequence: e.sequence,
                        first_seen_at: e.created_at,
                    },
                    false,
                )
            });
            // Cost sticks to the first receipt into the batch.
            if e.quantity_delta > 0 && !*inbound_seen {
                batch.unit_cost = e.unit_cost;
                *inbound_seen = true;
            }
            batch.remaining += e.quantity_delta;
        }

        let mut batches: Vec<Batch> = by_key.into_values().map(|(b, _)| b).collect();
        batches.sort_by(|a, b| {
            (a.expiry_date.is_none(), a.expiry_date, a.first_sequence).cmp(&(
                b.expiry_date.is_none(),
                b.expiry_date,
                b.first_sequence,
            ))
        });

        Self {
            balance,
            version,
            batches,
        }
    }

    /// Sum of all deltas.
    pub fn balance(&self) -> i64 {
        self.balance
    }

    /// Last stream sequence folded in (0 for an empty stream).
    pub fn version(&self) -> u64 {
        self.version
    }

    /// All batches in FEFO order, including depleted ones.
    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    /// Units the allocator may draw.
    ///
    /// Positive batch remainders, capped at the balance: an unbatched
    /// shortfall (a stock-take count with no batch) still reduces what can
    /// leave the shelf.
    pub fn allocatable(&self) -> i64 {
        let in_batches: i64 = self
            .batches
            .iter()
            .filter(|b| b.is_available())
            .map(|b| b.remaining)
            .sum();
        in_batches.min(self.balance.max(0))
    }

    /// Cost of the newest batch with stock, for valuing variances.
    pub fn latest_unit_cost(&self) -> i64 {
        self.batches
            .iter()
            .filter(|b| b.is_available())
            .max_by_key(|b| b.first_sequence)
            .or_else(|| self.batches.iter().max_by_key(|b| b.first_sequence))
            .map(|b| b.unit_cost)
            .unwrap_or(0)
    }
}
