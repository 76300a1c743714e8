//! Progress and variance reporting over a session's counts.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use rxstock_core::{ItemId, SessionId};

use crate::count::{Count, VerificationStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Items with stock history at the branch, plus any counted item without one.
    pub total_items: usize,
    pub counted_items: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
}

impl Progress {
    pub fn compute(branch_items: &BTreeSet<ItemId>, counts: &[Count]) -> Self {
        let counted: BTreeSet<ItemId> = counts.iter().map(|c| c.item_id).collect();
        let mut progress = Progress {
            total_items: branch_items.union(&counted).count(),
            counted_items: counted.len(),
            ..Progress::default()
        };
        for count in counts {
            match count.verification_status {
                VerificationStatus::Pending => progress.pending += 1,
                VerificationStatus::Approved => progress.approved += 1,
                VerificationStatus::Rejected => progress.rejected += 1,
            }
        }
        progress
    }
}

/// Current ledger view of an item, supplied by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveStock {
    pub balance: i64,
    pub unit_cost: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarianceLine {
    pub item_id: ItemId,
    /// Latest count per shelf, summed across shelves.
    pub counted_quantity: i64,
    /// Ledger balance captured by the most recent submission.
    pub system_quantity: i64,
    pub frozen_variance: i64,
    pub live_balance: i64,
    pub live_variance: i64,
    pub unit_cost: i64,
    /// `live_variance * unit_cost`.
    pub variance_value: i64,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarianceReport {
    pub session_id: SessionId,
    pub session_code: String,
    pub lines: Vec<VarianceLine>,
    pub total_variance_value: i64,
}

impl VarianceReport {
    pub fn build(
        session_id: SessionId,
        session_code: impl Into<String>,
        counts: &[Count],
        live: &BTreeMap<ItemId, LiveStock>,
    ) -> Self {
        let mut by_item: BTreeMap<ItemId, Vec<&Count>> = BTreeMap::new();
        for count in counts {
            by_item.entry(count.item_id).or_default().push(count);
        }

        let lines: Vec<VarianceLine> = by_item
            .into_iter()
            .filter_map(|(item_id, item_counts)| line_for(item_id, &item_counts, live))
            .collect();
        let total_variance_value = lines.iter().map(|l| l.variance_value).sum();

        Self {
            session_id,
            session_code: session_code.into(),
            lines,
            total_variance_value,
        }
    }
}

fn line_for(
    item_id: ItemId,
    counts: &[&Count],
    live: &BTreeMap<ItemId, LiveStock>,
) -> Option<VarianceLine> {
    let mut per_shelf: BTreeMap<&str, &Count> = BTreeMap::new();
    for &count in counts {
        let slot = per_shelf.entry(count.shelf_location.as_str()).or_insert(count);
        if count.counted_at > slot.counted_at {
            *slot = count;
        }
    }
    let counted_quantity: i64 = per_shelf.values().map(|c| c.counted_quantity).sum();
    let system_quantity = counts.iter().max_by_key(|c| c.counted_at)?.system_quantity;
    let stock = live.get(&item_id).copied().unwrap_or_default();
    let live_variance = counted_quantity - stock.balance;

    let status = |s: VerificationStatus| counts.iter().filter(|c| c.verification_status == s).count();

    Some(VarianceLine {
        item_id,
        counted_quantity,
        system_quantity,
        frozen_variance: counted_quantity - system_quantity,
        live_balance: stock.balance,
        live_variance,
        unit_cost: stock.unit_cost,
        variance_value: live_variance * stock.unit_cost,
        pending: status(VerificationStatus::Pending),
        approved: status(VerificationStatus::Approved),
        rejected: status(VerificationStatus::Rejected),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rxstock_core::{CountId, UserId};
    use rxstock_ledger::ItemUnits;

    use crate::count::CountSubmission;

    fn t(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 7, 9, 0, 0).unwrap() + Duration::minutes(min)
    }

    fn count(item: ItemId, shelf: &str, qty: i64, system: i64, at: i64) -> Count {
        Count::submit(
            CountId::new(),
            CountSubmission {
                session_id: SessionId::new(),
                item_id: item,
                counted_by: UserId::new(),
                shelf_location: shelf.to_string(),
                quantity_in_unit: qty,
                unit_name: "tablet".to_string(),
                batch_number: None,
                expiry_date: None,
            },
            &ItemUnits::new("tablet"),
            system,
            t(at),
        )
        .unwrap()
    }

    #[test]
    fn progress_counts_items_and_statuses() {
        let (a, b, c) = (ItemId::new(), ItemId::new(), ItemId::new());
        let mut approved = count(a, "A1", 1, 0, 0);
        approved.approve(UserId::new(), t(1));
        let counts = vec![approved, count(a, "B2", 1, 0, 0), count(c, "A1", 1, 0, 0)];
        let branch: BTreeSet<ItemId> = [a, b].into();

        let p = Progress::compute(&branch, &counts);
        assert_eq!(
            p,
            Progress {
                total_items: 3,
                counted_items: 2,
                pending: 2,
                approved: 1,
                rejected: 0
            }
        );
    }

    #[test]
    fn report_shows_frozen_and_live_variance() {
        let item = ItemId::new();
        let counts = vec![count(item, "A1", 10, 20, 0), count(item, "B2", 8, 22, 5)];
        let live: BTreeMap<ItemId, LiveStock> = [(item, LiveStock { balance: 20, unit_cost: 40 })].into();

        let report = VarianceReport::build(SessionId::new(), "ST-MAR07A", &counts, &live);
        let line = &report.lines[0];
        assert_eq!(line.counted_quantity, 18);
        assert_eq!(line.system_quantity, 22);
        assert_eq!(line.frozen_variance, -4);
        assert_eq!(line.live_variance, -2);
        assert_eq!(line.variance_value, -80);
        assert_eq!(report.total_variance_value, -80);
    }

    #[test]
    fn later_count_on_the_same_shelf_replaces_the_earlier_one() {
        let item = ItemId::new();
        let counts = vec![count(item, "A1", 10, 10, 0), count(item, "A1", 7, 10, 3)];
        let report = VarianceReport::build(SessionId::new(), "ST-MAR07A", &counts, &BTreeMap::new());
        assert_eq!(report.lines[0].counted_quantity, 7);
        assert_eq!(report.lines[0].live_balance, 0);
    }
}
