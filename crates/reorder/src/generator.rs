use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use rxstock_core::{DomainError, DomainResult, ItemId};

use crate::snapshot::{BranchStockSnapshot, ItemStock};

/// Restock proposal for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderProposal {
    pub item_id: ItemId,
    pub balance: i64,
    pub sales_units: i64,
    pub quantity_needed: i64,
    pub explanation: String,
}

/// Output of one generator run over a branch snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReorderRun {
    pub proposals: Vec<ReorderProposal>,
    pub explanation: String,
    pub metadata: JsonValue,
}

/// Units to order for an item, or `None` if it does not qualify.
///
/// Threshold is half the trailing sales. An item qualifies when its balance
/// is below the threshold or exactly zero, and is topped up to the threshold
/// (at least one unit). Integer only: `2·balance < sales`.
pub fn quantity_needed(balance: i64, sales_units: i64) -> Option<i64> {
    let sales = sales_units.max(0);
    let doubled = balance.saturating_mul(2);
    if doubled >= sales && balance != 0 {
        return None;
    }
    let shortfall = sales.saturating_sub(doubled).max(0);
    // ceil(shortfall / 2) for shortfall >= 0
    let need = shortfall.saturating_add(1) / 2;
    Some(need.max(1))
}

/// Deterministic threshold run over one branch snapshot.
#[derive(Debug, Clone)]
pub struct ReorderJob {
    input: BranchStockSnapshot,
}

impl ReorderJob {
    pub fn new(input: BranchStockSnapshot) -> Self {
        Self { input }
    }

    pub fn input(&self) -> &BranchStockSnapshot {
        &self.input
    }

    pub fn run(&self) -> DomainResult<ReorderRun> {
        if self.input.window_days <= 0 {
            return Err(DomainError::validation("reorder window must be at least one day"));
        }

        let proposals: Vec<ReorderProposal> = self.input.items.iter().filter_map(propose).collect();

        Ok(ReorderRun {
            explanation: format!(
                "{} of {} item(s) below half of their {}-day sales",
                proposals.len(),
                self.input.items.len(),
                self.input.window_days
            ),
            metadata: json!({
                "kind": "reorder.threshold",
                "company_id": self.input.company_id.to_string(),
                "branch_id": self.input.branch_id.to_string(),
                "as_of": self.input.as_of.to_rfc3339(),
                "window_days": self.input.window_days,
                "items_considered": self.input.items.len(),
                "proposals": proposals.len(),
            }),
            proposals,
        })
    }
}

fn propose(item: &ItemStock) -> Option<ReorderProposal> {
    let quantity_needed = quantity_needed(item.balance, item.sales_units)?;
    let mut explanation = format!(
        "balance {} against {} units sold (threshold {:.1})",
        item.balance,
        item.sales_units,
        item.sales_units as f64 / 2.0
    );
    if let Some(pack) = item.pack_size {
        let packs = (quantity_needed + pack - 1) / pack;
        explanation.push_str(&format!("; about {packs} pack(s) of {pack}"));
    }

    Some(ReorderProposal {
        item_id: item.item_id,
        balance: item.balance,
        sales_units: item.sales_units,
        quantity_needed,
        explanation,
    })
}
