//! Physical counts and their verification transitions.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use rxstock_core::{CountId, DomainError, DomainResult, ItemId, SessionId, UserId};
use rxstock_ledger::ItemUnits;

use crate::assignment::normalize_shelf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VerificationStatus::Pending => "PENDING",
            VerificationStatus::Approved => "APPROVED",
            VerificationStatus::Rejected => "REJECTED",
        }
    }
}

impl core::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a counter enters for one item on one shelf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSubmission {
    pub session_id: SessionId,
    pub item_id: ItemId,
    pub counted_by: UserId,
    pub shelf_location: String,
    pub quantity_in_unit: i64,
    pub unit_name: String,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
}

impl CountSubmission {
    /// Counted quantity in base units.
    pub fn counted_quantity(&self, units: &ItemUnits) -> DomainResult<i64> {
        if self.quantity_in_unit < 0 {
            return Err(DomainError::validation("counted quantity cannot be negative"));
        }
        units.to_base(self.quantity_in_unit, &self.unit_name)
    }

    fn normalized_batch(&self) -> DomainResult<Option<String>> {
        match self.batch_number.as_deref().map(str::trim) {
            Some("") => Err(DomainError::validation("batch_number cannot be blank")),
            Some(b) => Ok(Some(b.to_string())),
            None if self.expiry_date.is_some() => {
                Err(DomainError::validation("expiry_date requires a batch_number"))
            }
            None => Ok(None),
        }
    }
}

/// One counter's count of one item in a session.
///
/// `system_quantity` and `variance` are frozen at submission time and kept
/// as an audit record. Reconciliation re-reads the ledger instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Count {
    pub id: CountId,
    pub session_id: SessionId,
    pub item_id: ItemId,
    pub counted_by: UserId,
    pub shelf_location: String,
    pub counted_quantity: i64,
    pub system_quantity: i64,
    pub variance: i64,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub unit_name: String,
    pub quantity_in_unit: i64,
    pub verification_status: VerificationStatus,
    pub verified_by: Option<UserId>,
    pub verified_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub counted_at: DateTime<Utc>,
    pub version: u64,
}

impl Count {
    /// New PENDING count with the ledger balance snapshotted at `now`.
    pub fn submit(
        id: CountId,
        submission: CountSubmission,
        units: &ItemUnits,
        system_quantity: i64,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let counted_quantity = submission.counted_quantity(units)?;
        let shelf_location = normalize_shelf(&submission.shelf_location)?;
        let batch_number = submission.normalized_batch()?;

        Ok(Self {
            id,
            session_id: submission.session_id,
            item_id: submission.item_id,
            counted_by: submission.counted_by,
            shelf_location,
            counted_quantity,
            system_quantity,
            variance: counted_quantity - system_quantity,
            batch_number,
            expiry_date: submission.expiry_date,
            unit_name: submission.unit_name.trim().to_string(),
            quantity_in_unit: submission.quantity_in_unit,
            verification_status: VerificationStatus::Pending,
            verified_by: None,
            verified_at: None,
            rejection_reason: None,
            counted_at: now,
            version: 1,
        })
    }

    /// Update this row in place from a fresh submission by the same counter.
    ///
    /// Approved counts are final. Anything else goes back to PENDING.
    pub fn recount(
        &mut self,
        submission: CountSubmission,
        units: &ItemUnits,
        system_quantity: i64,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if self.verification_status == VerificationStatus::Approved {
            return Err(DomainError::invalid_transition(
                "APPROVED count",
                "recount",
            ));
        }
        if submission.session_id != self.session_id
            || submission.item_id != self.item_id
            || submission.counted_by != self.counted_by
        {
            return Err(DomainError::invariant(
                "a recount must come from the same counter for the same item",
            ));
        }

        let id = self.id;
        let version = self.version;
        *self = Count::submit(id, submission, units, system_quantity, now)?;
        self.version = version + 1;
        Ok(())
    }

    /// PENDING -> APPROVED. Returns whether the count changed.
    pub fn approve(&mut self, verifier: UserId, now: DateTime<Utc>) -> bool {
        if self.verification_status != VerificationStatus::Pending {
            return false;
        }
        self.verification_status = VerificationStatus::Approved;
        self.verified_by = Some(verifier);
        self.verified_at = Some(now);
        self.rejection_reason = None;
        self.version += 1;
        true
    }

    /// PENDING -> REJECTED with a reason for the counter.
    pub fn reject(&mut self, verifier: UserId, reason: &str, now: DateTime<Utc>) -> DomainResult<bool> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("rejection reason is required"));
        }
        if self.verification_status != VerificationStatus::Pending {
            return Ok(false);
        }
        self.verification_status = VerificationStatus::Rejected;
        self.verified_by = Some(verifier);
        self.verified_at = Some(now);
        self.rejection_reason = Some(reason.to_string());
        self.version += 1;
        Ok(true)
    }

    pub fn is_approved(&self) -> bool {
        self.verification_status == VerificationStatus::Approved
    }

    pub fn on_shelf(&self, shelf: &str) -> bool {
        self.shelf_location == shelf.trim()
    }
}

/// Shelves that still hold PENDING or REJECTED counts, sorted.
pub fn unresolved_shelves(counts: &[Count]) -> Vec<String> {
    counts
        .iter()
        .filter(|c| !c.is_approved())
        .map(|c| c.shelf_location.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
