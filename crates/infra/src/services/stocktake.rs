use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};

use rxstock_core::{
    AdjustmentId, Aggregate, AggregateRoot, BranchId, CompanyId, CountId, DomainError,
    ExpectedVersion, ItemId, SessionId, UserId,
};
use rxstock_events::EventEnvelope;
use rxstock_ledger::{ItemUnits, REF_STOCK_TAKE, StockKey, StockPosition, TransactionType};
use rxstock_stocktake::{
    Adjustment, AssignCounter, Count, CountSubmission, CountedItem, CounterLock, CreateSession,
    DEFAULT_LOCK_TTL_SECS, LiveStock, Progress, SessionCodeGenerator, SessionCommand,
    SessionEvent, SessionStatus, ShelfAssignments, StockTakeSession, Transition, VarianceReport,
    VerificationStatus, counted_items, ensure_not_held_by_other, unresolved_shelves,
};

use crate::ledger_store::{LedgerBackend, LedgerStoreError};
use crate::lock_store::{InMemoryLockStore, LockStore};
use crate::ports::{Catalog, NoOpenDocuments, OpenDocuments};
use crate::stocktake_store::{
    AdjustmentStore, CountStore, InMemoryAdjustmentStore, InMemoryCountStore,
    InMemorySessionStore, SessionStore, StockTakeStoreError,
};

use super::{ServiceError, ServiceResult};

/// Stock-take sessions, counter leases, count verification and reconciliation.
#[derive(Clone)]
pub struct StockTakeService {
    ledger: Arc<dyn LedgerBackend>,
    catalog: Arc<dyn Catalog>,
    sessions: Arc<dyn SessionStore>,
    counts: Arc<dyn CountStore>,
    adjustments: Arc<dyn AdjustmentStore>,
    locks: Arc<dyn LockStore>,
    open_documents: Arc<dyn OpenDocuments>,
    codes: SessionCodeGenerator,
    lock_ttl: Duration,
}

impl StockTakeService {
    /// In-memory session, count, adjustment and lock stores; no open-document check.
    pub fn new(ledger: Arc<dyn LedgerBackend>, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            ledger,
            catalog,
            sessions: Arc::new(InMemorySessionStore::new()),
            counts: Arc::new(InMemoryCountStore::new()),
            adjustments: Arc::new(InMemoryAdjustmentStore::new()),
            locks: Arc::new(InMemoryLockStore::new()),
            open_documents: Arc::new(NoOpenDocuments),
            codes: SessionCodeGenerator::default(),
            lock_ttl: Duration::seconds(DEFAULT_LOCK_TTL_SECS),
        }
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_counts(mut self, counts: Arc<dyn CountStore>) -> Self {
        self.counts = counts;
        self
    }

    pub fn with_adjustments(mut self, adjustments: Arc<dyn AdjustmentStore>) -> Self {
        self.adjustments = adjustments;
        self
    }

    pub fn with_locks(mut self, locks: Arc<dyn LockStore>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_open_documents(mut self, open_documents: Arc<dyn OpenDocuments>) -> Self {
        self.open_documents = open_documents;
        self
    }

    pub fn with_session_codes(mut self, codes: SessionCodeGenerator) -> Self {
        self.codes = codes;
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn locks(&self) -> Arc<dyn LockStore> {
        Arc::clone(&self.locks)
    }

    // ---- sessions -------------------------------------------------------

    pub fn session(&self, company_id: CompanyId, session_id: SessionId) -> ServiceResult<StockTakeSession> {
        self.sessions
            .get(company_id, session_id)?
            .ok_or_else(|| DomainError::not_found(format!("stock-take session {session_id}")).into())
    }

    pub fn history(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
    ) -> ServiceResult<Vec<EventEnvelope<SessionEvent>>> {
        Ok(self.sessions.history(company_id, session_id)?)
    }

    /// Load, decide, save with the version the decision was made against.
    fn run(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
        command: SessionCommand,
    ) -> ServiceResult<StockTakeSession> {
        let mut session = self.session(company_id, session_id)?;
        let read_at = session.version();
        let events = session.execute(&command)?;
        if !events.is_empty() {
            self.sessions
                .save(&session, &events, ExpectedVersion::Exact(read_at))?;
        }
        Ok(session)
    }

    #[instrument(skip(self), fields(company = %company_id, branch = %branch_id), err)]
    pub fn create_session(
        &self,
        company_id: CompanyId,
        branch_id: BranchId,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> ServiceResult<StockTakeSession> {
        if !self.catalog.branch_exists(company_id, branch_id) {
            return Err(DomainError::validation(format!("unknown branch {branch_id}")).into());
        }
        if let Some(open) = self.sessions.open_for_branch(company_id, branch_id)? {
            return Err(DomainError::SessionConflict {
                branch_id,
                existing: open.session_code().to_string(),
            }
            .into());
        }

        let session_code = self.codes.generate(now, |code| {
            self.sessions
                .code_exists(company_id, code)
                .map_err(ServiceError::from)
        })?;

        let session_id = SessionId::new();
        let mut session = StockTakeSession::empty(session_id);
        let events = session.execute(&SessionCommand::Create(CreateSession {
            company_id,
            session_id,
            branch_id,
            session_code,
            created_by,
            occurred_at: now,
        }))?;
        self.sessions.save(&session, &events, ExpectedVersion::Exact(0))?;

        info!(session = %session_id, code = session.session_code(), "stock-take session created");
        Ok(session)
    }

    /// Add a counter and merge shelves into their assignment.
    #[instrument(skip(self, shelves), fields(company = %company_id, session = %session_id, counter = %counter), err)]
    pub fn assign_counter<I, S>(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
        counter: UserId,
        shelves: I,
        assigned_by: UserId,
        now: DateTime<Utc>,
    ) -> ServiceResult<StockTakeSession>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let session = self.session(company_id, session_id)?;
        let (_, branch_id) = session.scope()?;

        let mut requested = ShelfAssignments::new();
        requested.assign(counter, shelves)?;
        if let Some(known) = self.catalog.known_shelves(company_id, branch_id) {
            requested.validate_against(&known)?;
        }
        let shelves: BTreeSet<String> = requested.shelves_of(counter).cloned().unwrap_or_default();

        self.run(
            company_id,
            session_id,
            SessionCommand::AssignCounter(AssignCounter {
                counter,
                shelves,
                assigned_by,
                occurred_at: now,
            }),
        )
    }

    /// DRAFT -> ACTIVE, only against a quiescent branch.
    #[instrument(skip(self), fields(company = %company_id, session = %session_id), err)]
    pub fn start(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> ServiceResult<StockTakeSession> {
        let session = self.session(company_id, session_id)?;
        if session.status() == SessionStatus::Draft {
            let (_, branch_id) = session.scope()?;
            let open = self.open_documents.open_documents(company_id, branch_id);
            if !open.is_empty() {
                return Err(DomainError::BranchNotQuiescent {
                    branch_id,
                    open_documents: open.iter().map(ToString::to_string).collect(),
                }
                .into());
            }
        }

        self.run(company_id, session_id, SessionCommand::Start(transition(actor, now)))
    }

    #[instrument(skip(self), fields(company = %company_id, session = %session_id), err)]
    pub fn pause(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> ServiceResult<StockTakeSession> {
        self.run(company_id, session_id, SessionCommand::Pause(transition(actor, now)))
    }

    #[instrument(skip(self), fields(company = %company_id, session = %session_id), err)]
    pub fn resume(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> ServiceResult<StockTakeSession> {
        self.run(company_id, session_id, SessionCommand::Resume(transition(actor, now)))
    }

    /// Cancel and discard the session's counts, leases and adjustments.
    ///
    /// Never touches the ledger: nothing is written there before completion.
    #[instrument(skip(self), fields(company = %company_id, session = %session_id), err)]
    pub fn cancel(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
        actor: UserId,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> ServiceResult<StockTakeSession> {
        let session = self.run(
            company_id,
            session_id,
            SessionCommand::Cancel {
                transition: transition(actor, now),
                reason,
            },
        )?;

        let counts = self.counts.discard_session(session_id)?;
        let leases = self.locks.release_session(session_id)?;
        let adjustments = self.adjustments.discard_session(session_id)?;
        info!(counts, leases, adjustments, "stock-take session cancelled");
        Ok(session)
    }

    /// Complete the session and reconcile approved counts into the ledger.
    ///
    /// Safe to call again on a COMPLETED session: reconciliation skips items
    /// already settled, including those whose count matched the ledger, and
    /// returns the adjustments that moved stock.
    #[instrument(skip(self), fields(company = %company_id, session = %session_id))]
    pub fn complete(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<Adjustment>> {
        let session = self.session(company_id, session_id)?;
        let counts = self.counts.list_session(session_id)?;

        if matches!(session.status(), SessionStatus::Active | SessionStatus::Paused) {
            let shelves = unresolved_shelves(&counts);
            if !shelves.is_empty() {
                debug!(?shelves, "completion blocked by unresolved shelves");
                return Err(DomainError::UnresolvedCounts { shelves }.into());
            }
        }

        let session = self.run(
            company_id,
            session_id,
            SessionCommand::Complete(transition(actor, now)),
        )?;
        self.locks.release_session(session_id)?;

        // Count writes do not touch the session version; reconcile from what
        // was stored once the session stopped accepting them.
        let counts = self.counts.list_session(session_id)?;
        let late = counts
            .iter()
            .filter(|c| c.verification_status == VerificationStatus::Pending)
            .count();
        if late > 0 {
            warn!(late, "unverified counts left out of reconciliation");
        }

        self.reconcile(&session, &counts, now)
    }

    /// One adjustment per counted item, each written ledger-first.
    ///
    /// Per item: an existing Adjustment (matched or not) is kept; an
    /// ADJUSTMENT entry already in the ledger for this session is mirrored
    /// into a missing Adjustment; otherwise the entry is appended against the
    /// stream version it was computed from, then the Adjustment is stored.
    fn reconcile(
        &self,
        session: &StockTakeSession,
        counts: &[Count],
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<Adjustment>> {
        let (company_id, branch_id) = session.scope()?;
        let session_id = session.id_typed();
        let reference_id = session_id.to_string();
        let reason = format!("stock-take {}", session.session_code());

        for item in counted_items(counts) {
            if self.adjustments.get(session_id, item.item_id)?.is_some() {
                continue;
            }

            let key = StockKey::new(company_id, branch_id, item.item_id);
            let stream = self.ledger.load_stream(key)?;
            let already_written = stream.iter().find(|e| {
                e.transaction_type == TransactionType::Adjustment
                    && e.references(REF_STOCK_TAKE, &reference_id)
            });

            if let Some(entry) = already_written {
                warn!(item = %item.item_id, entry = %entry.id, "rebuilding adjustment from ledger entry");
                let adjustment = Adjustment::mirroring(
                    AdjustmentId::new(),
                    session_id,
                    entry,
                    reason.clone(),
                    item.approved_by,
                )?;
                self.store_adjustment(adjustment)?;
                continue;
            }

            let position = StockPosition::from_entries(&stream);
            self.adjust_item(&item, key, session_id, &position, &reason, now)?;
        }

        self.moved_stock(session_id)
    }

    fn moved_stock(&self, session_id: SessionId) -> ServiceResult<Vec<Adjustment>> {
        let mut adjustments = self.adjustments.list_session(session_id)?;
        adjustments.retain(Adjustment::moved_stock);
        Ok(adjustments)
    }

    fn adjust_item(
        &self,
        item: &CountedItem,
        key: StockKey,
        session_id: SessionId,
        position: &StockPosition,
        reason: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        let Some(delta) = item.adjustment_against(position.balance()) else {
            debug!(item = %item.item_id, "count matches ledger; no adjustment");
            return self.store_adjustment(Adjustment::matched(
                AdjustmentId::new(),
                session_id,
                item.item_id,
                reason,
                item.approved_by,
                now,
            ));
        };

        let entry = item.adjustment_entry(key, session_id, delta, position.latest_unit_cost(), now);
        let committed = match self
            .ledger
            .append(vec![entry], ExpectedVersion::Exact(position.version()))
        {
            Ok(mut committed) => committed
                .pop()
                .ok_or_else(|| ServiceError::Storage("append returned no entry".to_string()))?,
            Err(LedgerStoreError::Concurrency(msg)) => {
                // Retrying completion re-reads the stream and resumes here.
                return Err(DomainError::conflict(format!(
                    "ledger for item {} moved during reconciliation: {msg}",
                    item.item_id
                ))
                .into());
            }
            Err(err) => return Err(err.into()),
        };

        let adjustment = Adjustment::mirroring(
            AdjustmentId::new(),
            session_id,
            &committed,
            reason,
            item.approved_by,
        )?;
        info!(item = %item.item_id, delta, entry = %committed.id, "stock-take adjustment written");
        self.store_adjustment(adjustment)
    }

    fn store_adjustment(&self, adjustment: Adjustment) -> ServiceResult<()> {
        match self.adjustments.insert(adjustment) {
            // A concurrent completion stored it first.
            Ok(()) | Err(StockTakeStoreError::Duplicate(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn adjustments(&self, company_id: CompanyId, session_id: SessionId) -> ServiceResult<Vec<Adjustment>> {
        self.session(company_id, session_id)?;
        self.moved_stock(session_id)
    }

    // ---- leases ---------------------------------------------------------

    /// Take the item lease. Fails with `LockHeld` naming the current holder.
    #[instrument(skip(self), fields(session = %session_id, item = %item_id, counter = %counter))]
    pub fn acquire_lock(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
        item_id: ItemId,
        counter: UserId,
        now: DateTime<Utc>,
    ) -> ServiceResult<CounterLock> {
        let session = self.session(company_id, session_id)?;
        session.ensure_counting()?;
        session.ensure_counter_allowed(counter)?;

        let outcome = self
            .locks
            .acquire(session_id, item_id, counter, now, self.lock_ttl)?;
        if !outcome.is_acquired() {
            debug!(holder = %outcome.lock().counter_id, "item lease held by another counter");
        }
        Ok(outcome.into_result()?)
    }

    /// Release the caller's lease. A no-op when they do not hold it.
    #[instrument(skip(self), fields(session = %session_id, item = %item_id, counter = %counter), err)]
    pub fn release_lock(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
        item_id: ItemId,
        counter: UserId,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool> {
        self.session(company_id, session_id)?;
        Ok(self.locks.release(session_id, item_id, counter, now)?)
    }

    // ---- counts ---------------------------------------------------------

    fn counting_context(
        &self,
        company_id: CompanyId,
        submission: &CountSubmission,
        now: DateTime<Utc>,
    ) -> ServiceResult<(ItemUnits, i64)> {
        let session = self.session(company_id, submission.session_id)?;
        session.ensure_counting()?;
        session.ensure_counter_may_count(submission.counted_by, &submission.shelf_location)?;

        let lease = self
            .locks
            .current(submission.session_id, submission.item_id, now)?;
        ensure_not_held_by_other(lease.as_ref(), submission.counted_by, now)?;

        let (_, branch_id) = session.scope()?;
        let profile = self
            .catalog
            .item(company_id, submission.item_id)
            .ok_or_else(|| DomainError::validation(format!("unknown item {}", submission.item_id)))?;

        // Snapshot at submission, not at session start.
        let key = StockKey::new(company_id, branch_id, submission.item_id);
        let system_quantity = StockPosition::from_entries(&self.ledger.load_stream(key)?).balance();

        Ok((profile.units, system_quantity))
    }

    /// Submit a count. A second submission by the same counter for the same
    /// item recounts the existing row in place.
    #[instrument(
        skip(self, submission),
        fields(session = %submission.session_id, item = %submission.item_id, counter = %submission.counted_by)
    )]
    pub fn submit_count(
        &self,
        company_id: CompanyId,
        submission: CountSubmission,
        now: DateTime<Utc>,
    ) -> ServiceResult<Count> {
        let (units, system_quantity) = self.counting_context(company_id, &submission, now)?;
        let (session_id, item_id, counter) =
            (submission.session_id, submission.item_id, submission.counted_by);

        let count = match self.counts.find(session_id, item_id, counter)? {
            Some(mut existing) => {
                let read_at = existing.version;
                existing.recount(submission, &units, system_quantity, now)?;
                self.counts
                    .upsert(existing.clone(), ExpectedVersion::Exact(read_at))?;
                existing
            }
            None => {
                let count = Count::submit(CountId::new(), submission, &units, system_quantity, now)?;
                self.counts.upsert(count.clone(), ExpectedVersion::Exact(0))?;
                count
            }
        };

        self.locks.release(session_id, item_id, counter, now)?;
        debug!(count = %count.id, counted = count.counted_quantity, variance = count.variance, "count recorded");
        Ok(count)
    }

    /// Explicit optimistic recount of a known row.
    #[instrument(skip(self, submission), fields(count = %count_id))]
    pub fn update_count(
        &self,
        company_id: CompanyId,
        count_id: CountId,
        expected_version: u64,
        submission: CountSubmission,
        now: DateTime<Utc>,
    ) -> ServiceResult<Count> {
        let mut count = self
            .counts
            .get(count_id)?
            .ok_or_else(|| DomainError::not_found(format!("count {count_id}")))?;
        if count.version != expected_version {
            return Err(DomainError::conflict(format!(
                "count {count_id} is at version {}, not {expected_version}",
                count.version
            ))
            .into());
        }

        let (units, system_quantity) = self.counting_context(company_id, &submission, now)?;
        count.recount(submission, &units, system_quantity, now)?;
        self.counts
            .upsert(count.clone(), ExpectedVersion::Exact(expected_version))?;
        Ok(count)
    }

    pub fn counts(&self, company_id: CompanyId, session_id: SessionId) -> ServiceResult<Vec<Count>> {
        self.session(company_id, session_id)?;
        Ok(self.counts.list_session(session_id)?)
    }

    // ---- verification ---------------------------------------------------

    /// Approve every PENDING count on the shelf. Returns how many moved.
    #[instrument(skip(self), fields(session = %session_id, shelf = %shelf), err)]
    pub fn approve_shelf(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
        shelf: &str,
        verifier: UserId,
        now: DateTime<Utc>,
    ) -> ServiceResult<usize> {
        self.verify_shelf(company_id, session_id, shelf, |count| {
            Ok(count.approve(verifier, now))
        })
    }

    /// Reject every PENDING count on the shelf back to its counter.
    #[instrument(skip(self), fields(session = %session_id, shelf = %shelf), err)]
    pub fn reject_shelf(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
        shelf: &str,
        verifier: UserId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<usize> {
        if reason.trim().is_empty() {
            return Err(DomainError::validation("rejection reason is required").into());
        }
        self.verify_shelf(company_id, session_id, shelf, |count| {
            count.reject(verifier, reason, now)
        })
    }

    fn verify_shelf<F>(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
        shelf: &str,
        mut apply: F,
    ) -> ServiceResult<usize>
    where
        F: FnMut(&mut Count) -> Result<bool, DomainError>,
    {
        let session = self.session(company_id, session_id)?;
        session.ensure_verifying()?;

        let mut changed = Vec::new();
        for mut count in self.counts.list_session(session_id)? {
            if !count.on_shelf(shelf) {
                continue;
            }
            let read_at = count.version;
            if apply(&mut count)? {
                changed.push((count, read_at));
            }
        }

        let moved = changed.len();
        if moved > 0 {
            self.counts.update_many(changed)?;
        }
        Ok(moved)
    }

    // ---- reporting ------------------------------------------------------

    pub fn progress(&self, company_id: CompanyId, session_id: SessionId) -> ServiceResult<Progress> {
        let session = self.session(company_id, session_id)?;
        let (_, branch_id) = session.scope()?;
        let items = self.ledger.items_at_branch(company_id, branch_id)?;
        let counts = self.counts.list_session(session_id)?;
        Ok(Progress::compute(&items, &counts))
    }

    pub fn variance_report(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
    ) -> ServiceResult<VarianceReport> {
        let session = self.session(company_id, session_id)?;
        let (_, branch_id) = session.scope()?;
        let counts = self.counts.list_session(session_id)?;

        let mut live = BTreeMap::new();
        for item_id in counts.iter().map(|c| c.item_id).collect::<BTreeSet<_>>() {
            let key = StockKey::new(company_id, branch_id, item_id);
            let position = StockPosition::from_entries(&self.ledger.load_stream(key)?);
            live.insert(
                item_id,
                LiveStock {
                    balance: position.balance(),
                    unit_cost: position.latest_unit_cost(),
                },
            );
        }

        Ok(VarianceReport::build(
            session_id,
            session.session_code(),
            &counts,
            &live,
        ))
    }
}

fn transition(actor: UserId, occurred_at: DateTime<Utc>) -> Transition {
    Transition { actor, occurred_at }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use rxstock_ledger::{NewLedgerEntry, Reference};

    use crate::ledger_store::{InMemoryLedgerStore, LedgerStore};
    use crate::ports::{InMemoryCatalog, InMemoryOpenDocuments, ItemProfile, OpenDocument};

    struct Fixture {
        service: StockTakeService,
        ledger: Arc<InMemoryLedgerStore>,
        company: CompanyId,
        branch: BranchId,
        item: ItemId,
        manager: UserId,
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 9, minute, 0).unwrap()
    }

    fn fixture() -> Fixture {
        let (company, branch, item) = (CompanyId::new(), BranchId::new(), ItemId::new());
        let catalog = InMemoryCatalog::new();
        catalog.add_branch(company, branch);
        catalog.add_item(company, item, ItemProfile::new(ItemUnits::new("tablet")));
        catalog.set_shelves(company, branch, ["A1", "A2"]);

        let ledger = Arc::new(InMemoryLedgerStore::new());
        ledger
            .append(
                vec![NewLedgerEntry {
                    key: StockKey::new(company, branch, item),
                    batch_number: Some("B1".to_string()),
                    expiry_date: NaiveDate::from_ymd_opt(2025, 6, 30),
                    transaction_type: TransactionType::Purchase,
                    reference: Reference::new("purchase_invoice", "PI-1"),
                    quantity_delta: 10,
                    unit_cost: 40,
                    created_by: UserId::new(),
                    created_at: at(0),
                }],
                ExpectedVersion::Any,
            )
            .unwrap();

        let service = StockTakeService::new(ledger.clone(), Arc::new(catalog));
        Fixture {
            service,
            ledger,
            company,
            branch,
            item,
            manager: UserId::new(),
        }
    }

    fn submission(f: &Fixture, session: SessionId, counter: UserId, qty: i64) -> CountSubmission {
        CountSubmission {
            session_id: session,
            item_id: f.item,
            counted_by: counter,
            shelf_location: "A1".to_string(),
            quantity_in_unit: qty,
            unit_name: "tablet".to_string(),
            batch_number: None,
            expiry_date: None,
        }
    }

    fn started(f: &Fixture) -> SessionId {
        let session = f.service.create_session(f.company, f.branch, f.manager, at(1)).unwrap();
        let sid = session.id_typed();
        f.service.start(f.company, sid, f.manager, at(2)).unwrap();
        sid
    }

    #[test]
    fn one_open_session_per_branch() {
        let f = fixture();
        let first = f.service.create_session(f.company, f.branch, f.manager, at(1)).unwrap();
        assert_eq!(first.session_code(), "ST-MAR15A");

        let second = f.service.create_session(f.company, f.branch, f.manager, at(1));
        assert!(matches!(
            second,
            Err(ServiceError::Domain(DomainError::SessionConflict { .. }))
        ));

        f.service
            .cancel(f.company, first.id_typed(), f.manager, None, at(2))
            .unwrap();
        let third = f.service.create_session(f.company, f.branch, f.manager, at(3)).unwrap();
        assert_eq!(third.session_code(), "ST-MAR15B");
    }

    #[test]
    fn start_waits_for_open_documents() {
        let f = fixture();
        let docs = Arc::new(InMemoryOpenDocuments::new());
        docs.open(f.company, f.branch, OpenDocument::new("sales_invoice", "SI-9"));
        let service = f.service.clone().with_open_documents(docs.clone());

        let sid = service.create_session(f.company, f.branch, f.manager, at(1)).unwrap().id_typed();
        let blocked = service.start(f.company, sid, f.manager, at(2));
        assert!(matches!(
            blocked,
            Err(ServiceError::Domain(DomainError::BranchNotQuiescent { .. }))
        ));

        docs.close(f.company, f.branch, "SI-9");
        let session = service.start(f.company, sid, f.manager, at(3)).unwrap();
        assert_eq!(session.status(), SessionStatus::Active);
    }

    #[test]
    fn unknown_shelves_are_refused() {
        let f = fixture();
        let sid = f.service.create_session(f.company, f.branch, f.manager, at(1)).unwrap().id_typed();
        let err = f
            .service
            .assign_counter(f.company, sid, UserId::new(), ["Z9"], f.manager, at(2))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Validation(_))));
    }

    #[test]
    fn a_live_lease_blocks_other_counters() {
        let f = fixture();
        let sid = started(&f);
        let (alice, bob) = (UserId::new(), UserId::new());

        f.service.acquire_lock(f.company, sid, f.item, alice, at(3)).unwrap();
        let held = f.service.acquire_lock(f.company, sid, f.item, bob, at(4));
        assert!(matches!(held, Err(ServiceError::Domain(DomainError::LockHeld { .. }))));

        let blocked = f.service.submit_count(f.company, submission(&f, sid, bob, 9), at(4));
        assert!(matches!(blocked, Err(ServiceError::Domain(DomainError::LockHeld { .. }))));

        // Expired after the default five minutes.
        f.service.acquire_lock(f.company, sid, f.item, bob, at(9)).unwrap();
    }

    #[test]
    fn submitting_releases_the_counters_lease_and_recounts_in_place() {
        let f = fixture();
        let sid = started(&f);
        let alice = UserId::new();

        f.service.acquire_lock(f.company, sid, f.item, alice, at(3)).unwrap();
        let first = f.service.submit_count(f.company, submission(&f, sid, alice, 9), at(4)).unwrap();
        assert_eq!((first.system_quantity, first.variance), (10, -1));
        assert!(f.service.locks().current(sid, f.item, at(4)).unwrap().is_none());

        let second = f.service.submit_count(f.company, submission(&f, sid, alice, 8), at(5)).unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.version, 2);
        assert_eq!(f.service.counts(f.company, sid).unwrap().len(), 1);

        let stale = f.service.update_count(f.company, first.id, 1, submission(&f, sid, alice, 7), at(6));
        assert!(matches!(stale, Err(ServiceError::Domain(DomainError::Conflict(_)))));
    }

    #[test]
    fn completion_waits_for_every_shelf() {
        let f = fixture();
        let sid = started(&f);
        f.service.submit_count(f.company, submission(&f, sid, UserId::new(), 9), at(3)).unwrap();

        let blocked = f.service.complete(f.company, sid, f.manager, at(4));
        assert!(matches!(
            blocked,
            Err(ServiceError::Domain(DomainError::UnresolvedCounts { .. }))
        ));

        assert_eq!(f.service.reject_shelf(f.company, sid, "A1", f.manager, "recount", at(5)).unwrap(), 1);
        assert!(f.service.complete(f.company, sid, f.manager, at(6)).is_err());
        assert!(f.service.reject_shelf(f.company, sid, "A1", f.manager, " ", at(6)).is_err());
    }

    #[test]
    fn completion_reconciles_against_the_live_balance_once() {
        let f = fixture();
        let sid = started(&f);
        let key = StockKey::new(f.company, f.branch, f.item);
        f.service.submit_count(f.company, submission(&f, sid, UserId::new(), 7), at(3)).unwrap();
        assert_eq!(f.service.approve_shelf(f.company, sid, "A1", f.manager, at(4)).unwrap(), 1);

        let report = f.service.variance_report(f.company, sid).unwrap();
        assert_eq!(report.lines[0].live_variance, -3);
        assert_eq!(report.total_variance_value, -120);

        let adjustments = f.service.complete(f.company, sid, f.manager, at(5)).unwrap();
        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].adjustment_quantity, -3);
        assert_eq!(StockPosition::from_entries(&f.ledger.load_stream(key).unwrap()).balance(), 7);

        let again = f.service.complete(f.company, sid, f.manager, at(6)).unwrap();
        assert_eq!(again, adjustments);
        assert_eq!(f.ledger.load_stream(key).unwrap().len(), 2);
        assert_eq!(f.service.history(f.company, sid).unwrap().len(), 3);
    }

    #[test]
    fn repeated_completion_leaves_later_movements_alone() {
        let f = fixture();
        let sid = started(&f);
        let key = StockKey::new(f.company, f.branch, f.item);
        f.service.submit_count(f.company, submission(&f, sid, UserId::new(), 10), at(3)).unwrap();
        f.service.approve_shelf(f.company, sid, "A1", f.manager, at(4)).unwrap();

        assert!(f.service.complete(f.company, sid, f.manager, at(5)).unwrap().is_empty());

        f.ledger
            .append(
                vec![NewLedgerEntry {
                    key,
                    batch_number: Some("B1".to_string()),
                    expiry_date: NaiveDate::from_ymd_opt(2025, 6, 30),
                    transaction_type: TransactionType::Sale,
                    reference: Reference::new("sales_invoice", "SI-4"),
                    quantity_delta: -4,
                    unit_cost: 40,
                    created_by: UserId::new(),
                    created_at: at(6),
                }],
                ExpectedVersion::Any,
            )
            .unwrap();

        assert!(f.service.complete(f.company, sid, f.manager, at(7)).unwrap().is_empty());
        let stream = f.ledger.load_stream(key).unwrap();
        assert_eq!(stream.len(), 2);
        assert_eq!(StockPosition::from_entries(&stream).balance(), 6);
    }

    #[test]
    fn counts_left_unverified_at_completion_are_not_reconciled() {
        let f = fixture();
        let sid = started(&f);
        let key = StockKey::new(f.company, f.branch, f.item);
        f.service.submit_count(f.company, submission(&f, sid, UserId::new(), 8), at(3)).unwrap();
        f.service.approve_shelf(f.company, sid, "A1", f.manager, at(4)).unwrap();

        // Lands after the shelf check of a completion on another node.
        let late = Count::submit(
            CountId::new(),
            CountSubmission {
                shelf_location: "A2".to_string(),
                ..submission(&f, sid, UserId::new(), 100)
            },
            &ItemUnits::new("tablet"),
            10,
            at(4),
        )
        .unwrap();
        f.service.counts.upsert(late, ExpectedVersion::Exact(0)).unwrap();
        f.service
            .run(f.company, sid, SessionCommand::Complete(transition(f.manager, at(5))))
            .unwrap();

        let adjustments = f.service.complete(f.company, sid, f.manager, at(6)).unwrap();
        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].adjustment_quantity, -2);
        assert_eq!(StockPosition::from_entries(&f.ledger.load_stream(key).unwrap()).balance(), 8);
    }

    #[test]
    fn cancelling_discards_counts_without_touching_the_ledger() {
        let f = fixture();
        let sid = started(&f);
        let alice = UserId::new();
        f.service.acquire_lock(f.company, sid, ItemId::new(), alice, at(3)).unwrap();
        f.service.submit_count(f.company, submission(&f, sid, alice, 2), at(3)).unwrap();

        let session = f.service.cancel(f.company, sid, f.manager, Some("wrong day".into()), at(4)).unwrap();
        assert_eq!(session.status(), SessionStatus::Cancelled);
        assert!(f.service.counts(f.company, sid).unwrap().is_empty());
        assert!(f.service.adjustments(f.company, sid).unwrap().is_empty());
        let key = StockKey::new(f.company, f.branch, f.item);
        assert_eq!(f.ledger.load_stream(key).unwrap().len(), 1);
    }

    #[test]
    fn progress_counts_branch_items() {
        let f = fixture();
        let sid = started(&f);
        f.service.submit_count(f.company, submission(&f, sid, UserId::new(), 10), at(3)).unwrap();

        let progress = f.service.progress(f.company, sid).unwrap();
        assert_eq!((progress.total_items, progress.counted_items, progress.pending), (1, 1, 1));
    }
}
