use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use rxstock_core::{
    AggregateRoot, BranchId, CompanyId, CountId, DomainError, ExpectedVersion, ItemId, SessionId,
    UserId,
};
use rxstock_events::EventEnvelope;
use rxstock_stocktake::{Adjustment, Count, SessionEvent, StockTakeSession};

use super::r#trait::{
    AdjustmentStore, CountStore, SESSION_STREAM_TYPE, SessionStore, StockTakeStoreError,
    check_version,
};

fn poisoned() -> StockTakeStoreError {
    StockTakeStoreError::Storage("lock poisoned".to_string())
}

#[derive(Debug, Clone)]
struct SessionRow {
    session: StockTakeSession,
    history: Vec<EventEnvelope<SessionEvent>>,
}

/// In-memory session store. One write lock covers the open-session check and
/// the write, so two creates for a branch cannot both succeed.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    rows: RwLock<HashMap<SessionId, SessionRow>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn save(
        &self,
        session: &StockTakeSession,
        events: &[SessionEvent],
        expected: ExpectedVersion,
    ) -> Result<(), StockTakeStoreError> {
        let (company_id, branch_id) = session.scope()?;
        let session_id = session.id_typed();

        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        let stored = rows.get(&session_id).map(|r| r.session.version()).unwrap_or(0);
        check_version(&format!("session {session_id}"), expected, stored)?;

        if session.version() != stored + events.len() as u64 {
            return Err(DomainError::invariant(format!(
                "session {session_id} at version {} does not follow {stored} by {} event(s)",
                session.version(),
                events.len()
            ))
            .into());
        }

        if session.is_open() {
            let clash = rows.values().find(|r| {
                r.session.id_typed() != session_id
                    && r.session.company_id() == Some(company_id)
                    && r.session.branch_id() == Some(branch_id)
                    && r.session.is_open()
            });
            if let Some(existing) = clash {
                return Err(DomainError::SessionConflict {
                    branch_id,
                    existing: existing.session.session_code().to_string(),
                }
                .into());
            }
        }

        if stored == 0
            && rows.values().any(|r| {
                r.session.company_id() == Some(company_id)
                    && r.session.session_code() == session.session_code()
            })
        {
            return Err(StockTakeStoreError::Duplicate(format!(
                "session code {}",
                session.session_code()
            )));
        }

        let row = rows.entry(session_id).or_insert_with(|| SessionRow {
            session: session.clone(),
            history: Vec::new(),
        });
        for (offset, event) in events.iter().enumerate() {
            row.history.push(EventEnvelope::record(
                company_id,
                *session_id.as_uuid(),
                SESSION_STREAM_TYPE,
                stored + offset as u64 + 1,
                event.clone(),
            ));
        }
        row.session = session.clone();
        Ok(())
    }

    fn get(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
    ) -> Result<Option<StockTakeSession>, StockTakeStoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows
            .get(&session_id)
            .filter(|r| r.session.company_id() == Some(company_id))
            .map(|r| r.session.clone()))
    }

    fn open_for_branch(
        &self,
        company_id: CompanyId,
        branch_id: BranchId,
    ) -> Result<Option<StockTakeSession>, StockTakeStoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows
            .values()
            .find(|r| {
                r.session.company_id() == Some(company_id)
                    && r.session.branch_id() == Some(branch_id)
                    && r.session.is_open()
            })
            .map(|r| r.session.clone()))
    }

    fn code_exists(&self, company_id: CompanyId, code: &str) -> Result<bool, StockTakeStoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows
            .values()
            .any(|r| r.session.company_id() == Some(company_id) && r.session.session_code() == code))
    }

    fn history(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
    ) -> Result<Vec<EventEnvelope<SessionEvent>>, StockTakeStoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows
            .get(&session_id)
            .filter(|r| r.session.company_id() == Some(company_id))
            .map(|r| r.history.clone())
            .unwrap_or_default())
    }
}

/// In-memory count store.
#[derive(Debug, Default)]
pub struct InMemoryCountStore {
    counts: RwLock<HashMap<CountId, Count>>,
}

impl InMemoryCountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn same_slot(a: &Count, b: &Count) -> bool {
    a.session_id == b.session_id && a.item_id == b.item_id && a.counted_by == b.counted_by
}

impl CountStore for InMemoryCountStore {
    fn upsert(&self, count: Count, expected: ExpectedVersion) -> Result<(), StockTakeStoreError> {
        let mut counts = self.counts.write().map_err(|_| poisoned())?;
        let stored = counts.get(&count.id).map(|c| c.version).unwrap_or(0);
        check_version(&format!("count {}", count.id), expected, stored)?;

        if counts.values().any(|c| c.id != count.id && same_slot(c, &count)) {
            return Err(StockTakeStoreError::Duplicate(format!(
                "count for item {} by {} in session {}",
                count.item_id, count.counted_by, count.session_id
            )));
        }

        counts.insert(count.id, count);
        Ok(())
    }

    fn get(&self, count_id: CountId) -> Result<Option<Count>, StockTakeStoreError> {
        let counts = self.counts.read().map_err(|_| poisoned())?;
        Ok(counts.get(&count_id).cloned())
    }

    fn find(
        &self,
        session_id: SessionId,
        item_id: ItemId,
        counter: UserId,
    ) -> Result<Option<Count>, StockTakeStoreError> {
        let counts = self.counts.read().map_err(|_| poisoned())?;
        Ok(counts
            .values()
            .find(|c| c.session_id == session_id && c.item_id == item_id && c.counted_by == counter)
            .cloned())
    }

    fn list_session(&self, session_id: SessionId) -> Result<Vec<Count>, StockTakeStoreError> {
        let counts = self.counts.read().map_err(|_| poisoned())?;
        let mut listed: Vec<Count> = counts
            .values()
            .filter(|c| c.session_id == session_id)
            .cloned()
            .collect();
        listed.sort_by(|a, b| (a.counted_at, a.id).cmp(&(b.counted_at, b.id)));
        Ok(listed)
    }

    fn update_many(&self, updates: Vec<(Count, u64)>) -> Result<(), StockTakeStoreError> {
        let mut counts = self.counts.write().map_err(|_| poisoned())?;
        for (count, read_at) in &updates {
            let stored = counts
                .get(&count.id)
                .map(|c| c.version)
                .ok_or_else(|| StockTakeStoreError::NotFound(format!("count {}", count.id)))?;
            check_version(&format!("count {}", count.id), ExpectedVersion::Exact(*read_at), stored)?;
        }
        for (count, _) in updates {
            counts.insert(count.id, count);
        }
        Ok(())
    }

    fn discard_session(&self, session_id: SessionId) -> Result<usize, StockTakeStoreError> {
        let mut counts = self.counts.write().map_err(|_| poisoned())?;
        let before = counts.len();
        counts.retain(|_, c| c.session_id != session_id);
        Ok(before - counts.len())
    }
}

/// In-memory adjustment store.
#[derive(Debug, Default)]
pub struct InMemoryAdjustmentStore {
    rows: RwLock<BTreeMap<(SessionId, ItemId), Adjustment>>,
}

impl InMemoryAdjustmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AdjustmentStore for InMemoryAdjustmentStore {
    fn insert(&self, adjustment: Adjustment) -> Result<(), StockTakeStoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        let key = (adjustment.session_id, adjustment.item_id);
        if rows.contains_key(&key) {
            return Err(StockTakeStoreError::Duplicate(format!(
                "adjustment for item {} in session {}",
                adjustment.item_id, adjustment.session_id
            )));
        }
        rows.insert(key, adjustment);
        Ok(())
    }

    fn get(
        &self,
        session_id: SessionId,
        item_id: ItemId,
    ) -> Result<Option<Adjustment>, StockTakeStoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows.get(&(session_id, item_id)).cloned())
    }

    fn list_session(&self, session_id: SessionId) -> Result<Vec<Adjustment>, StockTakeStoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows
            .range((session_id, ItemId::from_uuid(uuid::Uuid::nil()))..)
            .take_while(|((s, _), _)| *s == session_id)
            .map(|(_, a)| a.clone())
            .collect())
    }

    fn discard_session(&self, session_id: SessionId) -> Result<usize, StockTakeStoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        let before = rows.len();
        rows.retain(|(s, _), _| *s != session_id);
        Ok(before - rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rxstock_core::Aggregate;
    use rxstock_ledger::ItemUnits;
    use rxstock_stocktake::{CountSubmission, CreateSession, SessionCommand, Transition};

    fn create(company: CompanyId, branch: BranchId, code: &str) -> (StockTakeSession, Vec<SessionEvent>) {
        let id = SessionId::new();
        let mut s = StockTakeSession::empty(id);
        let events = s
            .execute(&SessionCommand::Create(CreateSession {
                company_id: company,
                session_id: id,
                branch_id: branch,
                session_code: code.to_string(),
                created_by: UserId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        (s, events)
    }

    fn count(session_id: SessionId, counter: UserId) -> Count {
        Count::submit(
            CountId::new(),
            CountSubmission {
                session_id,
                item_id: ItemId::from_uuid(uuid::Uuid::from_u128(7)),
                counted_by: counter,
                shelf_location: "A1".to_string(),
                quantity_in_unit: 3,
                unit_name: "tablet".to_string(),
                batch_number: None,
                expiry_date: None,
            },
            &ItemUnits::new("tablet"),
            3,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn second_open_session_on_a_branch_conflicts() {
        let store = InMemorySessionStore::new();
        let (company, branch) = (CompanyId::new(), BranchId::new());

        let (a, ev) = create(company, branch, "ST-MAR07A");
        store.save(&a, &ev, ExpectedVersion::Exact(0)).unwrap();

        let (b, ev) = create(company, branch, "ST-MAR07B");
        let err = store.save(&b, &ev, ExpectedVersion::Exact(0)).unwrap_err();
        assert!(matches!(
            err,
            StockTakeStoreError::Domain(DomainError::SessionConflict { ref existing, .. }) if existing == "ST-MAR07A"
        ));

        // Another branch is unaffected.
        let (c, ev) = create(company, BranchId::new(), "ST-MAR07C");
        store.save(&c, &ev, ExpectedVersion::Exact(0)).unwrap();
    }

    #[test]
    fn stale_session_save_is_rejected_and_history_grows() {
        let store = InMemorySessionStore::new();
        let (company, branch) = (CompanyId::new(), BranchId::new());
        let (mut s, ev) = create(company, branch, "ST-MAR07A");
        store.save(&s, &ev, ExpectedVersion::Exact(0)).unwrap();

        let t = Transition {
            actor: UserId::new(),
            occurred_at: Utc::now(),
        };
        let ev = s.execute(&SessionCommand::Start(t)).unwrap();
        assert!(matches!(
            store.save(&s, &ev, ExpectedVersion::Exact(0)),
            Err(StockTakeStoreError::Concurrency(_))
        ));
        store.save(&s, &ev, ExpectedVersion::Exact(1)).unwrap();

        let history = store.history(company, s.id_typed()).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].sequence_number(), 2);
        assert_eq!(history[1].event_type(), "stocktake.session.started");
        assert!(store.history(CompanyId::new(), s.id_typed()).unwrap().is_empty());
    }

    #[test]
    fn one_count_per_counter_and_item() {
        let store = InMemoryCountStore::new();
        let (session, counter) = (SessionId::new(), UserId::new());
        store.upsert(count(session, counter), ExpectedVersion::Exact(0)).unwrap();

        let err = store
            .upsert(count(session, counter), ExpectedVersion::Exact(0))
            .unwrap_err();
        assert!(matches!(err, StockTakeStoreError::Duplicate(_)));

        store.upsert(count(session, UserId::new()), ExpectedVersion::Exact(0)).unwrap();
        assert_eq!(store.list_session(session).unwrap().len(), 2);
    }

    #[test]
    fn update_many_is_all_or_nothing() {
        let store = InMemoryCountStore::new();
        let session = SessionId::new();
        let a = count(session, UserId::new());
        let b = count(session, UserId::new());
        store.upsert(a.clone(), ExpectedVersion::Any).unwrap();
        store.upsert(b.clone(), ExpectedVersion::Any).unwrap();

        let mut a2 = a.clone();
        a2.approve(UserId::new(), Utc::now());
        let mut b2 = b.clone();
        b2.approve(UserId::new(), Utc::now());

        let err = store.update_many(vec![(a2.clone(), 1), (b2.clone(), 7)]).unwrap_err();
        assert!(matches!(err, StockTakeStoreError::Concurrency(_)));
        assert!(!store.get(a.id).unwrap().unwrap().is_approved());

        store.update_many(vec![(a2, 1), (b2, 1)]).unwrap();
        assert!(store.list_session(session).unwrap().iter().all(Count::is_approved));
        assert_eq!(store.discard_session(session).unwrap(), 2);
    }
}
