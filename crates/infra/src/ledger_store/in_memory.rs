use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use rxstock_core::{BranchId, CompanyId, EntryId, ExpectedVersion, ItemId};
use rxstock_ledger::{LedgerEntry, NewLedgerEntry, StockKey};

use super::query::{LedgerFilter, LedgerPage, LedgerQuery, Pagination};
use super::r#trait::{LedgerStore, LedgerStoreError, stream_of};

/// In-memory append-only ledger.
///
/// Intended for tests/dev. A single write lock makes each append atomic and
/// readers never observe a half-written batch.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    streams: RwLock<HashMap<StockKey, Vec<LedgerEntry>>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[LedgerEntry]) -> u64 {
        stream.last().map(|e| e.sequence).unwrap_or(0)
    }
}

fn poisoned() -> LedgerStoreError {
    LedgerStoreError::Storage("lock poisoned".to_string())
}

impl LedgerStore for InMemoryLedgerStore {
    fn append(
        &self,
        entries: Vec<NewLedgerEntry>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
        let key = stream_of(&entries)?;

        let mut streams = self.streams.write().map_err(|_| poisoned())?;
        let stream = streams.entry(key).or_default();
        let current = Self::current_version(stream);

        if !expected_version.matches(current) {
            return Err(LedgerStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        // Commit everything before touching the stream so a bad entry leaves
        // it untouched.
        let mut committed = Vec::with_capacity(entries.len());
        for (offset, entry) in entries.into_iter().enumerate() {
            committed.push(LedgerEntry::commit(
                entry,
                EntryId::new(),
                current + offset as u64 + 1,
            )?);
        }

        stream.extend(committed.iter().cloned());
        Ok(committed)
    }

    fn load_stream(&self, key: StockKey) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
        let streams = self.streams.read().map_err(|_| poisoned())?;
        Ok(streams.get(&key).cloned().unwrap_or_default())
    }

    fn find_entry(
        &self,
        company_id: CompanyId,
        entry_id: EntryId,
    ) -> Result<Option<LedgerEntry>, LedgerStoreError> {
        let streams = self.streams.read().map_err(|_| poisoned())?;
        Ok(streams
            .iter()
            .filter(|(k, _)| k.company_id == company_id)
            .flat_map(|(_, s)| s.iter())
            .find(|e| e.id == entry_id)
            .cloned())
    }

    fn items_at_branch(
        &self,
        company_id: CompanyId,
        branch_id: BranchId,
    ) -> Result<BTreeSet<ItemId>, LedgerStoreError> {
        let streams = self.streams.read().map_err(|_| poisoned())?;
        Ok(streams
            .iter()
            .filter(|(k, s)| k.company_id == company_id && k.branch_id == branch_id && !s.is_empty())
            .map(|(k, _)| k.item_id)
            .collect())
    }
}

#[async_trait::async_trait]
impl LedgerQuery for InMemoryLedgerStore {
    async fn query_entries(
        &self,
        company_id: CompanyId,
        filter: LedgerFilter,
        pagination: Pagination,
    ) -> Result<LedgerPage, LedgerStoreError> {
        let mut matching: Vec<LedgerEntry> = {
            let streams = self.streams.read().map_err(|_| poisoned())?;
            streams
                .iter()
                .filter(|(k, _)| k.company_id == company_id)
                .flat_map(|(_, s)| s.iter())
                .filter(|e| filter.matches(e))
                .cloned()
                .collect()
        };
        matching.sort_by(|a, b| (a.created_at, a.sequence).cmp(&(b.created_at, b.sequence)));

        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .collect();
        Ok(LedgerPage::new(page, total, pagination))
    }
}
