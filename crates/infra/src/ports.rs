//! Collaborator ports: the catalog and the open-documents check.
//!
//! Both are owned by systems outside this workspace. The in-memory versions
//! back tests and local runs.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use rxstock_core::{BranchId, CompanyId, ItemId, SupplierId};
use rxstock_ledger::ItemUnits;

/// What the ledger needs to know about a catalog item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemProfile {
    pub units: ItemUnits,
    pub preferred_supplier: Option<SupplierId>,
    pub pack_size: Option<i64>,
}

impl ItemProfile {
    pub fn new(units: ItemUnits) -> Self {
        Self {
            units,
            preferred_supplier: None,
            pack_size: None,
        }
    }

    pub fn with_supplier(mut self, supplier: SupplierId) -> Self {
        self.preferred_supplier = Some(supplier);
        self
    }

    pub fn with_pack_size(mut self, pack_size: i64) -> Self {
        self.pack_size = Some(pack_size);
        self
    }
}

pub trait Catalog: Send + Sync {
    fn item(&self, company_id: CompanyId, item_id: ItemId) -> Option<ItemProfile>;

    fn branch_exists(&self, company_id: CompanyId, branch_id: BranchId) -> bool;

    /// Shelf names known for the branch, when the catalog tracks them.
    fn known_shelves(&self, company_id: CompanyId, branch_id: BranchId) -> Option<BTreeSet<String>>;
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    items: RwLock<HashMap<(CompanyId, ItemId), ItemProfile>>,
    branches: RwLock<HashSet<(CompanyId, BranchId)>>,
    shelves: RwLock<HashMap<(CompanyId, BranchId), BTreeSet<String>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_branch(&self, company_id: CompanyId, branch_id: BranchId) {
        self.branches
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((company_id, branch_id));
    }

    pub fn add_item(&self, company_id: CompanyId, item_id: ItemId, profile: ItemProfile) {
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((company_id, item_id), profile);
    }

    pub fn set_shelves<I, S>(&self, company_id: CompanyId, branch_id: BranchId, shelves: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let shelves = shelves
            .into_iter()
            .map(|s| s.into().trim().to_string())
            .collect();
        self.shelves
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((company_id, branch_id), shelves);
    }
}

impl Catalog for InMemoryCatalog {
    fn item(&self, company_id: CompanyId, item_id: ItemId) -> Option<ItemProfile> {
        self.items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(company_id, item_id))
            .cloned()
    }

    fn branch_exists(&self, company_id: CompanyId, branch_id: BranchId) -> bool {
        self.branches
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&(company_id, branch_id))
    }

    fn known_shelves(&self, company_id: CompanyId, branch_id: BranchId) -> Option<BTreeSet<String>> {
        self.shelves
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(company_id, branch_id))
            .cloned()
    }
}

/// A draft or open sales/purchase document blocking a stock-take start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDocument {
    pub kind: String,
    pub reference: String,
}

impl OpenDocument {
    pub fn new(kind: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            reference: reference.into(),
        }
    }
}

impl core::fmt::Display for OpenDocument {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.kind, self.reference)
    }
}

pub trait OpenDocuments: Send + Sync {
    fn open_documents(&self, company_id: CompanyId, branch_id: BranchId) -> Vec<OpenDocument>;
}

/// Reports every branch as quiescent.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpenDocuments;

impl OpenDocuments for NoOpenDocuments {
    fn open_documents(&self, _company_id: CompanyId, _branch_id: BranchId) -> Vec<OpenDocument> {
        Vec::new()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryOpenDocuments {
    open: RwLock<HashMap<(CompanyId, BranchId), Vec<OpenDocument>>>,
}

impl InMemoryOpenDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, company_id: CompanyId, branch_id: BranchId, document: OpenDocument) {
        self.open
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry((company_id, branch_id))
            .or_default()
            .push(document);
    }

    pub fn close(&self, company_id: CompanyId, branch_id: BranchId, reference: &str) {
        if let Some(docs) = self
            .open
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&(company_id, branch_id))
        {
            docs.retain(|d| d.reference != reference);
        }
    }
}

impl OpenDocuments for InMemoryOpenDocuments {
    fn open_documents(&self, company_id: CompanyId, branch_id: BranchId) -> Vec<OpenDocument> {
        self.open
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(company_id, branch_id))
            .cloned()
            .unwrap_or_default()
    }
}
