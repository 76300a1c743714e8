//! Counter → shelves assignment map.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use rxstock_core::{DomainError, DomainResult, UserId, ValueObject};

const MAX_SHELF_NAME_LEN: usize = 64;

/// Trim and validate a shelf name.
pub fn normalize_shelf(name: &str) -> DomainResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("shelf_location is required"));
    }
    if trimmed.chars().count() > MAX_SHELF_NAME_LEN {
        return Err(DomainError::validation(format!(
            "shelf name longer than {MAX_SHELF_NAME_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Which shelves each counter is responsible for.
///
/// A counter without an entry may count any shelf.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShelfAssignments(BTreeMap<UserId, BTreeSet<String>>);

impl ValueObject for ShelfAssignments {}

impl ShelfAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `shelves` into the counter's assignment (names normalized).
    pub fn assign<I, S>(&mut self, counter: UserId, shelves: I) -> DomainResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let normalized = shelves
            .into_iter()
            .map(|s| normalize_shelf(s.as_ref()))
            .collect::<DomainResult<BTreeSet<String>>>()?;
        if normalized.is_empty() {
            return Ok(());
        }
        self.0.entry(counter).or_default().extend(normalized);
        Ok(())
    }

    /// Merge shelf names that already went through `normalize_shelf`.
    pub fn extend_normalized(&mut self, counter: UserId, shelves: &BTreeSet<String>) {
        if shelves.is_empty() {
            return;
        }
        self.0.entry(counter).or_default().extend(shelves.iter().cloned());
    }

    pub fn shelves_of(&self, counter: UserId) -> Option<&BTreeSet<String>> {
        self.0.get(&counter)
    }

    pub fn permits(&self, counter: UserId, shelf: &str) -> bool {
        match self.0.get(&counter) {
            Some(shelves) => shelves.contains(shelf.trim()),
            None => true,
        }
    }

    pub fn all_shelves(&self) -> BTreeSet<&str> {
        self.0
            .values()
            .flat_map(|s| s.iter().map(String::as_str))
            .collect()
    }

    /// Reject shelves the branch does not know about.
    pub fn validate_against(&self, known: &BTreeSet<String>) -> DomainResult<()> {
        let unknown: Vec<&str> = self
            .all_shelves()
            .into_iter()
            .filter(|s| !known.contains(*s))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(DomainError::validation(format!(
                "unknown shelves for branch: {}",
                unknown.join(", ")
            )))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_merge_and_trim() {
        let counter = UserId::new();
        let mut a = ShelfAssignments::new();
        a.assign(counter, [" A1 ", "B2"]).unwrap();
        a.assign(counter, ["A1", "C3"]).unwrap();

        let shelves: Vec<&str> = a.shelves_of(counter).unwrap().iter().map(String::as_str).collect();
        assert_eq!(shelves, vec!["A1", "B2", "C3"]);
    }

    #[test]
    fn normalized_names_merge_without_revalidation() {
        let counter = UserId::new();
        let mut a = ShelfAssignments::new();
        a.extend_normalized(counter, &BTreeSet::new());
        assert!(a.is_empty());

        let shelves: BTreeSet<String> = ["A1".to_string(), "B2".to_string()].into();
        a.extend_normalized(counter, &shelves);
        assert!(a.permits(counter, "B2"));
        assert!(!a.permits(counter, "C3"));
    }

    #[test]
    fn unassigned_counter_may_count_anywhere() {
        let assigned = UserId::new();
        let free = UserId::new();
        let mut a = ShelfAssignments::new();
        a.assign(assigned, ["A1"]).unwrap();

        assert!(a.permits(assigned, "A1"));
        assert!(!a.permits(assigned, "B2"));
        assert!(a.permits(free, "B2"));
    }

    #[test]
    fn blank_shelf_is_rejected() {
        let mut a = ShelfAssignments::new();
        assert!(a.assign(UserId::new(), ["  "]).is_err());
        assert!(a.is_empty());
    }

    #[test]
    fn validates_against_known_shelves() {
        let mut a = ShelfAssignments::new();
        a.assign(UserId::new(), ["A1", "Z9"]).unwrap();
        let known: BTreeSet<String> = ["A1".to_string(), "B2".to_string()].into();

        let err = a.validate_against(&known).unwrap_err();
        assert_eq!(err, DomainError::validation("unknown shelves for branch: Z9"));
    }
}
