//! Human-readable session codes: `ST-<MON><DD><A..Z>`, timestamp fallback.
//!
//! The readable form is best-effort. Uniqueness comes from the caller's
//! existence check; every candidate is length-checked before it is returned.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use rxstock_core::{DomainError, DomainResult};

pub const CODE_PREFIX: &str = "ST-";
pub const DEFAULT_CODE_ATTEMPTS: u32 = 26;
pub const DEFAULT_MAX_CODE_LEN: usize = 32;
pub const MIN_CODE_WIDTH: usize = 16;

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Readable candidate for the `attempt`-th session of `date` (0-based).
///
/// Returns `None` once the A–Z suffixes are exhausted.
pub fn candidate(date: NaiveDate, attempt: u32) -> Option<String> {
    if attempt >= 26 {
        return None;
    }
    let month = MONTHS[date.month0() as usize];
    let suffix = char::from(b'A' + attempt as u8);
    Some(format!("{CODE_PREFIX}{month}{:02}{suffix}", date.day()))
}

/// Timestamp-derived code used after the readable attempts run out.
pub fn fallback(now: DateTime<Utc>) -> String {
    format!("{CODE_PREFIX}{}", now.format("%Y%m%d%H%M%S%3f"))
}

/// Generates codes against a uniqueness check with a bounded attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCodeGenerator {
    attempts: u32,
    max_len: usize,
}

impl Default for SessionCodeGenerator {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_CODE_ATTEMPTS,
            max_len: DEFAULT_MAX_CODE_LEN,
        }
    }
}

impl SessionCodeGenerator {
    pub fn new(attempts: u32, max_len: usize) -> DomainResult<Self> {
        if attempts == 0 || attempts > 26 {
            return Err(DomainError::validation(
                "session code attempts must be between 1 and 26",
            ));
        }
        if max_len < MIN_CODE_WIDTH {
            return Err(DomainError::validation(format!(
                "session code width must be at least {MIN_CODE_WIDTH}"
            )));
        }
        Ok(Self { attempts, max_len })
    }

    /// Reject codes that would not fit the stored width.
    pub fn validate(&self, code: &str) -> DomainResult<()> {
        if code.is_empty() || code.len() > self.max_len {
            return Err(DomainError::validation(format!(
                "session code '{code}' does not fit {} characters",
                self.max_len
            )));
        }
        Ok(())
    }

    /// First free readable code for `now`'s day, else the timestamp fallback.
    ///
    /// `exists` is the store's uniqueness check.
    pub fn generate<E, F>(&self, now: DateTime<Utc>, mut exists: F) -> Result<String, E>
    where
        F: FnMut(&str) -> Result<bool, E>,
        E: From<DomainError>,
    {
        let today = now.date_naive();
        for attempt in 0..self.attempts {
            let Some(code) = candidate(today, attempt) else {
                break;
            };
            self.validate(&code)?;
            if !exists(&code)? {
                return Ok(code);
            }
        }

        let code = fallback(now);
        self.validate(&code)?;
        if exists(&code)? {
            return Err(DomainError::conflict(format!("session code '{code}' already taken")).into());
        }
        Ok(code)
    }
}
