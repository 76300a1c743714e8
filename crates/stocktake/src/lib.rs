//! Stock-take domain module.
//!
//! Session lifecycle, shelf assignments, counter leases, count verification,
//! reconciliation planning and reporting, implemented as deterministic domain
//! logic. Persistence and orchestration live in `rxstock-infra`.

pub mod assignment;
pub mod code;
pub mod count;
pub mod lock;
pub mod reconcile;
pub mod report;
pub mod session;

pub use assignment::ShelfAssignments;
pub use code::{MIN_CODE_WIDTH, SessionCodeGenerator};
pub use count::{Count, CountSubmission, VerificationStatus, unresolved_shelves};
pub use lock::{CounterLock, DEFAULT_LOCK_TTL_SECS, LockOutcome, ensure_not_held_by_other};
pub use reconcile::{Adjustment, CountedItem, counted_items};
pub use report::{LiveStock, Progress, VarianceLine, VarianceReport};
pub use session::{
    AssignCounter, CreateSession, SessionCommand, SessionEvent, SessionStatus, StockTakeSession,
    Transition,
};
