//! Stock-take session aggregate: lifecycle, counters and shelf assignments.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rxstock_core::{
    Aggregate, AggregateRoot, BranchId, CompanyId, DomainError, DomainResult, SessionId, UserId,
};
use rxstock_events::Event;

use crate::assignment::ShelfAssignments;

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Draft => "DRAFT",
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Paused => "PAUSED",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Cancelled => "CANCELLED",
        }
    }
}

impl core::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate root: StockTakeSession.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTakeSession {
    id: SessionId,
    company_id: Option<CompanyId>,
    branch_id: Option<BranchId>,
    session_code: String,
    status: SessionStatus,
    allowed_counters: BTreeSet<UserId>,
    assigned_shelves: ShelfAssignments,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl StockTakeSession {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: SessionId) -> Self {
        Self {
            id,
            company_id: None,
            branch_id: None,
            session_code: String::new(),
            status: SessionStatus::Draft,
            allowed_counters: BTreeSet::new(),
            assigned_shelves: ShelfAssignments::new(),
            created_by: None,
            created_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SessionId {
        self.id
    }

    /// Company and branch of a created session.
    pub fn scope(&self) -> DomainResult<(CompanyId, BranchId)> {
        match (self.company_id, self.branch_id) {
            (Some(c), Some(b)) if self.created => Ok((c, b)),
            _ => Err(DomainError::not_found(format!("stock-take session {}", self.id))),
        }
    }

    pub fn company_id(&self) -> Option<CompanyId> {
        self.company_id
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    pub fn session_code(&self) -> &str {
        &self.session_code
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn allowed_counters(&self) -> &BTreeSet<UserId> {
        &self.allowed_counters
    }

    pub fn assigned_shelves(&self) -> &ShelfAssignments {
        &self.assigned_shelves
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Whether the session still blocks a new one on its branch.
    pub fn is_open(&self) -> bool {
        self.created && !self.status.is_terminal()
    }

    /// Counting and locking happen only while ACTIVE.
    pub fn ensure_counting(&self) -> DomainResult<()> {
        if self.status == SessionStatus::Active {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(self.status, "count in"))
        }
    }

    /// Verification is allowed while ACTIVE or PAUSED.
    pub fn ensure_verifying(&self) -> DomainResult<()> {
        if matches!(self.status, SessionStatus::Active | SessionStatus::Paused) {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(self.status, "verify counts in"))
        }
    }

    /// Whether `counter` may count `shelf` in this session.
    pub fn ensure_counter_may_count(&self, counter: UserId, shelf: &str) -> DomainResult<()> {
        if !self.allowed_counters.is_empty() && !self.allowed_counters.contains(&counter) {
            return Err(DomainError::unauthorized(format!(
                "user {counter} is not a counter in session {}",
                self.session_code
            )));
        }
        if !self.assigned_shelves.permits(counter, shelf) {
            return Err(DomainError::unauthorized(format!(
                "user {counter} is not assigned to shelf '{}'",
                shelf.trim()
            )));
        }
        Ok(())
    }

    /// Whether `counter` may hold leases in this session.
    pub fn ensure_counter_allowed(&self, counter: UserId) -> DomainResult<()> {
        if self.allowed_counters.is_empty() || self.allowed_counters.contains(&counter) {
            Ok(())
        } else {
            Err(DomainError::unauthorized(format!(
                "user {counter} is not a counter in session {}",
                self.session_code
            )))
        }
    }
}

impl AggregateRoot for StockTakeSession {
    type Id = SessionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateSession.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSession {
    pub company_id: CompanyId,
    pub session_id: SessionId,
    pub branch_id: BranchId,
    pub session_code: String,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignCounter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignCounter {
    pub counter: UserId,
    pub shelves: BTreeSet<String>,
    pub assigned_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command payload shared by the plain lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionCommand {
    Create(CreateSession),
    AssignCounter(AssignCounter),
    Start(Transition),
    Pause(Transition),
    Resume(Transition),
    Complete(Transition),
    Cancel {
        transition: Transition,
        reason: Option<String>,
    },
}

/// Event: SessionCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCreated {
    pub company_id: CompanyId,
    pub session_id: SessionId,
    pub branch_id: BranchId,
    pub session_code: String,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CounterAssigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterAssigned {
    pub counter: UserId,
    pub shelves: BTreeSet<String>,
    pub assigned_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    Created(SessionCreated),
    CounterAssigned(CounterAssigned),
    Started(Transition),
    Paused(Transition),
    Resumed(Transition),
    Completed(Transition),
    Cancelled {
        transition: Transition,
        reason: Option<String>,
    },
}

impl Event for SessionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::Created(_) => "stocktake.session.created",
            SessionEvent::CounterAssigned(_) => "stocktake.session.counter_assigned",
            SessionEvent::Started(_) => "stocktake.session.started",
            SessionEvent::Paused(_) => "stocktake.session.paused",
            SessionEvent::Resumed(_) => "stocktake.session.resumed",
            SessionEvent::Completed(_) => "stocktake.session.completed",
            SessionEvent::Cancelled { .. } => "stocktake.session.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SessionEvent::Created(e) => e.occurred_at,
            SessionEvent::CounterAssigned(e) => e.occurred_at,
            SessionEvent::Started(t)
            | SessionEvent::Paused(t)
            | SessionEvent::Resumed(t)
            | SessionEvent::Completed(t) => t.occurred_at,
            SessionEvent::Cancelled { transition, .. } => transition.occurred_at,
        }
    }
}

impl Aggregate for StockTakeSession {
    type Command = SessionCommand;
    type Event = SessionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SessionEvent::Created(e) => {
                self.id = e.session_id;
                self.company_id = Some(e.company_id);
                self.branch_id = Some(e.branch_id);
                self.session_code = e.session_code.clone();
                self.status = SessionStatus::Draft;
                self.created_by = Some(e.created_by);
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            SessionEvent::CounterAssigned(e) => {
                self.allowed_counters.insert(e.counter);
                self.assigned_shelves.extend_normalized(e.counter, &e.shelves);
            }
            SessionEvent::Started(t) => {
                self.status = SessionStatus::Active;
                self.started_at = Some(t.occurred_at);
            }
            SessionEvent::Paused(_) => self.status = SessionStatus::Paused,
            SessionEvent::Resumed(_) => self.status = SessionStatus::Active,
            SessionEvent::Completed(t) => {
                self.status = SessionStatus::Completed;
                self.completed_at = Some(t.occurred_at);
            }
            SessionEvent::Cancelled { transition, .. } => {
                self.status = SessionStatus::Cancelled;
                self.cancelled_at = Some(transition.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if !self.created && !matches!(command, SessionCommand::Create(_)) {
            return Err(DomainError::not_found(format!("stock-take session {}", self.id)));
        }

        match command {
            SessionCommand::Create(cmd) => self.handle_create(cmd),
            SessionCommand::AssignCounter(cmd) => self.handle_assign(cmd),
            SessionCommand::Start(t) => {
                self.require(&[SessionStatus::Draft], "start")?;
                Ok(vec![SessionEvent::Started(t.clone())])
            }
            SessionCommand::Pause(t) => {
                self.require(&[SessionStatus::Active], "pause")?;
                Ok(vec![SessionEvent::Paused(t.clone())])
            }
            SessionCommand::Resume(t) => {
                self.require(&[SessionStatus::Paused], "resume")?;
                Ok(vec![SessionEvent::Resumed(t.clone())])
            }
            SessionCommand::Complete(t) => {
                // Retried completion is a no-op so reconciliation can resume.
                if self.status == SessionStatus::Completed {
                    return Ok(vec![]);
                }
                self.require(&[SessionStatus::Active, SessionStatus::Paused], "complete")?;
                Ok(vec![SessionEvent::Completed(t.clone())])
            }
            SessionCommand::Cancel { transition, reason } => {
                self.require(
                    &[SessionStatus::Draft, SessionStatus::Active, SessionStatus::Paused],
                    "cancel",
                )?;
                Ok(vec![SessionEvent::Cancelled {
                    transition: transition.clone(),
                    reason: reason.clone(),
                }])
            }
        }
    }
}

impl StockTakeSession {
    fn require(&self, allowed: &[SessionStatus], action: &str) -> DomainResult<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(self.status, action))
        }
    }

    fn handle_create(&self, cmd: &CreateSession) -> Result<Vec<SessionEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("session already exists"));
        }
        if cmd.session_id != self.id {
            return Err(DomainError::invariant("session_id mismatch"));
        }
        if cmd.session_code.trim().is_empty() {
            return Err(DomainError::validation("session code cannot be empty"));
        }
        Ok(vec![SessionEvent::Created(SessionCreated {
            company_id: cmd.company_id,
            session_id: cmd.session_id,
            branch_id: cmd.branch_id,
            session_code: cmd.session_code.clone(),
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign(&self, cmd: &AssignCounter) -> Result<Vec<SessionEvent>, DomainError> {
        self.require(
            &[SessionStatus::Draft, SessionStatus::Active, SessionStatus::Paused],
            "assign counters to",
        )?;
        let mut check = ShelfAssignments::new();
        check.assign(cmd.counter, &cmd.shelves)?;
        let shelves = check.shelves_of(cmd.counter).cloned().unwrap_or_default();

        Ok(vec![SessionEvent::CounterAssigned(CounterAssigned {
            counter: cmd.counter,
            shelves,
            assigned_by: cmd.assigned_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}
