// src/store/mod.rs

pub mod catalog;
pub mod memory;
pub mod postgres;

use std::fmt;

use async_trait::async_trait;

use crate::models::integrity::IntegrityEvent;
use crate::models::session::{ExamSession, SessionId, SessionState};

pub use catalog::{ExamCatalog, MemoryCatalog};
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Errors surfaced by session store implementations.
#[derive(Debug)]
pub enum StoreError {
    NotFound,
    /// CAS precondition failed; carries the state actually observed so the
    /// caller can recompute its transition.
    Conflict { actual: SessionState },
    /// An unterminated session already exists for (student, exam).
    DuplicateActiveAttempt,
    /// An immutable record with the same id already exists.
    AlreadyExists,
    /// The backing store could not be reached or rejected the operation.
    Unavailable(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "session not found"),
            StoreError::Conflict { actual } => {
                write!(f, "compare-and-swap conflict, session is {:?}", actual)
            }
            StoreError::DuplicateActiveAttempt => {
                write!(f, "an active session already exists for this exam")
            }
            StoreError::AlreadyExists => write!(f, "record already exists"),
            StoreError::Unavailable(msg) => write!(f, "session store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// In-place session mutation applied under the store's CAS guard.
/// Must be pure with respect to external state; it may run more than once
/// if the store needs to re-apply it against a fresh snapshot.
pub type Mutator<'a> = &'a (dyn Fn(&mut ExamSession) + Send + Sync);

/// Durable, linearizable per-session state.
///
/// `compare_and_swap` is the sole concurrency primitive the state machine
/// relies on: concurrent heartbeat expiry, manual submit and proctor
/// termination racing on one session serialize here, so the freeze-and-grade
/// action runs exactly once. Sessions are independent units of concurrency;
/// no cross-session coordination is required.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a new session. Fails with `DuplicateActiveAttempt` if an
    /// unterminated session already exists for the same (student, exam).
    async fn create(&self, session: ExamSession) -> Result<SessionId, StoreError>;

    async fn load(&self, id: SessionId) -> Result<ExamSession, StoreError>;

    /// Applies `mutate` to the current session iff its state equals
    /// `expected`; otherwise returns `Conflict` without mutating. Bumps the
    /// version counter on success and returns the updated session.
    async fn compare_and_swap(
        &self,
        id: SessionId,
        expected: SessionState,
        mutate: Mutator<'_>,
    ) -> Result<ExamSession, StoreError>;

    /// Like `compare_and_swap`, but additionally appends `event` to the
    /// session's event log in the same commit. On conflict neither the
    /// document nor the event row is written; replaying the event log
    /// therefore always reproduces the stored ledger.
    async fn compare_and_swap_with_event(
        &self,
        id: SessionId,
        expected: SessionState,
        mutate: Mutator<'_>,
        event: IntegrityEvent,
    ) -> Result<ExamSession, StoreError>;

    /// Appends to the session's event log. Append-only, never conflicts;
    /// succeeds whenever the session exists, terminal or not.
    async fn append_event(&self, id: SessionId, event: IntegrityEvent) -> Result<(), StoreError>;

    /// Number of attempts ever created for (student, exam), terminal or not.
    async fn count_attempts(&self, student_id: &str, exam_id: &str) -> Result<u32, StoreError>;

    /// All sessions in `created` or `active` state, for the proctor console.
    async fn list_active(&self) -> Result<Vec<ExamSession>, StoreError>;
}
