// src/store/memory.rs

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;

use crate::models::integrity::IntegrityEvent;
use crate::models::session::{ExamSession, SessionId, SessionState};
use crate::store::{Mutator, SessionStore, StoreError};

/// Reference session store backed by process memory.
///
/// The outer map is read-locked for lookups; each session sits behind its own
/// mutex so CAS operations on different sessions never contend. Locks are
/// only held across synchronous mutation, never across an await point.
/// Used by tests and by DB-less deployments; state does not survive restart.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<SessionId, Mutex<ExamSession>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_session<T>(
        &self,
        id: SessionId,
        f: impl FnOnce(&mut ExamSession) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        let entry = sessions.get(&id).ok_or(StoreError::NotFound)?;
        let mut session = entry.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut session)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(&self, session: ExamSession) -> Result<SessionId, StoreError> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let duplicate = sessions.values().any(|entry| {
            let existing = entry.lock().unwrap_or_else(|e| e.into_inner());
            existing.student_id == session.student_id
                && existing.exam_id == session.exam_id
                && !existing.state.is_terminal()
        });
        if duplicate {
            return Err(StoreError::DuplicateActiveAttempt);
        }
        let id = session.id;
        sessions.insert(id, Mutex::new(session));
        Ok(id)
    }

    async fn load(&self, id: SessionId) -> Result<ExamSession, StoreError> {
        self.with_session(id, |session| Ok(session.clone()))
    }

    async fn compare_and_swap(
        &self,
        id: SessionId,
        expected: SessionState,
        mutate: Mutator<'_>,
    ) -> Result<ExamSession, StoreError> {
        self.with_session(id, |session| {
            if session.state != expected {
                return Err(StoreError::Conflict {
                    actual: session.state,
                });
            }
            mutate(session);
            session.version += 1;
            Ok(session.clone())
        })
    }

    async fn compare_and_swap_with_event(
        &self,
        id: SessionId,
        expected: SessionState,
        mutate: Mutator<'_>,
        event: IntegrityEvent,
    ) -> Result<ExamSession, StoreError> {
        self.with_session(id, |session| {
            if session.state != expected {
                return Err(StoreError::Conflict {
                    actual: session.state,
                });
            }
            mutate(session);
            session.events.push(event);
            session.version += 1;
            Ok(session.clone())
        })
    }

    async fn append_event(&self, id: SessionId, event: IntegrityEvent) -> Result<(), StoreError> {
        self.with_session(id, |session| {
            session.events.push(event);
            Ok(())
        })
    }

    async fn count_attempts(&self, student_id: &str, exam_id: &str) -> Result<u32, StoreError> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        let count = sessions
            .values()
            .filter(|entry| {
                let session = entry.lock().unwrap_or_else(|e| e.into_inner());
                session.student_id == student_id && session.exam_id == exam_id
            })
            .count();
        Ok(count as u32)
    }

    async fn list_active(&self) -> Result<Vec<ExamSession>, StoreError> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        let mut active: Vec<ExamSession> = sessions
            .values()
            .filter_map(|entry| {
                let session = entry.lock().unwrap_or_else(|e| e.into_inner());
                if session.state.is_terminal() {
                    None
                } else {
                    Some(session.clone())
                }
            })
            .collect();
        active.sort_by_key(|s| s.created_at);
        Ok(active)
    }
}
