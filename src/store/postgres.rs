// src/store/postgres.rs

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use crate::models::integrity::IntegrityEvent;
use crate::models::session::{ExamSession, SessionId, SessionState};
use crate::store::{Mutator, SessionStore, StoreError};

/// Durable session store on Postgres.
///
/// The session document lives in a `jsonb` column next to a `version`
/// counter; CAS is a version-guarded UPDATE, so two racing writers can never
/// both win. Integrity events go to their own append-only table and are
/// spliced into the document on load. The partial unique index on
/// (student_id, exam_id) over unterminated states enforces the
/// one-active-attempt invariant in the database itself.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn state_str(state: SessionState) -> &'static str {
        match state {
            SessionState::Created => "created",
            SessionState::Active => "active",
            SessionState::Submitted => "submitted",
            SessionState::Expired => "expired",
            SessionState::LockedOut => "locked_out",
            SessionState::TerminatedByProctor => "terminated_by_proctor",
            SessionState::Graded => "graded",
        }
    }

    async fn load_events(&self, id: SessionId) -> Result<Vec<IntegrityEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT doc FROM integrity_events WHERE session_id = $1 ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let Json(event): Json<IntegrityEvent> = row
                .try_get("doc")
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            events.push(event);
        }
        Ok(events)
    }

    async fn load_row(&self, id: SessionId) -> Result<(ExamSession, i64), StoreError> {
        let row = sqlx::query("SELECT doc, version FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .ok_or(StoreError::NotFound)?;

        let Json(mut session): Json<ExamSession> = row
            .try_get("doc")
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let version: i64 = row
            .try_get("version")
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        session.version = version;
        Ok((session, version))
    }

    /// Document image written back to the row. Events are stored in their
    /// own table, not duplicated inside the document.
    fn doc(session: &ExamSession) -> ExamSession {
        let mut doc = session.clone();
        doc.events = Vec::new();
        doc
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create(&self, session: ExamSession) -> Result<SessionId, StoreError> {
        let id = session.id;
        let result = sqlx::query(
            r#"
            INSERT INTO sessions (id, exam_id, student_id, attempt, state, version, doc, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(id)
        .bind(&session.exam_id)
        .bind(&session.student_id)
        .bind(session.attempt as i32)
        .bind(Self::state_str(session.state))
        .bind(session.version)
        .bind(Json(Self::doc(&session)))
        .bind(session.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(id),
            Err(sqlx::Error::Database(db))
                if db.constraint() == Some("uq_sessions_active_attempt") =>
            {
                Err(StoreError::DuplicateActiveAttempt)
            }
            Err(e) => Err(StoreError::Unavailable(e.to_string())),
        }
    }

    async fn load(&self, id: SessionId) -> Result<ExamSession, StoreError> {
        let (mut session, _) = self.load_row(id).await?;
        session.events = self.load_events(id).await?;
        Ok(session)
    }

    async fn compare_and_swap(
        &self,
        id: SessionId,
        expected: SessionState,
        mutate: Mutator<'_>,
    ) -> Result<ExamSession, StoreError> {
        let (mut session, version) = self.load_row(id).await?;
        if session.state != expected {
            return Err(StoreError::Conflict {
                actual: session.state,
            });
        }

        mutate(&mut session);
        session.version = version + 1;

        let updated = sqlx::query(
            r#"
            UPDATE sessions
            SET state = $1, version = $2, doc = $3, updated_at = NOW()
            WHERE id = $4 AND version = $5
            "#,
        )
        .bind(Self::state_str(session.state))
        .bind(session.version)
        .bind(Json(Self::doc(&session)))
        .bind(id)
        .bind(version)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if updated.rows_affected() == 0 {
            // Lost the race between our read and write; report what is
            // there now so the caller can recompute.
            let (current, _) = self.load_row(id).await?;
            return Err(StoreError::Conflict {
                actual: current.state,
            });
        }

        session.events = self.load_events(id).await?;
        Ok(session)
    }

    async fn compare_and_swap_with_event(
        &self,
        id: SessionId,
        expected: SessionState,
        mutate: Mutator<'_>,
        event: IntegrityEvent,
    ) -> Result<ExamSession, StoreError> {
        let (mut session, version) = self.load_row(id).await?;
        if session.state != expected {
            return Err(StoreError::Conflict {
                actual: session.state,
            });
        }

        mutate(&mut session);
        session.version = version + 1;

        // One transaction for the document and the event row: a charged
        // ledger without its audit row must never become visible.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let updated = sqlx::query(
            r#"
            UPDATE sessions
            SET state = $1, version = $2, doc = $3, updated_at = NOW()
            WHERE id = $4 AND version = $5
            "#,
        )
        .bind(Self::state_str(session.state))
        .bind(session.version)
        .bind(Json(Self::doc(&session)))
        .bind(id)
        .bind(version)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if updated.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            let (current, _) = self.load_row(id).await?;
            return Err(StoreError::Conflict {
                actual: current.state,
            });
        }

        sqlx::query("INSERT INTO integrity_events (session_id, ts, doc) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(event.timestamp)
            .bind(Json(&event))
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        session.events = self.load_events(id).await?;
        Ok(session)
    }

    async fn append_event(&self, id: SessionId, event: IntegrityEvent) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO integrity_events (session_id, ts, doc) VALUES ($1, $2, $3)",
        )
        .bind(id)
        .bind(event.timestamp)
        .bind(Json(&event))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.constraint().is_some() => {
                Err(StoreError::NotFound)
            }
            Err(e) => Err(StoreError::Unavailable(e.to_string())),
        }
    }

    async fn count_attempts(&self, student_id: &str, exam_id: &str) -> Result<u32, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS attempts FROM sessions WHERE student_id = $1 AND exam_id = $2",
        )
        .bind(student_id)
        .bind(exam_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let attempts: i64 = row
            .try_get("attempts")
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(attempts as u32)
    }

    async fn list_active(&self) -> Result<Vec<ExamSession>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM sessions
            WHERE state IN ('created', 'active')
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row
                .try_get("id")
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            // Sessions can terminate between the listing query and the
            // per-session load; skip the ones that disappeared from view.
            match self.load(id).await {
                Ok(session) if !session.state.is_terminal() => sessions.push(session),
                Ok(_) | Err(StoreError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(sessions)
    }
}
