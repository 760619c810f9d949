// src/engine/machine.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::adapters::{
    with_retries, EnrollmentService, GradingAdapter, PlagiarismAdapter,
};
use crate::engine::aggregator::{Admission, EvidenceAggregator};
use crate::engine::scorer::IntegrityScorer;
use crate::error::AppError;
use crate::models::exam::{ExamDefinition, QuestionKind};
use crate::models::integrity::{
    EventDisposition, EventKind, EventSource, IntegrityEvent,
};
use crate::models::session::{
    AnswerPayload, AnswerRecord, ExamSession, GradingStatus, ResultFlag, SessionId,
    SessionResult, SessionState, TerminationReason,
};
use crate::store::{ExamCatalog, SessionStore, StoreError};

/// Upper bound on CAS retries per operation. Conflicts on one session are
/// rare (a student, a heartbeat scheduler and at most one proctor), so
/// hitting the bound indicates something pathological and is surfaced.
const CAS_RETRY_LIMIT: u32 = 5;

/// Adapter dispatch: attempts and initial backoff for grading/plagiarism.
const ADAPTER_ATTEMPTS: u32 = 3;
const ADAPTER_BASE_DELAY: Duration = Duration::from_millis(500);

/// The exam session state machine.
///
/// Owns no session state itself: every state-changing operation is a CAS
/// retry loop against the session store, which serializes racing triggers
/// (heartbeat expiry, answer submission, integrity events, manual submit,
/// proctor termination) on a given session. The freeze-and-grade action at
/// termination therefore runs exactly once, from whichever trigger wins.
#[derive(Clone)]
pub struct SessionEngine {
    store: Arc<dyn SessionStore>,
    catalog: Arc<dyn ExamCatalog>,
    enrollment: Arc<dyn EnrollmentService>,
    grading: Arc<dyn GradingAdapter>,
    plagiarism: Arc<dyn PlagiarismAdapter>,
    scorer: Arc<IntegrityScorer>,
    aggregator: Arc<EvidenceAggregator>,
}

impl SessionEngine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        catalog: Arc<dyn ExamCatalog>,
        enrollment: Arc<dyn EnrollmentService>,
        grading: Arc<dyn GradingAdapter>,
        plagiarism: Arc<dyn PlagiarismAdapter>,
        scorer: IntegrityScorer,
    ) -> Self {
        Self {
            store,
            catalog,
            enrollment,
            grading,
            plagiarism,
            scorer: Arc::new(scorer),
            aggregator: Arc::new(EvidenceAggregator::new()),
        }
    }

    pub fn scorer(&self) -> &IntegrityScorer {
        &self.scorer
    }

    pub async fn register_exam(&self, exam: ExamDefinition) -> Result<(), AppError> {
        self.catalog.register(exam).await.map_err(AppError::from)
    }

    pub async fn exam(&self, exam_id: &str) -> Result<ExamDefinition, AppError> {
        self.catalog.get(exam_id).await.map_err(|e| match e {
            StoreError::NotFound => AppError::NotFound(format!("unknown exam '{}'", exam_id)),
            other => other.into(),
        })
    }

    pub async fn load_session(&self, id: SessionId) -> Result<ExamSession, AppError> {
        self.store.load(id).await.map_err(AppError::from)
    }

    pub async fn list_active(&self) -> Result<Vec<ExamSession>, AppError> {
        self.store.list_active().await.map_err(AppError::from)
    }

    /// Creates a new attempt in `created` state, subject to the enrollment
    /// check and the one-active-attempt invariant. The deadline is fixed
    /// here and never extended.
    pub async fn start_attempt(
        &self,
        student_id: &str,
        exam_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ExamSession, AppError> {
        let exam = self.exam(exam_id).await?;

        let eligibility = self
            .enrollment
            .can_start_attempt(student_id, exam_id)
            .await
            .map_err(|e| AppError::InternalServerError(e.to_string()))?;
        if !eligibility.allowed {
            return Err(AppError::AttemptNotAllowed(format!(
                "no attempts remaining for exam '{}'",
                exam_id
            )));
        }

        let prior = self
            .store
            .count_attempts(student_id, exam_id)
            .await
            .map_err(AppError::from)?;
        let session = ExamSession::new(exam_id, student_id, prior + 1, exam.duration_secs, now);

        let id = self.store.create(session).await.map_err(AppError::from)?;
        let created = self.store.load(id).await.map_err(AppError::from)?;
        tracing::info!(
            "Session {} created: exam {}, student {}, attempt {}, deadline {}",
            created.id,
            created.exam_id,
            created.student_id,
            created.attempt,
            created.deadline
        );
        Ok(created)
    }

    /// Heartbeat: activates a `created` session, refreshes activity, and is
    /// the lazy deadline check. Expiry is evaluated against the wall clock,
    /// so a session that missed every timer still expires on the next
    /// heartbeat after its deadline, exactly once.
    pub async fn heartbeat(
        &self,
        id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<ExamSession, AppError> {
        for _ in 0..CAS_RETRY_LIMIT {
            let session = self.store.load(id).await.map_err(AppError::from)?;
            let result = match session.state {
                // A session that was never activated still expires: the
                // deadline is anchored at creation, not activation.
                SessionState::Created if now >= session.deadline => {
                    let swapped = self
                        .store
                        .compare_and_swap(id, SessionState::Created, &|s| {
                            freeze(s, now, SessionState::Expired, TerminationReason::TimeExpired);
                        })
                        .await;
                    if let Ok(ref expired) = swapped {
                        self.on_terminated(expired.clone());
                    }
                    swapped
                }
                SessionState::Created => {
                    self.store
                        .compare_and_swap(id, SessionState::Created, &|s| {
                            s.state = SessionState::Active;
                            s.last_activity = now;
                        })
                        .await
                }
                SessionState::Active if now >= session.deadline => {
                    let swapped = self
                        .store
                        .compare_and_swap(id, SessionState::Active, &|s| {
                            freeze(s, now, SessionState::Expired, TerminationReason::TimeExpired);
                        })
                        .await;
                    if let Ok(ref expired) = swapped {
                        self.on_terminated(expired.clone());
                    }
                    swapped
                }
                SessionState::Active => {
                    self.store
                        .compare_and_swap(id, SessionState::Active, &|s| {
                            s.last_activity = now;
                        })
                        .await
                }
                // Heartbeats after termination are harmless no-ops.
                _ => return Ok(session),
            };
            match result {
                Ok(updated) => return Ok(updated),
                Err(StoreError::Conflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AppError::ConcurrentUpdateExhausted)
    }

    /// Appends or replaces an answer. The audit trail keeps every record;
    /// only the latest per question is frozen into the grading request.
    pub async fn submit_answer(
        &self,
        id: SessionId,
        question_id: &str,
        payload: AnswerPayload,
        client_revision: u32,
        now: DateTime<Utc>,
    ) -> Result<ExamSession, AppError> {
        for _ in 0..CAS_RETRY_LIMIT {
            let session = self.store.load(id).await.map_err(AppError::from)?;
            match session.state {
                SessionState::Active if now >= session.deadline => {
                    // The deadline beat this submission; enforce it first.
                    self.expire(id, now).await?;
                    return Err(AppError::SessionNotActive(
                        "the exam deadline has passed".to_string(),
                    ));
                }
                SessionState::Active => {}
                other => {
                    return Err(AppError::SessionNotActive(format!(
                        "session is {:?}, not active",
                        other
                    )));
                }
            }

            let exam = self.exam(&session.exam_id).await?;
            let question = exam.question(question_id).ok_or_else(|| {
                AppError::InvalidQuestion(format!(
                    "question '{}' is not part of exam '{}'",
                    question_id, session.exam_id
                ))
            })?;
            check_payload_kind(question.kind, &payload)?;

            let record = AnswerRecord {
                question_id: question_id.to_owned(),
                payload: payload.clone(),
                submitted_at: now,
                client_revision,
            };
            let result = self
                .store
                .compare_and_swap(id, SessionState::Active, &move |s| {
                    s.answers.push(record.clone());
                    s.last_activity = now;
                })
                .await;
            match result {
                Ok(updated) => return Ok(updated),
                Err(StoreError::Conflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AppError::ConcurrentUpdateExhausted)
    }

    /// Records an integrity signal. Always succeeds for an existing
    /// session: late events are logged without touching the score, debounced
    /// repeats are logged as coalesced, and effective events are charged
    /// against the ledger. If the charge would push the score below the
    /// lockout floor, the lockout transition rides the same store update.
    pub async fn record_event(
        &self,
        id: SessionId,
        kind: EventKind,
        source: EventSource,
        timestamp: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(ExamSession, IntegrityEvent), AppError> {
        let timestamp = timestamp.unwrap_or(now);
        let severity = self.scorer.policy().classify(kind);

        let session = self.store.load(id).await.map_err(AppError::from)?;
        if session.state.is_terminal() {
            let event = IntegrityEvent {
                session_id: id,
                timestamp,
                kind,
                severity,
                source,
                repeats: 1,
                disposition: EventDisposition::AfterTermination,
            };
            self.store
                .append_event(id, event.clone())
                .await
                .map_err(AppError::from)?;
            return Ok((session, event));
        }

        // Admission is decided exactly once per raw signal, before the
        // commit loop: a retried commit must not re-consult the window or
        // the signal would coalesce into the window it opened itself.
        let admission = self
            .aggregator
            .admit(self.scorer.policy(), id, kind, timestamp);
        if let Admission::Coalesced { repeats } = admission {
            let event = IntegrityEvent {
                session_id: id,
                timestamp,
                kind,
                severity,
                source,
                repeats,
                disposition: EventDisposition::Coalesced,
            };
            self.store
                .append_event(id, event.clone())
                .await
                .map_err(AppError::from)?;
            return Ok((session, event));
        }

        let event = IntegrityEvent {
            session_id: id,
            timestamp,
            kind,
            severity,
            source,
            repeats: 1,
            disposition: EventDisposition::Scored,
        };

        if self.scorer.would_lock_out(&session.integrity, &event) {
            tracing::warn!(
                "Session {}: {:?} event will cross the lockout floor",
                id,
                kind
            );
        }

        for _ in 0..CAS_RETRY_LIMIT {
            let session = self.store.load(id).await.map_err(AppError::from)?;
            if session.state.is_terminal() {
                // The session terminated while this signal was in flight;
                // log it as late instead of charging a frozen ledger.
                self.aggregator.evict(id);
                let event = IntegrityEvent {
                    disposition: EventDisposition::AfterTermination,
                    ..event.clone()
                };
                self.store
                    .append_event(id, event.clone())
                    .await
                    .map_err(AppError::from)?;
                return Ok((session, event));
            }

            let scorer = Arc::clone(&self.scorer);
            let charged = event.clone();
            // The ledger charge and its audit row commit atomically, so
            // replaying the event log always reproduces the stored ledger.
            let result = self
                .store
                .compare_and_swap_with_event(
                    id,
                    session.state,
                    &move |s| {
                        scorer.apply(&mut s.integrity, &charged);
                        s.last_activity = now;
                        // Authoritative floor check, against the ledger this
                        // update actually lands on.
                        if s.integrity.score_centi < scorer.policy().lockout_floor_centi {
                            freeze(
                                s,
                                now,
                                SessionState::LockedOut,
                                TerminationReason::IntegrityLockout,
                            );
                        }
                    },
                    event.clone(),
                )
                .await;
            match result {
                Ok(updated) => {
                    if updated.state == SessionState::LockedOut {
                        tracing::warn!(
                            "Session {} locked out at integrity score {:.2}",
                            id,
                            updated.integrity.score()
                        );
                        self.on_terminated(updated.clone());
                    }
                    return Ok((updated, event));
                }
                Err(StoreError::Conflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AppError::ConcurrentUpdateExhausted)
    }

    /// Explicit student submission. Idempotent against racing terminal
    /// transitions: if the session already terminated, the frozen session is
    /// returned as-is and grading is not dispatched again.
    pub async fn submit_exam(
        &self,
        id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<ExamSession, AppError> {
        for _ in 0..CAS_RETRY_LIMIT {
            let session = self.store.load(id).await.map_err(AppError::from)?;
            match session.state {
                SessionState::Created => {
                    return Err(AppError::SessionNotActive(
                        "session has not been activated".to_string(),
                    ));
                }
                SessionState::Active if now >= session.deadline => {
                    // Too late; the deadline wins over the manual submit.
                    return self.expire(id, now).await;
                }
                SessionState::Active => {}
                _ => return Ok(session),
            }
            let result = self
                .store
                .compare_and_swap(id, SessionState::Active, &|s| {
                    freeze(
                        s,
                        now,
                        SessionState::Submitted,
                        TerminationReason::ManualSubmit,
                    );
                })
                .await;
            match result {
                Ok(updated) => {
                    self.on_terminated(updated.clone());
                    return Ok(updated);
                }
                Err(StoreError::Conflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AppError::ConcurrentUpdateExhausted)
    }

    /// Administrative termination with a mandatory reviewer note.
    pub async fn terminate(
        &self,
        id: SessionId,
        operator_id: &str,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<ExamSession, AppError> {
        for _ in 0..CAS_RETRY_LIMIT {
            let session = self.store.load(id).await.map_err(AppError::from)?;
            if session.state.is_terminal() {
                return Err(AppError::SessionNotActive(
                    "session already terminated".to_string(),
                ));
            }
            let note = note.to_owned();
            let result = self
                .store
                .compare_and_swap(id, session.state, &move |s| {
                    freeze(
                        s,
                        now,
                        SessionState::TerminatedByProctor,
                        TerminationReason::ProctorTerminated,
                    );
                    s.operator_note = Some(note.clone());
                })
                .await;
            match result {
                Ok(updated) => {
                    tracing::warn!(
                        "Session {} terminated by operator {}",
                        id,
                        operator_id
                    );
                    self.on_terminated(updated.clone());
                    return Ok(updated);
                }
                Err(StoreError::Conflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AppError::ConcurrentUpdateExhausted)
    }

    /// The published result. Available once grading completed or was given
    /// up on and routed to manual review.
    pub async fn result(&self, id: SessionId) -> Result<SessionResult, AppError> {
        let session = self.store.load(id).await.map_err(AppError::from)?;
        session.result.ok_or_else(|| {
            AppError::NotFound(format!(
                "no result yet for session {} (state {:?}, grading {:?})",
                id, session.state, session.grading
            ))
        })
    }

    /// Forces the expired transition; used by the lazy deadline checks.
    async fn expire(&self, id: SessionId, now: DateTime<Utc>) -> Result<ExamSession, AppError> {
        let result = self
            .store
            .compare_and_swap(id, SessionState::Active, &|s| {
                freeze(s, now, SessionState::Expired, TerminationReason::TimeExpired);
            })
            .await;
        match result {
            Ok(expired) => {
                self.on_terminated(expired.clone());
                Ok(expired)
            }
            // Another trigger terminated the session first; that is fine.
            Err(StoreError::Conflict { .. }) => {
                self.store.load(id).await.map_err(AppError::from)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Runs once per session, from whichever trigger won the terminal CAS.
    /// Grading must not block the terminal transition, so it is dispatched
    /// as a decoupled background task.
    fn on_terminated(&self, frozen: ExamSession) {
        self.aggregator.evict(frozen.id);
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_post_termination(frozen).await;
        });
    }

    async fn run_post_termination(&self, frozen: ExamSession) {
        let answers = frozen.latest_answers();
        let terminal_state = frozen.state;

        let grading = Arc::clone(&self.grading);
        let plagiarism = Arc::clone(&self.plagiarism);
        let (grade, scan) = tokio::join!(
            with_retries("grading", ADAPTER_ATTEMPTS, ADAPTER_BASE_DELAY, || {
                grading.grade(frozen.id, &frozen.exam_id, &answers)
            }),
            with_retries(
                "plagiarism_scan",
                ADAPTER_ATTEMPTS,
                ADAPTER_BASE_DELAY,
                || plagiarism.scan(frozen.id, &answers)
            ),
        );

        let mut flags = Vec::new();
        if frozen.termination_reason == TerminationReason::IntegrityLockout {
            flags.push(ResultFlag::Lockout);
        }
        if frozen.termination_reason == TerminationReason::ProctorTerminated {
            flags.push(ResultFlag::ManualReviewNeeded);
        }

        let report = match scan {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(
                    "Session {}: plagiarism scan failed permanently: {}",
                    frozen.id,
                    e
                );
                if !flags.contains(&ResultFlag::ManualReviewNeeded) {
                    flags.push(ResultFlag::ManualReviewNeeded);
                }
                None
            }
        };

        let (grading_status, question_scores) = match grade {
            Ok(result) => (GradingStatus::Complete, result.question_scores),
            Err(e) => {
                // Not fatal to the session: the result is published with a
                // manual-review flag and the operator queue picks it up.
                tracing::error!(
                    "Session {}: grading failed permanently, queued for manual grading: {}",
                    frozen.id,
                    e
                );
                if !flags.contains(&ResultFlag::ManualReviewNeeded) {
                    flags.push(ResultFlag::ManualReviewNeeded);
                }
                (GradingStatus::Failed, Default::default())
            }
        };

        let total_score: f64 = question_scores.values().map(|g| g.score).sum();
        let result = SessionResult {
            session_id: frozen.id,
            question_scores,
            total_score,
            integrity_score_final: frozen.integrity.score(),
            flags,
            termination_reason: frozen.termination_reason,
        };

        let graded = grading_status == GradingStatus::Complete;
        let persist = self
            .store
            .compare_and_swap(frozen.id, terminal_state, &move |s| {
                s.result = Some(result.clone());
                s.plagiarism = report.clone();
                s.grading = grading_status;
                if graded {
                    s.state = SessionState::Graded;
                }
            })
            .await;
        if let Err(e) = persist {
            // Nothing else transitions a terminal session, so a failure here
            // means the store itself is in trouble; the operator queue must
            // re-drive grading for this session.
            tracing::error!(
                "Session {}: failed to persist grading outcome: {}",
                frozen.id,
                e
            );
        }
    }
}

/// The single freeze-and-submit action shared by all terminal transitions.
fn freeze(
    session: &mut ExamSession,
    now: DateTime<Utc>,
    state: SessionState,
    reason: TerminationReason,
) {
    session.state = state;
    session.termination_reason = reason;
    session.submitted_at = Some(now);
    session.last_activity = now;
    session.grading = GradingStatus::Pending;
}

fn check_payload_kind(kind: QuestionKind, payload: &AnswerPayload) -> Result<(), AppError> {
    let matches = matches!(
        (kind, payload),
        (QuestionKind::MultipleChoice, AnswerPayload::Selection { .. })
            | (QuestionKind::Descriptive, AnswerPayload::Text { .. })
            | (QuestionKind::Numerical, AnswerPayload::Number { .. })
            | (QuestionKind::TrueFalse, AnswerPayload::Boolean { .. })
    );
    if matches {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "answer payload does not match question kind {:?}",
            kind
        )))
    }
}
