// tests/engine_tests.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use examd::adapters::{
    AdapterError, AttemptCountEnrollment, GradeResult, GradingAdapter, PlagiarismAdapter,
};
use examd::engine::{IntegrityPolicy, IntegrityScorer, SessionEngine};
use examd::error::AppError;
use examd::models::exam::{ExamDefinition, Question, QuestionKind};
use examd::models::integrity::{EventDisposition, EventKind, EventSource, IntegrityEvent, Severity};
use examd::models::session::{
    AnswerPayload, AnswerRecord, ExamSession, GradingStatus, PlagiarismReport, ResultFlag,
    SessionId, SessionState, TerminationReason,
};
use examd::store::{ExamCatalog, MemoryCatalog, MemoryStore, Mutator, SessionStore, StoreError};

/// Grading stub that counts invocations and scores every answered question
/// with a fixed value.
struct RecordingGrading {
    calls: AtomicU32,
    fail: bool,
}

impl RecordingGrading {
    fn succeeding() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail: true,
        }
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GradingAdapter for RecordingGrading {
    async fn grade(
        &self,
        _session_id: SessionId,
        _exam_id: &str,
        answers: &[AnswerRecord],
    ) -> Result<GradeResult, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AdapterError::Permanent("grader offline".to_string()));
        }
        let question_scores = answers
            .iter()
            .map(|a| {
                (
                    a.question_id.clone(),
                    examd::models::session::QuestionGrade {
                        score: 10.0,
                        confidence: 0.9,
                        explanation: "test grade".to_string(),
                    },
                )
            })
            .collect();
        Ok(GradeResult { question_scores })
    }
}

struct CleanScan;

#[async_trait]
impl PlagiarismAdapter for CleanScan {
    async fn scan(
        &self,
        session_id: SessionId,
        _answers: &[AnswerRecord],
    ) -> Result<PlagiarismReport, AdapterError> {
        Ok(PlagiarismReport {
            session_id,
            similarity: 0.02,
            matched_sources: Vec::new(),
        })
    }
}

fn sample_exam() -> ExamDefinition {
    ExamDefinition {
        id: "rust-101".to_string(),
        title: "Introduction to Systems Programming".to_string(),
        questions: vec![
            Question {
                id: "q1".to_string(),
                kind: QuestionKind::MultipleChoice,
                prompt: "Which keyword declares an immutable binding?".to_string(),
                options: vec!["let".to_string(), "mut".to_string(), "static".to_string()],
                points: 10,
            },
            Question {
                id: "q2".to_string(),
                kind: QuestionKind::Descriptive,
                prompt: "Explain ownership in your own words.".to_string(),
                options: vec![],
                points: 10,
            },
            Question {
                id: "q3".to_string(),
                kind: QuestionKind::TrueFalse,
                prompt: "A value can have two owners at once.".to_string(),
                options: vec![],
                points: 10,
            },
        ],
        duration_secs: 3600,
        max_attempts: 2,
    }
}

struct Harness {
    engine: SessionEngine,
    store: Arc<dyn SessionStore>,
    grading: Arc<RecordingGrading>,
    t0: DateTime<Utc>,
}

async fn harness_on(store: Arc<dyn SessionStore>, grading: RecordingGrading) -> Harness {
    let catalog = Arc::new(MemoryCatalog::new());
    catalog
        .register(sample_exam())
        .await
        .expect("failed to register sample exam");
    let grading = Arc::new(grading);
    let enrollment = Arc::new(AttemptCountEnrollment::new(
        Arc::clone(&store),
        catalog.clone() as Arc<dyn ExamCatalog>,
    ));
    let engine = SessionEngine::new(
        Arc::clone(&store),
        catalog,
        enrollment,
        grading.clone(),
        Arc::new(CleanScan),
        IntegrityScorer::new(IntegrityPolicy::default()),
    );
    Harness {
        engine,
        store,
        grading,
        t0: Utc::now(),
    }
}

async fn harness_with(grading: RecordingGrading) -> Harness {
    harness_on(Arc::new(MemoryStore::new()), grading).await
}

async fn harness() -> Harness {
    harness_with(RecordingGrading::succeeding()).await
}

impl Harness {
    /// Starts and activates one attempt for the given student.
    async fn active_session(&self, student: &str) -> ExamSession {
        let session = self
            .engine
            .start_attempt(student, "rust-101", self.t0)
            .await
            .expect("start_attempt failed");
        assert_eq!(session.state, SessionState::Created);
        let session = self
            .engine
            .heartbeat(session.id, self.t0)
            .await
            .expect("activating heartbeat failed");
        assert_eq!(session.state, SessionState::Active);
        session
    }

    /// Waits for the decoupled grading task to settle the session.
    async fn wait_for_grading(&self, id: SessionId) -> ExamSession {
        for _ in 0..100 {
            let session = self.store.load(id).await.expect("load failed");
            if session.grading == GradingStatus::Complete
                || session.grading == GradingStatus::Failed
            {
                return session;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        panic!("grading did not settle in time");
    }

    fn at(&self, secs: i64) -> DateTime<Utc> {
        self.t0 + Duration::seconds(secs)
    }
}

#[tokio::test]
async fn full_lifecycle_submit_and_grade() {
    let h = harness().await;
    let session = h.active_session("alice").await;

    h.engine
        .submit_answer(
            session.id,
            "q1",
            AnswerPayload::Selection {
                option: "let".to_string(),
            },
            1,
            h.at(10),
        )
        .await
        .expect("answer rejected");

    let submitted = h
        .engine
        .submit_exam(session.id, h.at(20))
        .await
        .expect("submit failed");
    assert_eq!(submitted.state, SessionState::Submitted);
    assert_eq!(submitted.termination_reason, TerminationReason::ManualSubmit);
    assert!(submitted.submitted_at.is_some());

    let graded = h.wait_for_grading(session.id).await;
    assert_eq!(graded.state, SessionState::Graded);
    assert_eq!(h.grading.call_count(), 1);

    let result = graded.result.expect("no result attached");
    assert_eq!(result.total_score, 10.0);
    assert_eq!(result.integrity_score_final, 100.0);
    assert!(result.flags.is_empty());
    assert!(graded.plagiarism.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn termination_is_idempotent_under_races() {
    let h = harness().await;
    let session = h.active_session("bob").await;
    let id = session.id;
    let past_deadline = h.at(4000);

    let e1 = h.engine.clone();
    let e2 = h.engine.clone();
    let e3 = h.engine.clone();
    let submit = tokio::spawn(async move { e1.submit_exam(id, past_deadline).await });
    let beat = tokio::spawn(async move { e2.heartbeat(id, past_deadline).await });
    let term =
        tokio::spawn(async move { e3.terminate(id, "proctor-1", "suspected impersonation", past_deadline).await });

    // Losers of the race may observe the terminal state; that is expected.
    for outcome in [submit.await.unwrap().err(), beat.await.unwrap().err()] {
        if let Some(e) = outcome {
            panic!("submit/heartbeat must absorb the race, got {:?}", e);
        }
    }
    if let Err(e) = term.await.unwrap() {
        assert!(matches!(e, AppError::SessionNotActive(_)), "unexpected {:?}", e);
    }

    let settled = h.wait_for_grading(id).await;
    assert!(settled.state.is_terminal());
    assert_ne!(settled.termination_reason, TerminationReason::None);
    // Exactly one freeze happened, so grading was dispatched exactly once.
    assert_eq!(h.grading.call_count(), 1);

    // Late submits keep returning the frozen session without re-grading.
    let again = h.engine.submit_exam(id, h.at(5000)).await.unwrap();
    assert_eq!(again.state, settled.state);
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    assert_eq!(h.grading.call_count(), 1);
}

#[tokio::test]
async fn deadline_is_enforced_lazily_and_once() {
    let h = harness().await;
    let session = h.active_session("carol").await;

    // No heartbeat arrives until long past the deadline.
    let expired = h.engine.heartbeat(session.id, h.at(9000)).await.unwrap();
    assert_eq!(expired.state, SessionState::Expired);
    assert_eq!(expired.termination_reason, TerminationReason::TimeExpired);

    let settled = h.wait_for_grading(session.id).await;
    let later = h.engine.heartbeat(session.id, h.at(9500)).await.unwrap();
    assert_eq!(later.state, settled.state);
    assert_eq!(later.termination_reason, TerminationReason::TimeExpired);
    assert_eq!(h.grading.call_count(), 1);
}

#[tokio::test]
async fn answer_log_keeps_audit_but_latest_wins() {
    let h = harness().await;
    let session = h.active_session("dave").await;

    for (revision, option) in [(1, "let"), (2, "static")] {
        h.engine
            .submit_answer(
                session.id,
                "q1",
                AnswerPayload::Selection {
                    option: option.to_string(),
                },
                revision,
                h.at(revision as i64 * 10),
            )
            .await
            .unwrap();
    }

    let current = h.engine.load_session(session.id).await.unwrap();
    assert_eq!(current.answers.len(), 2, "audit trail must keep both");
    let latest = current.latest_answers();
    assert_eq!(latest.len(), 1);
    assert_eq!(
        latest[0].payload,
        AnswerPayload::Selection {
            option: "static".to_string()
        }
    );
    assert_eq!(latest[0].client_revision, 2);
}

#[tokio::test]
async fn rejects_unknown_question_and_wrong_payload_kind() {
    let h = harness().await;
    let session = h.active_session("erin").await;

    let err = h
        .engine
        .submit_answer(
            session.id,
            "q99",
            AnswerPayload::Number { value: 4.0 },
            1,
            h.at(5),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidQuestion(_)));

    let err = h
        .engine
        .submit_answer(
            session.id,
            "q1",
            AnswerPayload::Number { value: 4.0 },
            1,
            h.at(6),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    // No state was mutated by the rejected submissions.
    let unchanged = h.engine.load_session(session.id).await.unwrap();
    assert!(unchanged.answers.is_empty());
}

#[tokio::test]
async fn answer_after_deadline_expires_the_session() {
    let h = harness().await;
    let session = h.active_session("frank").await;

    let err = h
        .engine
        .submit_answer(
            session.id,
            "q1",
            AnswerPayload::Selection {
                option: "let".to_string(),
            },
            1,
            h.at(3601),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SessionNotActive(_)));

    let expired = h.wait_for_grading(session.id).await;
    assert_eq!(expired.termination_reason, TerminationReason::TimeExpired);
    assert!(expired.answers.is_empty());
}

#[tokio::test]
async fn lockout_triggers_exactly_at_the_crossing_event() {
    let h = harness().await;
    let session = h.active_session("grace").await;

    // face_mismatch is high severity: penalties 20, 20, 30, 45 as the
    // escalation multiplier kicks in at the 3rd occurrence.
    let expected_scores = [80.0, 60.0, 30.0];
    for (i, expected) in expected_scores.iter().enumerate() {
        let (updated, event) = h
            .engine
            .record_event(
                session.id,
                EventKind::FaceMismatch,
                EventSource::ProctorAi,
                Some(h.at(100 + i as i64 * 10)),
                h.at(100 + i as i64 * 10),
            )
            .await
            .unwrap();
        assert_eq!(event.disposition, EventDisposition::Scored);
        assert_eq!(updated.integrity.score(), *expected);
        assert_eq!(updated.state, SessionState::Active, "locked out too early");
    }

    let (locked, _) = h
        .engine
        .record_event(
            session.id,
            EventKind::FaceMismatch,
            EventSource::ProctorAi,
            Some(h.at(200)),
            h.at(200),
        )
        .await
        .unwrap();
    assert_eq!(locked.state, SessionState::LockedOut);
    assert_eq!(
        locked.termination_reason,
        TerminationReason::IntegrityLockout
    );
    assert_eq!(locked.integrity.score(), 0.0);

    let settled = h.wait_for_grading(session.id).await;
    let result = settled.result.expect("no result");
    assert!(result.flags.contains(&ResultFlag::Lockout));
    assert_eq!(h.grading.call_count(), 1);
}

#[tokio::test]
async fn events_after_termination_are_logged_but_inert() {
    let h = harness().await;
    let session = h.active_session("heidi").await;
    h.engine.submit_exam(session.id, h.at(50)).await.unwrap();

    let (after, event) = h
        .engine
        .record_event(
            session.id,
            EventKind::TabSwitch,
            EventSource::Client,
            Some(h.at(60)),
            h.at(60),
        )
        .await
        .unwrap();
    assert_eq!(event.disposition, EventDisposition::AfterTermination);
    assert_eq!(after.integrity.score(), 100.0);

    let stored = h.engine.load_session(session.id).await.unwrap();
    assert_eq!(stored.events.len(), 1);
}

#[tokio::test]
async fn debounce_coalesces_rapid_repeats() {
    let h = harness().await;
    let session = h.active_session("ivan").await;

    let (_, first) = h
        .engine
        .record_event(
            session.id,
            EventKind::TabSwitch,
            EventSource::Client,
            Some(h.at(10)),
            h.at(10),
        )
        .await
        .unwrap();
    assert_eq!(first.disposition, EventDisposition::Scored);

    // 500ms later: inside the 2s window, absorbed.
    let (updated, second) = h
        .engine
        .record_event(
            session.id,
            EventKind::TabSwitch,
            EventSource::Client,
            Some(h.at(10) + Duration::milliseconds(500)),
            h.at(11),
        )
        .await
        .unwrap();
    assert_eq!(second.disposition, EventDisposition::Coalesced);
    assert_eq!(second.repeats, 2);
    assert_eq!(updated.integrity.score(), 93.0, "coalesced event must not score");

    // 3s after the window opened: a fresh effective event.
    let (updated, third) = h
        .engine
        .record_event(
            session.id,
            EventKind::TabSwitch,
            EventSource::Client,
            Some(h.at(13)),
            h.at(13),
        )
        .await
        .unwrap();
    assert_eq!(third.disposition, EventDisposition::Scored);
    assert_eq!(updated.integrity.score(), 86.0);

    // Every raw signal is logged, and replaying the log (which skips the
    // coalesced row) reproduces the stored ledger exactly.
    let stored = h.engine.load_session(session.id).await.unwrap();
    assert_eq!(stored.events.len(), 3);
    assert_eq!(
        h.engine.scorer().replay(&stored.events).score_centi,
        stored.integrity.score_centi
    );
}

/// Store wrapper that fails the next ledger commits with a CAS conflict
/// before delegating, standing in for concurrent writers on the session.
struct ConflictingStore {
    inner: MemoryStore,
    conflicts_left: AtomicU32,
}

impl ConflictingStore {
    fn new(conflicts: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            conflicts_left: AtomicU32::new(conflicts),
        }
    }
}

#[async_trait]
impl SessionStore for ConflictingStore {
    async fn create(&self, session: ExamSession) -> Result<SessionId, StoreError> {
        self.inner.create(session).await
    }

    async fn load(&self, id: SessionId) -> Result<ExamSession, StoreError> {
        self.inner.load(id).await
    }

    async fn compare_and_swap(
        &self,
        id: SessionId,
        expected: SessionState,
        mutate: Mutator<'_>,
    ) -> Result<ExamSession, StoreError> {
        self.inner.compare_and_swap(id, expected, mutate).await
    }

    async fn compare_and_swap_with_event(
        &self,
        id: SessionId,
        expected: SessionState,
        mutate: Mutator<'_>,
        event: IntegrityEvent,
    ) -> Result<ExamSession, StoreError> {
        if self.conflicts_left.load(Ordering::SeqCst) > 0 {
            self.conflicts_left.fetch_sub(1, Ordering::SeqCst);
            return Err(StoreError::Conflict { actual: expected });
        }
        self.inner
            .compare_and_swap_with_event(id, expected, mutate, event)
            .await
    }

    async fn append_event(&self, id: SessionId, event: IntegrityEvent) -> Result<(), StoreError> {
        self.inner.append_event(id, event).await
    }

    async fn count_attempts(&self, student_id: &str, exam_id: &str) -> Result<u32, StoreError> {
        self.inner.count_attempts(student_id, exam_id).await
    }

    async fn list_active(&self) -> Result<Vec<ExamSession>, StoreError> {
        self.inner.list_active().await
    }
}

#[tokio::test]
async fn event_charge_survives_a_cas_conflict() {
    let h = harness_on(
        Arc::new(ConflictingStore::new(1)),
        RecordingGrading::succeeding(),
    )
    .await;
    let session = h.active_session("sybil").await;

    // A concurrent writer bumps the version between our read and write.
    // The retried commit must still charge the signal rather than absorb
    // it into the debounce window it opened itself.
    let (updated, event) = h
        .engine
        .record_event(
            session.id,
            EventKind::TabSwitch,
            EventSource::Client,
            Some(h.at(10)),
            h.at(10),
        )
        .await
        .unwrap();
    assert_eq!(event.disposition, EventDisposition::Scored);
    assert_eq!(updated.integrity.score(), 93.0);

    let stored = h.engine.load_session(session.id).await.unwrap();
    assert_eq!(stored.events.len(), 1);
    assert_eq!(
        h.engine.scorer().replay(&stored.events).score_centi,
        stored.integrity.score_centi
    );
}

#[tokio::test]
async fn first_heartbeat_past_deadline_expires_a_created_session() {
    let h = harness().await;
    let session = h
        .engine
        .start_attempt("trent", "rust-101", h.t0)
        .await
        .unwrap();
    assert_eq!(session.state, SessionState::Created);

    // The client never activated the session; the deadline still counts
    // from creation, so the first heartbeat past it must expire, not
    // activate.
    let expired = h.engine.heartbeat(session.id, h.at(4000)).await.unwrap();
    assert_eq!(expired.state, SessionState::Expired);
    assert_eq!(expired.termination_reason, TerminationReason::TimeExpired);

    h.wait_for_grading(session.id).await;
    assert_eq!(h.grading.call_count(), 1);
}

#[tokio::test]
async fn duplicate_and_exhausted_attempts_are_rejected() {
    let h = harness().await;
    let first = h.active_session("judy").await;

    let err = h
        .engine
        .start_attempt("judy", "rust-101", h.at(5))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicateActiveAttempt));

    h.engine.submit_exam(first.id, h.at(10)).await.unwrap();
    h.wait_for_grading(first.id).await;

    // Second attempt is allowed (max_attempts = 2)...
    let second = h
        .engine
        .start_attempt("judy", "rust-101", h.at(20))
        .await
        .unwrap();
    h.engine.submit_exam(second.id, h.at(25)).await.ok();
    h.engine.heartbeat(second.id, h.at(25)).await.ok();
    let second = h.engine.submit_exam(second.id, h.at(30)).await;
    assert!(second.is_ok() || matches!(second, Err(AppError::SessionNotActive(_))));

    // ...the third is not.
    let err = h
        .engine
        .start_attempt("judy", "rust-101", h.at(40))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AttemptNotAllowed(_)));
}

#[tokio::test]
async fn grading_failure_degrades_to_manual_review() {
    let h = harness_with(RecordingGrading::failing()).await;
    let session = h.active_session("mallory").await;
    h.engine.submit_exam(session.id, h.at(100)).await.unwrap();

    let settled = h.wait_for_grading(session.id).await;
    // The session stays in its terminal state with a failed grading status
    // instead of moving to graded.
    assert_eq!(settled.state, SessionState::Submitted);
    assert_eq!(settled.grading, GradingStatus::Failed);
    let result = settled.result.expect("manual-review result missing");
    assert!(result.flags.contains(&ResultFlag::ManualReviewNeeded));
    assert_eq!(result.total_score, 0.0);
}

#[tokio::test]
async fn proctor_termination_records_note_and_flags_review() {
    let h = harness().await;
    let session = h.active_session("oscar").await;

    let terminated = h
        .engine
        .terminate(session.id, "proctor-7", "two faces visible on camera", h.at(300))
        .await
        .unwrap();
    assert_eq!(terminated.state, SessionState::TerminatedByProctor);
    assert_eq!(
        terminated.termination_reason,
        TerminationReason::ProctorTerminated
    );
    assert_eq!(
        terminated.operator_note.as_deref(),
        Some("two faces visible on camera")
    );

    let settled = h.wait_for_grading(session.id).await;
    let result = settled.result.expect("no result");
    assert!(result.flags.contains(&ResultFlag::ManualReviewNeeded));
}

/// The worked end-to-end scenario: 3600s exam, an answer at t=10, a
/// tab-switch burst partially debounced, and a heartbeat long past the
/// deadline forcing expiry.
#[tokio::test]
async fn burst_debounce_and_expiry_scenario() {
    let h = harness().await;
    let session = h.active_session("peggy").await;

    h.engine
        .submit_answer(
            session.id,
            "q1",
            AnswerPayload::Selection {
                option: "let".to_string(),
            },
            1,
            h.at(10),
        )
        .await
        .unwrap();

    // Effective tab switches at t=20, 25, 30, 35; each followed by raw
    // repeats inside the 2s window that must coalesce.
    let mut expected = [93.0, 86.0, 75.5, 59.75].into_iter();
    for base in [20i64, 25, 30, 35] {
        let (updated, event) = h
            .engine
            .record_event(
                session.id,
                EventKind::TabSwitch,
                EventSource::Client,
                Some(h.at(base)),
                h.at(base),
            )
            .await
            .unwrap();
        assert_eq!(event.disposition, EventDisposition::Scored);
        assert_eq!(updated.integrity.score(), expected.next().unwrap());

        let (_, echo) = h
            .engine
            .record_event(
                session.id,
                EventKind::TabSwitch,
                EventSource::Client,
                Some(h.at(base) + Duration::milliseconds(800)),
                h.at(base + 1),
            )
            .await
            .unwrap();
        assert_eq!(echo.disposition, EventDisposition::Coalesced);
    }

    let expired = h.engine.heartbeat(session.id, h.at(3700)).await.unwrap();
    assert_eq!(expired.state, SessionState::Expired);

    let settled = h.wait_for_grading(session.id).await;
    let result = settled.result.as_ref().expect("no result");
    assert_eq!(result.termination_reason, TerminationReason::TimeExpired);
    assert_eq!(result.integrity_score_final, 59.75);
    assert!(result.flags.is_empty(), "59.75 is above the lockout floor");
    assert_eq!(h.grading.call_count(), 1);

    // The frozen log contains exactly the one answered question.
    assert_eq!(settled.latest_answers().len(), 1);
}

fn scored_event(kind: EventKind, severity: Severity, secs: i64) -> IntegrityEvent {
    IntegrityEvent {
        session_id: uuid::Uuid::new_v4(),
        timestamp: Utc::now() + Duration::seconds(secs),
        kind,
        severity,
        source: EventSource::Client,
        repeats: 1,
        disposition: EventDisposition::Scored,
    }
}

#[test]
fn score_is_monotonic_and_order_independent() {
    let scorer = IntegrityScorer::new(IntegrityPolicy::default());
    let events = vec![
        scored_event(EventKind::TabSwitch, Severity::Medium, 0),
        scored_event(EventKind::NetworkDrop, Severity::Low, 5),
        scored_event(EventKind::TabSwitch, Severity::Medium, 10),
        scored_event(EventKind::FaceMismatch, Severity::High, 15),
        scored_event(EventKind::TabSwitch, Severity::Medium, 20),
        scored_event(EventKind::BlockedShortcut, Severity::Low, 25),
    ];

    // Monotonic: applying one by one never raises the score.
    let mut ledger = examd::models::integrity::IntegrityLedger::new();
    let mut last = ledger.score();
    for event in &events {
        scorer.apply(&mut ledger, event);
        assert!(ledger.score() <= last);
        last = ledger.score();
    }

    // Order-independent: a handful of distinct permutations all land on the
    // same final score.
    let reference = scorer.replay(&events).score_centi;
    let mut rotated = events.clone();
    for _ in 0..events.len() {
        rotated.rotate_left(1);
        assert_eq!(scorer.replay(&rotated).score_centi, reference);
    }
    let mut reversed = events.clone();
    reversed.reverse();
    assert_eq!(scorer.replay(&reversed).score_centi, reference);

    // Incremental maintenance and full replay agree exactly.
    assert_eq!(ledger.score_centi, reference);
    assert_eq!(ledger.kind_counts, scorer.replay(&events).kind_counts);
}

#[test]
fn escalation_is_monotonic_and_bounded() {
    let scorer = IntegrityScorer::new(IntegrityPolicy::default());
    let mut previous = 0;
    for occurrence in 1..=20 {
        let penalty = scorer.penalty_centi(Severity::Medium, occurrence);
        assert!(penalty >= previous, "penalty must not shrink with repeats");
        assert!(penalty <= examd::models::integrity::MAX_SCORE_CENTI);
        previous = penalty;
    }
}

#[test]
fn would_lock_out_predicts_the_commit() {
    let scorer = IntegrityScorer::new(IntegrityPolicy::default());
    let mut ledger = examd::models::integrity::IntegrityLedger::new();
    // Three high events: 100 -> 80 -> 60 -> 30.
    for i in 0..3 {
        scorer.apply(
            &mut ledger,
            &scored_event(EventKind::CameraLoss, Severity::High, i),
        );
    }
    assert_eq!(ledger.score(), 30.0);

    let next = scored_event(EventKind::CameraLoss, Severity::High, 10);
    assert!(scorer.would_lock_out(&ledger, &next));
    // The probe must not mutate the real ledger.
    assert_eq!(ledger.score(), 30.0);
}
