// src/models/session.rs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::integrity::{IntegrityEvent, IntegrityLedger};

pub type SessionId = Uuid;

/// Lifecycle states of an exam session.
///
/// Transitions are monotonic: `created → active → {submitted, expired,
/// locked_out, terminated_by_proctor} → graded`. A terminated session is
/// never resurrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Active,
    Submitted,
    Expired,
    LockedOut,
    TerminatedByProctor,
    Graded,
}

impl SessionState {
    /// True once the answer log has been frozen.
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Created | SessionState::Active)
    }
}

/// Why a session left the `active` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    None,
    TimeExpired,
    ManualSubmit,
    IntegrityLockout,
    ProctorTerminated,
}

/// Grading progress, folded into the terminal states rather than modeled as
/// a separate top-level `pending_grade` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingStatus {
    NotRequested,
    Pending,
    Complete,
    Failed,
}

/// One answer submission. The session keeps every record for audit; only the
/// latest record per question id is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: String,
    pub payload: AnswerPayload,
    pub submitted_at: DateTime<Utc>,
    pub client_revision: u32,
}

/// Answer payload, tagged by question kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerPayload {
    Selection { option: String },
    Text { body: String },
    Number { value: f64 },
    Boolean { value: bool },
}

/// Per-question outcome returned by the grading adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionGrade {
    pub score: f64,
    pub confidence: f64,
    pub explanation: String,
}

/// Flags attached to a published result for human follow-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultFlag {
    Lockout,
    ManualReviewNeeded,
}

/// Read-only result record published once grading completes (or is given up
/// on and routed to manual review).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    pub session_id: SessionId,
    pub question_scores: HashMap<String, QuestionGrade>,
    pub total_score: f64,
    pub integrity_score_final: f64,
    pub flags: Vec<ResultFlag>,
    pub termination_reason: TerminationReason,
}

/// Plagiarism scan outcome attached to the session by the scan adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlagiarismReport {
    pub session_id: SessionId,
    pub similarity: f64,
    pub matched_sources: Vec<String>,
}

/// The central entity: one attempt of one student at one exam.
///
/// Mutated exclusively through the session store's compare-and-swap, which
/// serializes concurrent heartbeats, answer submissions, integrity events
/// and administrative actions on the same session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSession {
    pub id: SessionId,
    pub exam_id: String,
    pub student_id: String,
    pub attempt: u32,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    /// Fixed at creation: `created_at + duration`. Never extended.
    pub deadline: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Append-only audit trail of every answer submission.
    pub answers: Vec<AnswerRecord>,
    /// Normalized event log, populated via the store's append channel.
    #[serde(default)]
    pub events: Vec<IntegrityEvent>,
    pub integrity: IntegrityLedger,
    pub submitted_at: Option<DateTime<Utc>>,
    pub termination_reason: TerminationReason,
    pub grading: GradingStatus,
    pub result: Option<SessionResult>,
    pub plagiarism: Option<PlagiarismReport>,
    /// Reviewer note, required for proctor terminations.
    pub operator_note: Option<String>,
    /// CAS guard; bumped by the store on every successful swap.
    pub version: i64,
}

impl ExamSession {
    pub fn new(
        exam_id: &str,
        student_id: &str,
        attempt: u32,
        duration_secs: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            exam_id: exam_id.to_owned(),
            student_id: student_id.to_owned(),
            attempt,
            state: SessionState::Created,
            created_at: now,
            deadline: now + chrono::Duration::seconds(duration_secs),
            last_activity: now,
            answers: Vec::new(),
            events: Vec::new(),
            integrity: IntegrityLedger::new(),
            submitted_at: None,
            termination_reason: TerminationReason::None,
            grading: GradingStatus::NotRequested,
            result: None,
            plagiarism: None,
            operator_note: None,
            version: 0,
        }
    }

    /// Latest answer per question id, in first-submission order.
    /// This is the view frozen into the grading request at termination.
    pub fn latest_answers(&self) -> Vec<AnswerRecord> {
        let mut order: Vec<&str> = Vec::new();
        let mut latest: HashMap<&str, &AnswerRecord> = HashMap::new();
        for record in &self.answers {
            if latest.insert(&record.question_id, record).is_none() {
                order.push(&record.question_id);
            }
        }
        order
            .into_iter()
            .filter_map(|q| latest.get(q).map(|r| (*r).clone()))
            .collect()
    }

    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.deadline - now).num_seconds().max(0)
    }
}

/// Student-facing view of a session. Excludes the raw event log.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub id: SessionId,
    pub exam_id: String,
    pub attempt: u32,
    pub state: SessionState,
    pub deadline: DateTime<Utc>,
    pub seconds_remaining: i64,
    pub answered_questions: usize,
    pub integrity_score: f64,
    pub termination_reason: TerminationReason,
    pub grading: GradingStatus,
}

impl SessionView {
    pub fn from_session(session: &ExamSession, now: DateTime<Utc>) -> Self {
        Self {
            id: session.id,
            exam_id: session.exam_id.clone(),
            attempt: session.attempt,
            state: session.state,
            deadline: session.deadline,
            seconds_remaining: session.seconds_remaining(now),
            answered_questions: session.latest_answers().len(),
            integrity_score: session.integrity.score(),
            termination_reason: session.termination_reason,
            grading: session.grading,
        }
    }
}

/// Proctor-console row: one active session with live integrity state.
#[derive(Debug, Serialize)]
pub struct ProctorSessionView {
    pub id: SessionId,
    pub exam_id: String,
    pub student_id: String,
    pub state: SessionState,
    pub integrity_score: f64,
    pub event_count: usize,
    pub last_activity: DateTime<Utc>,
    pub seconds_remaining: i64,
}

impl ProctorSessionView {
    pub fn from_session(session: &ExamSession, now: DateTime<Utc>) -> Self {
        Self {
            id: session.id,
            exam_id: session.exam_id.clone(),
            student_id: session.student_id.clone(),
            state: session.state,
            integrity_score: session.integrity.score(),
            event_count: session.events.len(),
            last_activity: session.last_activity,
            seconds_remaining: session.seconds_remaining(now),
        }
    }
}

/// DTO for submitting one answer.
#[derive(Debug, Deserialize)]
pub struct SubmitAnswerRequest {
    pub payload: AnswerPayload,
    #[serde(default)]
    pub client_revision: u32,
}

/// DTO for starting an attempt.
#[derive(Debug, Deserialize)]
pub struct StartAttemptRequest {
    pub exam_id: String,
}

/// DTO for a proctor-initiated termination. The note is mandatory: every
/// administrative termination must be reviewable.
#[derive(Debug, Deserialize, validator::Validate)]
pub struct TerminateSessionRequest {
    #[validate(length(min = 10, max = 2000))]
    pub note: String,
}
