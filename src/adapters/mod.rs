// src/adapters/mod.rs

pub mod http;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::models::session::{
    AnswerRecord, PlagiarismReport, QuestionGrade, SessionId,
};
use crate::store::{ExamCatalog, SessionStore, StoreError};

pub use http::{HttpGradingAdapter, HttpPlagiarismAdapter};

/// Failure modes of an external adapter call. Transient failures are
/// retried with backoff; permanent ones go straight to the manual queue.
#[derive(Debug)]
pub enum AdapterError {
    Transient(String),
    Permanent(String),
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::Transient(msg) => write!(f, "transient adapter failure: {}", msg),
            AdapterError::Permanent(msg) => write!(f, "permanent adapter failure: {}", msg),
        }
    }
}

impl std::error::Error for AdapterError {}

/// Outcome of grading one frozen answer log.
#[derive(Debug, Clone)]
pub struct GradeResult {
    pub question_scores: HashMap<String, QuestionGrade>,
}

/// Opaque grading service. Must be idempotent per session id: the engine
/// guarantees at most one dispatch per session, but delivery is
/// at-least-once under retry.
#[async_trait]
pub trait GradingAdapter: Send + Sync {
    async fn grade(
        &self,
        session_id: SessionId,
        exam_id: &str,
        answers: &[AnswerRecord],
    ) -> Result<GradeResult, AdapterError>;
}

/// Opaque plagiarism scanner, same idempotency and retry contract as
/// grading. Runs in parallel with grading, never blocks termination.
#[async_trait]
pub trait PlagiarismAdapter: Send + Sync {
    async fn scan(
        &self,
        session_id: SessionId,
        answers: &[AnswerRecord],
    ) -> Result<PlagiarismReport, AdapterError>;
}

/// Eligibility decision for starting an attempt.
#[derive(Debug, Clone, Copy)]
pub struct AttemptEligibility {
    pub allowed: bool,
    pub attempts_remaining: u32,
}

/// Enrollment/eligibility check, consulted once at session creation.
#[async_trait]
pub trait EnrollmentService: Send + Sync {
    async fn can_start_attempt(
        &self,
        student_id: &str,
        exam_id: &str,
    ) -> Result<AttemptEligibility, AdapterError>;
}

/// Default eligibility: count prior attempts against the exam's
/// `max_attempts`. Deployments with a real enrollment system swap this out.
pub struct AttemptCountEnrollment {
    store: Arc<dyn SessionStore>,
    catalog: Arc<dyn ExamCatalog>,
}

impl AttemptCountEnrollment {
    pub fn new(store: Arc<dyn SessionStore>, catalog: Arc<dyn ExamCatalog>) -> Self {
        Self { store, catalog }
    }
}

#[async_trait]
impl EnrollmentService for AttemptCountEnrollment {
    async fn can_start_attempt(
        &self,
        student_id: &str,
        exam_id: &str,
    ) -> Result<AttemptEligibility, AdapterError> {
        let exam = self.catalog.get(exam_id).await.map_err(|e| match e {
            StoreError::NotFound => AdapterError::Permanent(format!("unknown exam {}", exam_id)),
            other => AdapterError::Transient(other.to_string()),
        })?;
        let used = self
            .store
            .count_attempts(student_id, exam_id)
            .await
            .map_err(|e| AdapterError::Transient(e.to_string()))?;
        let remaining = exam.max_attempts.saturating_sub(used);
        Ok(AttemptEligibility {
            allowed: remaining > 0,
            attempts_remaining: remaining,
        })
    }
}

/// Fallback grading adapter for deployments without a grading endpoint:
/// every session lands in the manual grading queue.
pub struct ManualQueueGrading;

#[async_trait]
impl GradingAdapter for ManualQueueGrading {
    async fn grade(
        &self,
        session_id: SessionId,
        exam_id: &str,
        _answers: &[AnswerRecord],
    ) -> Result<GradeResult, AdapterError> {
        tracing::info!(
            "No grading endpoint configured; session {} (exam {}) queued for manual grading",
            session_id,
            exam_id
        );
        Err(AdapterError::Permanent(
            "no grading endpoint configured".to_string(),
        ))
    }
}

/// Fallback plagiarism adapter: reports nothing.
pub struct NoopPlagiarism;

#[async_trait]
impl PlagiarismAdapter for NoopPlagiarism {
    async fn scan(
        &self,
        session_id: SessionId,
        _answers: &[AnswerRecord],
    ) -> Result<PlagiarismReport, AdapterError> {
        Ok(PlagiarismReport {
            session_id,
            similarity: 0.0,
            matched_sources: Vec::new(),
        })
    }
}

/// Runs an adapter call with bounded exponential backoff. Permanent errors
/// short-circuit; transient ones are retried up to `attempts` times.
pub async fn with_retries<T, F, Fut>(
    op: &str,
    attempts: u32,
    base_delay: Duration,
    mut call: F,
) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AdapterError>>,
{
    let mut delay = base_delay;
    let mut last_error = AdapterError::Permanent(format!("{}: no attempts made", op));
    for attempt in 1..=attempts.max(1) {
        match call().await {
            Ok(value) => return Ok(value),
            Err(AdapterError::Permanent(msg)) => {
                return Err(AdapterError::Permanent(msg));
            }
            Err(AdapterError::Transient(msg)) => {
                tracing::warn!("{} attempt {}/{} failed: {}", op, attempt, attempts, msg);
                last_error = AdapterError::Transient(msg);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
    Err(last_error)
}
