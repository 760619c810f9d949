// src/handlers/session.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    engine::SessionEngine,
    error::AppError,
    models::session::{
        ExamSession, SessionView, StartAttemptRequest, SubmitAnswerRequest,
    },
    utils::{
        jwt::{Capability, Claims},
        sanitize::sanitize_payload,
    },
};

/// Ownership guard: students only ever see their own sessions; proctors and
/// admins hold `ViewAnySession`.
fn authorize_session_access(claims: &Claims, session: &ExamSession) -> Result<(), AppError> {
    if claims.can(Capability::ViewAnySession) || claims.sub == session.student_id {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "this session belongs to another student".to_string(),
        ))
    }
}

/// Starts a new attempt for the authenticated student.
///
/// * Checks eligibility against the enrollment service.
/// * Fails with 409 if an unterminated attempt already exists.
/// * The returned session is in `created` state; the first heartbeat
///   activates it.
pub async fn start_attempt(
    State(engine): State<SessionEngine>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<StartAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(Capability::StartAttempt)?;

    let now = Utc::now();
    let session = engine.start_attempt(&claims.sub, &req.exam_id, now).await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionView::from_session(&session, now)),
    ))
}

/// Heartbeat from the exam client. Activates a fresh session and is the
/// lazy deadline check: the first heartbeat past the deadline comes back
/// with the session expired.
pub async fn heartbeat(
    State(engine): State<SessionEngine>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let session = engine.load_session(id).await?;
    authorize_session_access(&claims, &session)?;

    let session = engine.heartbeat(id, now).await?;
    Ok(Json(SessionView::from_session(&session, now)))
}

/// Submits one answer. Re-submitting a question replaces the authoritative
/// answer; every submission stays in the audit trail.
pub async fn submit_answer(
    State(engine): State<SessionEngine>,
    Extension(claims): Extension<Claims>,
    Path((id, question_id)): Path<(Uuid, String)>,
    Json(req): Json<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(Capability::SubmitAnswers)?;

    let now = Utc::now();
    let session = engine.load_session(id).await?;
    authorize_session_access(&claims, &session)?;

    let payload = sanitize_payload(req.payload);
    let session = engine
        .submit_answer(id, &question_id, payload, req.client_revision, now)
        .await?;
    Ok(Json(SessionView::from_session(&session, now)))
}

/// Explicit exam submission. Idempotent: submitting an already-terminated
/// session returns its frozen state without re-dispatching grading.
pub async fn submit_exam(
    State(engine): State<SessionEngine>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(Capability::SubmitAnswers)?;

    let now = Utc::now();
    let session = engine.load_session(id).await?;
    authorize_session_access(&claims, &session)?;

    let session = engine.submit_exam(id, now).await?;
    Ok(Json(SessionView::from_session(&session, now)))
}

/// Current session view for the student UI.
pub async fn get_session(
    State(engine): State<SessionEngine>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let session = engine.load_session(id).await?;
    authorize_session_access(&claims, &session)?;
    Ok(Json(SessionView::from_session(&session, now)))
}

/// Published result record. 404 until grading completes or is routed to
/// manual review.
pub async fn get_result(
    State(engine): State<SessionEngine>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = engine.load_session(id).await?;
    authorize_session_access(&claims, &session)?;

    let result = engine.result(id).await?;
    Ok(Json(result))
}
