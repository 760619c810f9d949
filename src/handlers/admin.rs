// src/handlers/admin.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    engine::SessionEngine,
    error::AppError,
    models::{
        exam::{ExamDefinition, Question, RegisterExamRequest},
        session::{ProctorSessionView, SessionView, TerminateSessionRequest},
    },
    utils::jwt::{Capability, Claims},
};

/// Registers a published exam definition.
/// Admin only; definitions are immutable once registered.
pub async fn register_exam(
    State(engine): State<SessionEngine>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<RegisterExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(Capability::RegisterExam)?;

    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let exam = ExamDefinition {
        id: payload.id,
        title: payload.title,
        questions: payload.questions.into_iter().map(Question::from).collect(),
        duration_secs: payload.duration_secs,
        max_attempts: payload.max_attempts,
    };
    let exam_id = exam.id.clone();
    engine.register_exam(exam).await.map_err(|e| {
        tracing::error!("Failed to register exam {}: {:?}", exam_id, e);
        e
    })?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "exam_id": exam_id })),
    ))
}

/// Proctor console: all unterminated sessions with live integrity state.
pub async fn list_active_sessions(
    State(engine): State<SessionEngine>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(Capability::ViewAnySession)?;

    let now = Utc::now();
    let sessions = engine.list_active().await?;
    let views: Vec<ProctorSessionView> = sessions
        .iter()
        .map(|s| ProctorSessionView::from_session(s, now))
        .collect();
    Ok(Json(views))
}

/// Terminates a session administratively. The reviewer note is mandatory
/// and is stored with the session; the result is flagged for manual review.
pub async fn terminate_session(
    State(engine): State<SessionEngine>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TerminateSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(Capability::TerminateSession)?;

    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let now = Utc::now();
    let session = engine.terminate(id, &claims.sub, &payload.note, now).await?;
    Ok(Json(SessionView::from_session(&session, now)))
}
