// src/handlers/events.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    engine::SessionEngine,
    error::AppError,
    models::integrity::{ReportEventRequest, ReportEventResponse},
    utils::jwt::{Capability, Claims},
};

/// Proctor/client event feed: one raw integrity signal.
///
/// Delivery is at-least-once; duplicates land in the debounce window and
/// are logged as coalesced. Events for terminated sessions are accepted and
/// logged but never change the score.
pub async fn report_event(
    State(engine): State<SessionEngine>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReportEventRequest>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(Capability::ReportEvents)?;

    let now = Utc::now();
    let session = engine.load_session(id).await?;
    // Students may only report against their own session; the proctoring
    // pipeline reports against any.
    if !claims.can(Capability::ViewAnySession) && claims.sub != session.student_id {
        return Err(AppError::Forbidden(
            "this session belongs to another student".to_string(),
        ));
    }

    let (session, event) = engine
        .record_event(id, req.kind, req.source, req.timestamp, now)
        .await?;

    Ok(Json(ReportEventResponse {
        disposition: event.disposition,
        integrity_score: session.integrity.score(),
        session_state: session.state,
    }))
}
