// src/routes.rs

use axum::{
    Router, http::Method, middleware,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, events, session},
    state::AppState,
    utils::jwt::{auth_middleware, control_middleware},
};

/// Assembles the main application router.
///
/// * Session routes carry the student/proctor flows; all require a token.
/// * Admin routes additionally require the termination capability.
/// * Applies global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let session_routes = Router::new()
        .route("/", post(session::start_attempt))
        .route("/{id}", get(session::get_session))
        .route("/{id}/heartbeat", post(session::heartbeat))
        .route("/{id}/answers/{question_id}", put(session::submit_answer))
        .route("/{id}/events", post(events::report_event))
        .route("/{id}/submit", post(session::submit_exam))
        .route("/{id}/result", get(session::get_result))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let admin_routes = Router::new()
        .route("/exams", post(admin::register_exam))
        .route("/sessions", get(admin::list_active_sessions))
        .route("/sessions/{id}/terminate", post(admin::terminate_session))
        // Double middleware protection: Auth first, then capability check
        .layer(middleware::from_fn(control_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .nest("/api/sessions", session_routes)
        .nest("/api/admin", admin_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
