// src/utils/jwt.rs

use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{error::AppError, state::AppState};

/// Roles known to the capability table.
pub const ROLE_STUDENT: &str = "student";
pub const ROLE_PROCTOR: &str = "proctor";
pub const ROLE_ADMIN: &str = "admin";

/// Everything a caller can be allowed to do. Roles map to capability sets;
/// handlers check membership instead of comparing role strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    StartAttempt,
    SubmitAnswers,
    ReportEvents,
    ViewOwnSession,
    ViewAnySession,
    TerminateSession,
    RegisterExam,
}

/// The one process-wide role/capability table.
pub fn capabilities_for(role: &str) -> &'static [Capability] {
    match role {
        ROLE_STUDENT => &[
            Capability::StartAttempt,
            Capability::SubmitAnswers,
            Capability::ReportEvents,
            Capability::ViewOwnSession,
        ],
        ROLE_PROCTOR => &[
            Capability::ReportEvents,
            Capability::ViewAnySession,
            Capability::TerminateSession,
        ],
        ROLE_ADMIN => &[
            Capability::ViewAnySession,
            Capability::TerminateSession,
            Capability::RegisterExam,
        ],
        _ => &[],
    }
}

/// JWT Claims structure.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Claims {
    /// Subject - the student/operator id.
    pub sub: String,
    /// Caller's role: 'student', 'proctor' or 'admin'.
    pub role: String,
    /// Expiration time as Unix timestamp.
    pub exp: usize,
}

impl Claims {
    pub fn can(&self, capability: Capability) -> bool {
        capabilities_for(&self.role).contains(&capability)
    }

    /// Capability check as a `Result`, for use with `?` in handlers.
    pub fn require(&self, capability: Capability) -> Result<(), AppError> {
        if self.can(capability) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "role '{}' may not perform this action",
                self.role
            )))
        }
    }
}

/// Signs a JWT for the given subject and role. Tokens are minted by the
/// identity service in production; this helper exists for tooling and tests.
pub fn sign_jwt(
    subject: &str,
    role: &str,
    secret: &str,
    expiration_seconds: u64,
) -> Result<String, AppError> {
    let expiration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .as_secs() as usize
        + expiration_seconds as usize;

    let claims = Claims {
        sub: subject.to_owned(),
        role: role.to_owned(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalServerError(e.to_string()))
}

/// Verifies and decodes a JWT string.
///
/// Returns the `Claims` if valid, otherwise returns an `AppError`.
pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let token_data = decode(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::AuthError("Invalid token".to_string()))?;

    Ok(token_data.claims)
}

/// Axum Middleware: Authentication.
///
/// Intercepts requests, validates the 'Authorization: Bearer <token>' header.
/// If valid, injects `Claims` into the request extensions for handlers to use.
/// If invalid, returns 401 Unauthorized.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let token = match auth_header {
        Some(header) if header.starts_with("Bearer ") => &header[7..],
        _ => return Err(StatusCode::UNAUTHORIZED),
    };

    match verify_jwt(token, &state.config.jwt_secret) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            Ok(next.run(req).await)
        }
        Err(_) => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Axum Middleware: administrative control surface.
///
/// Layered after `auth_middleware` on the /api/admin routes; requires the
/// session-termination capability (proctors and admins).
pub async fn control_middleware(
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if claims.can(Capability::TerminateSession) {
        Ok(next.run(req).await)
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}
