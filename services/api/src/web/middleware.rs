//! services/api/src/web/middleware.rs
//!
//! Session-cookie authentication for the protected routes.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::error;

use crate::web::state::AppState;

/// Cookie carrying the opaque session id issued at signup/login.
pub const SESSION_COOKIE: &str = "anamnesia_session";

/// Pulls the session id out of a `Cookie` header value.
pub fn session_id_from_cookies(cookie_header: &str) -> Option<&str> {
    cookie_header.split(';').find_map(|c| {
        c.trim()
            .strip_prefix(SESSION_COOKIE)
            .and_then(|rest| rest.strip_prefix('='))
    })
}

/// Middleware that validates the session cookie against the auth_sessions
/// table and stashes the resolved user id in the request extensions.
///
/// Missing, unknown, or expired sessions all answer 401.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // 1. Extract the session id from the cookie header
    let session_id = req
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(session_id_from_cookies)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // 2. Resolve it to a user
    let user_id = state
        .db
        .validate_auth_session(session_id)
        .await
        .map_err(|e| {
            error!("Failed to validate auth session: {:?}", e);
            StatusCode::UNAUTHORIZED
        })?;

    // 3. Hand the user id to the handlers
    req.extensions_mut().insert(user_id);

    Ok(next.run(req).await)
}
