//! Bearer-key checks for the HTTP surfaces.
//!
//! `/v1/invoke` acts on stored user credentials, so only callers holding one
//! of `invoke.api_keys` may reach it. The admin surface has its own key.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::http::server::AppState;

pub(crate) fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Reject invokes without `Authorization: Bearer <key>` for a configured caller key.
pub async fn invoke_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !bearer_token(&request).is_some_and(|token| state.config().invoke.accepts(token)) {
        tracing::warn!(path = %request.uri().path(), "Rejected unauthenticated invoke");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}
