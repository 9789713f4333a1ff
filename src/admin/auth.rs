use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use crate::http::auth::bearer_token;
use crate::http::server::AppState;

/// Reject admin calls without `Authorization: Bearer <admin.api_key>`.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let authorized = bearer_token(&request).is_some_and(|token| token == state.config().admin.api_key);
    if !authorized {
        tracing::warn!(path = %request.uri().path(), "Rejected admin request");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}
