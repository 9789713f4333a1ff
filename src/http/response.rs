//! Error responses for the invoke surface.
//!
//! # Design Decisions
//! - The HTTP status follows the error code, not the upstream status
//! - Bodies carry the serialized `ApiError` plus a user-facing message
//! - Authentication failures include a reconnection hint

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::pipeline::error::ApiError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: ApiError,
    pub user_message: String,
    pub reconnect_required: bool,
}

impl From<&ApiError> for ErrorBody {
    fn from(error: &ApiError) -> Self {
        Self {
            error: error.clone(),
            user_message: error.user_message(),
            reconnect_required: error.code.is_auth(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::BAD_GATEWAY);
        let retry_after = self.retry_after;
        let mut response = (status, Json(ErrorBody::from(&self))).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
