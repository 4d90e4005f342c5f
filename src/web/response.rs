// Uniform HTTP error body: `{ error, code }` mapped from `KotaError`'s own
// taxonomy (§7), so every handler reports failures the same way.

use crate::error::KotaError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub struct ApiError(pub KotaError);

impl From<KotaError> for ApiError {
    fn from(err: KotaError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "error": self.0.to_user_string(),
            "code": self.0.taxonomy_code(),
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
