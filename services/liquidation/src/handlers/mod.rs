use aduana_utils::{AduanaError, ErrorResponse};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

pub mod health;
pub mod intake;
pub mod sessions;

pub use health::*;
pub use intake::*;
pub use sessions::*;

/// Domain error rendered as a JSON `ErrorResponse`.
#[derive(Debug)]
pub struct ApiError(pub AduanaError);

impl From<AduanaError> for ApiError {
    fn from(error: AduanaError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        } else {
            tracing::debug!(error = %self.0, "Request rejected");
        }
        (status, Json(ErrorResponse::from(self.0))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
