//! HTTP error mapping.
//!
//! The core reports an error kind; this layer picks the status family. The
//! Twilio webhook handlers never use this type — their error path is TwiML.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use callscope_core::CoreError;

pub struct ApiError(pub CoreError);

impl<E: Into<CoreError>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match &self.0 {
            CoreError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::Auth(_) => StatusCode::UNAUTHORIZED,
            CoreError::Data(msg) if msg.contains("not found") => StatusCode::NOT_FOUND,
            CoreError::Data(_) => StatusCode::BAD_REQUEST,
            CoreError::State(_) => StatusCode::CONFLICT,
            CoreError::Transport { .. } | CoreError::ExternalApi { .. } => StatusCode::BAD_GATEWAY,
            CoreError::RemoteFs(_) => StatusCode::BAD_GATEWAY,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({
            "error": self.0.to_string(),
            "kind": kind,
            "status": status.as_u16(),
        }));
        (status, body).into_response()
    }
}

pub fn not_found(entity: &str, id: &str) -> ApiError {
    ApiError(CoreError::Data(format!("{entity} not found: {id}")))
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
