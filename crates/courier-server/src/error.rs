use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use courier_chat::ChatError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Chat(err) => match err {
                ChatError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
                ChatError::NotFound(_) => StatusCode::NOT_FOUND,
                ChatError::PermissionDenied(_) => StatusCode::FORBIDDEN,
                ChatError::Conflict(_) => StatusCode::CONFLICT,
                ChatError::DeliveryFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
                ChatError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Storage details stay in the log.
            ApiError::Chat(ChatError::Unavailable(detail)) => {
                tracing::error!(error = %detail, "Storage failure");
                "Storage unavailable".to_string()
            }
            _ => self.to_string(),
        };

        let body = serde_json::json!({
            "success": false,
            "message": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
