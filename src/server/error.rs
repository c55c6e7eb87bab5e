use crate::error::StorybookError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Error type for HTTP handlers.
///
/// Wraps [`StorybookError`] and adds request-shape failures. Renders as
/// `{"error": message, "code": CODE}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Storybook(#[from] StorybookError),

    /// The body was not valid JSON for the endpoint.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        let internal = StatusCode::INTERNAL_SERVER_ERROR;
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Storybook(e) => match e {
                StorybookError::MissingField { .. } => {
                    (StatusCode::BAD_REQUEST, "MISSING_FIELD", e.to_string())
                }
                StorybookError::UnsupportedValue { .. } => {
                    (StatusCode::BAD_REQUEST, "UNSUPPORTED_VALUE", e.to_string())
                }
                StorybookError::StoryNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string())
                }
                StorybookError::GenerationFormat { .. } => {
                    (internal, "GENERATION_FORMAT", e.to_string())
                }
                StorybookError::TextModel { .. } => (internal, "TEXT_MODEL_ERROR", e.to_string()),
                StorybookError::ProviderNotConfigured { .. } => {
                    (internal, "PROVIDER_NOT_CONFIGURED", e.to_string())
                }
                StorybookError::Storage { .. } => {
                    tracing::error!(error = %e, "Storage error");
                    (internal, "STORAGE_ERROR", e.to_string())
                }
                StorybookError::Pdf { .. } => (internal, "PDF_ERROR", e.to_string()),
                StorybookError::InvalidConfig(_) => (internal, "INVALID_CONFIG", e.to_string()),
                StorybookError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal error");
                    (
                        internal,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let body = json!({
            "error": message,
            "code": code,
        });
        (status, axum::Json(body)).into_response()
    }
}
