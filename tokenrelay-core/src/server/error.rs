use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde_json::json;

use crate::error::RelayError;

/// Errors rendered on the HTTP surface as `{ "error": <message> }`.
#[derive(Debug)]
pub enum ApiError {
    /// 400
    BadRequest(String),
    /// 500
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(m) | Self::Internal(m) => m,
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Validation(message) => Self::BadRequest(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            // a body that is not declared as JSON carries no prompt
            JsonRejection::MissingJsonContentType(_) => {
                Self::BadRequest(super::relay::PROMPT_REQUIRED.to_string())
            }
            other => Self::Internal(other.body_text()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(message) = &self {
            tracing::error!(error = %message, "request failed");
        }
        (self.status(), Json(json!({ "error": self.message() }))).into_response()
    }
}
