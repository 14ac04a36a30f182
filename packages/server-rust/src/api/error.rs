//! HTTP error type. Every variant renders as `{"error": "<message>"}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::queue::SubmitError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Content-Type header is not application/json")]
    UnsupportedMediaType,
    #[error("Request body must not be empty")]
    EmptyBody,
    #[error("Request body contains badly-formed JSON (at position {0})")]
    MalformedJson(usize),
    #[error("Request body contains badly-formed JSON")]
    TruncatedJson,
    #[error("Request body contains an invalid value (at position {offset}): {detail}")]
    InvalidValue { detail: String, offset: usize },
    #[error("Request body contains unknown field \"{0}\"")]
    UnknownField(String),
    #[error("Request body must only contain a single JSON object")]
    TrailingData,
    #[error("Request body must not be larger than {0} bytes")]
    TooLarge(usize),
    #[error(transparent)]
    Unavailable(#[from] SubmitError),
    #[error("{0} is not implemented")]
    NotImplemented(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::EmptyBody
            | Self::MalformedJson(_)
            | Self::TruncatedJson
            | Self::InvalidValue { .. }
            | Self::UnknownField(_)
            | Self::TrailingData => StatusCode::BAD_REQUEST,
            Self::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if let Self::Internal(detail) = &self {
            error!(%detail, "request failed");
            "Internal Server Error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::UnsupportedMediaType.status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(ApiError::MalformedJson(3).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::TooLarge(10).status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            ApiError::from(SubmitError::Closed).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::NotImplemented("client/connect/primary".into()).status(),
            StatusCode::NOT_IMPLEMENTED
        );
    }

    #[test]
    fn messages_name_the_problem() {
        assert_eq!(
            ApiError::MalformedJson(17).to_string(),
            "Request body contains badly-formed JSON (at position 17)"
        );
        assert_eq!(
            ApiError::UnknownField("Colour".into()).to_string(),
            "Request body contains unknown field \"Colour\""
        );
        assert_eq!(
            ApiError::from(SubmitError::Closed).to_string(),
            "submission queue is closed"
        );
    }

    #[test]
    fn internal_detail_is_not_exposed() {
        let response = ApiError::Internal("socket reset".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
