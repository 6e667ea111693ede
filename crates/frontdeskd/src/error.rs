//! Mapping of internal failures onto JSON error responses.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::engine::EngineError;
use crate::photo::PhotoError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Photo(#[from] PhotoError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Engine(EngineError::NoFaceDetected) => StatusCode::BAD_REQUEST,
            Self::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Rejected { status, .. } => *status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Shape this error for the recognition endpoint, which always reports
    /// `recognized: false` alongside the failure.
    pub fn for_recognition(self) -> ErrorResponse {
        ErrorResponse {
            error: self,
            recognition: true,
        }
    }
}

/// An [`ApiError`] bound to the endpoint that produced it.
#[derive(Debug)]
pub struct ErrorResponse {
    error: ApiError,
    recognition: bool,
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    recognized: Option<bool>,
    message: String,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = self.error.status();
        let message = match (&self.error, self.recognition) {
            (ApiError::Engine(EngineError::NoFaceDetected), true) => {
                "No face detected in probe image".to_string()
            }
            (ApiError::Engine(EngineError::NoFaceDetected), false) => {
                "No face detected in image".to_string()
            }
            (error, _) => error.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self.error, "request failed");
        } else {
            tracing::info!(status = status.as_u16(), error = %self.error, "request rejected");
        }

        let body = ErrorBody {
            status: "error",
            recognized: self.recognition.then_some(false),
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        ErrorResponse {
            error: self,
            recognition: false,
        }
        .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::from(EngineError::NoFaceDetected).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(StoreError::NotFound("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(PhotoError::MalformedDataUri).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(EngineError::ChannelClosed).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_message_is_underlying_error() {
        let err = ApiError::from(StoreError::DuplicateId("abc".into()));
        assert_eq!(err.to_string(), "face id already stored: abc");
    }
}
