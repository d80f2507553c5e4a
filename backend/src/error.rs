//! HTTP error taxonomy and the JSON error envelope.
//!
//! Handlers never build error responses themselves: they return [`ApiError`],
//! whose response carries an [`ErrorReport`]. The [`render_errors`] middleware
//! is the single place that turns reports into the final envelope
//! `{message, errors?, error?}`, which is where the debug flag applies.

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::ValidationErrors;
use thiserror::Error;

use crate::service::ServiceError;

pub const NOT_FOUND_MESSAGE: &str = "Resource not found.";
pub const VALIDATION_MESSAGE: &str = "The given data is invalid.";
pub const INTERNAL_MESSAGE: &str = "Internal server error.";
pub const TOO_MANY_REQUESTS_MESSAGE: &str = "Too Many Attempts.";
pub const METHOD_NOT_ALLOWED_MESSAGE: &str = "Method not allowed.";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("resource not found")]
    NotFound,

    #[error("invalid payload: {0}")]
    Validation(ValidationErrors),

    #[error("too many requests, retry after {retry_after}s")]
    TooManyRequests { retry_after: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::NotFound(_) => Self::NotFound,
            ServiceError::Storage(detail) => Self::Internal(detail),
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn report(&self) -> ErrorReport {
        let status = self.status_code();
        match self {
            ApiError::NotFound => ErrorReport::message(status, NOT_FOUND_MESSAGE),
            ApiError::Validation(errors) => ErrorReport {
                errors: Some(errors.clone()),
                ..ErrorReport::message(status, VALIDATION_MESSAGE)
            },
            ApiError::TooManyRequests { .. } => {
                ErrorReport::message(status, TOO_MANY_REQUESTS_MESSAGE)
            }
            ApiError::Internal(detail) => ErrorReport {
                detail: Some(detail.clone()),
                ..ErrorReport::message(status, INTERNAL_MESSAGE)
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let report = self.report();
        let mut response = (report.status, Json(report.envelope(false))).into_response();
        if let ApiError::TooManyRequests { retry_after } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
        response.extensions_mut().insert(report);
        response
    }
}

/// What went wrong with a request, attached to its response for the renderer.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub status: StatusCode,
    pub message: &'static str,
    pub errors: Option<ValidationErrors>,
    pub detail: Option<String>,
}

impl ErrorReport {
    pub fn message(status: StatusCode, message: &'static str) -> Self {
        Self {
            status,
            message,
            errors: None,
            detail: None,
        }
    }

    /// Internal failures always carry an `error` key, holding the detail
    /// only in debug mode.
    pub fn envelope(&self, debug: bool) -> ErrorEnvelope {
        let error = self
            .status
            .is_server_error()
            .then(|| self.detail.clone().filter(|_| debug));
        ErrorEnvelope {
            message: self.message.to_string(),
            errors: self.errors.clone(),
            error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<ValidationErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Option<String>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorRendering {
    pub debug: bool,
}

pub async fn render_errors(
    State(rendering): State<ErrorRendering>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;

    if let Some(report) = response.extensions().get::<ErrorReport>().cloned() {
        if let Some(detail) = &report.detail {
            tracing::error!(status = %report.status, %detail, "request failed");
        }
        return rewrite(response, report.envelope(rendering.debug));
    }

    // axum answers wrong methods on known paths with an empty 405
    if response.status() == StatusCode::METHOD_NOT_ALLOWED {
        let envelope = ErrorReport::message(StatusCode::METHOD_NOT_ALLOWED, METHOD_NOT_ALLOWED_MESSAGE)
            .envelope(rendering.debug);
        return rewrite(response, envelope);
    }

    response
}

fn rewrite(response: Response, envelope: ErrorEnvelope) -> Response {
    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    (parts, Json(envelope)).into_response()
}
