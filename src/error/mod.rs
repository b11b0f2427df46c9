//! HTTP error envelope
//!
//! Every rejection leaves the server as `{"error": {"code", "message",
//! "details"}}`. Ledger rejections use their own kind as `code` so clients
//! can branch on `AMOUNT_EXCEEDS_PRINCIPAL`, `RETURN_NOT_YET_DUE` and so on.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::ledger::{ErrorClass, LedgerError};
use crate::payments::PaymentError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Invalid request body")]
    Validation(#[from] validator::ValidationErrors),

    #[error("{0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::TooManyRequests(_) => "TOO_MANY_REQUESTS",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::Gateway(_) => "GATEWAY_ERROR",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::Ledger(err) => err.kind(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Gateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Ledger(err) => match err.class() {
                ErrorClass::Validation => StatusCode::BAD_REQUEST,
                ErrorClass::Conflict => StatusCode::CONFLICT,
                ErrorClass::NotFound => StatusCode::NOT_FOUND,
                ErrorClass::Storage => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Offending fields for body validation failures; storage failures
    /// say the request can be retried
    fn details(&self) -> Option<String> {
        match self {
            ApiError::Validation(errors) => {
                let mut fields: Vec<&str> = errors.field_errors().keys().copied().collect();
                fields.sort_unstable();
                Some(format!("invalid fields: {}", fields.join(", ")))
            }
            ApiError::Ledger(err) if err.class() == ErrorClass::Storage => {
                Some("nothing was written; the request may be retried".to_string())
            }
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(error = %message, code, "Request failed");
        } else {
            tracing::debug!(error = %message, code, "Request rejected");
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code: code.to_string(),
                details: self.details(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Ledger(e) => ApiError::Ledger(e),
            PaymentError::Gateway(e) => ApiError::Gateway(e.to_string()),
            PaymentError::SessionNotFound(id) => {
                ApiError::NotFound(format!("Payment session {}", id))
            }
            e @ PaymentError::Throttled(_) => ApiError::TooManyRequests(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("Invalid JSON: {}", err))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
