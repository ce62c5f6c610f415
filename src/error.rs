//! # Error Handling
//!
//! [`ServiceError`] is the domain taxonomy shared by the sync orchestrator,
//! the file proxy and the connection service. [`ApiError`] is its HTTP
//! rendering: a problem+json body carrying the request's trace id.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::crypto::CipherError;
use crate::moodle::MoodleError;
use crate::telemetry;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Trace id of the current request, or a short correlation id outside one
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        (self.status, headers, axum::Json(self)).into_response()
    }
}

/// Errors produced by the sync, proxy and connection operations.
///
/// Messages never carry token plaintext or key material.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("connection not found")]
    ConnectionNotFound,

    #[error("module {0} not found")]
    ModuleNotFound(i64),

    #[error("assignment {0} not found")]
    AssignmentNotFound(i64),

    #[error("connection belongs to another user")]
    Forbidden,

    #[error("stored token could not be decrypted")]
    TokenDecryptionFailed(#[source] CipherError),

    #[error("Moodle rejected the supplied credentials")]
    CredentialsRejected(String),

    #[error("Moodle rejected the stored token")]
    InvalidToken(String),

    #[error("Moodle request failed: {0}")]
    Upstream(#[source] MoodleError),

    #[error("file download failed with upstream status {status}")]
    UpstreamFetchFailed {
        status: u16,
        body_snippet: Option<String>,
    },

    #[error("module has no downloadable file")]
    NoFileUrl,

    #[error("{0}")]
    Validation(String),

    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("token could not be encrypted")]
    Encryption(#[source] CipherError),
}

impl ServiceError {
    /// Machine-readable code, also used as the problem+json `code`.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::ConnectionNotFound
            | ServiceError::ModuleNotFound(_)
            | ServiceError::AssignmentNotFound(_) => "NOT_FOUND",
            ServiceError::Forbidden => "FORBIDDEN",
            ServiceError::TokenDecryptionFailed(_) => "TOKEN_DECRYPTION_FAILED",
            ServiceError::CredentialsRejected(_) => "CREDENTIALS_REJECTED",
            ServiceError::InvalidToken(_) => "INVALID_TOKEN",
            ServiceError::Upstream(_) => "UPSTREAM_ERROR",
            ServiceError::UpstreamFetchFailed { .. } => "UPSTREAM_FETCH_FAILED",
            ServiceError::NoFileUrl | ServiceError::Validation(_) => "VALIDATION_FAILED",
            ServiceError::Timeout(_) => "SYNC_TIMEOUT",
            ServiceError::Database(_) | ServiceError::Encryption(_) => "DATABASE_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::ConnectionNotFound
            | ServiceError::ModuleNotFound(_)
            | ServiceError::AssignmentNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Forbidden => StatusCode::FORBIDDEN,
            ServiceError::TokenDecryptionFailed(_)
            | ServiceError::Database(_)
            | ServiceError::Encryption(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::CredentialsRejected(_) | ServiceError::InvalidToken(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServiceError::Upstream(_) | ServiceError::UpstreamFetchFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
            ServiceError::NoFileUrl | ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// True when the stored token should be treated as dead.
    pub fn is_token_rejection(&self) -> bool {
        match self {
            ServiceError::InvalidToken(_) => true,
            ServiceError::Upstream(err) => err.is_token_rejection(),
            _ => false,
        }
    }

    /// Classify a Moodle client failure on a call made with a stored token.
    pub fn from_stored_token_call(err: MoodleError) -> Self {
        match err {
            MoodleError::InvalidToken(msg) => ServiceError::InvalidToken(msg),
            MoodleError::Exception { errorcode, message } if is_rejection_code(&errorcode) => {
                ServiceError::InvalidToken(format!("{errorcode}: {message}"))
            }
            MoodleError::Http { status, .. } if matches!(status, 401 | 403) => {
                ServiceError::InvalidToken(format!("HTTP {status}"))
            }
            other => ServiceError::Upstream(other),
        }
    }
}

fn is_rejection_code(errorcode: &str) -> bool {
    MoodleError::Exception {
        errorcode: errorcode.to_string(),
        message: String::new(),
    }
    .is_token_rejection()
}

impl From<MoodleError> for ServiceError {
    fn from(err: MoodleError) -> Self {
        match err {
            MoodleError::CredentialsRejected(msg) => ServiceError::CredentialsRejected(msg),
            MoodleError::InvalidToken(msg) => ServiceError::InvalidToken(msg),
            other => ServiceError::Upstream(other),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        let status = error.status();
        let code = error.code();

        match &error {
            ServiceError::TokenDecryptionFailed(cause) => {
                tracing::error!(
                    error.kind = "token_decryption_failed",
                    cause = cause.kind(),
                    "stored token could not be decrypted"
                );
            }
            ServiceError::Database(db_err) => {
                tracing::error!(error.kind = "database", ?db_err, "database error");
            }
            ServiceError::Encryption(cause) => {
                tracing::error!(error.kind = "encryption", cause = cause.kind(), "token sealing failed");
            }
            ServiceError::Upstream(upstream) => {
                tracing::warn!(error.kind = upstream.kind(), error = %upstream, "upstream failure");
            }
            _ => tracing::debug!(error.kind = code, error = %error, "request failed"),
        }

        match error {
            ServiceError::UpstreamFetchFailed {
                status: upstream_status,
                body_snippet,
            } => ApiError::new(
                status,
                code,
                format!("Upstream file fetch failed with status {upstream_status}"),
            )
            .with_details(serde_json::json!({
                "status": upstream_status,
                "body_snippet": body_snippet,
            })),
            ServiceError::Upstream(MoodleError::Http {
                status: upstream_status,
                body,
            }) => ApiError::new(
                status,
                code,
                format!("Moodle responded with HTTP {upstream_status}"),
            )
            .with_details(serde_json::json!({
                "status": upstream_status,
                "body_snippet": body,
            })),
            ServiceError::Database(_) => ApiError::new(status, code, "Database error occurred"),
            ServiceError::Encryption(_) => ApiError::new(status, code, "Token storage failed"),
            other => ApiError::new(status, code, other.to_string()),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            format!("Invalid query string: {}", rejection.body_text()),
        )
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        ServiceError::Database(error).into()
    }
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}
