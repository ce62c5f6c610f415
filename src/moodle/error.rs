use thiserror::Error;

/// Maximum number of characters of an upstream body kept in errors.
pub const BODY_SNIPPET_LIMIT: usize = 200;

/// Moodle exception codes that mean the token (or the credentials behind it)
/// is no longer usable.
const TOKEN_REJECTION_CODES: &[&str] = &["invalidtoken", "accessexception", "invalidlogin"];

/// Errors from the Moodle web service client.
///
/// Transport failures, non-2xx responses and upstream exception payloads are
/// separate variants so callers can decide what each one means.
#[derive(Debug, Error)]
pub enum MoodleError {
    #[error("network error talking to Moodle: {0}")]
    Network(String),

    #[error("Moodle responded with HTTP {status}")]
    Http { status: u16, body: Option<String> },

    #[error("Moodle exception {errorcode}: {message}")]
    Exception { errorcode: String, message: String },

    #[error("Moodle rejected the credentials: {0}")]
    CredentialsRejected(String),

    #[error("Moodle rejected the token: {0}")]
    InvalidToken(String),

    #[error("unexpected Moodle response: {0}")]
    MalformedResponse(String),
}

impl MoodleError {
    /// True when the failure means the stored token should be considered dead.
    pub fn is_token_rejection(&self) -> bool {
        match self {
            MoodleError::CredentialsRejected(_) | MoodleError::InvalidToken(_) => true,
            MoodleError::Exception { errorcode, .. } => {
                TOKEN_REJECTION_CODES.contains(&errorcode.as_str())
            }
            MoodleError::Http { status, .. } => matches!(status, 401 | 403),
            MoodleError::Network(_) | MoodleError::MalformedResponse(_) => false,
        }
    }

    /// Machine-readable kind for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            MoodleError::Network(_) => "network",
            MoodleError::Http { .. } => "http",
            MoodleError::Exception { .. } => "exception",
            MoodleError::CredentialsRejected(_) => "credentials_rejected",
            MoodleError::InvalidToken(_) => "invalid_token",
            MoodleError::MalformedResponse(_) => "malformed_response",
        }
    }
}

impl From<reqwest::Error> for MoodleError {
    fn from(err: reqwest::Error) -> Self {
        // File URLs carry the token in their query string
        let err = err.without_url();
        if err.is_timeout() {
            MoodleError::Network(format!("request timed out: {err}"))
        } else if err.is_decode() {
            MoodleError::MalformedResponse(err.to_string())
        } else {
            MoodleError::Network(err.to_string())
        }
    }
}

const REDACTED: &str = "[REDACTED]";

/// Truncate `body` to [`BODY_SNIPPET_LIMIT`] characters.
pub fn truncate_body(body: &str) -> String {
    if body.chars().count() > BODY_SNIPPET_LIMIT {
        let truncated: String = body.chars().take(BODY_SNIPPET_LIMIT).collect();
        format!("{truncated}...")
    } else {
        body.to_string()
    }
}

/// Upstream body for error reporting: token scrubbed, then truncated.
pub fn redact_snippet(body: &str, token: &str) -> String {
    let scrubbed = if token.is_empty() {
        body.to_string()
    } else {
        body.replace(token, REDACTED)
    };
    truncate_body(&scrubbed)
}
