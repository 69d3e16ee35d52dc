use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::auth::SessionError;

/// Outcome of a mediated request that did not produce a JSON body.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    /// The server rejected the credential. The session has already been cleared.
    #[error("Session expired - please log in again")]
    SessionExpired,

    /// The server answered with a non-2xx status other than 401.
    #[error("Request failed with status {status}: {message}")]
    Status {
        status: u16,
        /// Error body, when it was JSON
        body: Option<Value>,
        message: String,
    },

    /// The server could not be reached, or its answer could not be read.
    #[error("Transport error: {message}")]
    Transport { message: String },
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl RequestError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Pull a human-readable message out of a JSON error body.
    ///
    /// Understands `{"detail": {"error": ..}}`, `{"detail": ".."}`,
    /// `{"message": ..}` and `{"error": ..}`.
    fn message_from_json(body: &Value) -> Option<String> {
        let detail = body.get("detail");
        [
            detail.and_then(|d| d.get("error")),
            detail,
            body.get("message"),
            body.get("error"),
        ]
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(str::to_string))
    }

    pub fn from_status(status: StatusCode, body: &[u8]) -> Self {
        let parsed: Option<Value> = serde_json::from_slice(body).ok();
        let message = parsed
            .as_ref()
            .and_then(Self::message_from_json)
            .unwrap_or_else(|| {
                let text = String::from_utf8_lossy(body);
                if text.trim().is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("Unknown status")
                        .to_string()
                } else {
                    Self::truncate_body(text.trim())
                }
            });

        RequestError::Status {
            status: status.as_u16(),
            body: parsed,
            message,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        RequestError::Transport {
            message: message.into(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Status { status, .. } => Some(*status),
            RequestError::SessionExpired => Some(StatusCode::UNAUTHORIZED.as_u16()),
            RequestError::Transport { .. } => None,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, RequestError::SessionExpired)
    }
}

/// Errors from the login and signup flows.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Invalid signup: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

// ============================================================================
// Tests
// ============================================================================
