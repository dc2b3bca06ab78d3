use converge::{ConflictReason, RemoteError};
use serde::Deserialize;
use thiserror::Error;

/// Error body returned by the control plane on non-2xx responses
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("API returned error (HTTP {status}): {message}")]
    ApiError {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Authentication failed (HTTP {0})")]
    AuthError(u16),

    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    #[error("Too many requests, rate limited")]
    RateLimited,

    #[error("Service unavailable, retry later")]
    ServiceUnavailable,
}

impl ApiError {
    /// Builds an error from a status code and the raw response body
    pub fn from_response(status: u16, text: &str) -> Self {
        let body = serde_json::from_str::<ErrorBody>(text).unwrap_or_default();
        let message = body
            .message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| text.to_string());

        match status {
            401 | 403 => ApiError::AuthError(status),
            _ => ApiError::ApiError {
                status,
                code: body.code,
                message,
            },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::ApiError { status, .. } => Some(*status),
            ApiError::AuthError(status) => Some(*status),
            _ => None,
        }
    }

    /// True for errors worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited | ApiError::ServiceUnavailable | ApiError::Timeout(_)
        )
    }
}

fn is_not_empty_code(code: &str) -> bool {
    code.ends_with("NotEmpty")
}

impl From<ApiError> for RemoteError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::ApiError {
                status: 404,
                message,
                ..
            } => RemoteError::NotFound(message),
            ApiError::ApiError {
                status: 409,
                code,
                message,
            } => {
                let reason = match code {
                    Some(code) if is_not_empty_code(&code) => ConflictReason::NotEmpty,
                    Some(code) => ConflictReason::Other(code),
                    None => ConflictReason::Other("Conflict".to_string()),
                };
                RemoteError::Conflict { reason, message }
            }
            e if e.is_retryable() => RemoteError::Transient(e.to_string()),
            e => RemoteError::Fatal(e.to_string()),
        }
    }
}
