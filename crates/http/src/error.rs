//! Gateway error types

use blogx_core::CoreError;
use thiserror::Error;

/// Errors surfaced by the gateway.
///
/// `Clone` so that a single refresh outcome can be handed to every waiter.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Endpoint requires a credential and none is held; no request was sent
    #[error("Authentication required")]
    Unauthenticated,

    /// Proactive refresh failed before the request was sent
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// The server rejected the credential and it could not be renewed
    #[error("Session expired")]
    SessionExpired,

    /// Server returned a non-success status unrelated to authentication
    #[error("API error {status}: {body}")]
    ApiError { status: u16, body: String },

    /// Transport failure, including timeouts
    #[error("Network error: {0}")]
    Network(String),

    /// Request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Response body did not match the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Session storage failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl GatewayError {
    /// Create an API error from an HTTP status and body
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        Self::ApiError {
            status: status.as_u16(),
            body,
        }
    }

    /// HTTP status for `ApiError`
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the error ended (or never had) a session
    pub const fn is_session_error(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated | Self::RefreshFailed(_) | Self::SessionExpired
        )
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else if err.is_timeout() {
            Self::Network(format!("request timed out: {err}"))
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<CoreError> for GatewayError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidConfig { message } => Self::Configuration(message),
            other => Self::Storage(other.to_string()),
        }
    }
}

/// Result type for gateway operations
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;
