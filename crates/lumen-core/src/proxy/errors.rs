//! User-visible failure taxonomy and its HTTP mapping.

use thiserror::Error;

/// Terminal errors surfaced by the proxy core.
///
/// Every variant maps to an HTTP status and a message safe to show clients;
/// anything carrying internal detail is collapsed at the adapter boundary.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no route for method {0}")]
    NoRouteForMethod(String),

    #[error("no available targets")]
    NoAvailableTargets,

    #[error("attempts exceeded")]
    AttemptsExceeded,

    #[error("client closed request")]
    Cancelled,

    #[error("gateway timeout")]
    DeadlineExceeded,

    #[error("supplied content type is not allowed. Content-Type: application/json is required")]
    InvalidContentType,

    #[error("chain not supported")]
    ChainUnsupported,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Anything with internal detail; sanitized before leaving the adapter.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Non-standard status for a client that closed the connection, used by
/// common proxies in place of a misleading 5xx.
pub const STATUS_CLIENT_CLOSED_REQUEST: u16 = 499;

impl ProxyError {
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NoRouteForMethod(_) | Self::NoAvailableTargets => 503,
            Self::AttemptsExceeded | Self::Internal(_) => 500,
            Self::Cancelled => STATUS_CLIENT_CLOSED_REQUEST,
            Self::DeadlineExceeded => 504,
            Self::InvalidContentType => 415,
            Self::ChainUnsupported => 400,
            Self::InvalidRequest(_) => 400,
        }
    }

    /// Message safe to return to the client.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::NoRouteForMethod(_) | Self::NoAvailableTargets => {
                "no available targets".to_string()
            }
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}
