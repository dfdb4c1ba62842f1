use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body the service sends alongside a non-2xx status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }

    /// The server's message, or `fallback` when it sent none (or an empty one).
    pub fn message_or(&self, fallback: &str) -> String {
        self.message
            .as_deref()
            .map(str::trim)
            .filter(|message| !message.is_empty())
            .unwrap_or(fallback)
            .to_string()
    }
}

/// Failure taxonomy for calls against the fire-protocol service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiFailure {
    /// Bad credentials on login. The operator can simply retry.
    #[error("authentication failed: {message}")]
    AuthFailed { message: String },
    /// HTTP 401 on an authenticated call: the token expired or was revoked.
    #[error("session is no longer authorized")]
    Unauthorized,
    /// The server rejected the request with a business error.
    #[error("request failed: {message}")]
    Failed { message: String },
    /// Transport trouble or an unreadable reply. Safe to retry.
    #[error("network error: {reason}")]
    Network { reason: String },
}

impl ApiFailure {
    pub fn network(reason: impl Into<String>) -> Self {
        Self::Network {
            reason: reason.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthFailed {
            message: message.into(),
        }
    }
}
