//! Authorization error types.

use thiserror::Error;

/// Errors produced by a credential refresh.
///
/// `Clone` because one refresh outcome is handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No refresh token is available - re-login required.
    #[error("Missing refresh token - re-login required")]
    MissingRefreshToken,

    /// The refresh endpoint rejected the refresh token (4xx) - re-login required.
    #[error("Refresh rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The refresh endpoint failed (5xx or unexpected status).
    #[error("Refresh failed (HTTP {status}): {message}")]
    RefreshFailed { status: u16, message: String },

    /// Network error.
    #[error("Network error: {0}")]
    Transport(String),

    /// Malformed refresh response.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The refresh task ended without producing an outcome.
    #[error("Refresh aborted: {0}")]
    Aborted(String),
}

impl AuthError {
    /// Check if this error requires manual re-login.
    pub fn requires_relogin(&self) -> bool {
        matches!(self, Self::MissingRefreshToken | Self::Rejected { .. })
    }

    /// Check if this error is transient and a later refresh may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RefreshFailed { .. } | Self::Transport(_) | Self::Parse(_) | Self::Aborted(_)
        )
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
