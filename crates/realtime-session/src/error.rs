//! Crate-level error type.

use thiserror::Error;

use crate::auth::AuthError;
use crate::credentials::StoreError;
use crate::realtime::TransportError;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors surfaced by the session API.
///
/// Token and connection conditions that only matter to observers are delivered
/// through event channels instead; this type covers what a direct caller can act on.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Credential refresh failed or was rejected.
    #[error("Authorization error: {0}")]
    Auth(#[from] AuthError),

    /// Realtime transport failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Outbound HTTP request failed before a response was received.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Credential persistence failed.
    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SessionError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check if this error requires the user to log in again.
    pub fn requires_relogin(&self) -> bool {
        matches!(self, Self::Auth(e) if e.requires_relogin())
    }
}

impl From<url::ParseError> for SessionError {
    fn from(err: url::ParseError) -> Self {
        Self::Config(format!("Invalid URL: {err}"))
    }
}
