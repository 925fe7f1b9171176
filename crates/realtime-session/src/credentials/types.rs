//! Core credential type.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token type assumed when the backend does not report one.
pub const DEFAULT_TOKEN_TYPE: &str = "bearer";

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

/// Access and refresh credentials for the configured backend.
///
/// Only the refresh coordinator mutates the live value; everyone else reads a clone.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Short-lived bearer token attached to requests and the realtime URL.
    #[serde(default)]
    pub access_token: String,
    /// Long-lived token used to obtain a new access token.
    #[serde(default)]
    pub refresh_token: String,
    /// Token type reported by the backend (e.g. "bearer").
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// When the access token expires, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl Credential {
    /// Create a credential from an access/refresh pair.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            token_type: default_token_type(),
            expiry: None,
        }
    }

    /// A credential with no tokens (logged out).
    pub fn empty() -> Self {
        Self::new("", "")
    }

    /// Check if an access token is available.
    #[inline]
    pub fn has_access_token(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// Check if a refresh token is available.
    #[inline]
    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

impl Default for Credential {
    fn default() -> Self {
        Self::empty()
    }
}

fn redact(token: &str) -> &'static str {
    if token.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("token_type", &self.token_type)
            .field("expiry", &self.expiry)
            .finish()
    }
}
