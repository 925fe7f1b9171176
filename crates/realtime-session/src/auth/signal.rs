use chrono::{DateTime, Utc};

/// Session-wide credential outcomes, broadcast to the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    /// A refresh produced a new access token.
    Refreshed {
        expiry: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },
    /// A refresh failed transiently; the next request or connect attempt may retry.
    RefreshFailed {
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// The refresh token is missing or was rejected. The host should prompt for login.
    ReauthorizationRequired {
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl SessionSignal {
    /// Check if this signal requires the user to log in again.
    #[inline]
    pub fn requires_relogin(&self) -> bool {
        matches!(self, Self::ReauthorizationRequired { .. })
    }
}
