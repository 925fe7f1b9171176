//! The access token refresh call.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::error::AuthError;
use crate::config::SessionConfig;
use crate::error::Result;

/// Path of the refresh endpoint on the REST backend.
pub const ACCESS_TOKEN_PATH: &str = "/v1/access_token";

/// Longest error body kept in an [`AuthError`] message.
const MAX_ERROR_BODY_LEN: usize = 256;

/// Result of a successful refresh call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    /// New access token.
    pub access_token: String,
    /// Rotated refresh token, if the backend issued one.
    pub refresh_token: Option<String>,
    /// Token type, if reported.
    pub token_type: Option<String>,
    /// Expiry of the new access token, if known.
    pub expiry: Option<DateTime<Utc>>,
}

impl RefreshedToken {
    /// Create a refreshed token carrying only an access token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: None,
            expiry: None,
        }
    }
}

/// Performs the network refresh call.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchange a refresh token for a new access token.
    async fn refresh(&self, refresh_token: &str) -> std::result::Result<RefreshedToken, AuthError>;
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl AccessTokenResponse {
    fn into_refreshed(self, now: DateTime<Utc>) -> RefreshedToken {
        let expiry = self.expires_at.or_else(|| {
            let secs = self.expires_in?;
            let expiry = TimeDelta::try_seconds(secs).and_then(|ttl| now.checked_add_signed(ttl));
            if expiry.is_none() {
                warn!(expires_in = secs, "expires_in out of range; treating token as non-expiring");
            }
            expiry
        });

        RefreshedToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            token_type: self.token_type,
            expiry,
        }
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY_LEN {
        let mut end = MAX_ERROR_BODY_LEN;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

/// `POST /v1/access_token` over reqwest.
#[derive(Debug, Clone)]
pub struct HttpTokenEndpoint {
    client: Client,
    url: Url,
    app_id: String,
}

impl HttpTokenEndpoint {
    /// Create an endpoint for the backend described by `config`.
    pub fn new(client: Client, config: &SessionConfig) -> Result<Self> {
        let url = config.api_base_url()?.join(ACCESS_TOKEN_PATH)?;
        Ok(Self {
            client,
            url,
            app_id: config.app_id.clone(),
        })
    }

    /// Full URL of the refresh call.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn refresh(&self, refresh_token: &str) -> std::result::Result<RefreshedToken, AuthError> {
        let response = self
            .client
            .post(self.url.clone())
            .header("App-Id", &self.app_id)
            .bearer_auth(refresh_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = truncate_body(response.text().await.unwrap_or_default());
            return Err(if status.is_client_error() {
                AuthError::Rejected {
                    status: status.as_u16(),
                    message,
                }
            } else {
                AuthError::RefreshFailed {
                    status: status.as_u16(),
                    message,
                }
            });
        }

        let body: AccessTokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Parse(e.to_string()))?;

        if body.access_token.is_empty() {
            return Err(AuthError::Parse("Empty access_token in response".to_string()));
        }

        let refreshed = body.into_refreshed(Utc::now());
        debug!(
            expiry = ?refreshed.expiry,
            rotated = refreshed.refresh_token.is_some(),
            "Access token refresh response"
        );
        Ok(refreshed)
    }
}
