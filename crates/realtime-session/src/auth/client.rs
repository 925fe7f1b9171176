//! Request adapter that attaches credentials and retries once on token expiry.

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Request, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::coordinator::TokenRefreshCoordinator;
use crate::error::Result;

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    async fn read(response: reqwest::Response) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(Self {
            status,
            headers,
            body,
        })
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// Body as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends REST requests with the live credential attached.
///
/// A 401 that looks like token expiry triggers one coalesced refresh and a single
/// retry. The second outcome is returned as-is.
#[derive(Debug, Clone)]
pub struct AuthorizedClient {
    client: Client,
    coordinator: TokenRefreshCoordinator,
}

impl AuthorizedClient {
    pub fn new(client: Client, coordinator: TokenRefreshCoordinator) -> Self {
        Self {
            client,
            coordinator,
        }
    }

    /// Start building a request with the underlying client.
    pub fn request(&self, method: Method, url: impl reqwest::IntoUrl) -> RequestBuilder {
        self.client.request(method, url)
    }

    pub fn coordinator(&self) -> &TokenRefreshCoordinator {
        &self.coordinator
    }

    /// Execute a request, refreshing the credential and retrying once if needed.
    ///
    /// If the refresh fails, the original 401 response is returned. Requests with a
    /// streaming body cannot be cloned and are never retried.
    #[instrument(skip(self, request), fields(method = %request.method(), path = %request.url().path()))]
    pub async fn send(&self, request: Request) -> Result<ApiResponse> {
        let mut retry_count = 0u32;
        let mut pending = request;

        loop {
            let retry_copy = if retry_count == 0 {
                pending.try_clone()
            } else {
                None
            };

            let request = self.coordinator.attach_authorization(pending);
            let response = ApiResponse::read(self.client.execute(request).await?).await?;

            if !self
                .coordinator
                .should_retry(retry_count, response.status, &response.body)
            {
                return Ok(response);
            }

            let Some(next) = retry_copy else {
                debug!("Request body is not cloneable; returning 401 without retry");
                return Ok(response);
            };

            match self.coordinator.force_access_token_refresh().await {
                Ok(_) => {
                    debug!("Retrying request with refreshed credential");
                    retry_count += 1;
                    pending = next;
                }
                Err(e) => {
                    warn!(error = %e, "Refresh before retry failed");
                    return Ok(response);
                }
            }
        }
    }

    /// Build and send in one step.
    pub async fn execute(&self, builder: RequestBuilder) -> Result<ApiResponse> {
        self.send(builder.build()?).await
    }
}
