//! Access credential lifecycle.
//!
//! # Architecture
//!
//! - [`TokenRefreshCoordinator`]: Owns the live credential; single-flight refresh
//! - [`TokenEndpoint`]: The refresh call; [`HttpTokenEndpoint`] is the reqwest implementation
//! - [`AuthorizedClient`]: Request adapter that attaches credentials and retries once
//! - [`SessionSignal`]: Session-wide outcomes (refreshed, reauthorization required)

mod client;
mod coordinator;
mod endpoint;
mod error;
mod retry;
mod signal;

pub use client::{ApiResponse, AuthorizedClient};
pub use coordinator::{RefreshFuture, TokenRefreshCoordinator};
pub use endpoint::{ACCESS_TOKEN_PATH, HttpTokenEndpoint, RefreshedToken, TokenEndpoint};
pub use error::AuthError;
pub use retry::{is_auth_failure_body, should_retry};
pub use signal::SessionSignal;
