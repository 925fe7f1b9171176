//! Realtime session: authenticated access to a backend plus a self-healing push channel.
//!
//! This crate keeps a short-lived access credential valid across many concurrent
//! requests and maintains a single persistent realtime connection whose inbound
//! frames are fanned out to typed subscribers.
//!
//! ## Core Types
//!
//! - [`TokenRefreshCoordinator`] - Owns the live credential and coalesces refreshes
//! - [`AuthorizedClient`] - Attaches credentials to REST requests and retries once on expiry
//! - [`RealtimeConnection`] - Connection state machine for the push channel
//! - [`ReconnectScheduler`] - Fixed-interval reconnect timer
//! - [`MessageRouter`] - Parses frames and broadcasts typed events
//! - [`RealtimeSession`] - Wires all of the above together
//!
//! ## Collaborators
//!
//! - [`CredentialStore`] - Persistence for access/refresh credentials
//! - [`TokenEndpoint`] - The refresh call (`POST /v1/access_token`)
//! - [`Transport`] / [`Socket`] - The push channel transport (WebSocket by default)

pub mod auth;
pub mod config;
pub mod credentials;
pub mod error;
pub mod http_client;
pub mod realtime;
pub mod router;
pub mod session;

pub use auth::{
    ApiResponse, AuthError, AuthorizedClient, HttpTokenEndpoint, RefreshFuture, RefreshedToken,
    SessionSignal, TokenEndpoint, TokenRefreshCoordinator,
};
pub use config::SessionConfig;
pub use credentials::{Credential, CredentialStore, MemoryCredentialStore, StoreError};
pub use error::{Result, SessionError};
pub use realtime::{
    AppLifecycle, ConnectionEvent, ConnectionState, DisconnectReason, FrameSink, LoginState,
    RealtimeConnection, ReconnectScheduler, Socket, Transport, TransportError, WebSocketTransport,
};
pub use router::{EventChannels, MessageKind, MessageRouter, RouteOutcome, RouterStats, TypedEvent};
pub use session::{RealtimeSession, SessionParts};
