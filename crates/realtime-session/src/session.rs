//! Session facade.
//!
//! Builds the coordinator, connection and router explicitly and exposes the surface
//! host code works with.

use std::sync::Arc;

use reqwest::Request;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::auth::{
    ApiResponse, AuthorizedClient, HttpTokenEndpoint, SessionSignal, TokenEndpoint,
    TokenRefreshCoordinator,
};
use crate::config::SessionConfig;
use crate::credentials::{Credential, CredentialStore};
use crate::error::Result;
use crate::http_client::build_http_client;
use crate::realtime::{
    AppLifecycle, ConnectionEvent, ConnectionState, LoginState, RealtimeConnection, Transport,
    WebSocketTransport, spawn_lifecycle_listener,
};
use crate::router::{EventChannels, MessageRouter, RouterStats};

/// Collaborators a session is built from.
pub struct SessionParts {
    pub http: reqwest::Client,
    pub store: Arc<dyn CredentialStore>,
    pub endpoint: Arc<dyn TokenEndpoint>,
    pub transport: Arc<dyn Transport>,
}

/// An authenticated session with one realtime connection.
pub struct RealtimeSession {
    config: SessionConfig,
    coordinator: TokenRefreshCoordinator,
    client: AuthorizedClient,
    router: Arc<MessageRouter>,
    connection: RealtimeConnection,
    cancel: CancellationToken,
}

impl RealtimeSession {
    /// Build a session using reqwest for the refresh call and WebSocket for the channel.
    pub async fn new(config: SessionConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
        config.validate()?;
        let http = build_http_client(&config);
        let endpoint = Arc::new(HttpTokenEndpoint::new(http.clone(), &config)?);

        Self::with_parts(
            config,
            SessionParts {
                http,
                store,
                endpoint,
                transport: Arc::new(WebSocketTransport::new()),
            },
        )
        .await
    }

    /// Build a session from explicit collaborators.
    pub async fn with_parts(config: SessionConfig, parts: SessionParts) -> Result<Self> {
        config.validate()?;
        let backend_host = config.backend_host()?;

        let coordinator = TokenRefreshCoordinator::load(
            parts.endpoint,
            parts.store,
            backend_host.clone(),
            config.channel_capacity,
        )
        .await?;
        let router = Arc::new(MessageRouter::new(EventChannels::new(
            config.channel_capacity,
        )));
        let connection = RealtimeConnection::new(
            &config,
            coordinator.clone(),
            parts.transport,
            router.clone(),
        )?;
        let client = AuthorizedClient::new(parts.http, coordinator.clone());

        info!(
            backend_host = %backend_host,
            realtime_url = %config.realtime_url,
            logged_in = coordinator.is_logged_in(),
            "Realtime session created"
        );

        Ok(Self {
            config,
            coordinator,
            client,
            router,
            connection,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &TokenRefreshCoordinator {
        &self.coordinator
    }

    pub fn client(&self) -> &AuthorizedClient {
        &self.client
    }

    pub fn connection(&self) -> &RealtimeConnection {
        &self.connection
    }

    /// Typed and raw event channels.
    pub fn channels(&self) -> &EventChannels {
        self.router.channels()
    }

    pub fn router_stats(&self) -> RouterStats {
        self.router.stats()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_logged_in(&self) -> bool {
        self.coordinator.is_logged_in()
    }

    pub fn subscribe_signals(&self) -> broadcast::Receiver<SessionSignal> {
        self.coordinator.subscribe_signals()
    }

    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection.subscribe_events()
    }

    /// Open the realtime channel and keep it open.
    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    /// Close the realtime channel and stop reconnecting.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    /// Refresh the access token now.
    pub async fn force_refresh(&self) -> Result<Credential> {
        Ok(self.coordinator.force_access_token_refresh().await?)
    }

    /// Send a REST request with the live credential attached.
    pub async fn send(&self, request: Request) -> Result<ApiResponse> {
        self.client.send(request).await
    }

    /// Install credentials from a login or registration.
    pub async fn login(&self, credential: Credential) {
        self.coordinator.set_credential(credential).await;
    }

    /// Disconnect and forget the credentials.
    pub async fn logout(&self) {
        self.connection.disconnect().await;
        self.coordinator.clear_credential().await;
    }

    /// Drive the connection from host lifecycle notifications.
    pub fn spawn_lifecycle_listener(&self, events: mpsc::Receiver<AppLifecycle>) -> JoinHandle<()> {
        spawn_lifecycle_listener(self.connection.clone(), events, self.cancel.child_token())
    }

    /// Stop listeners and close the channel.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.connection.disconnect().await;
    }
}

impl std::fmt::Debug for RealtimeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeSession")
            .field("backend", &self.config.api_base_url)
            .field("connection", &self.connection)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}
