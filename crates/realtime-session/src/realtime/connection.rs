//! Realtime connection state machine.
//!
//! One socket at a time. Every connect attempt and every socket carries an epoch;
//! a `disconnect()` bumps the epoch so attempts that were suspended and readers of
//! retired sockets can no longer change the state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

use super::scheduler::{ReconnectScheduler, ReconnectTarget};
use super::transport::{Socket, Transport};
use crate::auth::TokenRefreshCoordinator;
use crate::config::SessionConfig;
use crate::error::Result;

/// Lifecycle state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Why the push channel went down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DisconnectReason {
    /// `disconnect()` was called.
    Requested,
    /// The server closed the channel.
    ServerClosed,
    /// The transport failed.
    Error(String),
}

/// Connected/disconnected notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    Connected,
    Disconnected { reason: DisconnectReason },
}

/// Receives inbound text frames in arrival order.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: &str);
}

/// Append `app_id` and `token` to the realtime URL, keeping other query pairs.
pub fn build_connect_url(base: &Url, app_id: &str, access_token: &str) -> Url {
    let mut url = base.clone();
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| key != "app_id" && key != "token")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    url.set_query(None);
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in &kept {
            query.append_pair(key, value);
        }
        query.append_pair("app_id", app_id);
        query.append_pair("token", access_token);
    }
    url
}

struct ActiveSocket {
    epoch: u64,
    token: CancellationToken,
    reader: JoinHandle<()>,
}

struct ConnState {
    state: ConnectionState,
    epoch: u64,
    auto_reconnect: bool,
    active: Option<ActiveSocket>,
}

struct Shared {
    realtime_url: Url,
    app_id: String,
    disconnect_timeout: Duration,
    coordinator: TokenRefreshCoordinator,
    transport: Arc<dyn Transport>,
    scheduler: ReconnectScheduler,
    sink: Arc<dyn FrameSink>,
    events: broadcast::Sender<ConnectionEvent>,
    state: Mutex<ConnState>,
}

/// Owns the push channel socket and its lifecycle.
///
/// Cheap to clone; all clones drive the same connection.
#[derive(Clone)]
pub struct RealtimeConnection {
    shared: Arc<Shared>,
}

impl RealtimeConnection {
    pub fn new(
        config: &SessionConfig,
        coordinator: TokenRefreshCoordinator,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn FrameSink>,
    ) -> Result<Self> {
        let scheduler =
            ReconnectScheduler::new(config.reconnect_interval(), Arc::new(coordinator.clone()));
        let (events, _) = broadcast::channel(config.channel_capacity.max(1));

        Ok(Self {
            shared: Arc::new(Shared {
                realtime_url: config.realtime_url()?,
                app_id: config.app_id.clone(),
                disconnect_timeout: config.disconnect_timeout(),
                coordinator,
                transport,
                scheduler,
                sink,
                events,
                state: Mutex::new(ConnState {
                    state: ConnectionState::Disconnected,
                    epoch: 0,
                    auto_reconnect: false,
                    active: None,
                }),
            }),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn auto_reconnect(&self) -> bool {
        self.shared.state.lock().auto_reconnect
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.shared.state.lock().auto_reconnect = enabled;
    }

    pub fn scheduler(&self) -> &ReconnectScheduler {
        &self.shared.scheduler
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Open the push channel and keep it open.
    ///
    /// Enables auto-reconnect. No-op if already connected or connecting. Resolves once
    /// the transport handshake completed, or with the error of this attempt.
    pub async fn connect(&self) -> Result<()> {
        self.set_auto_reconnect(true);
        self.connect_attempt(false).await
    }

    #[instrument(skip(self), fields(url = %self.shared.realtime_url))]
    async fn connect_attempt(&self, from_scheduler: bool) -> Result<()> {
        let epoch = {
            let mut st = self.shared.state.lock();
            if st.state != ConnectionState::Disconnected {
                debug!(state = ?st.state, "Connect ignored");
                return Ok(());
            }
            st.state = ConnectionState::Connecting;
            st.epoch += 1;
            st.epoch
        };

        match self.open_socket(epoch).await {
            Ok(None) => {
                debug!(epoch, "Disconnected while refreshing; not opening socket");
                Ok(())
            }
            Ok(Some(socket)) => {
                if self.install(epoch, socket).await {
                    self.shared.scheduler.reset();
                    info!(epoch, "Realtime channel connected");
                    let _ = self.shared.events.send(ConnectionEvent::Connected);
                }
                Ok(())
            }
            Err(e) => {
                let auto_reconnect = {
                    let mut st = self.shared.state.lock();
                    if st.epoch != epoch {
                        return Err(e);
                    }
                    st.state = ConnectionState::Disconnected;
                    st.auto_reconnect
                };
                warn!(epoch, error = %e, "Realtime connect failed");
                if auto_reconnect && !from_scheduler && !e.requires_relogin() {
                    self.shared.scheduler.schedule(Arc::new(self.clone()));
                }
                Err(e)
            }
        }
    }

    /// Refresh, then open the transport unless the attempt went stale meanwhile.
    async fn open_socket(&self, epoch: u64) -> Result<Option<Box<dyn Socket>>> {
        let credential = self.shared.coordinator.force_access_token_refresh().await?;
        if self.shared.state.lock().epoch != epoch {
            return Ok(None);
        }
        let url = build_connect_url(
            &self.shared.realtime_url,
            &self.shared.app_id,
            &credential.access_token,
        );
        Ok(Some(self.shared.transport.open(&url).await?))
    }

    /// Make `socket` the active one. Returns `false` if the attempt went stale.
    async fn install(&self, epoch: u64, mut socket: Box<dyn Socket>) -> bool {
        {
            let mut st = self.shared.state.lock();
            if st.epoch == epoch {
                if let Some(previous) = st.active.take() {
                    previous.token.cancel();
                }
                let token = CancellationToken::new();
                let reader = tokio::spawn(read_loop(
                    Arc::clone(&self.shared),
                    epoch,
                    socket,
                    token.clone(),
                ));
                st.active = Some(ActiveSocket {
                    epoch,
                    token,
                    reader,
                });
                st.state = ConnectionState::Connected;
                return true;
            }
        }

        debug!(epoch, "Connect attempt superseded; discarding socket");
        if let Err(e) = socket.close().await {
            debug!(error = %e, "Failed to close superseded socket");
        }
        false
    }

    /// Close the push channel and stop reconnecting.
    ///
    /// Always emits [`ConnectionEvent::Disconnected`] within the disconnect timeout,
    /// whether or not the transport acknowledges the close.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        self.shared.scheduler.cancel();
        let active = {
            let mut st = self.shared.state.lock();
            st.auto_reconnect = false;
            st.epoch += 1;
            st.state = ConnectionState::Disconnected;
            st.active.take()
        };

        if let Some(active) = active {
            active.token.cancel();
            let abort = active.reader.abort_handle();
            match tokio::time::timeout(self.shared.disconnect_timeout, active.reader).await {
                Ok(_) => debug!(epoch = active.epoch, "Socket closed"),
                Err(_) => {
                    warn!(
                        timeout_ms = self.shared.disconnect_timeout.as_millis() as u64,
                        "Socket close not acknowledged in time; abandoning it"
                    );
                    abort.abort();
                }
            }
        }

        info!("Realtime channel disconnected");
        let _ = self.shared.events.send(ConnectionEvent::Disconnected {
            reason: DisconnectReason::Requested,
        });
    }
}

#[async_trait]
impl ReconnectTarget for RealtimeConnection {
    fn is_connected(&self) -> bool {
        RealtimeConnection::is_connected(self)
    }

    async fn attempt_connect(&self) -> bool {
        match self.connect_attempt(true).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Scheduled reconnect attempt failed");
                !e.requires_relogin()
            }
        }
    }
}

impl std::fmt::Debug for RealtimeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.shared.state.lock();
        f.debug_struct("RealtimeConnection")
            .field("state", &st.state)
            .field("epoch", &st.epoch)
            .field("auto_reconnect", &st.auto_reconnect)
            .finish()
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    epoch: u64,
    mut socket: Box<dyn Socket>,
    token: CancellationToken,
) {
    let reason = loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                if let Err(e) = socket.close().await {
                    debug!(epoch, error = %e, "Socket close failed");
                }
                return;
            }
            frame = socket.next_frame() => match frame {
                Ok(Some(text)) => {
                    trace!(epoch, len = text.len(), "Frame received");
                    shared.sink.on_frame(&text);
                }
                Ok(None) => break DisconnectReason::ServerClosed,
                Err(e) => break DisconnectReason::Error(e.to_string()),
            }
        }
    };

    on_unexpected_close(&shared, epoch, reason);
}

fn on_unexpected_close(shared: &Arc<Shared>, epoch: u64, reason: DisconnectReason) {
    let auto_reconnect = {
        let mut st = shared.state.lock();
        if !st.active.as_ref().is_some_and(|a| a.epoch == epoch) {
            return;
        }
        st.active = None;
        st.state = ConnectionState::Disconnected;
        st.auto_reconnect
    };

    warn!(epoch, reason = ?reason, auto_reconnect, "Realtime channel lost");
    let _ = shared.events.send(ConnectionEvent::Disconnected { reason });

    if auto_reconnect {
        let connection = RealtimeConnection {
            shared: Arc::clone(shared),
        };
        shared.scheduler.schedule(Arc::new(connection));
    }
}
