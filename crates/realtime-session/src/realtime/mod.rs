//! The persistent push channel.
//!
//! - [`RealtimeConnection`]: connection state machine, one socket at a time
//! - [`ReconnectScheduler`]: fixed-interval reconnect timer
//! - [`Transport`] / [`Socket`]: transport seam, [`WebSocketTransport`] by default
//! - [`AppLifecycle`]: foreground/background notifications from the host

mod connection;
mod lifecycle;
mod scheduler;
mod transport;

pub use connection::{
    ConnectionEvent, ConnectionState, DisconnectReason, FrameSink, RealtimeConnection,
    build_connect_url,
};
pub use lifecycle::{AppLifecycle, handle_lifecycle, spawn_lifecycle_listener};
pub use scheduler::{LoginState, ReconnectScheduler, ReconnectTarget};
pub use transport::{Socket, Transport, TransportError, WebSocketTransport};

#[cfg(test)]
pub(crate) use connection::tests as connection_tests;
