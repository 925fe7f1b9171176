//! Application foreground/background handling.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::connection::RealtimeConnection;

/// Application lifecycle notifications from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppLifecycle {
    BecameActive,
    EnteredBackground,
}

/// Apply one lifecycle notification to the connection.
pub async fn handle_lifecycle(connection: &RealtimeConnection, event: AppLifecycle) {
    info!(event = ?event, "Application lifecycle change");
    match event {
        AppLifecycle::BecameActive => {
            // Failures are retried by the scheduler.
            if let Err(e) = connection.connect().await {
                debug!(error = %e, "Connect on activation failed");
            }
        }
        AppLifecycle::EnteredBackground => connection.disconnect().await,
    }
}

/// Consume lifecycle notifications until the channel closes or `cancel` fires.
pub fn spawn_lifecycle_listener(
    connection: RealtimeConnection,
    mut events: mpsc::Receiver<AppLifecycle>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => handle_lifecycle(&connection, event).await,
                    None => break,
                },
            }
        }
        debug!("Lifecycle listener stopped");
    })
}
