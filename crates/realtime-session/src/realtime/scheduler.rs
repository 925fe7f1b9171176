//! Reconnect timing.
//!
//! The first attempt after a disconnect fires immediately; every later attempt waits a
//! fixed interval. Only one timer is ever live: arming a new one cancels the previous.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Answers whether the user currently holds credentials.
pub trait LoginState: Send + Sync {
    fn is_logged_in(&self) -> bool;
}

/// The thing being reconnected.
#[async_trait]
pub trait ReconnectTarget: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Run one connection attempt to completion.
    ///
    /// Returns `false` when further attempts cannot succeed (credentials rejected).
    async fn attempt_connect(&self) -> bool;
}

struct Timer {
    id: u64,
    token: CancellationToken,
}

struct SchedulerState {
    attempt: u32,
    timer: Option<Timer>,
}

struct SchedulerInner {
    interval: Duration,
    login: Arc<dyn LoginState>,
    state: Mutex<SchedulerState>,
    next_timer_id: AtomicU64,
}

/// Fixed-interval reconnect timer.
#[derive(Clone)]
pub struct ReconnectScheduler {
    inner: Arc<SchedulerInner>,
}

impl ReconnectScheduler {
    pub fn new(interval: Duration, login: Arc<dyn LoginState>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                interval,
                login,
                state: Mutex::new(SchedulerState {
                    attempt: 0,
                    timer: None,
                }),
                next_timer_id: AtomicU64::new(1),
            }),
        }
    }

    /// Delay the next armed timer would use.
    pub fn next_delay(&self) -> Duration {
        Self::delay_for(self.inner.state.lock().attempt, self.inner.interval)
    }

    fn delay_for(attempt: u32, interval: Duration) -> Duration {
        if attempt == 0 { Duration::ZERO } else { interval }
    }

    /// Number of attempts since the last confirmed connection.
    pub fn attempt(&self) -> u32 {
        self.inner.state.lock().attempt
    }

    /// Check if a timer is pending or its attempt is running.
    pub fn is_armed(&self) -> bool {
        self.inner.state.lock().timer.is_some()
    }

    /// Arm the timer for the next attempt, replacing any pending one.
    ///
    /// Returns `false` without arming when the user is logged out.
    pub fn schedule(&self, target: Arc<dyn ReconnectTarget>) -> bool {
        if !self.inner.login.is_logged_in() {
            debug!("Not logged in; reconnect not scheduled");
            self.cancel();
            return false;
        }

        let id = self.inner.next_timer_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let (attempt, delay) = {
            let mut state = self.inner.state.lock();
            if let Some(previous) = state.timer.take() {
                previous.token.cancel();
            }
            state.timer = Some(Timer {
                id,
                token: token.clone(),
            });
            (
                state.attempt,
                Self::delay_for(state.attempt, self.inner.interval),
            )
        };

        info!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );

        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            scheduler.tick(id, token, target).await;
        });
        true
    }

    async fn tick(&self, id: u64, token: CancellationToken, target: Arc<dyn ReconnectTarget>) {
        if target.is_connected() {
            debug!("Already connected; reconnect tick skipped");
            self.release(id);
            return;
        }

        let attempt = {
            let mut state = self.inner.state.lock();
            state.attempt += 1;
            state.attempt
        };
        debug!(attempt, "Reconnect attempt");

        let keep_trying = target.attempt_connect().await;

        if token.is_cancelled() {
            return;
        }
        self.release(id);
        if target.is_connected() {
            return;
        }
        if keep_trying {
            self.schedule(target);
        } else {
            info!(attempt, "Reconnect stopped");
        }
    }

    fn release(&self, id: u64) {
        let mut state = self.inner.state.lock();
        if state.timer.as_ref().is_some_and(|t| t.id == id) {
            state.timer = None;
        }
    }

    /// Confirmed connection: counter back to zero, pending timer dropped.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        state.attempt = 0;
        if let Some(timer) = state.timer.take() {
            timer.token.cancel();
        }
    }

    /// Drop the pending timer. A cancelled attempt never re-arms.
    pub fn cancel(&self) {
        if let Some(timer) = self.inner.state.lock().timer.take() {
            debug!("Pending reconnect cancelled");
            timer.token.cancel();
        }
    }
}

impl std::fmt::Debug for ReconnectScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ReconnectScheduler")
            .field("interval", &self.inner.interval)
            .field("attempt", &state.attempt)
            .field("armed", &state.timer.is_some())
            .finish()
    }
}
