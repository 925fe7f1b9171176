//! Single-flight credential refresh.
//!
//! The coordinator owns the live [`Credential`]. Any number of callers may ask for a
//! refresh at the same time; only the first one issues a network call, every other
//! caller awaits a clone of the same shared future and observes the same outcome.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Request, StatusCode};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use super::endpoint::TokenEndpoint;
use super::error::AuthError;
use super::retry;
use super::signal::SessionSignal;
use crate::credentials::{Credential, CredentialStore};
use crate::error::Result;
use crate::realtime::LoginState;

/// A coalesced refresh attempt. Cloning it adds a waiter.
pub type RefreshFuture = Shared<BoxFuture<'static, std::result::Result<Credential, AuthError>>>;

struct InFlight {
    id: u64,
    future: RefreshFuture,
}

struct State {
    credential: Credential,
    /// Bumped on every write so a refresh never overwrites a newer external value.
    revision: u64,
    in_flight: Option<InFlight>,
}

struct Inner {
    state: Mutex<State>,
    endpoint: Arc<dyn TokenEndpoint>,
    store: Arc<dyn CredentialStore>,
    backend_host: String,
    signals: broadcast::Sender<SessionSignal>,
    refresh_calls: AtomicU64,
    next_refresh_id: AtomicU64,
}

/// Owns the live credential and coalesces refreshes.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct TokenRefreshCoordinator {
    inner: Arc<Inner>,
}

impl TokenRefreshCoordinator {
    /// Create a coordinator with an empty (logged out) credential.
    pub fn new(
        endpoint: Arc<dyn TokenEndpoint>,
        store: Arc<dyn CredentialStore>,
        backend_host: impl Into<String>,
        signal_capacity: usize,
    ) -> Self {
        let (signals, _) = broadcast::channel(signal_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    credential: Credential::empty(),
                    revision: 0,
                    in_flight: None,
                }),
                endpoint,
                store,
                backend_host: backend_host.into().to_ascii_lowercase(),
                signals,
                refresh_calls: AtomicU64::new(0),
                next_refresh_id: AtomicU64::new(1),
            }),
        }
    }

    /// Create a coordinator seeded from the credential store.
    pub async fn load(
        endpoint: Arc<dyn TokenEndpoint>,
        store: Arc<dyn CredentialStore>,
        backend_host: impl Into<String>,
        signal_capacity: usize,
    ) -> Result<Self> {
        let stored = store.load().await?;
        let coordinator = Self::new(endpoint, store, backend_host, signal_capacity);

        if let Some(credential) = stored {
            debug!(
                has_refresh_token = credential.has_refresh_token(),
                expiry = ?credential.expiry,
                "Loaded stored credential"
            );
            let mut state = coordinator.inner.state.lock();
            state.credential = credential;
            state.revision += 1;
        }
        Ok(coordinator)
    }

    /// Snapshot of the live credential.
    pub fn credential(&self) -> Credential {
        self.inner.state.lock().credential.clone()
    }

    /// Install a credential obtained outside the refresh path (login, registration).
    pub async fn set_credential(&self, credential: Credential) {
        {
            let mut state = self.inner.state.lock();
            state.credential = credential.clone();
            state.revision += 1;
        }
        info!(expiry = ?credential.expiry, "Credential updated");
        self.inner.persist(&credential).await;
    }

    /// Drop the live credential and the stored copy.
    pub async fn clear_credential(&self) {
        {
            let mut state = self.inner.state.lock();
            state.credential = Credential::empty();
            state.revision += 1;
        }
        info!("Credential cleared");
        if let Err(e) = self.inner.store.clear().await {
            warn!(error = %e, "Failed to clear stored credential");
        }
    }

    /// Subscribe to session-wide credential signals.
    pub fn subscribe_signals(&self) -> broadcast::Receiver<SessionSignal> {
        self.inner.signals.subscribe()
    }

    /// Host that receives bearer credentials.
    pub fn backend_host(&self) -> &str {
        &self.inner.backend_host
    }

    /// Attach `Authorization: Bearer <access>` if the request targets the backend host.
    ///
    /// Never blocks and never refreshes.
    pub fn attach_authorization(&self, mut request: Request) -> Request {
        let targets_backend = request
            .url()
            .host_str()
            .is_some_and(|host| host.eq_ignore_ascii_case(&self.inner.backend_host));
        if !targets_backend {
            return request;
        }

        let access_token = self.inner.state.lock().credential.access_token.clone();
        if access_token.is_empty() {
            return request;
        }

        match HeaderValue::from_str(&format!("Bearer {access_token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            Err(_) => warn!("Access token is not a valid header value; sending without it"),
        }
        request
    }

    /// Decide whether a failed request should be retried after a refresh.
    pub fn should_retry(&self, retry_count: u32, status: StatusCode, body: &[u8]) -> bool {
        retry::should_retry(retry_count, status, body)
    }

    /// Start a refresh, or join the one already in flight.
    ///
    /// Must be called within a tokio runtime; the network call runs on a spawned task
    /// so dropping every returned future does not cancel it.
    pub fn refresh_and_update(&self) -> RefreshFuture {
        let mut state = self.inner.state.lock();
        if let Some(in_flight) = &state.in_flight {
            debug!(refresh_id = in_flight.id, "Joining in-flight refresh");
            return in_flight.future.clone();
        }

        let id = self.inner.next_refresh_id.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(Arc::clone(&self.inner).run_refresh(id));
        let inner = Arc::downgrade(&self.inner);
        let future = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(refresh_id = id, error = %e, "Refresh task did not complete");
                    if let Some(inner) = inner.upgrade() {
                        inner.release_slot(id);
                    }
                    Err(AuthError::Aborted(e.to_string()))
                }
            }
        }
        .boxed()
        .shared();

        state.in_flight = Some(InFlight {
            id,
            future: future.clone(),
        });
        future
    }

    /// Refresh the access token now, coalescing with any refresh in flight.
    #[instrument(skip(self))]
    pub async fn force_access_token_refresh(&self) -> std::result::Result<Credential, AuthError> {
        self.refresh_and_update().await
    }

    /// Check if a refresh is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.inner.state.lock().in_flight.is_some()
    }

    /// Number of refresh network calls issued so far.
    pub fn refresh_count(&self) -> u64 {
        self.inner.refresh_calls.load(Ordering::Relaxed)
    }
}

impl LoginState for TokenRefreshCoordinator {
    fn is_logged_in(&self) -> bool {
        self.inner.state.lock().credential.has_refresh_token()
    }
}

impl std::fmt::Debug for TokenRefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRefreshCoordinator")
            .field("backend_host", &self.inner.backend_host)
            .field("refreshing", &self.is_refreshing())
            .field("refresh_calls", &self.refresh_count())
            .finish()
    }
}

impl Inner {
    async fn run_refresh(self: Arc<Self>, id: u64) -> std::result::Result<Credential, AuthError> {
        let (refresh_token, revision) = {
            let state = self.state.lock();
            (state.credential.refresh_token.clone(), state.revision)
        };

        let outcome = if refresh_token.is_empty() {
            Err(AuthError::MissingRefreshToken)
        } else {
            let call = self.refresh_calls.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(refresh_id = id, call, "Requesting new access token");
            self.endpoint.refresh(&refresh_token).await
        };

        let (result, applied) = {
            let mut state = self.state.lock();
            let owns_slot = state.in_flight.as_ref().is_some_and(|f| f.id == id);
            debug_assert!(owns_slot, "refresh {id} completed without owning the in-flight slot");
            if owns_slot {
                state.in_flight = None;
            }

            match outcome {
                Ok(token) if state.revision == revision => {
                    let credential = &mut state.credential;
                    credential.access_token = token.access_token;
                    if let Some(rotated) = token.refresh_token {
                        credential.refresh_token = rotated;
                    }
                    if let Some(token_type) = token.token_type {
                        credential.token_type = token_type;
                    }
                    credential.expiry = token.expiry;
                    state.revision += 1;
                    (Ok(state.credential.clone()), true)
                }
                Ok(_) => {
                    debug!(refresh_id = id, "Credential replaced during refresh; keeping newer value");
                    if state.credential.has_access_token() {
                        (Ok(state.credential.clone()), false)
                    } else {
                        (
                            Err(AuthError::Aborted(
                                "credential cleared during refresh".to_string(),
                            )),
                            false,
                        )
                    }
                }
                Err(e) => (Err(e), false),
            }
        };

        match &result {
            Ok(credential) if applied => {
                info!(refresh_id = id, expiry = ?credential.expiry, "Access token refreshed");
                self.persist(credential).await;
                let _ = self.signals.send(SessionSignal::Refreshed {
                    expiry: credential.expiry,
                    timestamp: Utc::now(),
                });
            }
            Ok(_) => {}
            Err(e) if e.requires_relogin() => {
                error!(refresh_id = id, error = %e, "Refresh token rejected; reauthorization required");
                let _ = self.signals.send(SessionSignal::ReauthorizationRequired {
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                warn!(refresh_id = id, error = %e, "Access token refresh failed");
                let _ = self.signals.send(SessionSignal::RefreshFailed {
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }

        result
    }

    fn release_slot(&self, id: u64) {
        let mut state = self.state.lock();
        if state.in_flight.as_ref().is_some_and(|f| f.id == id) {
            state.in_flight = None;
        }
    }

    async fn persist(&self, credential: &Credential) {
        if let Err(e) = self.store.save(credential).await {
            warn!(error = %e, "Failed to persist credential");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::endpoint::RefreshedToken;
    use crate::credentials::MemoryCredentialStore;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FakeEndpoint {
        outcome: std::result::Result<RefreshedToken, AuthError>,
        delay: Duration,
        calls: AtomicU64,
    }

    impl FakeEndpoint {
        fn ok(token: RefreshedToken) -> Arc<Self> {
            Arc::new(Self {
                outcome: Ok(token),
                delay: Duration::from_millis(100),
                calls: AtomicU64::new(0),
            })
        }

        fn err(error: AuthError) -> Arc<Self> {
            Arc::new(Self {
                outcome: Err(error),
                delay: Duration::from_millis(100),
                calls: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl TokenEndpoint for FakeEndpoint {
        async fn refresh(
            &self,
            _refresh_token: &str,
        ) -> std::result::Result<RefreshedToken, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.outcome.clone()
        }
    }

    #[derive(Default)]
    struct PanicOnceEndpoint {
        calls: AtomicU64,
    }

    #[async_trait]
    impl TokenEndpoint for PanicOnceEndpoint {
        async fn refresh(
            &self,
            _refresh_token: &str,
        ) -> std::result::Result<RefreshedToken, AuthError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("endpoint blew up");
            }
            Ok(RefreshedToken::new("recovered"))
        }
    }

    async fn coordinator_with(
        endpoint: Arc<FakeEndpoint>,
        store: Arc<MemoryCredentialStore>,
    ) -> TokenRefreshCoordinator {
        TokenRefreshCoordinator::load(endpoint, store, "api.example.com", 16)
            .await
            .unwrap()
    }

    fn test_client() -> reqwest::Client {
        crate::http_client::build_http_client(&crate::config::SessionConfig::default())
    }

    fn logged_in_store() -> Arc<MemoryCredentialStore> {
        Arc::new(MemoryCredentialStore::with_credential(Credential::new(
            "old-access",
            "refresh-1",
        )))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refreshes_share_one_call() {
        let endpoint = FakeEndpoint::ok(RefreshedToken::new("new-access"));
        let coordinator = coordinator_with(endpoint.clone(), logged_in_store()).await;

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.force_access_token_refresh().await })
            })
            .collect();

        let mut outcomes = Vec::new();
        for task in tasks {
            outcomes.push(task.await.unwrap());
        }

        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.refresh_count(), 1);
        assert!(outcomes.iter().all(|o| o == &outcomes[0]));
        assert_eq!(outcomes[0].as_ref().unwrap().access_token, "new-access");
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_attached_before_completion_resolve_together() {
        let endpoint = FakeEndpoint::ok(RefreshedToken::new("new-access"));
        let coordinator = coordinator_with(endpoint.clone(), logged_in_store()).await;

        let first = coordinator.refresh_and_update();
        let second = coordinator.refresh_and_update();
        assert!(coordinator.is_refreshing());

        let (a, b) = futures::join!(first, second);
        assert_eq!(a, b);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);

        // A refresh requested after completion issues a new call.
        coordinator.force_access_token_refresh().await.unwrap();
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_waiters_do_not_strand_refresh() {
        let endpoint = FakeEndpoint::ok(RefreshedToken::new("new-access"));
        let coordinator = coordinator_with(endpoint.clone(), logged_in_store()).await;

        drop(coordinator.refresh_and_update());
        assert!(coordinator.is_refreshing());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!coordinator.is_refreshing());
        assert_eq!(coordinator.credential().access_token, "new-access");
    }

    #[tokio::test]
    async fn test_panicked_refresh_releases_slot() {
        let endpoint = Arc::new(PanicOnceEndpoint::default());
        let coordinator = TokenRefreshCoordinator::load(
            endpoint.clone(),
            logged_in_store(),
            "api.example.com",
            16,
        )
        .await
        .unwrap();

        let first = coordinator.force_access_token_refresh().await;
        assert!(matches!(first, Err(AuthError::Aborted(_))));
        assert!(!coordinator.is_refreshing());

        let second = coordinator.force_access_token_refresh().await.unwrap();
        assert_eq!(second.access_token, "recovered");
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.credential().access_token, "recovered");
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_updates_and_persists_credential() {
        let store = logged_in_store();
        let token = RefreshedToken {
            access_token: "new-access".to_string(),
            refresh_token: Some("refresh-2".to_string()),
            token_type: None,
            expiry: None,
        };
        let coordinator = coordinator_with(FakeEndpoint::ok(token), store.clone()).await;
        let mut signals = coordinator.subscribe_signals();

        coordinator.force_access_token_refresh().await.unwrap();

        let credential = coordinator.credential();
        assert_eq!(credential.access_token, "new-access");
        assert_eq!(credential.refresh_token, "refresh-2");
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.snapshot().unwrap().refresh_token, "refresh-2");
        assert!(matches!(
            signals.try_recv(),
            Ok(SessionSignal::Refreshed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_keeps_refresh_token_without_rotation() {
        let coordinator = coordinator_with(
            FakeEndpoint::ok(RefreshedToken::new("new-access")),
            logged_in_store(),
        )
        .await;

        coordinator.force_access_token_refresh().await.unwrap();
        assert_eq!(coordinator.credential().refresh_token, "refresh-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_signals_reauthorization() {
        let endpoint = FakeEndpoint::err(AuthError::Rejected {
            status: 401,
            message: "revoked".to_string(),
        });
        let coordinator = coordinator_with(endpoint, logged_in_store()).await;
        let mut signals = coordinator.subscribe_signals();

        let first = coordinator.refresh_and_update();
        let second = coordinator.refresh_and_update();
        let (a, b) = futures::join!(first, second);

        assert!(matches!(a, Err(AuthError::Rejected { status: 401, .. })));
        assert_eq!(a, b);
        assert!(signals.try_recv().unwrap().requires_relogin());
        assert!(signals.try_recv().is_err());
        // The credential is left alone; logout is the host's decision.
        assert_eq!(coordinator.credential().access_token, "old-access");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_not_fatal() {
        let endpoint = FakeEndpoint::err(AuthError::RefreshFailed {
            status: 503,
            message: String::new(),
        });
        let coordinator = coordinator_with(endpoint, logged_in_store()).await;
        let mut signals = coordinator.subscribe_signals();

        let err = coordinator.force_access_token_refresh().await.unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(
            signals.try_recv(),
            Ok(SessionSignal::RefreshFailed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_refresh_token_skips_network() {
        let endpoint = FakeEndpoint::ok(RefreshedToken::new("unused"));
        let coordinator =
            coordinator_with(endpoint.clone(), Arc::new(MemoryCredentialStore::new())).await;
        let mut signals = coordinator.subscribe_signals();

        assert!(!coordinator.is_logged_in());
        let err = coordinator.force_access_token_refresh().await.unwrap_err();

        assert_eq!(err, AuthError::MissingRefreshToken);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
        assert!(signals.try_recv().unwrap().requires_relogin());
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_credential_wins_over_concurrent_refresh() {
        let endpoint = FakeEndpoint::ok(RefreshedToken::new("refreshed-access"));
        let coordinator = coordinator_with(endpoint, logged_in_store()).await;

        let pending = coordinator.refresh_and_update();
        tokio::task::yield_now().await;
        coordinator
            .set_credential(Credential::new("login-access", "login-refresh"))
            .await;

        let credential = pending.await.unwrap();
        assert_eq!(credential.access_token, "login-access");
        assert_eq!(coordinator.credential().access_token, "login-access");
    }

    #[tokio::test]
    async fn test_attach_authorization_only_for_backend_host() {
        let coordinator = coordinator_with(
            FakeEndpoint::ok(RefreshedToken::new("unused")),
            logged_in_store(),
        )
        .await;
        let client = test_client();

        let request = client
            .get("https://API.example.com/v1/items")
            .build()
            .unwrap();
        let request = coordinator.attach_authorization(request);
        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "Bearer old-access"
        );

        let foreign = client.get("https://cdn.example.net/a.png").build().unwrap();
        let foreign = coordinator.attach_authorization(foreign);
        assert!(foreign.headers().get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn test_clear_credential_logs_out() {
        let store = logged_in_store();
        let coordinator = coordinator_with(
            FakeEndpoint::ok(RefreshedToken::new("unused")),
            store.clone(),
        )
        .await;
        assert!(coordinator.is_logged_in());

        coordinator.clear_credential().await;

        assert!(!coordinator.is_logged_in());
        assert!(store.snapshot().is_none());
        let request = test_client()
            .get("https://api.example.com/v1/items")
            .build()
            .unwrap();
        assert!(
            coordinator
                .attach_authorization(request)
                .headers()
                .get(AUTHORIZATION)
                .is_none()
        );
    }
}
