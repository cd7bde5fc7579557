//! The per-application session owner.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::{AuthApi, LoginResponse, RefreshBackend, SessionClient};
use crate::auth::{StoredSession, TokenStore, UserProfile};

use super::coordinator::RefreshCoordinator;
use super::idle::{IdlePhase, IdleTimer};
use super::timer::{RefreshTimer, DEFAULT_REFRESH_INTERVAL};
use super::{LogoutReason, SessionError, SessionEvent};

/// Session event buffer. Events are rare; slow subscribers only lose
/// `Refreshed` notifications in practice.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// HTTP request timeout used when none is configured
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub base_url: String,
    pub refresh_interval: Duration,
    pub request_timeout: Duration,
}

impl SessionOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Result of the auth guard's check on stored credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// An access token is stored
    Authenticated,
    /// Only a refresh token is stored; the first request will refresh
    RefreshOnly,
    Unauthenticated,
}

impl AuthState {
    fn from_session(session: &StoredSession) -> Self {
        match (&session.access_token, &session.refresh_token) {
            (Some(_), _) => AuthState::Authenticated,
            (None, Some(_)) => AuthState::RefreshOnly,
            (None, None) => AuthState::Unauthenticated,
        }
    }
}

/// Owns the stored credentials, the refresh coordinator and the refresh
/// timer. Create one per application and share it as `Arc`.
pub struct SessionManager {
    store: Arc<dyn TokenStore>,
    coordinator: Arc<RefreshCoordinator>,
    timer: RefreshTimer,
    events: broadcast::Sender<SessionEvent>,
    http: Client,
    base_url: String,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn TokenStore>,
        backend: Arc<dyn RefreshBackend>,
        options: SessionOptions,
    ) -> Result<Arc<Self>, SessionError> {
        let http = Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(crate::api::ApiError::from)?;
        Ok(Self::with_client(store, backend, http, options))
    }

    /// Build on an existing HTTP client, sharing its connection pool.
    pub fn with_client(
        store: Arc<dyn TokenStore>,
        backend: Arc<dyn RefreshBackend>,
        http: Client,
        options: SessionOptions,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&store),
            backend,
            events.clone(),
        ));
        let timer = RefreshTimer::new(Arc::clone(&coordinator), options.refresh_interval);

        Arc::new(Self {
            store,
            coordinator,
            timer,
            events,
            http,
            base_url: options.base_url,
        })
    }

    /// Production wiring: refreshes go to the backend's `/auth/refresh`.
    pub fn connect(
        store: Arc<dyn TokenStore>,
        options: SessionOptions,
    ) -> Result<(Arc<Self>, AuthApi), SessionError> {
        let http = Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(crate::api::ApiError::from)?;
        let api = AuthApi::with_client(http.clone(), options.base_url.clone());
        let manager = Self::with_client(store, Arc::new(api.clone()), http, options);
        Ok((manager, api))
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn refresh_timer(&self) -> &RefreshTimer {
        &self.timer
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// An authenticated client sharing this session.
    pub fn client(self: &Arc<Self>) -> SessionClient {
        SessionClient::new(Arc::clone(self))
    }

    /// Stored access token. Read failures count as absent.
    pub fn access_token(&self) -> Option<String> {
        match self.store.access_token() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read access token, sending request without it");
                None
            }
        }
    }

    pub fn profile(&self) -> Result<Option<UserProfile>, SessionError> {
        Ok(self.store.load().map_err(SessionError::storage)?.profile)
    }

    pub fn auth_state(&self) -> Result<AuthState, SessionError> {
        let session = self.store.load().map_err(SessionError::storage)?;
        Ok(AuthState::from_session(&session))
    }

    /// Guard for screens and commands that need a session.
    pub fn require_auth(&self) -> Result<AuthState, SessionError> {
        match self.auth_state()? {
            AuthState::Unauthenticated => Err(SessionError::NotAuthenticated),
            state => Ok(state),
        }
    }

    /// Check stored credentials at startup and start the refresh timer
    /// when there is a session to keep alive.
    pub fn bootstrap(&self) -> Result<AuthState, SessionError> {
        let state = self.auth_state()?;
        debug!(?state, "Session bootstrap");
        if state != AuthState::Unauthenticated {
            self.timer.start();
        }
        Ok(state)
    }

    /// Log in, persist the credentials and identity, and start the refresh timer.
    pub async fn login(
        &self,
        api: &AuthApi,
        email: &str,
        password: &str,
    ) -> Result<LoginResponse, SessionError> {
        let response = api.login(email, password).await?;

        self.store
            .save_tokens(&response.tokens())
            .map_err(SessionError::storage)?;

        let profile = UserProfile {
            name: response.name.clone(),
            email: response.email.clone().or_else(|| Some(email.to_string())),
        };
        if let Err(e) = self.store.save_profile(&profile) {
            warn!(error = %e, "Failed to save user profile");
        }

        self.timer.start();
        info!(status = ?response.status, "Logged in");
        let _ = self.events.send(SessionEvent::LoggedIn);
        Ok(response)
    }

    /// End the session: stop refreshing, clear credentials, notify subscribers.
    pub fn logout(&self, reason: LogoutReason) {
        self.timer.stop();
        self.coordinator.end_session(reason);
    }

    /// Log out when the idle countdown runs out.
    pub fn watch_idle(self: &Arc<Self>, idle: &IdleTimer) -> JoinHandle<()> {
        let mut state = idle.subscribe();
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let expired = state
                .wait_for(|snapshot| snapshot.phase == IdlePhase::Expired)
                .await
                .is_ok();
            if expired {
                info!("Idle timeout reached, logging out");
                manager.logout(LogoutReason::IdleTimeout);
            } else {
                error!("Idle timer stopped before expiry");
            }
        })
    }
}
