//! Single-flight token refresh.
//!
//! Every refresh in the application goes through one `RefreshCoordinator`.
//! The first caller starts a flight on its own task; callers arriving while
//! it is in progress join the pending queue. When the flight settles the
//! queue is drained exactly once, so N concurrent callers cause one call to
//! `/auth/refresh` and all observe the same outcome.
//!
//! Only flights joined by a `Reactive` caller may end the session. A purely
//! proactive flight that fails leaves the stored credentials untouched.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};

use crate::api::RefreshBackend;
use crate::auth::TokenStore;

use super::{LogoutReason, SessionEvent};

/// Which path asked for the refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// A request was rejected with 401
    Reactive,
    /// The background refresh timer fired
    Proactive,
}

/// Outcome shared by every caller of a failed flight.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token available")]
    MissingRefreshToken,

    #[error("Token refresh rejected: {0}")]
    Rejected(String),

    #[error("Failed to access stored tokens: {0}")]
    Storage(String),

    #[error("Token refresh was abandoned")]
    Cancelled,
}

impl RefreshError {
    fn logout_reason(&self) -> LogoutReason {
        match self {
            RefreshError::MissingRefreshToken => LogoutReason::MissingRefreshToken,
            _ => LogoutReason::RefreshFailed,
        }
    }
}

type Waiter = oneshot::Sender<Result<String, RefreshError>>;

/// An in-progress refresh and the callers waiting on it.
struct Flight {
    waiters: Vec<Waiter>,
    authoritative: bool,
}

pub struct RefreshCoordinator {
    store: Arc<dyn TokenStore>,
    backend: Arc<dyn RefreshBackend>,
    events: broadcast::Sender<SessionEvent>,
    flight: Mutex<Option<Flight>>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn TokenStore>,
        backend: Arc<dyn RefreshBackend>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            store,
            backend,
            events,
            flight: Mutex::new(None),
        }
    }

    fn lock_flight(&self) -> MutexGuard<'_, Option<Flight>> {
        // The guarded state is a plain queue; a panic elsewhere cannot leave it torn
        self.flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Whether a refresh is currently in progress
    pub fn is_refreshing(&self) -> bool {
        self.lock_flight().is_some()
    }

    /// Refresh the token pair, joining an in-progress refresh if there is one.
    ///
    /// Returns the new access token. Must be called within a Tokio runtime.
    pub async fn refresh(self: &Arc<Self>, trigger: RefreshTrigger) -> Result<String, RefreshError> {
        let (tx, rx) = oneshot::channel();
        let reactive = trigger == RefreshTrigger::Reactive;

        let start = {
            let mut slot = self.lock_flight();
            match slot.as_mut() {
                Some(flight) => {
                    flight.waiters.push(tx);
                    flight.authoritative |= reactive;
                    debug!(?trigger, queued = flight.waiters.len(), "Joined in-flight token refresh");
                    false
                }
                None => {
                    *slot = Some(Flight {
                        waiters: vec![tx],
                        authoritative: reactive,
                    });
                    true
                }
            }
        };

        if start {
            debug!(?trigger, "Starting token refresh");
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run_flight().await });
        }

        rx.await.unwrap_or(Err(RefreshError::Cancelled))
    }

    async fn run_flight(self: Arc<Self>) {
        let outcome = AssertUnwindSafe(self.exchange())
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!("Token refresh panicked");
                Err(RefreshError::Cancelled)
            });

        // Settling takes the queue; anyone arriving after this starts a new flight
        let Some(flight) = self.lock_flight().take() else {
            return;
        };

        match &outcome {
            Ok(_) => {
                info!(waiters = flight.waiters.len(), "Token refresh succeeded");
                let _ = self.events.send(SessionEvent::Refreshed);
            }
            Err(e) if flight.authoritative => {
                warn!(error = %e, waiters = flight.waiters.len(), "Token refresh failed, ending session");
                self.end_session(e.logout_reason());
            }
            Err(RefreshError::MissingRefreshToken) => {
                debug!("No refresh token stored, skipping background refresh");
            }
            Err(e) => {
                warn!(error = %e, "Background token refresh failed, session left intact");
            }
        }

        for waiter in flight.waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Read the refresh token, call the backend and persist the new pair.
    async fn exchange(&self) -> Result<String, RefreshError> {
        let refresh_token = self
            .store
            .refresh_token()
            .map_err(|e| RefreshError::Storage(format!("{:#}", e)))?
            .ok_or(RefreshError::MissingRefreshToken)?;

        let tokens = self
            .backend
            .refresh(&refresh_token)
            .await
            .map_err(|e| RefreshError::Rejected(e.to_string()))?;

        self.store
            .save_tokens(&tokens)
            .map_err(|e| RefreshError::Storage(format!("{:#}", e)))?;

        Ok(tokens.access_token)
    }

    /// Clear stored credentials and announce the logout.
    pub(crate) fn end_session(&self, reason: LogoutReason) {
        if let Err(e) = self.store.clear() {
            error!(error = %e, "Failed to clear stored session");
        }
        info!(?reason, "Session ended");
        let _ = self.events.send(SessionEvent::LoggedOut { reason });
    }
}
