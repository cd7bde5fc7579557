//! Proactive token refresh.
//!
//! Refreshes the token pair at a fixed interval so an active session never
//! reaches access-token expiry. This path is best-effort: failures are
//! logged and never end the session. The timer stops by itself once the
//! session ends.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::coordinator::{RefreshCoordinator, RefreshError, RefreshTrigger};
use super::SessionEvent;

/// Default refresh interval (10 minutes)
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(600);

pub struct RefreshTimer {
    coordinator: Arc<RefreshCoordinator>,
    interval: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshTimer {
    pub fn new(coordinator: Arc<RefreshCoordinator>, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
            handle: Mutex::new(None),
        }
    }

    fn lock_handle(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the repeating timer. Does nothing if it is already running.
    ///
    /// The first refresh happens one interval after start. Must be called
    /// within a Tokio runtime.
    pub fn start(&self) {
        let mut handle = self.lock_handle();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Token refresh timer already running");
            return;
        }

        let coordinator = Arc::clone(&self.coordinator);
        let mut events = coordinator.subscribe();
        let period = self.interval;
        *handle = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => Self::tick(&coordinator).await,
                    event = events.recv() => match event {
                        Ok(SessionEvent::LoggedOut { .. }) | Err(RecvError::Closed) => {
                            info!("Session ended, token refresh timer stopped");
                            break;
                        }
                        Ok(_) | Err(RecvError::Lagged(_)) => {}
                    },
                }
            }
        }));
        info!(interval_secs = period.as_secs(), "Token refresh timer started");
    }

    async fn tick(coordinator: &Arc<RefreshCoordinator>) {
        match coordinator.refresh(RefreshTrigger::Proactive).await {
            Ok(_) => debug!("Background token refresh complete"),
            Err(RefreshError::MissingRefreshToken) => {
                debug!("No refresh token stored, skipping tick")
            }
            Err(e) => warn!(error = %e, "Background token refresh failed"),
        }
    }

    /// Cancel the timer; a later `start()` begins a fresh one.
    pub fn stop(&self) {
        if let Some(handle) = self.lock_handle().take() {
            handle.abort();
            info!("Token refresh timer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_handle()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
