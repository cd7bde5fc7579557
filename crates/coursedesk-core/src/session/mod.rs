//! Client-side session lifecycle.
//!
//! - `RefreshCoordinator`: single-flight token refresh shared by the
//!   request-driven (401) path and the background timer
//! - `RefreshTimer`: proactive refresh at a fixed interval
//! - `IdleTimer`: inactivity detection with a warning countdown
//! - `SessionManager`: owns all of the above, one per application
//!
//! Consumers learn about session changes through `SessionEvent`s. A
//! `LoggedOut` event is the signal to route back to the login screen.

pub mod coordinator;
pub mod idle;
pub mod manager;
pub mod timer;

use serde::Serialize;
use thiserror::Error;

use crate::api::ApiError;

pub use coordinator::{RefreshCoordinator, RefreshError, RefreshTrigger};
pub use idle::{
    activity_channel, ActivityEvent, ActivitySource, ChannelActivitySource, IdleConfig, IdleMachine,
    IdlePhase, IdleSnapshot, IdleTimer,
};
pub use manager::{AuthState, SessionManager, SessionOptions};
pub use timer::RefreshTimer;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub enum LogoutReason {
    /// Explicit user action
    User,
    /// The refresh token was rejected while recovering a failed request
    RefreshFailed,
    /// A request needed a refresh but no refresh token was stored
    MissingRefreshToken,
    /// The idle warning countdown ran out
    IdleTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(tag = "type")]
pub enum SessionEvent {
    LoggedIn,
    Refreshed,
    LoggedOut { reason: LogoutReason },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Not logged in")]
    NotAuthenticated,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Session storage error: {0}")]
    Storage(String),
}

impl SessionError {
    pub(crate) fn storage(err: anyhow::Error) -> Self {
        SessionError::Storage(format!("{:#}", err))
    }
}
