//! Core library for coursedesk.
//!
//! This crate owns the client side of the admin platform's session lifecycle:
//! - `auth`: persisted credential storage (memory, file, OS keychain)
//! - `api`: backend endpoints and the token-attaching `SessionClient`
//! - `session`: single-flight refresh, the proactive refresh timer,
//!   the idle-timeout state machine and the `SessionManager` tying them together
//! - `config`: application configuration

pub mod api;
pub mod auth;
pub mod config;
pub mod session;

pub use api::{ApiError, ApiRequest, AuthApi, ClientError, RefreshBackend, SessionClient, TokenPair};
pub use auth::{FileStore, KeyringStore, MemoryStore, StoredSession, TokenStore, UserProfile};
pub use config::{Config, StorageKind};
pub use session::{
    activity_channel, ActivityEvent, ActivitySource, AuthState, IdleConfig, IdlePhase, IdleSnapshot,
    IdleTimer, LogoutReason, RefreshCoordinator, RefreshError, RefreshTimer, RefreshTrigger,
    SessionError, SessionEvent, SessionManager, SessionOptions,
};
