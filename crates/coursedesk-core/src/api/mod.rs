//! REST API module for the coursedesk backend.
//!
//! - `AuthApi` talks to the unauthenticated `/auth/*` endpoints
//!   (login, refresh, registration and the account recovery flows).
//! - `SessionClient` issues every other request with the current access
//!   token attached and recovers once from an expired token.
//!
//! The backend uses bearer access tokens paired with longer-lived refresh
//! tokens. Access token validity is never checked locally.

pub mod auth;
pub mod client;
pub mod error;
pub mod types;

pub use auth::{AuthApi, RefreshBackend};
pub use client::{ApiRequest, ClientError, SessionClient};
pub use error::ApiError;
pub use reqwest::Method;
pub use types::{Ack, LoginResponse, RegisterRequest, TokenPair};
