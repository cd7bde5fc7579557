//! Unauthenticated `/auth/*` endpoints.
//!
//! Login and refresh seed and renew the session credentials. The remaining
//! calls back the registration and account recovery screens and only ever
//! return an acknowledgement.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::types::{Ack, LoginRequest, LoginResponse, RefreshRequest, RegisterRequest, TokenPair};
use super::ApiError;

const LOGIN_PATH: &str = "/auth/login";
const REFRESH_PATH: &str = "/auth/refresh";
const REGISTER_PATH: &str = "/auth/register";
const VERIFY_OTP_PATH: &str = "/auth/verify-otp";
const RESEND_OTP_PATH: &str = "/auth/resend-otp";
const VERIFY_EMAIL_PATH: &str = "/auth/verify-email";
const FORGOT_PASSWORD_PATH: &str = "/auth/forgot-password";
const RESET_PASSWORD_PATH: &str = "/auth/reset-password";

/// Exchanges a refresh token for a fresh token pair.
///
/// `AuthApi` is the production implementation; the session layer only
/// depends on this trait so refresh behaviour can be driven by fakes.
#[async_trait]
pub trait RefreshBackend: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError>;
}

/// Join a base URL and an endpoint path with exactly one slash between them.
pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Client for the authentication endpoints.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct AuthApi {
    client: Client,
    base_url: String,
}

impl AuthApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Build on an existing client, sharing its connection pool.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = join_url(&self.base_url, path);
        debug!(url = %url, "POST");

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Like `post_json`, but tolerates an empty body.
    async fn post_ack<B: Serialize>(&self, path: &str, body: &B) -> Result<Ack, ApiError> {
        let url = join_url(&self.base_url, path);
        debug!(url = %url, "POST");

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Ack::default());
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Authenticate with email and password
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        self.post_json(LOGIN_PATH, &LoginRequest { email, password })
            .await
    }

    /// Exchange a refresh token for a new access/refresh pair.
    /// Any non-2xx response is a refresh failure.
    pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        self.post_json(REFRESH_PATH, &RefreshRequest { refresh_token })
            .await
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<Ack, ApiError> {
        self.post_ack(REGISTER_PATH, request).await
    }

    pub async fn verify_otp(&self, email: &str, otp: &str) -> Result<Ack, ApiError> {
        self.post_ack(VERIFY_OTP_PATH, &serde_json::json!({ "email": email, "otp": otp }))
            .await
    }

    pub async fn resend_otp(&self, email: &str) -> Result<Ack, ApiError> {
        self.post_ack(RESEND_OTP_PATH, &serde_json::json!({ "email": email }))
            .await
    }

    pub async fn verify_email(&self, token: &str) -> Result<Ack, ApiError> {
        self.post_ack(VERIFY_EMAIL_PATH, &serde_json::json!({ "token": token }))
            .await
    }

    pub async fn forgot_password(&self, email: &str) -> Result<Ack, ApiError> {
        self.post_ack(FORGOT_PASSWORD_PATH, &serde_json::json!({ "email": email }))
            .await
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<Ack, ApiError> {
        self.post_ack(
            RESET_PASSWORD_PATH,
            &serde_json::json!({ "token": token, "password": new_password }),
        )
        .await
    }
}

#[async_trait]
impl RefreshBackend for AuthApi {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        self.refresh_tokens(refresh_token).await
    }
}
