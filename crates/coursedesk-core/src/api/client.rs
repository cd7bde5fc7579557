//! Authenticated API client.
//!
//! Every request carries the stored access token. A 401 triggers one
//! refresh through the session's `RefreshCoordinator` and one retry with
//! the new token; concurrent 401s share that refresh. A request that is
//! rejected again after its retry is surfaced to the caller unchanged.

use std::sync::Arc;

use reqwest::{header, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::session::{RefreshError, RefreshTrigger, SessionManager};

use super::auth::join_url;
use super::ApiError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Session expired: {0}")]
    SessionExpired(RefreshError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ClientError::SessionExpired(_))
    }
}

/// A request description that can be replayed after a token refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ClientError> {
        self.body = Some(serde_json::to_value(body).map_err(ApiError::from)?);
        Ok(self)
    }
}

/// HTTP client bound to a `SessionManager`.
/// Clone is cheap - the manager is shared and reqwest pools connections.
#[derive(Clone)]
pub struct SessionClient {
    session: Arc<SessionManager>,
}

impl SessionClient {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    fn auth_headers(token: Option<&str>) -> Result<header::HeaderMap, ClientError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        if let Some(token) = token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ClientError::InvalidRequest("access token is not a valid header value".to_string()))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    async fn attempt(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> Result<reqwest::Response, ClientError> {
        let url = join_url(self.session.base_url(), &request.path);
        debug!(method = %request.method, url = %url, authenticated = token.is_some(), "Sending request");

        let mut builder = self
            .session
            .http()
            .request(request.method.clone(), &url)
            .headers(Self::auth_headers(token)?);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        Ok(builder.send().await.map_err(ApiError::from)?)
    }

    /// Obtain a token to retry with after a 401 on `sent`.
    async fn recover(&self, sent: Option<&str>) -> Result<String, ClientError> {
        // A flight that settled after this request went out already replaced
        // the token, or already ended the session
        match self.session.access_token() {
            Some(current) if sent != Some(current.as_str()) => {
                debug!("Access token changed since request was sent, retrying without refresh");
                return Ok(current);
            }
            None if sent.is_some() => {
                if let Ok(None) = self.session.store().refresh_token() {
                    debug!("Session ended since request was sent");
                    return Err(ClientError::SessionExpired(
                        RefreshError::MissingRefreshToken,
                    ));
                }
            }
            _ => {}
        }

        self.session
            .coordinator()
            .refresh(RefreshTrigger::Reactive)
            .await
            .map_err(ClientError::SessionExpired)
    }

    /// Send a request, returning the raw response body on success.
    async fn execute(&self, request: &ApiRequest) -> Result<String, ClientError> {
        let mut token = self.session.access_token();
        let mut retried = false;

        loop {
            let response = self.attempt(request, token.as_deref()).await?;
            let status = response.status();

            if status != StatusCode::UNAUTHORIZED {
                let body = response.text().await.map_err(ApiError::from)?;
                if status.is_success() {
                    return Ok(body);
                }
                return Err(ApiError::from_status(status, &body).into());
            }

            if retried {
                warn!(path = %request.path, "Request rejected again after token refresh");
                return Err(ApiError::Unauthorized.into());
            }
            retried = true;
            debug!(path = %request.path, "Unauthorized, refreshing token");
            token = Some(self.recover(token.as_deref()).await?);
        }
    }

    /// Send a request and return its JSON body (`Null` for an empty body).
    pub async fn send(&self, request: &ApiRequest) -> Result<Value, ClientError> {
        let body = self.execute(request).await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body).map_err(ApiError::from)?)
    }

    async fn send_as<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ClientError> {
        let value = self.send(request).await?;
        Ok(serde_json::from_value(value).map_err(ApiError::from)?)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.send_as(&ApiRequest::get(path)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.send_as(&ApiRequest::new(Method::POST, path).json(body)?)
            .await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.send_as(&ApiRequest::new(Method::PUT, path).json(body)?)
            .await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.send_as(&ApiRequest::new(Method::PATCH, path).json(body)?)
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.send_as(&ApiRequest::delete(path)).await
    }
}
