use std::fmt;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::TokenPair;

/// Identity fields remembered alongside the tokens for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Everything the session layer persists.
///
/// The access and refresh tokens are independent keys: either may be
/// missing while the other is present.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(rename = "accessToken", default)]
    pub access_token: Option<String>,
    #[serde(rename = "refreshToken", default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub profile: Option<UserProfile>,
    #[serde(rename = "updatedAt", default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StoredSession {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.profile.is_none()
    }

    /// Overwrite both tokens and stamp the update time
    pub fn set_tokens(&mut self, tokens: &TokenPair) {
        self.access_token = Some(tokens.access_token.clone());
        self.refresh_token = Some(tokens.refresh_token.clone());
        self.updated_at = Some(Utc::now());
    }
}

impl fmt::Debug for StoredSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredSession")
            .field("has_access_token", &self.access_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("profile", &self.profile)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Typed access to persisted session credentials.
///
/// Implementations provide whole-session `load`/`store`/`clear`; the
/// token and profile helpers are read-modify-write on top of those.
/// Writers are last-writer-wins.
pub trait TokenStore: Send + Sync {
    /// Load the stored session. Missing storage is an empty session.
    fn load(&self) -> Result<StoredSession>;

    /// Replace the stored session
    fn store(&self, session: &StoredSession) -> Result<()>;

    /// Remove tokens and profile
    fn clear(&self) -> Result<()>;

    fn save_tokens(&self, tokens: &TokenPair) -> Result<()> {
        let mut session = self.load()?;
        session.set_tokens(tokens);
        self.store(&session)
    }

    fn save_profile(&self, profile: &UserProfile) -> Result<()> {
        let mut session = self.load()?;
        session.profile = Some(profile.clone());
        self.store(&session)
    }

    fn access_token(&self) -> Result<Option<String>> {
        Ok(self.load()?.access_token)
    }

    fn refresh_token(&self) -> Result<Option<String>> {
        Ok(self.load()?.refresh_token)
    }
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoredSession>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: StoredSession) -> Self {
        Self {
            inner: Mutex::new(session),
        }
    }

    /// Seed a store with the given tokens, either of which may be absent
    pub fn with_tokens(access_token: Option<&str>, refresh_token: Option<&str>) -> Self {
        Self::with_session(StoredSession {
            access_token: access_token.map(str::to_string),
            refresh_token: refresh_token.map(str::to_string),
            ..Default::default()
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StoredSession>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("Session store lock poisoned"))
    }
}

impl TokenStore for MemoryStore {
    fn load(&self) -> Result<StoredSession> {
        Ok(self.lock()?.clone())
    }

    fn store(&self, session: &StoredSession) -> Result<()> {
        *self.lock()? = session.clone();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.lock()? = StoredSession::default();
        Ok(())
    }

    fn save_tokens(&self, tokens: &TokenPair) -> Result<()> {
        self.lock()?.set_tokens(tokens);
        Ok(())
    }
}
