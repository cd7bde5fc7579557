use anyhow::{Context, Result};
use keyring::Entry;

use super::store::{StoredSession, TokenStore};

const SERVICE_NAME: &str = "coursedesk";

/// Account name under which the session blob is stored
const DEFAULT_ACCOUNT: &str = "session";

/// Stores the session as a single JSON secret in the OS keychain.
///
/// The entry is resolved once and reused, so every read sees the
/// credential written through the same store.
pub struct KeyringStore {
    entry: Entry,
}

impl KeyringStore {
    pub fn new() -> Result<Self> {
        Self::for_account(DEFAULT_ACCOUNT)
    }

    /// Use a separate keychain entry, e.g. one per backend profile
    pub fn for_account(account: &str) -> Result<Self> {
        let entry = Entry::new(SERVICE_NAME, account).context("Failed to create keyring entry")?;
        Ok(Self { entry })
    }
}

impl TokenStore for KeyringStore {
    fn load(&self) -> Result<StoredSession> {
        match self.entry.get_password() {
            Ok(secret) => {
                serde_json::from_str(&secret).context("Failed to parse session from keychain")
            }
            Err(keyring::Error::NoEntry) => Ok(StoredSession::default()),
            Err(e) => Err(e).context("Failed to retrieve session from keychain"),
        }
    }

    fn store(&self, session: &StoredSession) -> Result<()> {
        let secret = serde_json::to_string(session)?;
        self.entry
            .set_password(&secret)
            .context("Failed to store session in keychain")
    }

    fn clear(&self) -> Result<()> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete session from keychain"),
        }
    }
}
