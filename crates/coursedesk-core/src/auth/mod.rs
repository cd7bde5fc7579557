//! Persisted session credentials.
//!
//! This module provides:
//! - `TokenStore`: the typed storage interface the session layer depends on
//! - `MemoryStore`: in-process storage for tests and embedding
//! - `FileStore`: `session.json` in the cache directory
//! - `KeyringStore`: OS-level credential storage via keyring
//!
//! Tokens are stored without expiry metadata; an access token is assumed
//! valid until a request proves otherwise.

pub mod credentials;
pub mod file;
pub mod store;

pub use credentials::KeyringStore;
pub use file::FileStore;
pub use store::{MemoryStore, StoredSession, TokenStore, UserProfile};
