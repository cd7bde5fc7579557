use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use super::store::{StoredSession, TokenStore};

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Stores the session as JSON in the cache directory.
pub struct FileStore {
    cache_dir: PathBuf,
}

impl FileStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    pub fn path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }

    fn read(path: &Path) -> Result<StoredSession> {
        let contents = std::fs::read_to_string(path).context("Failed to read session file")?;
        serde_json::from_str(&contents).context("Failed to parse session file")
    }
}

impl TokenStore for FileStore {
    fn load(&self) -> Result<StoredSession> {
        let path = self.path();
        if !path.exists() {
            return Ok(StoredSession::default());
        }
        Self::read(&path)
    }

    fn store(&self, session: &StoredSession) -> Result<()> {
        let path = self.path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create cache directory")?;
        }
        let contents = serde_json::to_string_pretty(session)?;
        std::fs::write(&path, contents).context("Failed to write session file")?;
        debug!(path = %path.display(), "Session saved");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.path();
        if path.exists() {
            std::fs::remove_file(&path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}
