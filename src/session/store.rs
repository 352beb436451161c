//! Client-side persistence of the active [`Session`].
//!
//! The store is a single JSON file.  It survives reloads and crashes so that
//! the runner can pick the assessment back up; it holds identity only, never
//! in-progress answers.

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::Session;
use crate::config::AppPaths;

/// Errors raised while reading or writing the session file.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("session store could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// File-backed session store.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store located in the platform config dir (`session.json`).
    pub fn default_location() -> Self {
        Self::new(AppPaths::new().session_file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create and persist a new session, replacing any previous one.
    pub fn start_new_session(&self, applicant: serde_json::Value) -> Result<Session, SessionError> {
        let session = Session::new(applicant);
        self.save(&session)?;
        log::info!("session: started {}", session.session_id);
        Ok(session)
    }

    /// Load the persisted session.
    ///
    /// Returns `Ok(None)` when nothing is stored.  A file that no longer
    /// parses is cleared and treated as absent.
    pub fn load(&self) -> Result<Option<Session>, SessionError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Session>(&content) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                log::warn!("session: stored session is unreadable ({e}); clearing");
                self.clear()?;
                Ok(None)
            }
        }
    }

    /// Remove the persisted session.  Clearing an empty store is a no-op.
    pub fn clear(&self) -> Result<(), SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, session: &Session) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(session)?;
        std::fs::write(&self.path, payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_store_loads_none() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn started_session_survives_reload() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("nested").join("session.json"));

        let started = store
            .start_new_session(serde_json::json!({ "name": "Dana", "position": "support" }))
            .unwrap();

        let reopened = SessionStore::new(store.path().to_path_buf());
        let loaded = reopened.load().unwrap().expect("persisted");
        assert_eq!(loaded, started);
    }

    #[test]
    fn new_application_replaces_previous_session() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));

        let first = store.start_new_session(serde_json::json!({})).unwrap();
        let second = store.start_new_session(serde_json::json!({})).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_ne!(loaded.session_id, first.session_id);
        assert_eq!(loaded.session_id, second.session_id);
    }

    #[test]
    fn clear_removes_session_and_is_repeatable() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        store.start_new_session(serde_json::json!({})).unwrap();

        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn corrupt_file_is_cleared() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = SessionStore::new(&path);
        assert!(store.load().unwrap().is_none());
        assert!(!path.exists());
    }
}
