//! Assessment session identity.
//!
//! A [`Session`] is created when the intake form is submitted and is the one
//! piece of identity every stage call carries.  It is immutable; starting a
//! new application replaces it and [`SessionStore::clear`] destroys it.
//!
//! Stage engines never read the session from ambient state.  They receive a
//! [`SessionContext`] (an `Arc<Session>`) when the orchestrator builds them.

pub mod store;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use store::{SessionError, SessionStore};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One complete assessment attempt tied to an applicant submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// `"{unix_millis}_{random}"`, unique per application.
    pub session_id: String,
    /// Snapshot of the intake form as submitted.  Opaque to the runner.
    pub applicant: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Create a session with a freshly generated id.
    pub fn new(applicant: serde_json::Value) -> Self {
        let created_at = Utc::now();
        let random = Uuid::new_v4().simple().to_string();
        let session_id = format!("{}_{}", created_at.timestamp_millis(), &random[..13]);

        Self {
            session_id,
            applicant,
            created_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }
}

/// Shared, read-only handle injected into every stage engine.
pub type SessionContext = Arc<Session>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        let a = Session::new(serde_json::json!({ "name": "A" }));
        let b = Session::new(serde_json::json!({ "name": "A" }));
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn session_id_has_timestamp_prefix() {
        let s = Session::new(serde_json::Value::Null);
        let (millis, random) = s.session_id.split_once('_').expect("separator");
        assert_eq!(millis, s.created_at.timestamp_millis().to_string());
        assert_eq!(random.len(), 13);
    }
}
