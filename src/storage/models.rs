use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user in the credential store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// When the record was created (at registration, not at persistence)
    pub created_at: DateTime<Utc>,
    /// Human-readable name
    pub display_name: String,
    /// Opaque identifier, generated at registration and never reused
    pub id: Uuid,
    /// Unique, case-sensitive login name
    pub login_name: String,
    /// Output of the active secret policy (verifier hash or raw secret)
    pub secret: String,
}

impl std::fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRecord")
            .field("created_at", &self.created_at)
            .field("display_name", &self.display_name)
            .field("id", &self.id)
            .field("login_name", &self.login_name)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// A registration waiting in the write queue to be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRegistration {
    /// Number of failed persistence attempts so far
    #[serde(default)]
    pub attempts: u32,
    pub record: UserRecord,
}

impl QueuedRegistration {
    pub fn new(record: UserRecord) -> Self {
        Self {
            attempts: 0,
            record,
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}
