use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cookie-backed session as stored by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl SessionRecord {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}
