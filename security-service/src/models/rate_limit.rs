use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One accepted request, counted against `(identifier, endpoint)` while it
/// stays inside the sliding window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub identifier: String,
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate view of the records currently inside a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowStats {
    pub count: u64,
    pub oldest: Option<DateTime<Utc>>,
}
