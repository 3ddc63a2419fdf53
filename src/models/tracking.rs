use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackingEntry {
    pub id: i64,
    pub order_id: i64,
    pub tracking_id: String,
    pub status: String,
    pub details: Option<String>,
    pub location: Option<String>,
    /// Event time as reported by the vendor.
    pub timestamp: DateTime<Utc>,
    /// Ingestion time.
    pub created_at: DateTime<Utc>,
}

/// Payload for a new ledger row; the ledger assigns `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewTrackingEntry {
    pub order_id: i64,
    pub tracking_id: String,
    pub status: String,
    pub details: Option<String>,
    pub location: Option<String>,
    pub timestamp: DateTime<Utc>,
}
