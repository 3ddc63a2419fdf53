//! Append-only tracking history.
//!
//! Entries are never edited or removed. Rows for an order are grouped in one
//! bucket so concurrent appends only contend on that bucket's push; readers get
//! a sorted copy. Ingestion order and vendor `timestamp` order may differ.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use dashmap::DashMap;

use crate::models::tracking::{NewTrackingEntry, TrackingEntry};

pub struct TrackingLedger {
    entries: DashMap<i64, Vec<TrackingEntry>>,
    next_id: AtomicI64,
}

impl Default for TrackingLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingLedger {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn append(&self, entry: NewTrackingEntry) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let row = TrackingEntry {
            id,
            order_id: entry.order_id,
            tracking_id: entry.tracking_id,
            status: entry.status,
            details: entry.details,
            location: entry.location,
            timestamp: entry.timestamp,
            created_at: Utc::now(),
        };

        self.entries.entry(row.order_id).or_default().push(row);
        id
    }

    /// Entries for one order + tracking id, newest vendor timestamp first.
    pub fn list_for(&self, order_id: i64, tracking_id: &str) -> Vec<TrackingEntry> {
        self.collect(order_id, |entry| entry.tracking_id == tracking_id)
    }

    /// Every entry for the order, including ones orphaned by a re-dispatch.
    pub fn list_for_order(&self, order_id: i64) -> Vec<TrackingEntry> {
        self.collect(order_id, |_| true)
    }

    pub fn count_for(&self, order_id: i64) -> usize {
        self.entries.get(&order_id).map(|bucket| bucket.len()).unwrap_or(0)
    }

    fn collect(&self, order_id: i64, keep: impl Fn(&TrackingEntry) -> bool) -> Vec<TrackingEntry> {
        let mut rows: Vec<TrackingEntry> = self
            .entries
            .get(&order_id)
            .map(|bucket| bucket.iter().filter(|entry| keep(entry)).cloned().collect())
            .unwrap_or_default();

        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        rows
    }
}
