//! In-process order store.
//!
//! Orders are the only rows written concurrently (duplicate webhooks, admin
//! edits, payment retries). Every mutation goes through
//! [`OrderStore::compare_and_set`], which applies the change only if the row
//! still carries the version the caller read.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;

use crate::models::order::Order;

/// Bounded retries for read-decide-write loops that lose a version race.
pub const MAX_CAS_ATTEMPTS: usize = 5;

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("order {0} not found")]
    NotFound(i64),

    #[error("order {id} changed concurrently (expected version {expected}, found {actual})")]
    VersionConflict { id: i64, expected: u64, actual: u64 },
}

#[derive(Debug)]
pub struct IdSequence(AtomicI64);

impl IdSequence {
    pub fn new() -> Self {
        Self(AtomicI64::new(1))
    }

    pub fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
pub struct OrderStore {
    orders: DashMap<i64, Order>,
    tracking_index: DashMap<String, i64>,
    ids: IdSequence,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_with(&self, build: impl FnOnce(i64) -> Order) -> Order {
        let order = build(self.ids.next());
        if let Some(tracking_id) = &order.courier_tracking_id {
            self.tracking_index.insert(tracking_id.clone(), order.id);
        }
        self.orders.insert(order.id, order.clone());
        order
    }

    pub fn get(&self, id: i64) -> Option<Order> {
        self.orders.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn find_by_tracking_id(&self, tracking_id: &str) -> Option<i64> {
        self.tracking_index.get(tracking_id).map(|entry| *entry.value())
    }

    /// Applies `mutate` if the stored version equals `expected_version`, then
    /// bumps the version and `updated_at`. The shard lock is held for the whole
    /// check-and-write so two callers cannot both succeed on the same version.
    pub fn compare_and_set(
        &self,
        id: i64,
        expected_version: u64,
        mutate: impl FnOnce(&mut Order),
    ) -> Result<Order, StoreError> {
        let mut entry = self.orders.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let order = entry.value_mut();

        if order.version != expected_version {
            return Err(StoreError::VersionConflict {
                id,
                expected: expected_version,
                actual: order.version,
            });
        }

        let previous_tracking = order.courier_tracking_id.clone();
        mutate(order);
        order.version += 1;
        order.updated_at = Utc::now();

        let updated = order.clone();
        drop(entry);

        if updated.courier_tracking_id != previous_tracking {
            if let Some(tracking_id) = &updated.courier_tracking_id {
                self.tracking_index.insert(tracking_id.clone(), id);
            }
        }

        Ok(updated)
    }
}
