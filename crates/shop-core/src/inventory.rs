//! # Inventory Ledger
//!
//! Authoritative per-(product, location) stock counter. The ledger is shared
//! by every concurrent checkout, so `decrement_if_available` must check and
//! subtract as one step per row.

use crate::error::{CheckoutError, CheckoutResult};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Primary key of an inventory row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InventoryKey {
    pub product_id: String,
    pub location_id: String,
}

impl InventoryKey {
    pub fn new(location_id: impl Into<String>, product_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            location_id: location_id.into(),
        }
    }
}

/// Stock held for one product at one location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub product_id: String,
    pub location_id: String,
    pub quantity: u32,
}

/// Stock ledger seam.
///
/// `decrement_if_available` and `restore` are the only mutations; the first
/// fails with `InsufficientStock` instead of ever going negative.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Quantity currently sellable (0 when no row exists)
    async fn available(&self, location_id: &str, product_id: &str) -> CheckoutResult<u32>;

    /// Atomically subtract `quantity`; returns the remaining quantity
    async fn decrement_if_available(
        &self,
        location_id: &str,
        product_id: &str,
        quantity: u32,
    ) -> CheckoutResult<u32>;

    /// Add `quantity` back; returns the new quantity
    async fn restore(&self, location_id: &str, product_id: &str, quantity: u32)
        -> CheckoutResult<u32>;

    /// Snapshot of every row, ordered by location then product
    async fn records(&self) -> CheckoutResult<Vec<InventoryRecord>>;
}

/// In-process ledger. Each row lives in a `DashMap` shard, and the shard's
/// write guard serializes check-and-subtract for that row.
#[derive(Debug, Default)]
pub struct InMemoryInventoryLedger {
    rows: DashMap<InventoryKey, u32>,
}

impl InMemoryInventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the ledger from stored records
    pub fn from_records(records: impl IntoIterator<Item = InventoryRecord>) -> Self {
        let ledger = Self::new();
        for record in records {
            ledger.set_quantity(&record.location_id, &record.product_id, record.quantity);
        }
        ledger
    }

    /// Overwrite a row (stock intake, seeding)
    pub fn set_quantity(&self, location_id: &str, product_id: &str, quantity: u32) {
        self.rows
            .insert(InventoryKey::new(location_id, product_id), quantity);
    }
}

#[async_trait]
impl InventoryLedger for InMemoryInventoryLedger {
    async fn available(&self, location_id: &str, product_id: &str) -> CheckoutResult<u32> {
        Ok(self
            .rows
            .get(&InventoryKey::new(location_id, product_id))
            .map(|row| *row)
            .unwrap_or(0))
    }

    async fn decrement_if_available(
        &self,
        location_id: &str,
        product_id: &str,
        quantity: u32,
    ) -> CheckoutResult<u32> {
        if quantity == 0 {
            return Err(CheckoutError::Validation(
                "Decrement quantity must be positive".to_string(),
            ));
        }

        let key = InventoryKey::new(location_id, product_id);
        let Some(mut row) = self.rows.get_mut(&key) else {
            warn!(location_id, product_id, "No inventory row for product");
            return Err(CheckoutError::InsufficientStock {
                product_id: product_id.to_string(),
            });
        };

        let remaining = row
            .checked_sub(quantity)
            .ok_or_else(|| CheckoutError::InsufficientStock {
                product_id: product_id.to_string(),
            })?;
        *row = remaining;

        debug!(location_id, product_id, quantity, remaining, "Stock decremented");
        Ok(remaining)
    }

    async fn restore(
        &self,
        location_id: &str,
        product_id: &str,
        quantity: u32,
    ) -> CheckoutResult<u32> {
        let mut row = self
            .rows
            .entry(InventoryKey::new(location_id, product_id))
            .or_insert(0);

        let restored = row.checked_add(quantity).ok_or_else(|| {
            CheckoutError::InternalInconsistency(format!(
                "Stock overflow restoring {} x{} at {}",
                product_id, quantity, location_id
            ))
        })?;
        *row = restored;

        debug!(location_id, product_id, quantity, restored, "Stock restored");
        Ok(restored)
    }

    async fn records(&self) -> CheckoutResult<Vec<InventoryRecord>> {
        let mut records: Vec<InventoryRecord> = self
            .rows
            .iter()
            .map(|row| InventoryRecord {
                product_id: row.key().product_id.clone(),
                location_id: row.key().location_id.clone(),
                quantity: *row.value(),
            })
            .collect();
        records.sort_by(|a, b| {
            (a.location_id.as_str(), a.product_id.as_str())
                .cmp(&(b.location_id.as_str(), b.product_id.as_str()))
        });
        Ok(records)
    }
}
