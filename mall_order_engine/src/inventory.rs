//! # Inventory ledger
//!
//! Stock for a product is tracked as a total `quantity` and a `locked_quantity` reserved by orders that have not been
//! confirmed yet. Every mutation follows the same pattern:
//!
//! 1. read the row,
//! 2. check the business precondition against what was read and compute the full new state ([`InventoryWrite`]),
//! 3. write it back with a single conditional update on the `version` that was read.
//!
//! If the write hits zero rows, somebody else changed the row in between and [`InventoryError::VersionConflict`] is
//! returned. That is a transient failure. The caller must re-run its *whole* business operation, because the
//! precondition may no longer hold. [`InventoryError::InsufficientStock`] on the other hand is a business rejection
//! and retrying will not help.
use log::*;
use thiserror::Error;

use crate::{
    db::traits::{InventoryManagement, InventoryWrite, StorageError},
    db_types::{Inventory, ProductId},
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InventoryError {
    #[error("Insufficient stock for product #{product_id}: requested {requested}, available {available}")]
    InsufficientStock { product_id: ProductId, requested: i64, available: i64 },
    #[error("Inventory for product #{0} was modified concurrently")]
    VersionConflict(ProductId),
    #[error("No inventory record for product #{0}")]
    ProductNotFound(ProductId),
    #[error("Invalid quantity {quantity} for product #{product_id}: {reason}")]
    InvalidQuantity { product_id: ProductId, quantity: i64, reason: &'static str },
    #[error("{0}")]
    Storage(#[from] StorageError),
}

impl InventoryError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::VersionConflict(_) => true,
            Self::Storage(e) => e.is_conflict(),
            _ => false,
        }
    }
}

fn write_from(inv: &Inventory) -> InventoryWrite {
    InventoryWrite {
        expected_version: inv.version,
        quantity: inv.quantity,
        locked_quantity: inv.locked_quantity,
        threshold_quantity: inv.threshold_quantity,
    }
}

fn require_positive(inv: &Inventory, quantity: i64) -> Result<(), InventoryError> {
    if quantity <= 0 {
        return Err(InventoryError::InvalidQuantity {
            product_id: inv.product_id,
            quantity,
            reason: "must be positive",
        });
    }
    Ok(())
}

pub fn plan_lock(inv: &Inventory, quantity: i64) -> Result<InventoryWrite, InventoryError> {
    require_positive(inv, quantity)?;
    if inv.available() < quantity {
        return Err(InventoryError::InsufficientStock {
            product_id: inv.product_id,
            requested: quantity,
            available: inv.available(),
        });
    }
    Ok(InventoryWrite { locked_quantity: inv.locked_quantity + quantity, ..write_from(inv) })
}

pub fn plan_unlock(inv: &Inventory, quantity: i64) -> Result<InventoryWrite, InventoryError> {
    require_positive(inv, quantity)?;
    if inv.locked_quantity < quantity {
        warn!(
            "📦️ Releasing {quantity} units of product #{}, but only {} are locked. Clamping at zero.",
            inv.product_id, inv.locked_quantity
        );
    }
    Ok(InventoryWrite { locked_quantity: (inv.locked_quantity - quantity).max(0), ..write_from(inv) })
}

pub fn plan_decrease(inv: &Inventory, quantity: i64) -> Result<InventoryWrite, InventoryError> {
    require_positive(inv, quantity)?;
    if inv.locked_quantity < quantity {
        return Err(InventoryError::InsufficientStock {
            product_id: inv.product_id,
            requested: quantity,
            available: inv.locked_quantity,
        });
    }
    Ok(InventoryWrite {
        quantity: inv.quantity - quantity,
        locked_quantity: inv.locked_quantity - quantity,
        ..write_from(inv)
    })
}

pub fn plan_restock(inv: &Inventory, quantity: i64) -> Result<InventoryWrite, InventoryError> {
    require_positive(inv, quantity)?;
    Ok(InventoryWrite { quantity: inv.quantity + quantity, ..write_from(inv) })
}

pub fn plan_set_stock(inv: &Inventory, quantity: i64) -> Result<InventoryWrite, InventoryError> {
    if quantity < 0 {
        return Err(InventoryError::InvalidQuantity {
            product_id: inv.product_id,
            quantity,
            reason: "stock cannot be negative",
        });
    }
    if quantity < inv.locked_quantity {
        return Err(InventoryError::InvalidQuantity {
            product_id: inv.product_id,
            quantity,
            reason: "stock cannot drop below the reserved quantity",
        });
    }
    Ok(InventoryWrite { quantity, ..write_from(inv) })
}

pub fn plan_set_threshold(inv: &Inventory, threshold: i64) -> Result<InventoryWrite, InventoryError> {
    if threshold < 0 {
        return Err(InventoryError::InvalidQuantity {
            product_id: inv.product_id,
            quantity: threshold,
            reason: "threshold cannot be negative",
        });
    }
    Ok(InventoryWrite { threshold_quantity: threshold, ..write_from(inv) })
}

async fn mutate<T, F>(tx: &mut T, product_id: ProductId, plan: F) -> Result<Inventory, InventoryError>
where
    T: InventoryManagement,
    F: FnOnce(&Inventory) -> Result<InventoryWrite, InventoryError>,
{
    let inv = tx.fetch_inventory(product_id).await?.ok_or(InventoryError::ProductNotFound(product_id))?;
    let write = plan(&inv)?;
    if !tx.compare_and_set(product_id, write).await? {
        debug!("📦️ Version {} of product #{product_id} is stale", inv.version);
        return Err(InventoryError::VersionConflict(product_id));
    }
    Ok(Inventory {
        quantity: write.quantity,
        locked_quantity: write.locked_quantity,
        threshold_quantity: write.threshold_quantity,
        version: inv.version + 1,
        ..inv
    })
}

/// Reserves `quantity` units. Fails with [`InventoryError::InsufficientStock`] if fewer are available.
pub async fn lock<T: InventoryManagement>(tx: &mut T, product_id: ProductId, quantity: i64) -> Result<Inventory, InventoryError> {
    let inv = mutate(tx, product_id, |inv| plan_lock(inv, quantity)).await?;
    trace!("📦️ Locked {quantity} of product #{product_id}. {} available", inv.available());
    Ok(inv)
}

/// Releases a reservation. The locked quantity never drops below zero.
pub async fn unlock<T: InventoryManagement>(tx: &mut T, product_id: ProductId, quantity: i64) -> Result<Inventory, InventoryError> {
    let inv = mutate(tx, product_id, |inv| plan_unlock(inv, quantity)).await?;
    trace!("📦️ Released {quantity} of product #{product_id}. {} available", inv.available());
    Ok(inv)
}

/// Turns a reservation into a sale: both the total and the locked quantity drop by `quantity`.
pub async fn decrease<T: InventoryManagement>(
    tx: &mut T,
    product_id: ProductId,
    quantity: i64,
) -> Result<Inventory, InventoryError> {
    let inv = mutate(tx, product_id, |inv| plan_decrease(inv, quantity)).await?;
    trace!("📦️ Committed {quantity} of product #{product_id}. {} left in stock", inv.quantity);
    Ok(inv)
}

/// Puts already-committed stock back on the shelf.
pub async fn restock<T: InventoryManagement>(tx: &mut T, product_id: ProductId, quantity: i64) -> Result<Inventory, InventoryError> {
    let inv = mutate(tx, product_id, |inv| plan_restock(inv, quantity)).await?;
    trace!("📦️ Restocked {quantity} of product #{product_id}. {} in stock", inv.quantity);
    Ok(inv)
}

pub async fn set_stock<T: InventoryManagement>(tx: &mut T, product_id: ProductId, quantity: i64) -> Result<Inventory, InventoryError> {
    mutate(tx, product_id, |inv| plan_set_stock(inv, quantity)).await
}

pub async fn set_threshold<T: InventoryManagement>(
    tx: &mut T,
    product_id: ProductId,
    threshold: i64,
) -> Result<Inventory, InventoryError> {
    mutate(tx, product_id, |inv| plan_set_threshold(inv, threshold)).await
}

pub async fn fetch_inventory<T: InventoryManagement>(tx: &mut T, product_id: ProductId) -> Result<Inventory, InventoryError> {
    tx.fetch_inventory(product_id).await?.ok_or(InventoryError::ProductNotFound(product_id))
}

pub async fn get_available<T: InventoryManagement>(tx: &mut T, product_id: ProductId) -> Result<i64, InventoryError> {
    Ok(fetch_inventory(tx, product_id).await?.available())
}
