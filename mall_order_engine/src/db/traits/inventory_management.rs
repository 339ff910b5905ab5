use super::{InventoryWrite, StorageError};
use crate::db_types::{Inventory, ProductId};

/// Storage for per-product stock counters.
///
/// The only write is [`compare_and_set`](InventoryManagement::compare_and_set): it replaces the counters and bumps the
/// version in one conditional update, and reports `false` when the stored version no longer matches. Deciding what
/// the new counters should be is the inventory ledger's job, not the backend's.
#[allow(async_fn_in_trait)]
pub trait InventoryManagement {
    async fn fetch_inventory(&mut self, product_id: ProductId) -> Result<Option<Inventory>, StorageError>;

    /// Creates the inventory row for a product. Fails with [`StorageError::Integrity`] if it already exists.
    async fn insert_inventory(
        &mut self,
        product_id: ProductId,
        quantity: i64,
        threshold_quantity: i64,
    ) -> Result<Inventory, StorageError>;

    /// Returns `true` if the row was updated, `false` if another writer changed it first.
    async fn compare_and_set(&mut self, product_id: ProductId, write: InventoryWrite) -> Result<bool, StorageError>;
}
