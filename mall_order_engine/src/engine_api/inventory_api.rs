use std::fmt::Debug;

use log::*;

use crate::{
    db::traits::{InventoryManagement, OrderEngineDatabase, UnitOfWork},
    db_types::{Inventory, ProductId},
    engine_api::EngineError,
    helpers::{retry_on_conflict, RetryPolicy},
    inventory::{self, InventoryError},
};

/// Stock administration for the back office. Reservations are never made here; they belong to the order flow.
#[derive(Clone)]
pub struct InventoryApi<B> {
    db: B,
    retry: RetryPolicy,
}

impl<B> Debug for InventoryApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InventoryApi")
    }
}

impl<B> InventoryApi<B> {
    pub fn new(db: B, retry: RetryPolicy) -> Self {
        Self { db, retry }
    }
}

impl<B> InventoryApi<B>
where B: OrderEngineDatabase
{
    pub async fn fetch_inventory(&self, product_id: ProductId) -> Result<Inventory, EngineError> {
        let mut tx = self.db.begin().await?;
        let inv = inventory::fetch_inventory(&mut tx, product_id).await?;
        tx.rollback().await?;
        Ok(inv)
    }

    pub async fn get_available(&self, product_id: ProductId) -> Result<i64, EngineError> {
        self.fetch_inventory(product_id).await.map(|inv| inv.available())
    }

    /// Starts tracking stock for a new product.
    pub async fn add_product_stock(
        &self,
        product_id: ProductId,
        quantity: i64,
        threshold_quantity: i64,
    ) -> Result<Inventory, EngineError> {
        if quantity < 0 || threshold_quantity < 0 {
            return Err(EngineError::InvalidParameter("Stock levels cannot be negative".into()));
        }
        let mut tx = self.db.begin().await?;
        let inv = tx.insert_inventory(product_id, quantity, threshold_quantity).await?;
        tx.commit().await?;
        info!("📦️ Tracking stock for product #{product_id}: {quantity} units, alarm at {threshold_quantity}");
        Ok(inv)
    }

    /// Sets the total stock. It may not drop below what is currently reserved.
    pub async fn set_stock(&self, product_id: ProductId, quantity: i64) -> Result<Inventory, EngineError> {
        self.mutate(StockChange::SetStock, product_id, quantity).await
    }

    pub async fn set_threshold(&self, product_id: ProductId, threshold: i64) -> Result<Inventory, EngineError> {
        self.mutate(StockChange::SetThreshold, product_id, threshold).await
    }

    pub async fn restock(&self, product_id: ProductId, quantity: i64) -> Result<Inventory, EngineError> {
        self.mutate(StockChange::Restock, product_id, quantity).await
    }

    async fn mutate(&self, change: StockChange, product_id: ProductId, value: i64) -> Result<Inventory, EngineError> {
        let inv = retry_on_conflict(&self.retry, change.label(), move || async move {
            let mut tx = self.db.begin().await?;
            let inv = change.apply(&mut tx, product_id, value).await?;
            tx.commit().await?;
            Ok::<_, EngineError>(inv)
        })
        .await?;
        debug!(
            "📦️ {} on product #{product_id}: {} in stock, {} reserved",
            change.label(),
            inv.quantity,
            inv.locked_quantity
        );
        Ok(inv)
    }
}

#[derive(Debug, Clone, Copy)]
enum StockChange {
    SetStock,
    SetThreshold,
    Restock,
}

impl StockChange {
    fn label(&self) -> &'static str {
        match self {
            StockChange::SetStock => "set stock",
            StockChange::SetThreshold => "set threshold",
            StockChange::Restock => "restock",
        }
    }

    async fn apply<T: InventoryManagement>(
        &self,
        tx: &mut T,
        product_id: ProductId,
        value: i64,
    ) -> Result<Inventory, InventoryError> {
        match self {
            StockChange::SetStock => inventory::set_stock(tx, product_id, value).await,
            StockChange::SetThreshold => inventory::set_threshold(tx, product_id, value).await,
            StockChange::Restock => inventory::restock(tx, product_id, value).await,
        }
    }
}
