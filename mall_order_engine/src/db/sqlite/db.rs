use std::fmt::Debug;

use log::*;
use sqlx::{migrate, Sqlite, SqlitePool, Transaction};

use super::{db_url, inventory, new_pool, orders, payments, SqliteDatabaseError};
use crate::{
    db::traits::{
        InventoryManagement,
        InventoryWrite,
        OrderEngineDatabase,
        OrderManagement,
        OrderQueryFilter,
        PaymentManagement,
        PaymentUpdate,
        StorageError,
        UnitOfWork,
    },
    db_types::{
        Actor,
        Inventory,
        Money,
        NewOrder,
        NewPayment,
        Order,
        OrderEvent,
        OrderLog,
        OrderNo,
        OrderStatus,
        Payment,
        PaymentMethod,
        PaymentNo,
        PaymentStatus,
        PayoutAccount,
        ProductId,
        StoreId,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object using the URL in `MALL_DATABASE_URL`.
    pub async fn new(max_connections: u32) -> Result<Self, SqliteDatabaseError> {
        let url = db_url();
        Self::new_with_url(&url, max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, SqliteDatabaseError> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Brings the schema up to date. Safe to call on every start-up.
    pub async fn migrate(&self) -> Result<(), SqliteDatabaseError> {
        migrate!("./src/db/sqlite/migrations").run(&self.pool).await?;
        info!("🗃️ Database migrations complete");
        Ok(())
    }
}

impl OrderEngineDatabase for SqliteDatabase {
    type Tx = SqliteTransaction;

    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn begin(&self) -> Result<Self::Tx, StorageError> {
        let tx = self.pool.begin().await?;
        Ok(SqliteTransaction { tx })
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        self.pool.close().await;
        Ok(())
    }
}

/// A unit of work on the SQLite backend. Dropping it without calling [`UnitOfWork::commit`] rolls back.
pub struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl UnitOfWork for SqliteTransaction {
    async fn commit(self) -> Result<(), StorageError> {
        self.tx.commit().await?;
        trace!("🗃️ Transaction committed");
        Ok(())
    }

    async fn rollback(self) -> Result<(), StorageError> {
        self.tx.rollback().await?;
        trace!("🗃️ Transaction rolled back");
        Ok(())
    }
}

impl InventoryManagement for SqliteTransaction {
    async fn fetch_inventory(&mut self, product_id: ProductId) -> Result<Option<Inventory>, StorageError> {
        Ok(inventory::fetch_inventory(product_id, &mut self.tx).await?)
    }

    async fn insert_inventory(
        &mut self,
        product_id: ProductId,
        quantity: i64,
        threshold_quantity: i64,
    ) -> Result<Inventory, StorageError> {
        Ok(inventory::insert_inventory(product_id, quantity, threshold_quantity, &mut self.tx).await?)
    }

    async fn compare_and_set(&mut self, product_id: ProductId, write: InventoryWrite) -> Result<bool, StorageError> {
        Ok(inventory::compare_and_set(product_id, write, &mut self.tx).await?)
    }
}

impl OrderManagement for SqliteTransaction {
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StorageError> {
        Ok(orders::insert_order(order, &mut self.tx).await?)
    }

    async fn fetch_order_by_id(&mut self, id: i64) -> Result<Option<Order>, StorageError> {
        Ok(orders::fetch_order_by_id(id, &mut self.tx).await?)
    }

    async fn fetch_order_by_no(&mut self, order_no: &OrderNo) -> Result<Option<Order>, StorageError> {
        Ok(orders::fetch_order_by_no(order_no, &mut self.tx).await?)
    }

    async fn fetch_orders_for_payment(&mut self, payment_no: &PaymentNo) -> Result<Vec<Order>, StorageError> {
        let filter = OrderQueryFilter::default().with_payment_no(payment_no.clone());
        Ok(orders::search_orders(filter, &mut self.tx).await?)
    }

    async fn search_orders(&mut self, filter: OrderQueryFilter) -> Result<Vec<Order>, StorageError> {
        Ok(orders::search_orders(filter, &mut self.tx).await?)
    }

    async fn update_order_status(&mut self, id: i64, from: OrderStatus, to: OrderStatus) -> Result<bool, StorageError> {
        Ok(orders::update_order_status(id, from, to, &mut self.tx).await?)
    }

    async fn set_order_refunded_amount(&mut self, id: i64, amount: Money) -> Result<(), StorageError> {
        Ok(orders::set_refunded_amount(id, amount, &mut self.tx).await?)
    }

    async fn insert_order_log(
        &mut self,
        order_id: i64,
        event: OrderEvent,
        status: OrderStatus,
        message: &str,
        actor: Actor,
    ) -> Result<OrderLog, StorageError> {
        Ok(orders::insert_order_log(order_id, event, status, message, actor, &mut self.tx).await?)
    }

    async fn fetch_order_logs(&mut self, order_id: i64) -> Result<Vec<OrderLog>, StorageError> {
        Ok(orders::fetch_order_logs(order_id, &mut self.tx).await?)
    }
}

impl PaymentManagement for SqliteTransaction {
    async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment, StorageError> {
        Ok(payments::insert_payment(payment, &mut self.tx).await?)
    }

    async fn fetch_payment_by_no(&mut self, payment_no: &PaymentNo) -> Result<Option<Payment>, StorageError> {
        Ok(payments::fetch_payment_by_no(payment_no, &mut self.tx).await?)
    }

    async fn update_payment(
        &mut self,
        payment_no: &PaymentNo,
        expected: PaymentStatus,
        update: PaymentUpdate,
    ) -> Result<Option<Payment>, StorageError> {
        Ok(payments::update_payment(payment_no, expected, update, &mut self.tx).await?)
    }

    async fn fetch_payments_with_status(&mut self, status: PaymentStatus) -> Result<Vec<Payment>, StorageError> {
        Ok(payments::fetch_payments_with_status(status, &mut self.tx).await?)
    }

    async fn fetch_payout_account(
        &mut self,
        store_id: StoreId,
        method: PaymentMethod,
    ) -> Result<Option<PayoutAccount>, StorageError> {
        Ok(payments::fetch_payout_account(store_id, method, &mut self.tx).await?)
    }

    async fn upsert_payout_account(
        &mut self,
        store_id: StoreId,
        method: PaymentMethod,
        account: &str,
    ) -> Result<PayoutAccount, StorageError> {
        Ok(payments::upsert_payout_account(store_id, method, account, &mut self.tx).await?)
    }
}
