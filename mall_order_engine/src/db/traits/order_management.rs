use super::{OrderQueryFilter, StorageError};
use crate::db_types::{Actor, Money, NewOrder, Order, OrderEvent, OrderLog, OrderNo, OrderStatus, PaymentNo};

/// The `OrderManagement` trait defines how orders, their line items and their audit log are persisted.
///
/// Orders returned by this trait always have their `items` populated.
#[allow(async_fn_in_trait)]
pub trait OrderManagement {
    /// Inserts the order and its line items. The log is left empty; the caller records the `CREATE` entry.
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StorageError>;

    async fn fetch_order_by_id(&mut self, id: i64) -> Result<Option<Order>, StorageError>;

    async fn fetch_order_by_no(&mut self, order_no: &OrderNo) -> Result<Option<Order>, StorageError>;

    async fn fetch_orders_for_payment(&mut self, payment_no: &PaymentNo) -> Result<Vec<Order>, StorageError>;

    async fn search_orders(&mut self, filter: OrderQueryFilter) -> Result<Vec<Order>, StorageError>;

    /// Moves the order from `from` to `to`. Returns `false` without writing if the stored status is no longer `from`.
    async fn update_order_status(&mut self, id: i64, from: OrderStatus, to: OrderStatus) -> Result<bool, StorageError>;

    async fn set_order_refunded_amount(&mut self, id: i64, amount: Money) -> Result<(), StorageError>;

    /// Appends an entry to the order log. Log entries are never updated or deleted.
    async fn insert_order_log(
        &mut self,
        order_id: i64,
        event: OrderEvent,
        status: OrderStatus,
        message: &str,
        actor: Actor,
    ) -> Result<OrderLog, StorageError>;

    /// The log for the order, oldest entry first.
    async fn fetch_order_logs(&mut self, order_id: i64) -> Result<Vec<OrderLog>, StorageError>;
}
