use super::{PaymentUpdate, StorageError};
use crate::db_types::{NewPayment, Payment, PaymentMethod, PaymentNo, PaymentStatus, PayoutAccount, StoreId};

#[allow(async_fn_in_trait)]
pub trait PaymentManagement {
    /// Stores a new payment in `PENDING` status.
    async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment, StorageError>;

    async fn fetch_payment_by_no(&mut self, payment_no: &PaymentNo) -> Result<Option<Payment>, StorageError>;

    /// Applies `update` only if the payment is still in `expected` status. Returns the updated payment, or `None` if
    /// the status had already moved on.
    async fn update_payment(
        &mut self,
        payment_no: &PaymentNo,
        expected: PaymentStatus,
        update: PaymentUpdate,
    ) -> Result<Option<Payment>, StorageError>;

    async fn fetch_payments_with_status(&mut self, status: PaymentStatus) -> Result<Vec<Payment>, StorageError>;

    async fn fetch_payout_account(
        &mut self,
        store_id: StoreId,
        method: PaymentMethod,
    ) -> Result<Option<PayoutAccount>, StorageError>;

    async fn upsert_payout_account(
        &mut self,
        store_id: StoreId,
        method: PaymentMethod,
        account: &str,
    ) -> Result<PayoutAccount, StorageError>;
}
