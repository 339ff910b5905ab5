use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db_types::{Money, OrderStatus, PaymentMethod, PaymentNo, PaymentStatus, StoreId, UserId};

/// The full new state of an inventory row, written only if the stored version still equals `expected_version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryWrite {
    pub expected_version: i64,
    pub quantity: i64,
    pub locked_quantity: i64,
    pub threshold_quantity: i64,
}

/// Column changes for a payment row. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentUpdate {
    pub status: Option<PaymentStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub payment_request_time: Option<DateTime<Utc>>,
    pub trade_no: Option<String>,
    pub transaction_time: Option<DateTime<Utc>>,
    pub refunded_amount: Option<Money>,
}

impl PaymentUpdate {
    pub fn status(status: PaymentStatus) -> Self {
        Self { status: Some(status), ..Default::default() }
    }

    pub fn with_trade_request(mut self, method: PaymentMethod, at: DateTime<Utc>) -> Self {
        self.payment_method = Some(method);
        self.payment_request_time = Some(at);
        self
    }

    pub fn with_trade_no<S: Into<String>>(mut self, trade_no: S, at: DateTime<Utc>) -> Self {
        self.trade_no = Some(trade_no.into());
        self.transaction_time = Some(at);
        self
    }

    pub fn with_refunded_amount(mut self, amount: Money) -> Self {
        self.refunded_amount = Some(amount);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderQueryFilter {
    pub user_id: Option<UserId>,
    pub store_id: Option<StoreId>,
    pub payment_no: Option<PaymentNo>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub status: Option<Vec<OrderStatus>>,
}

impl OrderQueryFilter {
    pub fn with_user_id(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_store_id(mut self, store_id: StoreId) -> Self {
        self.store_id = Some(store_id);
        self
    }

    pub fn with_payment_no(mut self, payment_no: PaymentNo) -> Self {
        self.payment_no = Some(payment_no);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        let mut statuses = self.status.take().unwrap_or_default();
        statuses.push(status);
        self.status = Some(statuses);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() &&
            self.store_id.is_none() &&
            self.payment_no.is_none() &&
            self.since.is_none() &&
            self.until.is_none() &&
            self.status.as_ref().map(|s| s.is_empty()).unwrap_or(true)
    }
}
