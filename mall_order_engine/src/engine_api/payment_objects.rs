use std::{fmt::Display, time::Duration as StdDuration};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Order, Payment, PaymentMethod, PaymentNo, StoreId},
    helpers::RetryPolicy,
};

#[derive(Debug, Clone)]
pub struct PaymentFlowConfig {
    /// How long a buyer has to pay once a trade is requested
    pub timeout_window: Duration,
    /// Gateway refund attempts and their linear back-off
    pub refund_retry: RetryPolicy,
    /// Re-runs of a business operation after a concurrent write
    pub conflict_retry: RetryPolicy,
    /// When the gateway cannot be reached at timeout, check again after this long
    pub query_retry_delay: Duration,
    /// Orders of the platform's own store get no settlement share
    pub platform_store_id: Option<StoreId>,
}

impl Default for PaymentFlowConfig {
    fn default() -> Self {
        Self {
            timeout_window: Duration::seconds(300),
            refund_retry: RetryPolicy::new(3, StdDuration::from_millis(2000)),
            conflict_retry: RetryPolicy::new(5, StdDuration::from_millis(25)),
            query_retry_delay: Duration::seconds(60),
            platform_store_id: None,
        }
    }
}

/// The literal answer a gateway expects to a notification. Anything but `success` makes it deliver again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyAck {
    Success,
    Fail,
}

impl NotifyAck {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyAck::Success => "success",
            NotifyAck::Fail => "fail",
        }
    }
}

impl Display for NotifyAck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a timeout check did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// The payment had already left PENDING. Nothing to do.
    NotPending(crate::db_types::PaymentStatus),
    /// The deadline moved (the buyer requested a new trade). The check was re-scheduled.
    NotDue,
    /// The payment was marked TIMEOUT and its orders cancelled.
    TimedOut,
    /// The gateway said the trade was paid after all, so the success path ran instead.
    Reconciled(NotifyAck),
    /// The gateway could not be asked. The payment stays PENDING and will be checked again.
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRedirect {
    pub payment_no: PaymentNo,
    pub method: PaymentMethod,
    pub redirect_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentWithOrders {
    pub payment: Payment,
    pub orders: Vec<Order>,
}
