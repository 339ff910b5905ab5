use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Order, OrderLog, Payment},
    helpers::RetryPolicy,
};

#[derive(Debug, Clone)]
pub struct OrderFlowConfig {
    /// Re-runs of a business operation after a concurrent inventory or order write
    pub conflict_retry: RetryPolicy,
}

impl Default for OrderFlowConfig {
    fn default() -> Self {
        Self { conflict_retry: RetryPolicy::new(3, Duration::from_millis(25)) }
    }
}

/// The result of a checkout: one order per store, all covered by a single payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkout {
    pub orders: Vec<Order>,
    pub payment: Payment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderWithLogs {
    pub order: Order,
    pub logs: Vec<OrderLog>,
}
