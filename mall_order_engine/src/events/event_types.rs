use serde::{Deserialize, Serialize};

use crate::db_types::{Inventory, Money, Order, OrderNo, Payment, PaymentNo};

/// Why a pending payment was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelCause {
    /// The payment window elapsed without a confirmed trade
    Timeout,
    /// The gateway reported the trade as closed
    TradeClosed,
    /// The buyer (or an admin on their behalf) cancelled
    Cancelled,
}

impl CancelCause {
    pub fn describe(&self) -> &'static str {
        match self {
            CancelCause::Timeout => "payment timed out",
            CancelCause::TradeClosed => "trade closed by the gateway",
            CancelCause::Cancelled => "payment cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSucceededEvent {
    pub payment: Payment,
    /// The covered orders. Reactions refresh these, so subscribers see the post-transition state.
    pub orders: Vec<Order>,
}

impl PaymentSucceededEvent {
    pub fn new(payment: Payment, orders: Vec<Order>) -> Self {
        Self { payment, orders }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailedEvent {
    pub payment: Payment,
    pub reason: String,
}

impl PaymentFailedEvent {
    pub fn new(payment: Payment, reason: impl Into<String>) -> Self {
        Self { payment, reason: reason.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCancelledEvent {
    pub payment: Payment,
    pub orders: Vec<Order>,
    pub cause: CancelCause,
    pub reason: String,
}

impl PaymentCancelledEvent {
    pub fn new(payment: Payment, orders: Vec<Order>, cause: CancelCause, reason: impl Into<String>) -> Self {
        Self { payment, orders, cause, reason: reason.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmedEvent {
    pub order: Order,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderShippedEvent {
    pub order: Order,
    pub carrier: String,
    pub tracking_no: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDeliveredEvent {
    pub order: Order,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelledEvent {
    pub order: Order,
    pub reason: String,
}

/// Money has to go back to the buyer. Handled off the request path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequestedEvent {
    pub payment_no: PaymentNo,
    pub order_no: Option<OrderNo>,
    pub amount: Money,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundSucceededEvent {
    pub payment: Payment,
    pub order: Option<Order>,
    pub amount: Money,
    pub trade_no: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundFailedEvent {
    pub payment: Payment,
    pub order: Option<Order>,
    pub amount: Money,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockEvent {
    pub inventory: Inventory,
}

/// Every event the engine publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainEvent {
    PaymentSucceeded(PaymentSucceededEvent),
    PaymentFailed(PaymentFailedEvent),
    PaymentCancelled(PaymentCancelledEvent),
    OrderConfirmed(OrderConfirmedEvent),
    OrderShipped(OrderShippedEvent),
    OrderDelivered(OrderDeliveredEvent),
    OrderCancelled(OrderCancelledEvent),
    RefundRequested(RefundRequestedEvent),
    RefundSucceeded(RefundSucceededEvent),
    RefundFailed(RefundFailedEvent),
    LowStock(LowStockEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PaymentSucceeded,
    PaymentFailed,
    PaymentCancelled,
    OrderConfirmed,
    OrderShipped,
    OrderDelivered,
    OrderCancelled,
    RefundRequested,
    RefundSucceeded,
    RefundFailed,
    LowStock,
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::PaymentSucceeded(_) => EventKind::PaymentSucceeded,
            DomainEvent::PaymentFailed(_) => EventKind::PaymentFailed,
            DomainEvent::PaymentCancelled(_) => EventKind::PaymentCancelled,
            DomainEvent::OrderConfirmed(_) => EventKind::OrderConfirmed,
            DomainEvent::OrderShipped(_) => EventKind::OrderShipped,
            DomainEvent::OrderDelivered(_) => EventKind::OrderDelivered,
            DomainEvent::OrderCancelled(_) => EventKind::OrderCancelled,
            DomainEvent::RefundRequested(_) => EventKind::RefundRequested,
            DomainEvent::RefundSucceeded(_) => EventKind::RefundSucceeded,
            DomainEvent::RefundFailed(_) => EventKind::RefundFailed,
            DomainEvent::LowStock(_) => EventKind::LowStock,
        }
    }
}
