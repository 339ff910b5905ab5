use thiserror::Error;

use crate::{
    db::traits::StorageError,
    db_types::{OrderEvent, OrderNo, OrderStatus, PaymentMethod, PaymentStatus, ProductId},
    gateway::GatewayError,
    inventory::InventoryError,
};

/// The error type of every public engine operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Event {event} is not allowed for order {order_no} in {status} status")]
    InvalidTransition { order_no: OrderNo, status: OrderStatus, event: OrderEvent },
    #[error("Invalid parameter. {0}")]
    InvalidParameter(String),
    #[error("Not enough stock for product #{product_id}. Requested {requested}, but only {available} available")]
    InsufficientStock { product_id: ProductId, requested: i64, available: i64 },
    #[error("Product #{0} has no inventory record")]
    ProductNotFound(ProductId),
    #[error("Order {0} does not exist")]
    OrderNotFound(String),
    #[error("Payment {0} does not exist")]
    PaymentNotFound(String),
    #[error("Payment {payment_no} is {status}. {reason}")]
    PaymentStateInvalid { payment_no: String, status: PaymentStatus, reason: String },
    #[error("You are not allowed to do that. {0}")]
    Forbidden(String),
    #[error("Payment method {0} is not supported")]
    UnsupportedPaymentMethod(PaymentMethod),
    #[error("The store's payout account is not set up correctly. Please contact the store or try again later. {0}")]
    PayeeMisconfigured(String),
    #[error("The payment gateway could not process the request. {0}")]
    GatewayFailure(String),
    #[error("Refund failed. {0}")]
    RefundFailed(String),
    #[error("Another request changed this record at the same time. {0}")]
    ConcurrencyConflict(String),
    #[error("Database error. {0}")]
    DatabaseError(String),
}

impl EngineError {
    /// Transient failures are safe to retry by re-running the whole business operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict(_))
    }

    /// A stable, machine-readable code for the error class.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "INVALID_OPERATION",
            Self::InvalidParameter(_) => "INVALID_PARAMETER",
            Self::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            Self::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            Self::PaymentStateInvalid { .. } => "PAYMENT_STATE_INVALID",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::UnsupportedPaymentMethod(_) => "UNSUPPORTED_PAYMENT_METHOD",
            Self::PayeeMisconfigured(_) => "PAYEE_MISCONFIGURED",
            Self::GatewayFailure(_) => "GATEWAY_FAILURE",
            Self::RefundFailed(_) => "REFUND_FAILED",
            Self::ConcurrencyConflict(_) => "CONCURRENT_MODIFICATION",
            Self::DatabaseError(_) => "DATABASE_ERROR",
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Conflict(s) => Self::ConcurrencyConflict(s),
            other => Self::DatabaseError(other.to_string()),
        }
    }
}

impl From<InventoryError> for EngineError {
    fn from(e: InventoryError) -> Self {
        match e {
            InventoryError::InsufficientStock { product_id, requested, available } => {
                Self::InsufficientStock { product_id, requested, available }
            },
            InventoryError::VersionConflict(id) => {
                Self::ConcurrencyConflict(format!("Inventory for product #{id} changed concurrently"))
            },
            InventoryError::ProductNotFound(id) => Self::ProductNotFound(id),
            e @ InventoryError::InvalidQuantity { .. } => Self::InvalidParameter(e.to_string()),
            InventoryError::Storage(e) => e.into(),
        }
    }
}

impl From<GatewayError> for EngineError {
    fn from(e: GatewayError) -> Self {
        if e.is_settlement_error() {
            Self::PayeeMisconfigured(e.to_string())
        } else {
            Self::GatewayFailure(e.to_string())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn only_conflicts_are_transient() {
        assert!(EngineError::ConcurrencyConflict("x".into()).is_transient());
        assert!(!EngineError::InvalidParameter("x".into()).is_transient());
        let e: EngineError = InventoryError::VersionConflict(4).into();
        assert!(e.is_transient());
        let e: EngineError = InventoryError::InsufficientStock { product_id: 4, requested: 2, available: 1 }.into();
        assert!(!e.is_transient());
        assert_eq!(e.code(), "INSUFFICIENT_STOCK");
        let e: EngineError = StorageError::Conflict("database is locked".into()).into();
        assert!(e.is_transient());
        let e: EngineError = StorageError::Driver("disk full".into()).into();
        assert_eq!(e.code(), "DATABASE_ERROR");
    }

    #[test]
    fn settlement_rejections_become_payee_errors() {
        let e = GatewayError::Rejected {
            code: "40004".into(),
            sub_code: "ACQ.ROYALTY_ACCOUNT_NOT_EXIST".into(),
            message: "Business Failed".into(),
        };
        assert_eq!(EngineError::from(e).code(), "PAYEE_MISCONFIGURED");
        let e = GatewayError::Rejected {
            code: "40004".into(),
            sub_code: "ACQ.TRADE_HAS_CLOSE".into(),
            message: "Business Failed".into(),
        };
        assert_eq!(EngineError::from(e).code(), "GATEWAY_FAILURE");
    }
}
