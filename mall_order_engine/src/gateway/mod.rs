//! # Payment gateways
//!
//! The coordinator talks to payment providers exclusively through the [`PaymentGateway`] trait. One implementation
//! exists per [`PaymentMethod`], and they are looked up at runtime from a [`GatewayRegistry`].
//!
//! Money-moving calls are idempotent on the gateway side: trades are keyed by the merchant's payment number and
//! refunds by a request number, so re-sending the same request never charges or refunds twice.
mod alipay;
mod errors;
mod signature;

use std::{collections::HashMap, fmt::Debug, sync::Arc};

pub use alipay::{AlipayConfig, AlipayGateway};
use async_trait::async_trait;
use chrono::Duration;
pub use errors::GatewayError;
use serde::{Deserialize, Serialize};
pub use signature::{signing_content, Rsa2Signer, Rsa2Verifier};

use crate::db_types::{EntityType, Money, Order, OrderNo, PaymentMethod, PaymentNo, StoreId};

/// One store's share of a split-settlement trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementShare {
    pub store_id: StoreId,
    pub order_no: OrderNo,
    /// The store's account with the payment provider
    pub account: String,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeRequest {
    pub payment_no: PaymentNo,
    pub amount: Money,
    pub subject: String,
    /// How long the buyer has to complete the trade
    pub timeout: Duration,
    pub settlements: Vec<SettlementShare>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    WaitBuyerPay,
    Success,
    Finished,
    Closed,
    /// The gateway has no record of the trade
    NotFound,
    Unknown(String),
}

impl TradeStatus {
    pub fn from_gateway(s: &str) -> Self {
        match s {
            "WAIT_BUYER_PAY" => Self::WaitBuyerPay,
            "TRADE_SUCCESS" => Self::Success,
            "TRADE_FINISHED" => Self::Finished,
            "TRADE_CLOSED" => Self::Closed,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// The buyer's money has been captured.
    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Success | Self::Finished)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeQuery {
    pub status: TradeStatus,
    pub trade_no: Option<String>,
    pub total_amount: Option<Money>,
}

impl TradeQuery {
    pub fn not_found() -> Self {
        Self { status: TradeStatus::NotFound, trade_no: None, total_amount: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundRequest {
    pub payment_no: PaymentNo,
    pub trade_no: Option<String>,
    pub amount: Money,
    /// Identifies this refund to the gateway. Retries re-send the same number.
    pub request_no: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundOutcome {
    /// The total refunded on the trade so far, as reported by the gateway
    pub refund_fee: Money,
    pub trade_no: Option<String>,
}

/// The fields of an asynchronous trade notification that the coordinator acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeNotification {
    pub payment_no: PaymentNo,
    pub trade_no: Option<String>,
    pub trade_status: TradeStatus,
    pub total_amount: Option<String>,
}

impl TradeNotification {
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, GatewayError> {
        let field = |name: &str| params.get(name).filter(|v| !v.is_empty()).cloned();
        let payment_no = field("out_trade_no")
            .map(PaymentNo::new)
            .ok_or_else(|| GatewayError::InvalidResponse("Notification has no out_trade_no".into()))?;
        let trade_status = field("trade_status")
            .map(|s| TradeStatus::from_gateway(&s))
            .ok_or_else(|| GatewayError::InvalidResponse("Notification has no trade_status".into()))?;
        Ok(Self { payment_no, trade_no: field("trade_no"), trade_status, total_amount: field("total_amount") })
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Creates a trade and returns the URL the buyer must be redirected to.
    async fn create_trade(&self, request: &TradeRequest) -> Result<String, GatewayError>;

    async fn query(&self, payment_no: &PaymentNo) -> Result<TradeQuery, GatewayError>;

    async fn refund(&self, request: &RefundRequest) -> Result<RefundOutcome, GatewayError>;

    async fn close(&self, payment_no: &PaymentNo) -> Result<(), GatewayError>;

    /// Checks the signature of an inbound notification over its full parameter set.
    fn verify_notification(&self, params: &HashMap<String, String>) -> Result<(), GatewayError>;
}

#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
}

impl Debug for GatewayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRegistry").field("methods", &self.methods()).finish()
    }
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a gateway under its own method, replacing any earlier one.
    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) -> &mut Self {
        self.gateways.insert(gateway.method(), gateway);
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.register(gateway);
        self
    }

    pub fn get(&self, method: PaymentMethod) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways.get(&method).cloned()
    }

    pub fn methods(&self) -> Vec<PaymentMethod> {
        let mut methods = self.gateways.keys().copied().collect::<Vec<_>>();
        methods.sort_by_key(|m| m.to_string());
        methods
    }
}

const MAX_SUBJECT_LEN: usize = 128;

/// The trade subject shown to the buyer: `order{no}` for every covered order, or the entity type for payments that
/// cover none. Long subjects are cut to fit the gateway's limit.
pub fn trade_subject(orders: &[Order], entity_type: EntityType) -> String {
    if orders.is_empty() {
        return entity_type.to_string();
    }
    let subject = orders.iter().map(|o| format!("order{}", o.order_no)).collect::<Vec<_>>().join(",");
    if subject.len() > MAX_SUBJECT_LEN {
        // Order numbers are ASCII, so byte slicing is safe here
        format!("{}...", &subject[..MAX_SUBJECT_LEN - 3])
    } else {
        subject
    }
}
