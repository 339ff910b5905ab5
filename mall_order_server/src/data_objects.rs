use std::fmt::Display;

use mall_common::Money;
use mall_order_engine::db_types::{CartItem, EntityType, OrderEvent, OrderNo, PaymentMethod};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }

    pub fn failure<S: Display>(message: S) -> Self {
        Self { success: false, message: message.to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityPaymentRequest {
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub amount: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayRequest {
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: String,
}

impl ReasonRequest {
    pub fn reason_or<'a>(&'a self, default: &'a str) -> &'a str {
        if self.reason.trim().is_empty() {
            default
        } else {
            self.reason.as_str()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipRequest {
    pub carrier: String,
    pub tracking_no: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AfterSaleRequest {
    pub event: OrderEvent,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequestParams {
    #[serde(default)]
    pub order_no: Option<OrderNo>,
    pub amount: Money,
    #[serde(default)]
    pub reason: String,
}

/// Either field may be left out. When both are given, the stock level is set first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StockUpdateRequest {
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub threshold: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutAccountRequest {
    pub method: PaymentMethod,
    pub account: String,
}
