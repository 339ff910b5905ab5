use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use chrono::{DateTime, Duration, Utc};
pub use mall_common::Money;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Conversion error: {0}")]
pub struct ConversionError(String);

/// Generates `Display` and `FromStr` for a fieldless enum from a single table of `Variant => "TEXT"` pairs. The
/// text form is the one stored in the database and sent over the wire.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let s = match self {
                    $(Self::$variant => $text,)+
                };
                f.write_str(s)
            }
        }

        impl FromStr for $name {
            type Err = ConversionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(ConversionError(format!("Invalid {}: {s}", stringify!($name)))),
                }
            }
        }
    };
}

//--------------------------------------     Identifiers      --------------------------------------------------------
pub type ProductId = i64;
pub type StoreId = i64;
pub type UserId = i64;

/// The human-readable order number, e.g. `O20240601123045123456`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Type)]
#[sqlx(transparent)]
pub struct OrderNo(String);

impl OrderNo {
    pub fn new<S: Into<String>>(s: S) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for OrderNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The merchant-facing payment number. This is the `out_trade_no` the gateway knows the payment by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Type)]
#[sqlx(transparent)]
pub struct PaymentNo(String);

impl PaymentNo {
    pub fn new<S: Into<String>>(s: S) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for PaymentNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

//--------------------------------------     OrderStatus      --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    AwaitingPayment,
    Processing,
    AwaitingShipment,
    InTransit,
    AwaitingReceipt,
    ReturnAudit,
    ReturnInProgress,
    InspectionPending,
    RefundProcessing,
    AfterSaleFailure,
    DisputeUnderReview,
    Completed,
    Cancelled,
    Closed,
}

text_enum!(OrderStatus {
    AwaitingPayment => "AWAITING_PAYMENT",
    Processing => "PROCESSING",
    AwaitingShipment => "AWAITING_SHIPMENT",
    InTransit => "IN_TRANSIT",
    AwaitingReceipt => "AWAITING_RECEIPT",
    ReturnAudit => "RETURN_AUDIT",
    ReturnInProgress => "RETURN_IN_PROGRESS",
    InspectionPending => "INSPECTION_PENDING",
    RefundProcessing => "REFUND_PROCESSING",
    AfterSaleFailure => "AFTER_SALE_FAILURE",
    DisputeUnderReview => "DISPUTE_UNDER_REVIEW",
    Completed => "COMPLETED",
    Cancelled => "CANCELLED",
    Closed => "CLOSED",
});

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Closed)
    }

    /// The label shown to buyers and stores.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::AwaitingPayment => "Awaiting payment",
            Self::Processing => "Processing",
            Self::AwaitingShipment => "Awaiting shipment",
            Self::InTransit => "In transit",
            Self::AwaitingReceipt => "Awaiting receipt",
            Self::ReturnAudit => "Return under review",
            Self::ReturnInProgress => "Return in progress",
            Self::InspectionPending => "Awaiting inspection",
            Self::RefundProcessing => "Refund processing",
            Self::AfterSaleFailure => "After-sale request failed",
            Self::DisputeUnderReview => "Dispute under review",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
            Self::Closed => "Closed",
        }
    }
}

//--------------------------------------     OrderEvent       --------------------------------------------------------
/// The named events that drive order status transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderEvent {
    Create,
    Pay,
    Expire,
    Confirm,
    Refuse,
    Ship,
    Deliver,
    ConfirmReceipt,
    Cancel,
    Close,
    RequestReturn,
    CancelReturn,
    ApproveReturn,
    RefuseReturn,
    SendReturn,
    Refund,
    CompleteRefund,
    RaiseDispute,
    CancelDispute,
    ResolveDispute,
}

text_enum!(OrderEvent {
    Create => "CREATE",
    Pay => "PAY",
    Expire => "EXPIRE",
    Confirm => "CONFIRM",
    Refuse => "REFUSE",
    Ship => "SHIP",
    Deliver => "DELIVER",
    ConfirmReceipt => "CONFIRM_RECEIPT",
    Cancel => "CANCEL",
    Close => "CLOSE",
    RequestReturn => "REQUEST_RETURN",
    CancelReturn => "CANCEL_RETURN",
    ApproveReturn => "APPROVE_RETURN",
    RefuseReturn => "REFUSE_RETURN",
    SendReturn => "SEND_RETURN",
    Refund => "REFUND",
    CompleteRefund => "COMPLETE_REFUND",
    RaiseDispute => "RAISE_DISPUTE",
    CancelDispute => "CANCEL_DISPUTE",
    ResolveDispute => "RESOLVE_DISPUTE",
});

//--------------------------------------    PaymentStatus     --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Refunded,
    PartiallyRefunded,
    Timeout,
    Cancelled,
}

text_enum!(PaymentStatus {
    Pending => "PENDING",
    Success => "SUCCESS",
    Failed => "FAILED",
    Refunded => "REFUNDED",
    PartiallyRefunded => "PARTIALLY_REFUNDED",
    Timeout => "TIMEOUT",
    Cancelled => "CANCELLED",
});

impl PaymentStatus {
    /// `PENDING → SUCCESS | FAILED | TIMEOUT | CANCELLED`, `SUCCESS → REFUNDED | PARTIALLY_REFUNDED`, and further
    /// partial refunds until the payment is fully refunded.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Success | Failed | Timeout | Cancelled) |
                (Success, Refunded | PartiallyRefunded) |
                (PartiallyRefunded, Refunded | PartiallyRefunded)
        )
    }

    /// Money was captured for this payment at some point.
    pub fn is_captured(&self) -> bool {
        matches!(self, Self::Success | Self::PartiallyRefunded | Self::Refunded)
    }
}

//--------------------------------------    PaymentMethod     --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Alipay,
    WechatPay,
    UnionPay,
}

text_enum!(PaymentMethod {
    Alipay => "ALIPAY",
    WechatPay => "WECHAT_PAY",
    UnionPay => "UNION_PAY",
});

//--------------------------------------      EntityType      --------------------------------------------------------
/// What a payment is paying for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Order,
    AdvertisementPlacement,
}

text_enum!(EntityType {
    Order => "ORDER",
    AdvertisementPlacement => "ADVERTISEMENT_PLACEMENT",
});

//--------------------------------------        Actor         --------------------------------------------------------
/// Who caused an order transition. Persisted as `user:<id>`, `store:<id>` or `system`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    User(UserId),
    Store(StoreId),
    Admin(UserId),
    System,
}

impl Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::User(id) => write!(f, "user:{id}"),
            Actor::Store(id) => write!(f, "store:{id}"),
            Actor::Admin(id) => write!(f, "admin:{id}"),
            Actor::System => f.write_str("system"),
        }
    }
}

impl FromStr for Actor {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "system" {
            return Ok(Actor::System);
        }
        let (kind, id) = s.split_once(':').ok_or_else(|| ConversionError(format!("Invalid actor: {s}")))?;
        let id = id.parse::<i64>().map_err(|e| ConversionError(format!("Invalid actor id in {s}: {e}")))?;
        match kind {
            "user" => Ok(Actor::User(id)),
            "store" => Ok(Actor::Store(id)),
            "admin" => Ok(Actor::Admin(id)),
            _ => Err(ConversionError(format!("Invalid actor kind: {kind}"))),
        }
    }
}

impl TryFrom<String> for Actor {
    type Error = ConversionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

//--------------------------------------      Inventory       --------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Inventory {
    pub product_id: ProductId,
    /// Total stock owned
    pub quantity: i64,
    /// Stock reserved by orders that are not yet confirmed
    pub locked_quantity: i64,
    /// Low-stock alarm level
    pub threshold_quantity: i64,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl Inventory {
    pub fn available(&self) -> i64 {
        self.quantity - self.locked_quantity
    }

    pub fn status(&self) -> InventoryStatus {
        InventoryStatus::from_levels(self.available(), self.threshold_quantity)
    }

    pub fn is_low(&self) -> bool {
        self.quantity <= self.threshold_quantity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InventoryStatus {
    Sufficient,
    Insufficient,
    OutOfStock,
}

impl InventoryStatus {
    pub fn from_levels(available: i64, threshold: i64) -> Self {
        if available > threshold {
            Self::Sufficient
        } else if available <= 0 {
            Self::OutOfStock
        } else {
            Self::Insufficient
        }
    }
}

//--------------------------------------   ProductSnapshot    --------------------------------------------------------
/// An immutable copy of the product as it was when the order was placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub product_id: ProductId,
    pub name: String,
    pub price: Money,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub specs: BTreeMap<String, String>,
}

//--------------------------------------      OrderItem       --------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: ProductId,
    pub quantity: i64,
    pub snapshot: ProductSnapshot,
}

impl OrderItem {
    pub fn subtotal(&self) -> Money {
        self.snapshot.price * self.quantity
    }
}

//--------------------------------------        Order         --------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: i64,
    pub order_no: OrderNo,
    pub user_id: UserId,
    pub store_id: StoreId,
    pub status: OrderStatus,
    pub total_amount: Money,
    pub refunded_amount: Money,
    pub remark: Option<String>,
    pub payment_no: Option<PaymentNo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub items: Vec<OrderItem>,
}

impl Order {
    /// Sum of `quantity * snapshot.price` over the line items.
    pub fn items_total(&self) -> Money {
        self.items.iter().map(OrderItem::subtotal).sum()
    }
}

//--------------------------------------       OrderLog       --------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct OrderLog {
    pub id: i64,
    pub order_id: i64,
    pub event: OrderEvent,
    /// The status the order was left in by this event
    pub status: OrderStatus,
    pub message: String,
    #[sqlx(try_from = "String")]
    pub actor: Actor,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------       Payment        --------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: i64,
    pub payment_no: PaymentNo,
    pub user_id: UserId,
    pub status: PaymentStatus,
    pub amount: Money,
    pub refunded_amount: Money,
    pub payment_method: Option<PaymentMethod>,
    pub entity_type: EntityType,
    pub entity_id: Option<i64>,
    /// The gateway's trade number. Only set once the gateway has confirmed success.
    pub trade_no: Option<String>,
    pub created_at: DateTime<Utc>,
    /// When the trade request was sent to the gateway. Timeouts are measured from here.
    pub payment_request_time: Option<DateTime<Utc>>,
    /// When the gateway confirmed the payment
    pub transaction_time: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// The moment this payment times out if it is still pending. Payments that never had a trade created time out
    /// relative to their creation time.
    pub fn timeout_deadline(&self, window: Duration) -> DateTime<Utc> {
        self.payment_request_time.unwrap_or(self.created_at) + window
    }

    pub fn refundable_amount(&self) -> Money {
        self.amount - self.refunded_amount
    }
}

//--------------------------------------   Checkout inputs    --------------------------------------------------------
/// A line of the buyer's cart, as handed over by the checkout layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub store_id: StoreId,
    pub quantity: i64,
    pub snapshot: ProductSnapshot,
}

impl CartItem {
    pub fn product_id(&self) -> ProductId {
        self.snapshot.product_id
    }
}

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub quantity: i64,
    pub snapshot: ProductSnapshot,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_no: OrderNo,
    pub user_id: UserId,
    pub store_id: StoreId,
    pub remark: Option<String>,
    pub payment_no: Option<PaymentNo>,
    pub items: Vec<NewOrderItem>,
}

impl NewOrder {
    pub fn total_amount(&self) -> Money {
        self.items.iter().map(|i| i.snapshot.price * i.quantity).sum()
    }
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub payment_no: PaymentNo,
    pub user_id: UserId,
    pub amount: Money,
    pub entity_type: EntityType,
    pub entity_id: Option<i64>,
}

//--------------------------------------    PayoutAccount     --------------------------------------------------------
/// A store's settlement account with a given payment channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PayoutAccount {
    pub store_id: StoreId,
    pub payment_method: PaymentMethod,
    pub account: String,
    pub updated_at: DateTime<Utc>,
}
