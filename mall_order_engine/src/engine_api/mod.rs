//! # Order engine public API
//!
//! The `engine_api` module exposes the programmatic API of the order engine. It is split by concern, so that a
//! client can pick the parts it needs.
//!
//! * [`order_flow_api`] is the entry point for checkout and for every status change of an order, from payment to
//!   receipt, cancellation and after-sale.
//! * [`payment_flow_api`] owns payments: gateway trades, notifications, timeouts, cancellation and refunds.
//! * [`inventory_api`] is the back-office view of stock levels.
//!
//! The other submodules hold the configuration and result types of these APIs, and the [`EngineError`] they all
//! return.
//!
//! # API usage
//!
//! Every API is created from a database backend that implements [`OrderEngineDatabase`](crate::OrderEngineDatabase).
//! The order flow wraps the payment flow, which also needs the gateways, an event bus and a timeout scheduler:
//!
//! ```rust,ignore
//! use mall_order_engine::{
//!     events::EventBus, GatewayRegistry, OrderFlowApi, OrderFlowConfig, PaymentFlowApi, PaymentFlowConfig,
//!     SqliteDatabase, TimeoutScheduler,
//! };
//! let db = SqliteDatabase::new_with_url(url, 25).await?;
//! let config = PaymentFlowConfig::default();
//! let (scheduler, handle) = TimeoutScheduler::new(config.timeout_window);
//! let payments = PaymentFlowApi::new(db, GatewayRegistry::new(), EventBus::default(), handle, config);
//! let orders = OrderFlowApi::new(payments, OrderFlowConfig::default());
//! let checkout = orders.reserve(user_id, cart, None).await?;
//! ```
mod errors;

pub mod inventory_api;
pub mod order_flow_api;
pub mod order_objects;
pub mod payment_flow_api;
pub mod payment_objects;

pub use errors::EngineError;
pub use inventory_api::InventoryApi;
pub use order_flow_api::OrderFlowApi;
pub use payment_flow_api::PaymentFlowApi;
