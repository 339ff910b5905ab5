//! Mall Order Engine
//!
//! The order engine runs the life of a shopping order, from checkout to receipt, and reconciles it with the payment
//! gateway. It is transport-agnostic; the HTTP surface lives in the `mall_order_server` crate.
//!
//! The library is divided into these main sections:
//! 1. Database management and control ([`mod@db`]). SQLite is the supported backend. You should never need to access
//!    the database directly. Instead, use the public API of the engine. The exception is the data types used in the
//!    database, which are defined in [`db_types`] and are public.
//! 2. The domain core: the [`inventory`] ledger, the order [`state_machine`], and the payment [`gateway`]s.
//! 3. The engine public API ([`mod@engine_api`]). This provides checkout, the store and buyer order actions, the
//!    payment flow and inventory administration.
//!
//! The engine publishes [`events`] whenever a payment or an order changes in a way that someone outside might care
//! about. Some reactions (advancing paid orders, releasing stock of abandoned payments) run inside the same unit of
//! work as the change that caused them; the rest are delivered to subscriber hooks after the change commits.
//! Payment deadlines are tracked by the [`timeout_scheduler`].
mod db;

pub mod db_types;
pub mod events;
pub mod gateway;
pub mod helpers;
pub mod inventory;
pub mod state_machine;
pub mod timeout_scheduler;

mod engine_api;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

#[cfg(feature = "sqlite")]
pub use db::sqlite::{SqliteDatabase, SqliteDatabaseError};
pub use db::traits::{
    InventoryManagement,
    InventoryWrite,
    OrderEngineDatabase,
    OrderManagement,
    OrderQueryFilter,
    PaymentManagement,
    PaymentUpdate,
    StorageError,
    UnitOfWork,
};
pub use engine_api::{
    inventory_api::InventoryApi,
    order_flow_api::OrderFlowApi,
    order_objects,
    payment_flow_api::PaymentFlowApi,
    payment_objects,
    EngineError,
};
pub use gateway::{GatewayError, GatewayRegistry, PaymentGateway};
pub use timeout_scheduler::{TimeoutScheduler, TimeoutSchedulerHandle};
