//! Shared primitives for the mall order engine and server.
//!
//! * [`Money`] is a fixed-point amount held in cents. Gateways speak two-decimal strings, so parsing and formatting
//!   both go through this type.
//! * [`Secret`] hides configuration values from `Debug` and `Display` output.
mod money;

pub mod helpers;
pub mod op;
mod secret;

pub use money::{Money, MoneyParseError, CURRENCY_CODE};
pub use secret::Secret;
