//! # Mall order server
//! The HTTP surface of the mall order engine. It is responsible for:
//! * Taking checkouts, and handing buyers over to the payment gateway.
//! * Receiving the gateway's asynchronous trade notifications.
//! * Driving orders through their life on behalf of buyers, stores and administrators.
//! * Running the background workers: payment timeouts and refunds.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! The server exposes the following routes:
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/checkout`: Place a cart.
//! * `/payments/...`: Pay, cancel and inspect payments.
//! * `/notify/{method}`: Gateway trade notifications. Answers with plain-text `success` or `fail`.
//! * `/orders/...`, `/stores/...`, `/admin/...`: Order actions for buyers, stores and administrators.
//! * `/inventory/{product_id}`: Stock levels.
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod helpers;
pub mod notifications;
pub mod routes;
pub mod server;
pub mod timeout_worker;

#[cfg(test)]
mod endpoint_tests;
