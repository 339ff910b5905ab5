//! #  Database management and control.
//!
//! This module defines the interface contracts that storage *backends* must satisfy to drive the order engine.
//!
//! Every business operation runs inside a single unit of work. [`OrderEngineDatabase::begin`] hands out a
//! transaction handle that implements the repository traits below, and nothing is visible to other callers until
//! [`UnitOfWork::commit`] succeeds. Dropping the handle without committing rolls everything back.
//!
//! ## Traits
//! * [`OrderEngineDatabase`] opens units of work against the backend.
//! * [`InventoryManagement`] reads inventory rows and offers a single compare-and-swap write keyed on `version`.
//! * [`OrderManagement`] stores orders, their immutable line items, and the append-only order log.
//! * [`PaymentManagement`] stores payments and the stores' payout accounts.
mod data_objects;
mod inventory_management;
mod order_management;
mod payment_management;

pub use data_objects::{InventoryWrite, OrderQueryFilter, PaymentUpdate};
pub use inventory_management::InventoryManagement;
pub use order_management::OrderManagement;
pub use payment_management::PaymentManagement;
use thiserror::Error;

/// Backend-neutral storage failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// A concurrent writer got there first. The whole business operation should be re-read and retried.
    #[error("Concurrent modification detected: {0}")]
    Conflict(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    /// A schema constraint rejected the write.
    #[error("Data integrity violation: {0}")]
    Integrity(String),
    #[error("Database driver error: {0}")]
    Driver(String),
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// The transaction handle of a storage backend.
#[allow(async_fn_in_trait)]
pub trait UnitOfWork {
    async fn commit(self) -> Result<(), StorageError>;

    async fn rollback(self) -> Result<(), StorageError>;
}

/// The highest level of behaviour for backends supporting the order engine.
#[allow(async_fn_in_trait)]
pub trait OrderEngineDatabase: Clone + Send + Sync + 'static {
    type Tx: UnitOfWork + InventoryManagement + OrderManagement + PaymentManagement + Send;

    /// The URL of the database
    fn url(&self) -> &str;

    /// Starts a new unit of work.
    async fn begin(&self) -> Result<Self::Tx, StorageError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}
