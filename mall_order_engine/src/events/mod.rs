//! # Event dispatcher
//!
//! [`EventBus`] routes every [`DomainEvent`] to its transactional [`Reaction`]s while the triggering unit of work is
//! still open, and to the best-effort subscribers registered in [`EventHooks`] once it has committed.
mod bus;
mod channel;
mod event_types;
mod hooks;

pub use bus::{EventBus, Reaction, ReactionTable};
pub use channel::{EventHandler, EventProducer, Handler};
pub use event_types::*;
pub use hooks::{BoxedHookFuture, EventHandlers, EventHooks, EventProducers};
