//! The typed event bus.
//!
//! Subscribers come in two flavours:
//!
//! * [`Reaction`]s perform required business mutations. They run inside the unit of work that produced the event, in
//!   the order they were registered for its [`EventKind`]. If one fails, the whole unit of work is rolled back, so the
//!   event might as well never have happened.
//! * Hooks (see [`EventHooks`](super::EventHooks)) are informational. They receive the event only after the unit of
//!   work has committed, through [`EventBus::publish`], and their failures are logged and swallowed.
use std::{collections::HashMap, sync::Arc};

use log::*;

use crate::{
    db::traits::{InventoryManagement, OrderManagement},
    db_types::{Actor, Order, OrderEvent, OrderStatus},
    engine_api::EngineError,
    events::{
        CancelCause,
        DomainEvent,
        EventKind,
        EventProducers,
        PaymentCancelledEvent,
        PaymentSucceededEvent,
        RefundRequestedEvent,
        RefundSucceededEvent,
    },
    inventory,
    state_machine,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reaction {
    /// PAY every covered order that is still awaiting payment.
    AdvanceOrdersToProcessing,
    /// CANCEL (or EXPIRE) every covered order that is still awaiting payment.
    CancelCoveredOrders,
    /// Release the stock reserved by covered orders that are still awaiting payment.
    ReleaseReservedStock,
    /// Record the refunded amount on the order and complete its refund.
    SettleRefundedOrder,
}

pub type ReactionTable = HashMap<EventKind, Vec<Reaction>>;

#[derive(Clone)]
pub struct EventBus {
    reactions: Arc<ReactionTable>,
    producers: EventProducers,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventProducers::default())
    }
}

impl EventBus {
    pub fn new(producers: EventProducers) -> Self {
        Self::with_reactions(producers, Self::standard_reactions())
    }

    pub fn with_reactions(producers: EventProducers, reactions: ReactionTable) -> Self {
        Self { reactions: Arc::new(reactions), producers }
    }

    /// Stock is released before the orders are cancelled, since the release only applies to orders that are still
    /// awaiting payment.
    pub fn standard_reactions() -> ReactionTable {
        let mut table = ReactionTable::new();
        table.insert(EventKind::PaymentSucceeded, vec![Reaction::AdvanceOrdersToProcessing]);
        table.insert(EventKind::PaymentCancelled, vec![Reaction::ReleaseReservedStock, Reaction::CancelCoveredOrders]);
        table.insert(EventKind::RefundSucceeded, vec![Reaction::SettleRefundedOrder]);
        table
    }

    pub fn reactions_for(&self, kind: EventKind) -> &[Reaction] {
        self.reactions.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    /// Runs the transactional reactions for `event` inside `tx`. Reactions may refresh the orders carried by the event.
    ///
    /// Returns any follow-up events the reactions raised. They should be published along with `event` once `tx`
    /// commits.
    pub async fn react<T>(&self, tx: &mut T, event: &mut DomainEvent) -> Result<Vec<DomainEvent>, EngineError>
    where T: InventoryManagement + OrderManagement {
        let mut follow_ups = Vec::new();
        for reaction in self.reactions_for(event.kind()) {
            trace!("📬️ Running {reaction:?} for {:?}", event.kind());
            run_reaction(*reaction, tx, event, &mut follow_ups).await?;
        }
        Ok(follow_ups)
    }

    /// Hands committed events to the best-effort subscribers.
    pub async fn publish(&self, events: Vec<DomainEvent>) {
        for event in events {
            trace!("📬️ Publishing {:?}", event.kind());
            self.producers.publish(event).await;
        }
    }
}

async fn run_reaction<T>(
    reaction: Reaction,
    tx: &mut T,
    event: &mut DomainEvent,
    follow_ups: &mut Vec<DomainEvent>,
) -> Result<(), EngineError>
where
    T: InventoryManagement + OrderManagement,
{
    match (reaction, event) {
        (Reaction::AdvanceOrdersToProcessing, DomainEvent::PaymentSucceeded(ev)) => {
            advance_orders(tx, ev, follow_ups).await
        },
        (Reaction::ReleaseReservedStock, DomainEvent::PaymentCancelled(ev)) => release_stock(tx, &ev.orders).await,
        (Reaction::CancelCoveredOrders, DomainEvent::PaymentCancelled(ev)) => cancel_orders(tx, ev).await,
        (Reaction::SettleRefundedOrder, DomainEvent::RefundSucceeded(ev)) => settle_refund(tx, ev).await,
        (reaction, event) => {
            warn!("📬️ {reaction:?} does not apply to {:?} events. Skipping it.", event.kind());
            Ok(())
        },
    }
}

async fn advance_orders<T: OrderManagement>(
    tx: &mut T,
    ev: &mut PaymentSucceededEvent,
    follow_ups: &mut Vec<DomainEvent>,
) -> Result<(), EngineError> {
    let message = match &ev.payment.trade_no {
        Some(trade_no) => format!("Paid by payment {} (trade {trade_no})", ev.payment.payment_no),
        None => format!("Paid by payment {}", ev.payment.payment_no),
    };
    for order in ev.orders.iter_mut() {
        if order.status == OrderStatus::AwaitingPayment {
            let (updated, _) =
                state_machine::apply(tx, order, Actor::System, OrderEvent::Pay, OrderStatus::Processing, &message)
                    .await?;
            *order = updated;
        } else {
            // The buyer paid for an order that was closed in the meantime. The money has to go back.
            warn!(
                "📬️ Payment {} captured money for order {} which is already {}. Requesting a refund.",
                ev.payment.payment_no, order.order_no, order.status
            );
            follow_ups.push(DomainEvent::RefundRequested(RefundRequestedEvent {
                payment_no: ev.payment.payment_no.clone(),
                order_no: Some(order.order_no.clone()),
                amount: order.total_amount - order.refunded_amount,
                reason: format!("Order {} was {} before the payment arrived", order.order_no, order.status),
            }));
        }
    }
    Ok(())
}

async fn release_stock<T: InventoryManagement>(tx: &mut T, orders: &[Order]) -> Result<(), EngineError> {
    for order in orders.iter().filter(|o| o.status == OrderStatus::AwaitingPayment) {
        for item in &order.items {
            inventory::unlock(tx, item.product_id, item.quantity).await?;
        }
        debug!("📬️ Released the stock reserved by order {}", order.order_no);
    }
    Ok(())
}

async fn cancel_orders<T: OrderManagement>(tx: &mut T, ev: &mut PaymentCancelledEvent) -> Result<(), EngineError> {
    let event = match ev.cause {
        CancelCause::Timeout => OrderEvent::Expire,
        CancelCause::TradeClosed | CancelCause::Cancelled => OrderEvent::Cancel,
    };
    let message = format!("{} ({})", ev.cause.describe(), ev.reason);
    for order in ev.orders.iter_mut() {
        if order.status != OrderStatus::AwaitingPayment {
            trace!("📬️ Order {} is {}. Leaving it alone.", order.order_no, order.status);
            continue;
        }
        let (updated, _) =
            state_machine::apply(tx, order, Actor::System, event, OrderStatus::Cancelled, &message).await?;
        *order = updated;
    }
    Ok(())
}

async fn settle_refund<T: OrderManagement>(tx: &mut T, ev: &mut RefundSucceededEvent) -> Result<(), EngineError> {
    let Some(order) = ev.order.as_mut() else {
        return Ok(());
    };
    let refunded = order.refunded_amount + ev.amount;
    tx.set_order_refunded_amount(order.id, refunded).await?;
    order.refunded_amount = refunded;
    if order.status == OrderStatus::RefundProcessing {
        let message = match &ev.trade_no {
            Some(trade_no) => format!("Refunded {} (trade {trade_no})", ev.amount),
            None => format!("Refunded {}", ev.amount),
        };
        let (updated, _) = state_machine::apply(
            tx,
            order,
            Actor::System,
            OrderEvent::CompleteRefund,
            OrderStatus::Cancelled,
            &message,
        )
        .await?;
        *order = updated;
    }
    Ok(())
}
