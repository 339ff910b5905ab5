//! The order state machine.
//!
//! Every status change of an order goes through [`apply`], which checks the transition table, swaps the status only
//! if nobody else changed it in the meantime, and appends the matching entry to the order log. The log is
//! append-only; the storage layer refuses updates and deletes on it.
use log::*;

use crate::{
    db::traits::OrderManagement,
    db_types::{Actor, Order, OrderEvent, OrderLog, OrderStatus},
    engine_api::EngineError,
};

/// The status an order moves to when `event` happens in `current`, or `None` if the event is not allowed there.
pub fn next_status(current: OrderStatus, event: OrderEvent) -> Option<OrderStatus> {
    use OrderEvent as E;
    use OrderStatus as S;
    let next = match (current, event) {
        (S::AwaitingPayment, E::Pay) => S::Processing,
        (S::AwaitingPayment, E::Expire | E::Cancel) => S::Cancelled,
        (S::Processing, E::Confirm) => S::AwaitingShipment,
        (S::Processing, E::Refuse | E::Cancel) => S::RefundProcessing,
        (S::AwaitingShipment, E::Cancel) => S::RefundProcessing,
        (S::AwaitingShipment, E::Ship) => S::InTransit,
        (S::InTransit, E::Deliver) => S::AwaitingReceipt,
        (S::AwaitingReceipt, E::ConfirmReceipt) => S::Completed,
        (S::AwaitingReceipt | S::Completed, E::RequestReturn) => S::ReturnAudit,
        (S::ReturnAudit, E::ApproveReturn) => S::ReturnInProgress,
        (S::ReturnAudit, E::RefuseReturn) => S::AfterSaleFailure,
        (S::ReturnAudit, E::CancelReturn) => S::Completed,
        (S::ReturnInProgress, E::SendReturn) => S::InspectionPending,
        (S::InspectionPending, E::Refund) => S::RefundProcessing,
        (S::RefundProcessing, E::CompleteRefund) => S::Cancelled,
        (S::AfterSaleFailure, E::RaiseDispute) => S::DisputeUnderReview,
        (S::DisputeUnderReview, E::CancelDispute) => S::AfterSaleFailure,
        (S::DisputeUnderReview, E::ResolveDispute) => S::RefundProcessing,
        (s, E::Close) if !s.is_terminal() => S::Closed,
        _ => return None,
    };
    Some(next)
}

pub fn can_apply(current: OrderStatus, event: OrderEvent) -> bool {
    next_status(current, event).is_some()
}

/// Moves `order` to `expected` in response to `event` and records the transition in the order log.
///
/// Fails with [`EngineError::InvalidTransition`] if the transition table does not lead from the order's current
/// status to `expected` under `event`. In that case nothing is written. If the stored status no longer matches
/// `order.status`, a concurrent writer won and [`EngineError::ConcurrencyConflict`] is returned.
///
/// Returns the updated order together with the new log entry.
pub async fn apply<T: OrderManagement>(
    tx: &mut T,
    order: &Order,
    actor: Actor,
    event: OrderEvent,
    expected: OrderStatus,
    message: &str,
) -> Result<(Order, OrderLog), EngineError> {
    match next_status(order.status, event) {
        Some(next) if next == expected => {},
        _ => {
            debug!("🔄️ Rejected {event} on order {} in {} status", order.order_no, order.status);
            return Err(EngineError::InvalidTransition { order_no: order.order_no.clone(), status: order.status, event });
        },
    }
    if !tx.update_order_status(order.id, order.status, expected).await? {
        return Err(EngineError::ConcurrencyConflict(format!(
            "Order {} is no longer in {} status",
            order.order_no, order.status
        )));
    }
    let log = tx.insert_order_log(order.id, event, expected, message, actor).await?;
    let updated = tx
        .fetch_order_by_id(order.id)
        .await?
        .ok_or_else(|| EngineError::OrderNotFound(order.order_no.to_string()))?;
    info!("🔄️ Order {} {} -> {} ({event} by {actor})", order.order_no, order.status, expected);
    Ok((updated, log))
}

/// Writes the CREATE entry that opens the log of a freshly placed order.
pub async fn record_creation<T: OrderManagement>(tx: &mut T, order: &Order, actor: Actor) -> Result<OrderLog, EngineError> {
    let message = format!("Order placed for {}", order.total_amount);
    let log = tx.insert_order_log(order.id, OrderEvent::Create, OrderStatus::AwaitingPayment, &message, actor).await?;
    Ok(log)
}
