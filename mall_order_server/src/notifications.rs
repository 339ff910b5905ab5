//! Best-effort event subscribers for the running server.
//!
//! Most of them only log. The exception is `RefundRequested`: those events are queued for the refund worker, which
//! talks to the gateway off the request path.
use log::*;
use mall_order_engine::{
    events::{BoxedHookFuture, EventHooks, RefundRequestedEvent},
    PaymentFlowApi,
    SqliteDatabase,
};
use tokio::{sync::mpsc, task::JoinHandle};

pub type RefundQueue = mpsc::UnboundedSender<RefundRequestedEvent>;

pub fn server_hooks(refunds: RefundQueue) -> EventHooks {
    let mut hooks = EventHooks::default();
    hooks
        .on_payment_succeeded(|ev| {
            info!("📬️ Payment {} succeeded ({}), {} order(s) paid", ev.payment.payment_no, ev.payment.amount, ev.orders.len());
            done()
        })
        .on_payment_failed(|ev| {
            warn!("📬️ Payment {} failed. {}", ev.payment.payment_no, ev.reason);
            done()
        })
        .on_payment_cancelled(|ev| {
            info!(
                "📬️ Payment {} for {} #{} was cancelled ({:?}). {}",
                ev.payment.payment_no,
                ev.payment.entity_type,
                ev.payment.entity_id.unwrap_or_default(),
                ev.cause,
                ev.reason
            );
            done()
        })
        .on_order_confirmed(|ev| {
            info!("📬️ Order {} confirmed by store #{}", ev.order.order_no, ev.order.store_id);
            done()
        })
        .on_order_shipped(|ev| {
            info!("📬️ Order {} shipped with {} ({})", ev.order.order_no, ev.carrier, ev.tracking_no);
            done()
        })
        .on_order_delivered(|ev| {
            info!("📬️ Order {} delivered", ev.order.order_no);
            done()
        })
        .on_order_cancelled(|ev| {
            info!("📬️ Order {} is now {}. {}", ev.order.order_no, ev.order.status, ev.reason);
            done()
        })
        .on_refund_requested(move |ev| {
            debug!("📬️ Queueing a refund of {} on {}", ev.amount, ev.payment_no);
            if let Err(e) = refunds.send(ev) {
                error!("📬️ The refund worker is gone. Refund of {} on {} was not queued.", e.0.amount, e.0.payment_no);
            }
            done()
        })
        .on_refund_succeeded(|ev| {
            info!("📬️ Refunded {} on payment {}", ev.amount, ev.payment.payment_no);
            done()
        })
        .on_refund_failed(|ev| {
            error!(
                "📬️ Refund of {} on payment {} failed and needs manual attention. {}",
                ev.amount, ev.payment.payment_no, ev.reason
            );
            done()
        })
        .on_low_stock(|ev| {
            warn!(
                "📬️ Product #{} is running low: {} left (alarm at {})",
                ev.inventory.product_id, ev.inventory.quantity, ev.inventory.threshold_quantity
            );
            done()
        });
    hooks
}

fn done() -> BoxedHookFuture {
    Box::pin(async {})
}

/// Starts the refund worker. Do not await the returned JoinHandle; it runs until the queue's senders are dropped.
pub fn start_refund_worker(
    api: PaymentFlowApi<SqliteDatabase>,
    mut requests: mpsc::UnboundedReceiver<RefundRequestedEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("💳️ Refund worker started");
        while let Some(request) = requests.recv().await {
            let RefundRequestedEvent { payment_no, order_no, amount, reason } = request;
            match api.refund(&payment_no, order_no.as_ref(), amount, &reason).await {
                Ok(payment) => {
                    info!("💳️ Refund of {amount} on {payment_no} done. The payment is now {}", payment.status)
                },
                // Gateway failures have already been announced with a RefundFailed event
                Err(e) => warn!("💳️ Refund of {amount} on {payment_no} did not go through. {e}"),
            }
        }
        info!("💳️ Refund worker stopped");
    })
}
