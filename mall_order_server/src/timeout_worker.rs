use std::{sync::Arc, time::Duration};

use log::*;
use mall_order_engine::{
    db_types::PaymentNo,
    events::{BoxedHookFuture, Handler},
    payment_objects::TimeoutOutcome,
    PaymentFlowApi,
    SqliteDatabase,
    TimeoutScheduler,
};
use tokio::task::JoinHandle;

/// Starts the payment timeout worker. Do not await the returned JoinHandle, as it will run indefinitely.
///
/// Deadlines of payments that were pending when the server last stopped are rebuilt first. After that the scheduler
/// fires each deadline as it comes due, and a periodic sweep catches anything the scheduler missed.
pub fn start_timeout_worker(
    api: PaymentFlowApi<SqliteDatabase>,
    scheduler: TimeoutScheduler,
    sweep_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match api.rehydrate_timeouts().await {
            Ok(count) => info!("🕰️ Restored {count} payment deadlines"),
            Err(e) => error!("🕰️ Could not restore payment deadlines. The sweep will pick them up instead. {e}"),
        }
        let checker = api.clone();
        let on_timeout: Handler<PaymentNo> = Arc::new(move |payment_no: PaymentNo| {
            let api = checker.clone();
            Box::pin(async move { check_payment(&api, &payment_no).await }) as BoxedHookFuture
        });
        tokio::spawn(scheduler.run(on_timeout));

        let mut timer = tokio::time::interval(sweep_interval);
        // The first tick completes immediately, and rehydration has just covered that
        timer.tick().await;
        info!("🕰️ Overdue payment sweep started");
        loop {
            timer.tick().await;
            debug!("🕰️ Sweeping for overdue payments");
            match api.expire_overdue_payments().await {
                Ok(results) if results.is_empty() => trace!("🕰️ No overdue payments"),
                Ok(results) => {
                    let timed_out = results.iter().filter(|(_, o)| *o == TimeoutOutcome::TimedOut).count();
                    info!("🕰️ Sweep checked {} overdue payments, {timed_out} timed out", results.len());
                },
                Err(e) => error!("🕰️ Error sweeping overdue payments: {e}"),
            }
        }
    })
}

async fn check_payment(api: &PaymentFlowApi<SqliteDatabase>, payment_no: &PaymentNo) {
    match api.process_timeout(payment_no).await {
        Ok(TimeoutOutcome::TimedOut) => info!("🕰️ Payment {payment_no} timed out"),
        Ok(TimeoutOutcome::Reconciled(ack)) => {
            info!("🕰️ Payment {payment_no} was paid after all. Success path returned {ack}")
        },
        Ok(TimeoutOutcome::Deferred) => warn!("🕰️ Gateway unavailable. Timeout check for {payment_no} deferred"),
        Ok(outcome) => debug!("🕰️ Timeout check for {payment_no}: {outcome:?}"),
        Err(e) => error!("🕰️ Timeout check for {payment_no} failed. {e}"),
    }
}
