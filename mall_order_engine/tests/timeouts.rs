use chrono::Duration;
use mall_order_engine::{
    db_types::{EntityType, Money, OrderEvent, OrderStatus, PaymentMethod, PaymentStatus},
    events::{CancelCause, DomainEvent, EventKind},
    gateway::{GatewayError, TradeQuery, TradeStatus},
    payment_objects::{NotifyAck, PaymentFlowConfig, TimeoutOutcome},
};

use crate::support::{cart_item, notification, test_payment_config, Harness};

mod support;

/// Payments are due the moment they are created or requested.
fn instant_timeouts() -> PaymentFlowConfig {
    PaymentFlowConfig { timeout_window: Duration::zero(), ..test_payment_config() }
}

#[tokio::test]
async fn pending_payments_within_their_window_are_not_due() {
    let h = Harness::new().await;
    h.stock(1, 10).await;
    let checkout = h.orders.reserve(7, vec![cart_item(100, 1, 1, 100)], None).await.unwrap();
    let outcome = h.payments().process_timeout(&checkout.payment.payment_no).await.unwrap();
    assert_eq!(outcome, TimeoutOutcome::NotDue);
    assert_eq!(h.gateway.count("query"), 0);
    h.tear_down().await;
}

#[tokio::test]
async fn never_requested_payments_time_out_without_asking_the_gateway() {
    let h = Harness::with_config(instant_timeouts()).await;
    h.stock(1, 10).await;
    let checkout = h.orders.reserve(7, vec![cart_item(100, 1, 3, 100)], None).await.unwrap();
    assert_eq!(h.levels(1).await, (10, 3));
    let no = &checkout.payment.payment_no;
    let outcome = h.payments().process_timeout(no).await.unwrap();
    assert_eq!(outcome, TimeoutOutcome::TimedOut);
    assert!(h.gateway.calls().is_empty());

    let timed_out = h.payments().fetch_payment_with_orders(no).await.unwrap();
    assert_eq!(timed_out.payment.status, PaymentStatus::Timeout);
    let order = &timed_out.orders[0];
    assert_eq!(order.status, OrderStatus::Cancelled);
    let logs = h.orders.order_logs(&order.order_no).await.unwrap();
    assert_eq!(logs.last().map(|l| l.event), Some(OrderEvent::Expire));
    assert_eq!(h.levels(1).await, (10, 0));

    assert_eq!(h.events.wait_for(EventKind::PaymentCancelled, 1).await, 1);
    let event = h.events.events().into_iter().find(|e| e.kind() == EventKind::PaymentCancelled).unwrap();
    let DomainEvent::PaymentCancelled(ev) = event else { unreachable!() };
    assert_eq!(ev.cause, CancelCause::Timeout);

    // Firing again changes nothing
    let outcome = h.payments().process_timeout(no).await.unwrap();
    assert_eq!(outcome, TimeoutOutcome::NotPending(PaymentStatus::Timeout));
    h.tear_down().await;
}

#[tokio::test]
async fn unpaid_trades_are_closed_at_the_deadline() {
    let h = Harness::with_config(instant_timeouts()).await;
    h.stock(1, 10).await;
    let checkout = h.orders.reserve(7, vec![cart_item(100, 1, 1, 10000)], None).await.unwrap();
    let no = &checkout.payment.payment_no;
    h.payments().pay(no, 7, PaymentMethod::Alipay).await.unwrap();
    h.gateway.script_query(Ok(TradeQuery { status: TradeStatus::WaitBuyerPay, trade_no: None, total_amount: None }));
    let outcome = h.payments().process_timeout(no).await.unwrap();
    assert_eq!(outcome, TimeoutOutcome::TimedOut);
    assert_eq!(h.gateway.calls(), vec![format!("create:{no}"), format!("query:{no}"), format!("close:{no}")]);
    let timed_out = h.payments().fetch_payment_with_orders(no).await.unwrap();
    assert_eq!(timed_out.payment.status, PaymentStatus::Timeout);
    assert_eq!(timed_out.orders[0].status, OrderStatus::Cancelled);
    assert_eq!(h.levels(1).await, (10, 0));

    // The webhook shows up after all. It must not bring the payment back.
    let ack = h.payments().process_notify(PaymentMethod::Alipay, &notification(no, "TRADE_SUCCESS", "100.00")).await;
    assert_eq!(ack, NotifyAck::Success);
    assert_eq!(h.payments().fetch_payment(no).await.unwrap().status, PaymentStatus::Timeout);
    h.tear_down().await;
}

#[tokio::test]
async fn lost_notifications_are_reconciled_at_the_deadline() {
    let h = Harness::with_config(instant_timeouts()).await;
    h.stock(1, 10).await;
    let checkout = h.orders.reserve(7, vec![cart_item(100, 1, 1, 10000)], None).await.unwrap();
    let no = &checkout.payment.payment_no;
    h.payments().pay(no, 7, PaymentMethod::Alipay).await.unwrap();
    h.gateway.script_query(Ok(TradeQuery {
        status: TradeStatus::Success,
        trade_no: Some("2024060122009".into()),
        total_amount: Some(Money::from_cents(10000)),
    }));
    let outcome = h.payments().process_timeout(no).await.unwrap();
    assert_eq!(outcome, TimeoutOutcome::Reconciled(NotifyAck::Success));
    assert_eq!(h.gateway.count("close"), 0);
    let paid = h.payments().fetch_payment_with_orders(no).await.unwrap();
    assert_eq!(paid.payment.status, PaymentStatus::Success);
    assert_eq!(paid.payment.trade_no.as_deref(), Some("2024060122009"));
    assert_eq!(paid.orders[0].status, OrderStatus::Processing);
    assert_eq!(h.levels(1).await, (10, 1));
    assert_eq!(h.events.wait_for(EventKind::PaymentSucceeded, 1).await, 1);
    h.tear_down().await;
}

#[tokio::test]
async fn unreachable_gateways_defer_the_timeout() {
    let h = Harness::with_config(instant_timeouts()).await;
    h.stock(1, 10).await;
    let checkout = h.orders.reserve(7, vec![cart_item(100, 1, 1, 10000)], None).await.unwrap();
    let no = &checkout.payment.payment_no;
    h.payments().pay(no, 7, PaymentMethod::Alipay).await.unwrap();
    h.gateway.script_query(Err(GatewayError::Transport("timed out".into())));
    let outcome = h.payments().process_timeout(no).await.unwrap();
    assert_eq!(outcome, TimeoutOutcome::Deferred);
    assert_eq!(h.payments().fetch_payment(no).await.unwrap().status, PaymentStatus::Pending);
    assert_eq!(h.levels(1).await, (10, 1));
    // The next check gets through
    let outcome = h.payments().process_timeout(no).await.unwrap();
    assert_eq!(outcome, TimeoutOutcome::TimedOut);
    h.tear_down().await;
}

#[tokio::test]
async fn sweeping_expires_every_overdue_payment() {
    let h = Harness::with_config(instant_timeouts()).await;
    h.stock(1, 10).await;
    let a = h.orders.reserve(7, vec![cart_item(100, 1, 1, 100)], None).await.unwrap();
    let b = h.orders.reserve(8, vec![cart_item(100, 1, 2, 100)], None).await.unwrap();
    let ad = h.payments().create_entity_payment(9, EntityType::AdvertisementPlacement, 42, Money::from_units(30)).await.unwrap();
    assert_eq!(h.payments().rehydrate_timeouts().await.unwrap(), 3);
    let outcomes = h.payments().expire_overdue_payments().await.unwrap();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|(_, o)| *o == TimeoutOutcome::TimedOut));
    for no in [&a.payment.payment_no, &b.payment.payment_no, &ad.payment_no] {
        assert_eq!(h.payments().fetch_payment(no).await.unwrap().status, PaymentStatus::Timeout);
    }
    assert_eq!(h.levels(1).await, (10, 0));
    assert_eq!(h.payments().rehydrate_timeouts().await.unwrap(), 0);
    assert!(h.payments().expire_overdue_payments().await.unwrap().is_empty());
    h.tear_down().await;
}

#[tokio::test]
async fn entity_payments_stand_alone() {
    let h = Harness::new().await;
    let err = h.payments().create_entity_payment(9, EntityType::Order, 1, Money::from_units(1)).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_PARAMETER");
    let err = h
        .payments()
        .create_entity_payment(9, EntityType::AdvertisementPlacement, 42, Money::ZERO)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_PARAMETER");
    let ad = h.payments().create_entity_payment(9, EntityType::AdvertisementPlacement, 42, Money::from_units(30)).await.unwrap();
    assert_eq!(ad.entity_id, Some(42));
    h.payments().pay(&ad.payment_no, 9, PaymentMethod::Alipay).await.unwrap();
    assert_eq!(h.gateway.trade_requests()[0].subject, "ADVERTISEMENT_PLACEMENT");
    let ack =
        h.payments().process_notify(PaymentMethod::Alipay, &notification(&ad.payment_no, "TRADE_SUCCESS", "30.00")).await;
    assert_eq!(ack, NotifyAck::Success);
    assert_eq!(h.payments().fetch_payment(&ad.payment_no).await.unwrap().status, PaymentStatus::Success);
    h.tear_down().await;
}
