use mall_order_engine::{
    db_types::{Actor, Money, OrderStatus, PaymentMethod, PaymentStatus},
    events::{DomainEvent, EventKind},
    gateway::{GatewayError, RefundOutcome},
    order_objects::Checkout,
    EngineError,
};

use crate::support::{cart_item, notification, Harness};

mod support;

/// A paid checkout of 100.00 (60.00 at store 100, 40.00 at store 200).
async fn paid_checkout(h: &Harness) -> Checkout {
    h.stock(1, 10).await;
    h.stock(2, 10).await;
    let cart = vec![cart_item(100, 1, 3, 2000), cart_item(200, 2, 1, 4000)];
    let checkout = h.orders.reserve(7, cart, None).await.unwrap();
    let no = &checkout.payment.payment_no;
    h.payments().pay(no, 7, PaymentMethod::Alipay).await.unwrap();
    let ack = h.payments().process_notify(PaymentMethod::Alipay, &notification(no, "TRADE_SUCCESS", "100.00")).await;
    assert_eq!(ack.as_str(), "success");
    checkout
}

fn system_busy() -> GatewayError {
    GatewayError::rejected("20000", "ACQ.SYSTEM_ERROR", "Service Currently Unavailable")
}

#[tokio::test]
async fn exhausted_retries_fail_the_refund() {
    let h = Harness::new().await;
    let checkout = paid_checkout(&h).await;
    let no = &checkout.payment.payment_no;
    for _ in 0..3 {
        h.gateway.script_refund(Err(system_busy()));
    }
    let err = h.payments().refund(no, None, Money::from_units(10), "Goodwill").await.unwrap_err();
    assert!(matches!(err, EngineError::RefundFailed(_)), "{err:?}");
    assert_eq!(h.gateway.count("refund"), 3);
    // Every attempt re-used the same request number
    let calls = h.gateway.calls().into_iter().filter(|c| c.starts_with("refund:")).collect::<Vec<_>>();
    assert!(calls.iter().all(|c| *c == calls[0]));

    let payment = h.payments().fetch_payment(no).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(payment.refunded_amount, Money::ZERO);
    assert_eq!(h.events.wait_for(EventKind::RefundFailed, 1).await, 1);
    h.events.settle().await;
    assert_eq!(h.events.count(EventKind::RefundSucceeded), 0);
    h.tear_down().await;
}

#[tokio::test]
async fn business_rejections_are_not_retried() {
    let h = Harness::new().await;
    let checkout = paid_checkout(&h).await;
    h.gateway.script_refund(Err(GatewayError::rejected("40004", "ACQ.TRADE_STATUS_ERROR", "Business Failed")));
    let err = h.payments().refund(&checkout.payment.payment_no, None, Money::from_units(10), "x").await.unwrap_err();
    assert_eq!(err.code(), "REFUND_FAILED");
    assert_eq!(h.gateway.count("refund"), 1);
    h.tear_down().await;
}

#[tokio::test]
async fn transient_failures_are_retried_until_the_refund_goes_through() {
    let h = Harness::new().await;
    let checkout = paid_checkout(&h).await;
    let no = &checkout.payment.payment_no;
    h.gateway.script_refund(Err(system_busy()));
    h.gateway.script_refund(Err(GatewayError::Transport("connection reset".into())));
    h.gateway
        .script_refund(Ok(RefundOutcome { refund_fee: Money::from_units(100), trade_no: Some("2024060122001".into()) }));
    let payment = h.payments().refund(no, None, Money::from_units(100), "Out of stock").await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(payment.refunded_amount, Money::from_units(100));
    assert_eq!(h.gateway.count("refund"), 3);
    assert_eq!(h.events.wait_for(EventKind::RefundSucceeded, 1).await, 1);
    h.tear_down().await;
}

#[tokio::test]
async fn partial_refunds_accumulate() {
    let h = Harness::new().await;
    let checkout = paid_checkout(&h).await;
    let no = &checkout.payment.payment_no;
    let payment = h.payments().refund(no, None, Money::from_units(30), "Damaged box").await.unwrap();
    assert_eq!(payment.status, PaymentStatus::PartiallyRefunded);
    assert_eq!(payment.refunded_amount, Money::from_units(30));
    let err = h.payments().refund(no, None, Money::from_units(71), "Too much").await.unwrap_err();
    assert_eq!(err.code(), "INVALID_PARAMETER");
    let err = h.payments().refund(no, None, Money::ZERO, "Nothing").await.unwrap_err();
    assert_eq!(err.code(), "INVALID_PARAMETER");
    let payment = h.payments().refund(no, None, Money::from_units(70), "The rest").await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);
    // The two refunds were sent under different request numbers
    let calls = h.gateway.calls().into_iter().filter(|c| c.starts_with("refund:")).collect::<Vec<_>>();
    assert_eq!(calls.len(), 2);
    assert_ne!(calls[0], calls[1]);
    let err = h.payments().refund(no, None, Money::from_cents(1), "Again").await.unwrap_err();
    assert!(matches!(err, EngineError::PaymentStateInvalid { status: PaymentStatus::Refunded, .. }));
    h.tear_down().await;
}

#[tokio::test]
async fn unpaid_payments_cannot_be_refunded() {
    let h = Harness::new().await;
    h.stock(1, 10).await;
    let checkout = h.orders.reserve(7, vec![cart_item(100, 1, 1, 100)], None).await.unwrap();
    let err = h.payments().refund(&checkout.payment.payment_no, None, Money::from_cents(100), "x").await.unwrap_err();
    assert_eq!(err.code(), "PAYMENT_STATE_INVALID");
    assert_eq!(h.gateway.count("refund"), 0);
    h.tear_down().await;
}

#[tokio::test]
async fn cancelling_a_paid_order_refunds_it() {
    let h = Harness::new().await;
    let checkout = paid_checkout(&h).await;
    let order = checkout.orders.iter().find(|o| o.store_id == 100).unwrap();
    assert_eq!(h.levels(1).await, (10, 3));

    let cancelled = h.orders.cancel(&order.order_no, Actor::User(7), "Changed my mind").await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::RefundProcessing);
    assert_eq!(h.levels(1).await, (10, 0));
    assert_eq!(h.events.wait_for(EventKind::RefundRequested, 1).await, 1);
    let request = h.events.events().into_iter().find_map(|e| match e {
        DomainEvent::RefundRequested(ev) => Some(ev),
        _ => None,
    });
    let request = request.unwrap();
    assert_eq!(request.order_no.as_ref(), Some(&order.order_no));
    assert_eq!(request.amount, Money::from_units(60));

    // The refund worker picks the request up
    let payment = h
        .payments()
        .refund(&request.payment_no, request.order_no.as_ref(), request.amount, &request.reason)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::PartiallyRefunded);
    assert_eq!(h.gateway.calls().last(), Some(&format!("refund:{}", order.order_no)));
    let settled = h.orders.fetch_order(&order.order_no).await.unwrap();
    assert_eq!(settled.status, OrderStatus::Cancelled);
    assert_eq!(settled.refunded_amount, Money::from_units(60));
    // The other store's order is untouched
    let other = checkout.orders.iter().find(|o| o.store_id == 200).unwrap();
    assert_eq!(h.orders.fetch_order(&other.order_no).await.unwrap().status, OrderStatus::Processing);
    // An order cannot be refunded beyond its own total
    let err = h.payments().refund(&request.payment_no, Some(&order.order_no), Money::from_cents(1), "x").await.unwrap_err();
    assert_eq!(err.code(), "INVALID_PARAMETER");
    h.tear_down().await;
}

#[tokio::test]
async fn refunds_must_name_an_order_of_the_payment() {
    let h = Harness::new().await;
    let checkout = paid_checkout(&h).await;
    h.stock(3, 10).await;
    let other = h.orders.reserve(8, vec![cart_item(300, 3, 1, 100)], None).await.unwrap();
    let err = h
        .payments()
        .refund(&checkout.payment.payment_no, Some(&other.orders[0].order_no), Money::from_cents(100), "x")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_PARAMETER");
    h.tear_down().await;
}
