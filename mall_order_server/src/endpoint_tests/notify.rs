use actix_web::{http::StatusCode, test::TestRequest};
use mall_order_engine::db_types::{OrderStatus, PaymentNo, PaymentStatus};
use serde_json::json;

use super::{
    helpers::{as_user, cart_item, notification, TestServer},
    mocks::alipay_gateway,
};

async fn checkout(server: &TestServer) -> PaymentNo {
    server.stock(1, 10, 0).await;
    let items = vec![cart_item(100, 1, 2, 600)];
    let req = as_user(TestRequest::post().uri("/checkout"), 7).set_json(json!({ "items": items }));
    let (status, checkout) = server.call_json(req).await;
    assert_eq!(status, StatusCode::OK);
    PaymentNo::new(checkout["payment"]["payment_no"].as_str().expect("No payment number"))
}

#[actix_web::test]
async fn paid_notifications_are_acknowledged() {
    let _ = env_logger::try_init().ok();
    let server = TestServer::new(alipay_gateway()).await;
    let payment_no = checkout(&server).await;

    let form = notification(payment_no.as_str(), "TRADE_SUCCESS", "12.00");
    let (status, body) = server.call(TestRequest::post().uri("/notify/alipay").set_form(&form)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "success");
    let paid = server.orders.payments().fetch_payment_with_orders(&payment_no).await.unwrap();
    assert_eq!(paid.payment.status, PaymentStatus::Success);
    assert_eq!(paid.payment.trade_no.as_deref(), Some("2024060122001400000001"));
    assert!(paid.orders.iter().all(|o| o.status == OrderStatus::Processing));

    // Gateways re-deliver. The second copy changes nothing, but must still be acknowledged.
    let (status, body) = server.call(TestRequest::post().uri("/notify/ALIPAY").set_form(&form)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "success");
    let again = server.orders.payments().fetch_payment(&payment_no).await.unwrap();
    assert_eq!(again.updated_at, paid.payment.updated_at);
    server.tear_down().await;
}

#[actix_web::test]
async fn forged_notifications_are_refused() {
    let _ = env_logger::try_init().ok();
    let server = TestServer::new(alipay_gateway()).await;
    let payment_no = checkout(&server).await;

    let mut form = notification(payment_no.as_str(), "TRADE_SUCCESS", "12.00");
    form.retain(|(k, _)| *k != "sign");
    form.push(("sign", "forged".to_string()));
    let (status, body) = server.call(TestRequest::post().uri("/notify/alipay").set_form(&form)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "fail");

    let form = notification(payment_no.as_str(), "TRADE_SUCCESS", "12.00");
    let (_, body) = server.call(TestRequest::post().uri("/notify/bitcoin").set_form(&form)).await;
    assert_eq!(body, "fail");
    let (_, body) = server.call(TestRequest::post().uri("/notify/wechat_pay").set_form(&form)).await;
    assert_eq!(body, "fail");

    let payment = server.orders.payments().fetch_payment(&payment_no).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    server.tear_down().await;
}

#[actix_web::test]
async fn short_payments_fail() {
    let _ = env_logger::try_init().ok();
    let server = TestServer::new(alipay_gateway()).await;
    let payment_no = checkout(&server).await;

    let form = notification(payment_no.as_str(), "TRADE_SUCCESS", "11.99");
    let (_, body) = server.call(TestRequest::post().uri("/notify/alipay").set_form(&form)).await;
    assert_eq!(body, "fail");
    let payment = server.orders.payments().fetch_payment(&payment_no).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    server.tear_down().await;
}
