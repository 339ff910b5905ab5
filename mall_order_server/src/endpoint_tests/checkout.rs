use actix_web::{http::StatusCode, test::TestRequest};
use serde_json::json;

use super::{
    helpers::{as_user, cart_item, TestServer},
    mocks::alipay_gateway,
};

#[actix_web::test]
async fn health_check() {
    let _ = env_logger::try_init().ok();
    let server = TestServer::new(alipay_gateway()).await;
    let (status, body) = server.call(TestRequest::get().uri("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "👍️\n");
    server.tear_down().await;
}

#[actix_web::test]
async fn anonymous_callers_are_turned_away() {
    let _ = env_logger::try_init().ok();
    let server = TestServer::new(alipay_gateway()).await;
    let req = TestRequest::post().uri("/checkout").set_json(json!({ "items": [] }));
    let (status, body) = server.call_json(req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");
    server.tear_down().await;
}

#[actix_web::test]
async fn checkout_then_pay() {
    let _ = env_logger::try_init().ok();
    let server = TestServer::new(alipay_gateway()).await;
    server.stock(1, 10, 2).await;
    server.stock(2, 5, 0).await;

    let items = vec![cart_item(100, 1, 2, 600), cart_item(200, 2, 1, 1_000)];
    let req = as_user(TestRequest::post().uri("/checkout"), 7).set_json(json!({ "items": items, "remark": "Ring twice" }));
    let (status, checkout) = server.call_json(req).await;
    assert_eq!(status, StatusCode::OK);
    let orders = checkout["orders"].as_array().expect("orders is not an array");
    assert_eq!(orders.len(), 2);
    assert!(orders.iter().all(|o| o["status"] == "AWAITING_PAYMENT"));
    assert_eq!(checkout["payment"]["amount"], 2_200);
    assert_eq!(checkout["payment"]["status"], "PENDING");
    let payment_no = checkout["payment"]["payment_no"].as_str().expect("No payment number").to_string();
    let order_no = orders[0]["order_no"].as_str().expect("No order number").to_string();

    let inv = server.inventory.fetch_inventory(1).await.unwrap();
    assert_eq!((inv.quantity, inv.locked_quantity), (10, 2));

    let req = as_user(TestRequest::get().uri(&format!("/payments/{payment_no}")), 7);
    let (status, payment) = server.call_json(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["orders"].as_array().map(Vec::len), Some(2));

    let req = as_user(TestRequest::get().uri(&format!("/orders/{order_no}")), 7);
    let (status, order) = server.call_json(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["logs"][0]["status"], "AWAITING_PAYMENT");

    let req = as_user(TestRequest::get().uri(&format!("/orders/{order_no}")), 8);
    let (status, err) = server.call_json(req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["code"], "FORBIDDEN");

    let req = as_user(TestRequest::post().uri(&format!("/payments/{payment_no}/pay")), 7)
        .set_json(json!({ "method": "ALIPAY" }));
    let (status, redirect) = server.call_json(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(redirect["method"], "ALIPAY");
    assert_eq!(
        redirect["redirect_url"],
        format!("https://pay.example.com/checkout?out_trade_no={payment_no}").as_str()
    );
    server.tear_down().await;
}

#[actix_web::test]
async fn checkout_errors_carry_a_code() {
    let _ = env_logger::try_init().ok();
    let server = TestServer::new(alipay_gateway()).await;
    server.stock(1, 1, 0).await;

    let items = vec![cart_item(100, 1, 3, 600)];
    let req = as_user(TestRequest::post().uri("/checkout"), 7).set_json(json!({ "items": items }));
    let (status, err) = server.call_json(req).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "INSUFFICIENT_STOCK");

    let items = vec![cart_item(100, 99, 1, 600)];
    let req = as_user(TestRequest::post().uri("/checkout"), 7).set_json(json!({ "items": items }));
    let (status, err) = server.call_json(req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["code"], "PRODUCT_NOT_FOUND");

    let req = as_user(TestRequest::post().uri("/checkout"), 7).set_json(json!({ "items": [] }));
    let (status, err) = server.call_json(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "INVALID_PARAMETER");

    let req = as_user(TestRequest::post().uri("/checkout"), 7).set_json(json!({ "cart": "nope" }));
    let (status, err) = server.call_json(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "INVALID_PARAMETER");

    // Nothing was reserved by any of the failed attempts
    let inv = server.inventory.fetch_inventory(1).await.unwrap();
    assert_eq!(inv.locked_quantity, 0);
    server.tear_down().await;
}

#[actix_web::test]
async fn buyers_cancel_unpaid_orders() {
    let _ = env_logger::try_init().ok();
    let server = TestServer::new(alipay_gateway()).await;
    server.stock(1, 10, 2).await;
    let items = vec![cart_item(100, 1, 4, 600)];
    let req = as_user(TestRequest::post().uri("/checkout"), 7).set_json(json!({ "items": items }));
    let (_, checkout) = server.call_json(req).await;
    let order_no = checkout["orders"][0]["order_no"].as_str().expect("No order number").to_string();

    let req = as_user(TestRequest::post().uri(&format!("/orders/{order_no}/cancel")), 7);
    let (status, order) = server.call_json(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "CANCELLED");
    let inv = server.inventory.fetch_inventory(1).await.unwrap();
    assert_eq!((inv.quantity, inv.locked_quantity), (10, 0));

    // Shipping a cancelled order is not a legal move
    let req = TestRequest::post()
        .uri(&format!("/stores/100/orders/{order_no}/ship"))
        .set_json(json!({ "carrier": "SF Express", "tracking_no": "SF123" }));
    let (status, err) = server.call_json(req).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "INVALID_OPERATION");
    server.tear_down().await;
}
