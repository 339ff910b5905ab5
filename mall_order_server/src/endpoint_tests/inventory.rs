use actix_web::{http::StatusCode, test::TestRequest};
use serde_json::json;

use super::{helpers::TestServer, mocks::alipay_gateway};

#[actix_web::test]
async fn fetch_inventory() {
    let _ = env_logger::try_init().ok();
    let server = TestServer::new(alipay_gateway()).await;
    server.stock(1, 10, 2).await;

    let (status, inv) = server.call_json(TestRequest::get().uri("/inventory/1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(inv["product_id"], 1);
    assert_eq!(inv["quantity"], 10);
    assert_eq!(inv["locked_quantity"], 0);
    assert_eq!(inv["threshold_quantity"], 2);

    let (status, err) = server.call_json(TestRequest::get().uri("/inventory/2")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["code"], "PRODUCT_NOT_FOUND");

    let (status, err) = server.call_json(TestRequest::get().uri("/inventory/two")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "INVALID_PARAMETER");
    server.tear_down().await;
}

#[actix_web::test]
async fn update_inventory() {
    let _ = env_logger::try_init().ok();
    let server = TestServer::new(alipay_gateway()).await;
    server.stock(1, 10, 2).await;

    let req = TestRequest::put().uri("/inventory/1").set_json(json!({ "quantity": 25 }));
    let (status, inv) = server.call_json(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(inv["quantity"], 25);
    assert_eq!(inv["threshold_quantity"], 2);

    let req = TestRequest::put().uri("/inventory/1").set_json(json!({ "quantity": 5, "threshold": 4 }));
    let (status, inv) = server.call_json(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(inv["quantity"], 5);
    assert_eq!(inv["threshold_quantity"], 4);

    let req = TestRequest::put().uri("/inventory/1").set_json(json!({}));
    let (status, res) = server.call_json(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(res["success"], false);

    let req = TestRequest::put().uri("/inventory/1").set_json(json!({ "quantity": -1 }));
    let (status, err) = server.call_json(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "INVALID_PARAMETER");
    server.tear_down().await;
}
