use std::{collections::BTreeMap, sync::Arc};

use actix_web::{http::StatusCode, test, test::TestRequest, web, App};
use chrono::Duration;
use log::*;
use mall_order_engine::{
    db_types::{CartItem, Money, ProductId, ProductSnapshot, StoreId, UserId},
    events::{EventBus, EventHandlers, EventHooks},
    helpers::RetryPolicy,
    order_objects::OrderFlowConfig,
    payment_objects::PaymentFlowConfig,
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    GatewayRegistry,
    InventoryApi,
    OrderEngineDatabase,
    OrderFlowApi,
    PaymentFlowApi,
    SqliteDatabase,
    TimeoutSchedulerHandle,
};
use serde_json::Value;

use super::mocks::MockGateway;
use crate::{helpers::USER_ID_HEADER, server::configure_routes};

/// The engine behind a test server, on a scratch database.
pub struct TestServer {
    pub orders: OrderFlowApi<SqliteDatabase>,
    pub inventory: InventoryApi<SqliteDatabase>,
    db: SqliteDatabase,
}

impl TestServer {
    pub async fn new(gateway: MockGateway) -> Self {
        let db = prepare_test_env(&random_db_path()).await;
        let handlers = EventHandlers::new(16, EventHooks::default());
        let bus = EventBus::new(handlers.producers());
        handlers.start_handlers().await;
        let config = PaymentFlowConfig {
            timeout_window: Duration::seconds(300),
            refund_retry: RetryPolicy::no_retry(),
            ..Default::default()
        };
        let registry = GatewayRegistry::new().with_gateway(Arc::new(gateway));
        let scheduler = TimeoutSchedulerHandle::detached(config.timeout_window);
        let payments = PaymentFlowApi::new(db.clone(), registry, bus, scheduler, config);
        let orders = OrderFlowApi::new(payments, OrderFlowConfig::default());
        let inventory = InventoryApi::new(db.clone(), RetryPolicy::default());
        Self { orders, inventory, db }
    }

    /// Sends the request through a freshly configured app and returns the status and body.
    pub async fn call(&self, req: TestRequest) -> (StatusCode, String) {
        let app = App::new()
            .app_data(web::Data::new(self.orders.clone()))
            .app_data(web::Data::new(self.inventory.clone()))
            .configure(configure_routes::<SqliteDatabase>);
        let service = test::init_service(app).await;
        let res = test::call_service(&service, req.to_request()).await;
        let status = res.status();
        let bytes = test::read_body(res).await;
        let body = String::from_utf8_lossy(&bytes).into_owned();
        debug!("Response: {status} {body}");
        (status, body)
    }

    /// Like [`call`](Self::call), for routes that answer with JSON.
    pub async fn call_json(&self, req: TestRequest) -> (StatusCode, Value) {
        let (status, body) = self.call(req).await;
        let json = serde_json::from_str(&body).unwrap_or_else(|e| panic!("Response is not JSON ({e}): {body}"));
        (status, json)
    }

    pub async fn stock(&self, product_id: ProductId, quantity: i64, threshold: i64) {
        self.inventory.add_product_stock(product_id, quantity, threshold).await.expect("Error adding stock");
    }

    pub async fn tear_down(mut self) {
        if let Err(e) = self.db.close().await {
            warn!("Failed to close test database: {e}");
        }
    }
}

pub fn as_user(req: TestRequest, user_id: UserId) -> TestRequest {
    req.insert_header((USER_ID_HEADER, user_id.to_string()))
}

pub fn cart_item(store_id: StoreId, product_id: ProductId, quantity: i64, price_cents: i64) -> CartItem {
    CartItem {
        store_id,
        quantity,
        snapshot: ProductSnapshot {
            product_id,
            name: format!("Product {product_id}"),
            price: Money::from_cents(price_cents),
            images: vec![],
            specs: BTreeMap::new(),
        },
    }
}

/// The form fields of a signed Alipay trade notification.
pub fn notification(payment_no: &str, trade_status: &str, total_amount: &str) -> Vec<(&'static str, String)> {
    vec![
        ("out_trade_no", payment_no.to_string()),
        ("trade_no", "2024060122001400000001".to_string()),
        ("trade_status", trade_status.to_string()),
        ("total_amount", total_amount.to_string()),
        ("sign_type", "RSA2".to_string()),
        ("sign", "valid".to_string()),
    ]
}
