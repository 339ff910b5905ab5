#![allow(dead_code)]

pub mod gateway;
pub mod prepare_env;

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};

use log::*;
use mall_order_engine::{
    db_types::{CartItem, Money, PaymentMethod, PaymentNo, ProductId, ProductSnapshot, StoreId},
    events::{BoxedHookFuture, DomainEvent, EventBus, EventHandlers, EventHooks, EventKind},
    helpers::RetryPolicy,
    order_objects::OrderFlowConfig,
    payment_objects::PaymentFlowConfig,
    GatewayRegistry,
    InventoryApi,
    OrderEngineDatabase,
    OrderFlowApi,
    PaymentFlowApi,
    SqliteDatabase,
    TimeoutSchedulerHandle,
};
use sqlx::{migrate::MigrateDatabase, Sqlite};

use self::{
    gateway::ScriptedGateway,
    prepare_env::{prepare_test_env, random_db_path},
};

/// Collects every event handed to the best-effort subscribers.
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

macro_rules! record_into {
    ($hooks:ident, $recorder:ident, $($hook:ident => $variant:ident),+ $(,)?) => {
        $(
            let r = $recorder.clone();
            $hooks.$hook(move |ev| {
                r.events.lock().unwrap().push(DomainEvent::$variant(ev));
                Box::pin(async {}) as BoxedHookFuture
            });
        )+
    };
}

impl EventRecorder {
    pub fn hooks(&self) -> EventHooks {
        let mut hooks = EventHooks::default();
        let recorder = self;
        record_into!(hooks, recorder,
            on_payment_succeeded => PaymentSucceeded,
            on_payment_failed => PaymentFailed,
            on_payment_cancelled => PaymentCancelled,
            on_order_confirmed => OrderConfirmed,
            on_order_shipped => OrderShipped,
            on_order_delivered => OrderDelivered,
            on_order_cancelled => OrderCancelled,
            on_refund_requested => RefundRequested,
            on_refund_succeeded => RefundSucceeded,
            on_refund_failed => RefundFailed,
            on_low_stock => LowStock,
        );
        hooks
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().unwrap().iter().filter(|e| e.kind() == kind).count()
    }

    /// Waits until at least `n` events of `kind` have arrived, giving up after two seconds.
    pub async fn wait_for(&self, kind: EventKind, n: usize) -> usize {
        for _ in 0..100 {
            let count = self.count(kind);
            if count >= n {
                return count;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.count(kind)
    }

    /// Lets in-flight deliveries land, for asserting that something did *not* happen.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }
}

pub struct Harness {
    pub orders: OrderFlowApi<SqliteDatabase>,
    pub inventory: InventoryApi<SqliteDatabase>,
    pub gateway: Arc<ScriptedGateway>,
    pub events: EventRecorder,
    pub db: SqliteDatabase,
}

/// Fast retries so failure paths don't slow the suite down.
pub fn test_payment_config() -> PaymentFlowConfig {
    PaymentFlowConfig {
        refund_retry: RetryPolicy::new(3, Duration::from_millis(5)),
        conflict_retry: RetryPolicy::new(10, Duration::from_millis(5)),
        ..Default::default()
    }
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_payment_config()).await
    }

    pub async fn with_config(config: PaymentFlowConfig) -> Self {
        let url = random_db_path();
        let db = prepare_test_env(&url).await;
        let gateway = Arc::new(ScriptedGateway::new(PaymentMethod::Alipay));
        let events = EventRecorder::default();
        let handlers = EventHandlers::new(32, events.hooks());
        let bus = EventBus::new(handlers.producers());
        handlers.start_handlers().await;
        let scheduler = TimeoutSchedulerHandle::detached(config.timeout_window);
        let registry = GatewayRegistry::new().with_gateway(gateway.clone());
        let payments = PaymentFlowApi::new(db.clone(), registry, bus, scheduler, config);
        let order_config = OrderFlowConfig { conflict_retry: RetryPolicy::new(10, Duration::from_millis(5)) };
        let orders = OrderFlowApi::new(payments, order_config);
        let inventory = InventoryApi::new(db.clone(), RetryPolicy::default());
        Self { orders, inventory, gateway, events, db }
    }

    pub fn payments(&self) -> &PaymentFlowApi<SqliteDatabase> {
        self.orders.payments()
    }

    pub async fn stock(&self, product_id: ProductId, quantity: i64) {
        self.inventory.add_product_stock(product_id, quantity, 2).await.expect("Error adding stock");
    }

    /// `(quantity, locked_quantity)` of the product.
    pub async fn levels(&self, product_id: ProductId) -> (i64, i64) {
        let inv = self.inventory.fetch_inventory(product_id).await.expect("Error fetching inventory");
        (inv.quantity, inv.locked_quantity)
    }

    pub async fn tear_down(mut self) {
        let url = self.db.url().to_string();
        if let Err(e) = self.db.close().await {
            error!("🚀️ Failed to close database: {e}");
        }
        drop(self.orders);
        drop(self.inventory);
        if let Err(e) = Sqlite::drop_database(&url).await {
            warn!("🚀️ Failed to drop test database {url}: {e}");
        }
    }
}

pub fn snapshot(product_id: ProductId, price_cents: i64) -> ProductSnapshot {
    ProductSnapshot {
        product_id,
        name: format!("Product {product_id}"),
        price: Money::from_cents(price_cents),
        images: vec![format!("https://img.example.com/{product_id}.png")],
        specs: BTreeMap::from([("colour".to_string(), "red".to_string())]),
    }
}

pub fn cart_item(store_id: StoreId, product_id: ProductId, quantity: i64, price_cents: i64) -> CartItem {
    CartItem { store_id, quantity, snapshot: snapshot(product_id, price_cents) }
}

/// The parameters of a signed trade notification.
pub fn notification(payment_no: &PaymentNo, trade_status: &str, total_amount: &str) -> HashMap<String, String> {
    [
        ("out_trade_no", payment_no.as_str()),
        ("trade_no", "2024060122001400000001"),
        ("trade_status", trade_status),
        ("total_amount", total_amount),
        ("sign_type", "RSA2"),
        ("sign", "valid"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}
