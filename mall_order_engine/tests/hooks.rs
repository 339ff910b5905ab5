use std::{
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
    time::Duration,
};

use log::*;
use mall_order_engine::{
    db_types::{Money, PaymentMethod, PaymentStatus},
    events::{BoxedHookFuture, EventBus, EventHandlers, EventHooks},
    helpers::RetryPolicy,
    order_objects::OrderFlowConfig,
    GatewayRegistry,
    InventoryApi,
    OrderEngineDatabase,
    OrderFlowApi,
    PaymentFlowApi,
    SqliteDatabase,
    TimeoutSchedulerHandle,
};
use sqlx::{migrate::MigrateDatabase, Sqlite};

use crate::support::{
    cart_item,
    gateway::ScriptedGateway,
    notification,
    prepare_env::{prepare_test_env, random_db_path},
    test_payment_config,
};

mod support;

#[derive(Default, Clone)]
struct HookCalled {
    called: Arc<AtomicI32>,
}

impl HookCalled {
    pub fn called(&self) {
        let _ = self.called.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> i32 {
        self.called.load(Ordering::SeqCst)
    }

    pub async fn wait_for(&self, n: i32) -> i32 {
        for _ in 0..100 {
            if self.count() >= n {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.count()
    }
}

async fn setup(hooks: EventHooks) -> (OrderFlowApi<SqliteDatabase>, SqliteDatabase) {
    let url = random_db_path();
    let db = prepare_test_env(&url).await;
    let handlers = EventHandlers::new(16, hooks);
    let bus = EventBus::new(handlers.producers());
    handlers.start_handlers().await;
    let config = test_payment_config();
    let registry = GatewayRegistry::new().with_gateway(Arc::new(ScriptedGateway::new(PaymentMethod::Alipay)));
    let scheduler = TimeoutSchedulerHandle::detached(config.timeout_window);
    let payments = PaymentFlowApi::new(db.clone(), registry, bus, scheduler, config);
    let orders = OrderFlowApi::new(payments, OrderFlowConfig {
        conflict_retry: RetryPolicy::new(10, Duration::from_millis(5)),
    });
    InventoryApi::new(db.clone(), RetryPolicy::default()).add_product_stock(1, 10, 2).await.unwrap();
    (orders, db)
}

async fn tear_down(mut db: SqliteDatabase) {
    if let Err(e) = db.close().await {
        error!("🚀️ Failed to close database: {e}");
    }
    Sqlite::drop_database(db.url()).await.unwrap();
}

#[tokio::test]
async fn every_subscriber_hears_about_a_payment() {
    let _ = env_logger::try_init();
    let first = HookCalled::default();
    let second = HookCalled::default();
    let mut hooks = EventHooks::default();
    let f = first.clone();
    let s = second.clone();
    hooks
        .on_payment_succeeded(move |ev| {
            info!("🪝️ Payment {} succeeded", ev.payment.payment_no);
            f.called();
            Box::pin(async {}) as BoxedHookFuture
        })
        .on_payment_succeeded(move |ev| {
            assert_eq!(ev.orders.len(), 2);
            s.called();
            Box::pin(async {}) as BoxedHookFuture
        });
    assert_eq!(hooks.subscriber_count(), 2);
    let (orders, db) = setup(hooks).await;

    let checkout = orders.reserve(7, vec![cart_item(100, 1, 1, 500), cart_item(200, 1, 1, 500)], None).await.unwrap();
    let no = &checkout.payment.payment_no;
    orders.payments().pay(no, 7, PaymentMethod::Alipay).await.unwrap();
    orders.payments().process_notify(PaymentMethod::Alipay, &notification(no, "TRADE_SUCCESS", "10.00")).await;
    // A duplicate notification is not announced again
    orders.payments().process_notify(PaymentMethod::Alipay, &notification(no, "TRADE_SUCCESS", "10.00")).await;

    assert_eq!(first.wait_for(1).await, 1);
    assert_eq!(second.wait_for(1).await, 1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(first.count(), 1);
    tear_down(db).await;
}

#[tokio::test]
async fn a_failing_subscriber_cannot_undo_the_payment() {
    let _ = env_logger::try_init();
    let healthy = HookCalled::default();
    let mut hooks = EventHooks::default();
    let h = healthy.clone();
    hooks
        .on_payment_succeeded(|_| Box::pin(async { panic!("subscriber blew up") }) as BoxedHookFuture)
        .on_payment_succeeded(move |_| {
            h.called();
            Box::pin(async {}) as BoxedHookFuture
        });
    let (orders, db) = setup(hooks).await;

    let checkout = orders.reserve(7, vec![cart_item(100, 1, 2, 1000)], None).await.unwrap();
    let no = &checkout.payment.payment_no;
    orders.payments().pay(no, 7, PaymentMethod::Alipay).await.unwrap();
    let ack = orders.payments().process_notify(PaymentMethod::Alipay, &notification(no, "TRADE_SUCCESS", "20.00")).await;
    assert_eq!(ack.as_str(), "success");
    assert_eq!(healthy.wait_for(1).await, 1);
    let payment = orders.payments().fetch_payment(no).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(payment.amount, Money::from_units(20));
    tear_down(db).await;
}

#[tokio::test]
async fn low_stock_alarms_reach_their_subscribers() {
    let _ = env_logger::try_init();
    let alarms = HookCalled::default();
    let mut hooks = EventHooks::default();
    let a = alarms.clone();
    hooks.on_low_stock(move |ev| {
        assert_eq!(ev.inventory.product_id, 1);
        a.called();
        Box::pin(async {}) as BoxedHookFuture
    });
    let (orders, db) = setup(hooks).await;
    let checkout = orders.reserve(7, vec![cart_item(100, 1, 9, 100)], None).await.unwrap();
    let no = &checkout.payment.payment_no;
    orders.payments().pay(no, 7, PaymentMethod::Alipay).await.unwrap();
    orders.payments().process_notify(PaymentMethod::Alipay, &notification(no, "TRADE_SUCCESS", "9.00")).await;
    orders.confirm(100, &checkout.orders[0].order_no).await.unwrap();
    assert_eq!(alarms.wait_for(1).await, 1);
    tear_down(db).await;
}
