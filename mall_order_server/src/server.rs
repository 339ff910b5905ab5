use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, web::ServiceConfig, App, HttpServer};
use log::*;
use mall_order_engine::{
    events::{EventBus, EventHandlers},
    InventoryApi,
    OrderEngineDatabase,
    OrderFlowApi,
    PaymentFlowApi,
    SqliteDatabase,
    TimeoutScheduler,
};
use tokio::sync::mpsc;

use crate::{
    config::ServerConfig,
    errors::ServerError,
    notifications::{server_hooks, start_refund_worker},
    routes::{
        health,
        AdminCloseRoute,
        AdminRefundRoute,
        AfterSaleRoute,
        CancelOrderRoute,
        CancelPaymentRoute,
        CheckoutRoute,
        ConfirmReceiptRoute,
        DeliverRoute,
        EntityPaymentRoute,
        InventoryRoute,
        NotifyRoute,
        OrderRoute,
        PayRoute,
        PaymentRoute,
        PayoutAccountRoute,
        StoreAfterSaleRoute,
        StoreConfirmRoute,
        StoreRefuseRoute,
        StoreShipRoute,
        TradeStatusRoute,
        UpdateInventoryRoute,
    },
    timeout_worker::start_timeout_worker,
};

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25).await?;
    db.migrate().await?;
    let gateways = config.gateway_registry()?;

    let (refund_queue, refund_requests) = mpsc::unbounded_channel();
    let handlers = EventHandlers::new(config.event_buffer_size, server_hooks(refund_queue));
    let bus = EventBus::new(handlers.producers());
    handlers.start_handlers().await;

    let (scheduler, scheduler_handle) = TimeoutScheduler::new(config.payment_timeout);
    let payments = PaymentFlowApi::new(db.clone(), gateways, bus, scheduler_handle, config.payment_flow_config());
    let _timeouts = start_timeout_worker(payments.clone(), scheduler, config.sweep_interval);
    let _refunds = start_refund_worker(payments.clone(), refund_requests);

    let order_flow_config = config.order_flow_config();
    let inventory = InventoryApi::new(db, order_flow_config.conflict_retry);
    let orders = OrderFlowApi::new(payments, order_flow_config);
    info!("🚀️ Engine ready. Payments time out after {}s", config.payment_timeout.num_seconds());
    let srv = create_server_instance(&config, orders, inventory)?;
    srv.await?;
    Ok(())
}

pub fn create_server_instance(
    config: &ServerConfig,
    orders: OrderFlowApi<SqliteDatabase>,
    inventory: InventoryApi<SqliteDatabase>,
) -> Result<Server, ServerError> {
    let srv = HttpServer::new(move || {
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("mall::access_log"))
            .app_data(web::Data::new(orders.clone()))
            .app_data(web::Data::new(inventory.clone()))
            .configure(configure_routes::<SqliteDatabase>)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}

/// Registers every route, plus a JSON error handler so malformed bodies get the same error shape as everything else.
pub fn configure_routes<B: OrderEngineDatabase>(cfg: &mut ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default().error_handler(|err, _req| ServerError::InvalidRequestBody(err.to_string()).into()),
    )
    .app_data(
        web::PathConfig::default().error_handler(|err, _req| ServerError::InvalidRequestPath(err.to_string()).into()),
    )
    .service(health)
    .service(CheckoutRoute::<B>::new())
    .service(EntityPaymentRoute::<B>::new())
    .service(PayRoute::<B>::new())
    .service(CancelPaymentRoute::<B>::new())
    .service(TradeStatusRoute::<B>::new())
    .service(PaymentRoute::<B>::new())
    .service(NotifyRoute::<B>::new())
    .service(OrderRoute::<B>::new())
    .service(CancelOrderRoute::<B>::new())
    .service(ConfirmReceiptRoute::<B>::new())
    .service(AfterSaleRoute::<B>::new())
    .service(DeliverRoute::<B>::new())
    .service(StoreConfirmRoute::<B>::new())
    .service(StoreRefuseRoute::<B>::new())
    .service(StoreShipRoute::<B>::new())
    .service(StoreAfterSaleRoute::<B>::new())
    .service(PayoutAccountRoute::<B>::new())
    .service(AdminCloseRoute::<B>::new())
    .service(AdminRefundRoute::<B>::new())
    .service(InventoryRoute::<B>::new())
    .service(UpdateInventoryRoute::<B>::new());
}
