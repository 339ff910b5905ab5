//! Request handler definitions
//!
//! Define each route and its handler here. Anything longer than a few lines of glue belongs in the engine.
//!
//! Handlers never block. Every engine call is async, so a worker thread keeps serving other requests while a
//! checkout waits on the database or a refund waits on the gateway.
//!
//! The caller's identity comes from the `X-User-Id` header (see [`Caller`]). Store and admin routes trust the
//! store or admin id they are given; the login filter in front of this server decides who may reach them.
use std::collections::HashMap;

use actix_web::{get, web, HttpResponse, Responder};
use log::*;
use mall_order_engine::{
    db_types::{Actor, OrderNo, PaymentMethod, PaymentNo, ProductId, StoreId},
    EngineError,
    InventoryApi,
    OrderEngineDatabase,
    OrderFlowApi,
};

use crate::{
    data_objects::{
        AfterSaleRequest,
        CheckoutRequest,
        EntityPaymentRequest,
        JsonResponse,
        PayRequest,
        PayoutAccountRequest,
        ReasonRequest,
        RefundRequestParams,
        ShipRequest,
        StockUpdateRequest,
    },
    errors::ServerError,
    helpers::Caller,
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Checkout  ----------------------------------------------------
route!(checkout => Post "/checkout" impl OrderEngineDatabase);
/// Places the caller's cart. The cart is split into one order per store, stock is locked for every line, and a
/// single payment covering all the orders is returned together with them.
pub async fn checkout<B: OrderEngineDatabase>(
    caller: Caller,
    body: web::Json<CheckoutRequest>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let CheckoutRequest { items, remark } = body.into_inner();
    debug!("💻️ POST checkout for user #{} with {} items", caller.id(), items.len());
    let result = api.reserve(caller.id(), items, remark).await?;
    Ok(HttpResponse::Ok().json(result))
}

//----------------------------------------------   Payments  ----------------------------------------------------
route!(entity_payment => Post "/payments" impl OrderEngineDatabase);
/// Creates a stand-alone payment for something that is not a shopping order, such as an advertisement placement.
pub async fn entity_payment<B: OrderEngineDatabase>(
    caller: Caller,
    body: web::Json<EntityPaymentRequest>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let EntityPaymentRequest { entity_type, entity_id, amount } = body.into_inner();
    debug!("💻️ POST {entity_type} payment for user #{}", caller.id());
    let payment = api.payments().create_entity_payment(caller.id(), entity_type, entity_id, amount).await?;
    Ok(HttpResponse::Ok().json(payment))
}

route!(pay => Post "/payments/{payment_no}/pay" impl OrderEngineDatabase);
/// Creates a gateway trade for the payment and returns the URL the buyer must be sent to.
pub async fn pay<B: OrderEngineDatabase>(
    caller: Caller,
    path: web::Path<String>,
    body: web::Json<PayRequest>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let payment_no = PaymentNo::new(path.into_inner());
    debug!("💻️ POST pay {payment_no} with {}", body.method);
    let redirect = api.payments().pay(&payment_no, caller.id(), body.method).await?;
    Ok(HttpResponse::Ok().json(redirect))
}

route!(cancel_payment => Post "/payments/{payment_no}/cancel" impl OrderEngineDatabase);
pub async fn cancel_payment<B: OrderEngineDatabase>(
    caller: Caller,
    path: web::Path<String>,
    body: Option<web::Json<ReasonRequest>>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let payment_no = PaymentNo::new(path.into_inner());
    let body = body.map(|b| b.into_inner()).unwrap_or_default();
    debug!("💻️ POST cancel payment {payment_no}");
    let payment =
        api.payments().cancel_payment(&payment_no, Actor::User(caller.id()), body.reason_or("Cancelled by buyer")).await?;
    Ok(HttpResponse::Ok().json(payment))
}

route!(payment => Get "/payments/{payment_no}" impl OrderEngineDatabase);
/// The payment with every order it covers. Buyers only see their own payments.
pub async fn payment<B: OrderEngineDatabase>(
    caller: Caller,
    path: web::Path<String>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let payment_no = PaymentNo::new(path.into_inner());
    debug!("💻️ GET payment {payment_no}");
    let result = api.payments().fetch_payment_with_orders(&payment_no).await?;
    if result.payment.user_id != caller.id() {
        return Err(forbidden(format!("Payment {payment_no} belongs to another user")));
    }
    Ok(HttpResponse::Ok().json(result))
}

route!(trade_status => Get "/payments/{payment_no}/trade" impl OrderEngineDatabase);
/// The live trade status, straight from the gateway.
pub async fn trade_status<B: OrderEngineDatabase>(
    caller: Caller,
    path: web::Path<String>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let payment_no = PaymentNo::new(path.into_inner());
    debug!("💻️ GET trade status for {payment_no}");
    let payment = api.payments().fetch_payment(&payment_no).await?;
    if payment.user_id != caller.id() {
        return Err(forbidden(format!("Payment {payment_no} belongs to another user")));
    }
    let trade = api.payments().query_trade(&payment_no).await?;
    Ok(HttpResponse::Ok().json(trade))
}

route!(notify => Post "/notify/{method}" impl OrderEngineDatabase);
/// Asynchronous trade notifications from a payment gateway.
///
/// The gateway expects the literal text `success` once the notification has been handled, and keeps re-delivering
/// until it gets it. Duplicates are harmless.
pub async fn notify<B: OrderEngineDatabase>(
    path: web::Path<String>,
    form: web::Form<HashMap<String, String>>,
    api: web::Data<OrderFlowApi<B>>,
) -> HttpResponse {
    let name = path.into_inner();
    let ack = match name.to_ascii_uppercase().parse::<PaymentMethod>() {
        Ok(method) => {
            debug!("💻️ POST {method} notification");
            api.payments().process_notify(method, &form.into_inner()).await
        },
        Err(e) => {
            warn!("💻️ Notification for unknown payment method {name}. {e}");
            mall_order_engine::payment_objects::NotifyAck::Fail
        },
    };
    HttpResponse::Ok().content_type("text/plain").body(ack.as_str())
}

//----------------------------------------------   Orders  ----------------------------------------------------
route!(order => Get "/orders/{order_no}" impl OrderEngineDatabase);
/// The order with its full transition log. Buyers only see their own orders.
pub async fn order<B: OrderEngineDatabase>(
    caller: Caller,
    path: web::Path<String>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_no = OrderNo::new(path.into_inner());
    debug!("💻️ GET order {order_no}");
    let result = api.fetch_order_with_logs(&order_no).await?;
    if result.order.user_id != caller.id() {
        return Err(forbidden(format!("Order {order_no} belongs to another user")));
    }
    Ok(HttpResponse::Ok().json(result))
}

route!(cancel_order => Post "/orders/{order_no}/cancel" impl OrderEngineDatabase);
/// Buyer cancellation. Unpaid orders are simply cancelled; paid ones move to refund processing.
pub async fn cancel_order<B: OrderEngineDatabase>(
    caller: Caller,
    path: web::Path<String>,
    body: Option<web::Json<ReasonRequest>>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_no = OrderNo::new(path.into_inner());
    let body = body.map(|b| b.into_inner()).unwrap_or_default();
    debug!("💻️ POST cancel order {order_no}");
    let order = api.cancel(&order_no, Actor::User(caller.id()), body.reason_or("Cancelled by buyer")).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(confirm_receipt => Post "/orders/{order_no}/receipt" impl OrderEngineDatabase);
pub async fn confirm_receipt<B: OrderEngineDatabase>(
    caller: Caller,
    path: web::Path<String>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_no = OrderNo::new(path.into_inner());
    debug!("💻️ POST receipt for {order_no}");
    let order = api.confirm_receipt(&order_no, caller.id()).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(after_sale => Post "/orders/{order_no}/after_sale" impl OrderEngineDatabase);
/// Buyer-side after-sale steps: requesting or withdrawing a return, sending the goods back, raising a dispute.
pub async fn after_sale<B: OrderEngineDatabase>(
    caller: Caller,
    path: web::Path<String>,
    body: web::Json<AfterSaleRequest>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_no = OrderNo::new(path.into_inner());
    let AfterSaleRequest { event, message } = body.into_inner();
    debug!("💻️ POST {event} on {order_no} by user #{}", caller.id());
    let order = api.transition(&order_no, Actor::User(caller.id()), event, &message).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(deliver => Post "/orders/{order_no}/deliver" impl OrderEngineDatabase);
/// Delivery confirmation from the logistics integration.
pub async fn deliver<B: OrderEngineDatabase>(
    path: web::Path<String>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_no = OrderNo::new(path.into_inner());
    debug!("💻️ POST deliver {order_no}");
    let order = api.deliver(&order_no, Actor::System).await?;
    Ok(HttpResponse::Ok().json(order))
}

//----------------------------------------------   Stores  ----------------------------------------------------
route!(store_confirm => Post "/stores/{store_id}/orders/{order_no}/confirm" impl OrderEngineDatabase);
pub async fn store_confirm<B: OrderEngineDatabase>(
    path: web::Path<(StoreId, String)>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let (store_id, order_no) = path.into_inner();
    let order_no = OrderNo::new(order_no);
    debug!("💻️ POST confirm {order_no} by store #{store_id}");
    let order = api.confirm(store_id, &order_no).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(store_refuse => Post "/stores/{store_id}/orders/{order_no}/refuse" impl OrderEngineDatabase);
pub async fn store_refuse<B: OrderEngineDatabase>(
    path: web::Path<(StoreId, String)>,
    body: Option<web::Json<ReasonRequest>>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let (store_id, order_no) = path.into_inner();
    let order_no = OrderNo::new(order_no);
    let body = body.map(|b| b.into_inner()).unwrap_or_default();
    debug!("💻️ POST refuse {order_no} by store #{store_id}");
    let order = api.refuse(store_id, &order_no, body.reason_or("Refused by the store")).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(store_ship => Post "/stores/{store_id}/orders/{order_no}/ship" impl OrderEngineDatabase);
pub async fn store_ship<B: OrderEngineDatabase>(
    path: web::Path<(StoreId, String)>,
    body: web::Json<ShipRequest>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let (store_id, order_no) = path.into_inner();
    let order_no = OrderNo::new(order_no);
    debug!("💻️ POST ship {order_no} by store #{store_id}");
    let order = api.ship(store_id, &order_no, &body.carrier, &body.tracking_no).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(store_after_sale => Post "/stores/{store_id}/orders/{order_no}/after_sale" impl OrderEngineDatabase);
/// Store-side after-sale steps: approving or refusing a return and refunding the inspected goods.
pub async fn store_after_sale<B: OrderEngineDatabase>(
    path: web::Path<(StoreId, String)>,
    body: web::Json<AfterSaleRequest>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let (store_id, order_no) = path.into_inner();
    let order_no = OrderNo::new(order_no);
    let AfterSaleRequest { event, message } = body.into_inner();
    debug!("💻️ POST {event} on {order_no} by store #{store_id}");
    let order = api.transition(&order_no, Actor::Store(store_id), event, &message).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(payout_account => Put "/stores/{store_id}/payout_account" impl OrderEngineDatabase);
pub async fn payout_account<B: OrderEngineDatabase>(
    path: web::Path<StoreId>,
    body: web::Json<PayoutAccountRequest>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let store_id = path.into_inner();
    debug!("💻️ PUT {} payout account for store #{store_id}", body.method);
    let account = api.payments().register_payout_account(store_id, body.method, &body.account).await?;
    Ok(HttpResponse::Ok().json(account))
}

//----------------------------------------------   Admin  ----------------------------------------------------
route!(admin_close => Post "/admin/orders/{order_no}/close" impl OrderEngineDatabase);
pub async fn admin_close<B: OrderEngineDatabase>(
    caller: Caller,
    path: web::Path<String>,
    body: Option<web::Json<ReasonRequest>>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_no = OrderNo::new(path.into_inner());
    let body = body.map(|b| b.into_inner()).unwrap_or_default();
    info!("💻️ POST close {order_no} by admin #{}", caller.id());
    let order = api.close(&order_no, caller.id(), body.reason_or("Closed by an administrator")).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(admin_refund => Post "/admin/payments/{payment_no}/refund" impl OrderEngineDatabase);
/// A manual refund, e.g. after an automatic one ran out of retries.
pub async fn admin_refund<B: OrderEngineDatabase>(
    caller: Caller,
    path: web::Path<String>,
    body: web::Json<RefundRequestParams>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let payment_no = PaymentNo::new(path.into_inner());
    let RefundRequestParams { order_no, amount, reason } = body.into_inner();
    info!("💻️ POST refund of {amount} on {payment_no} by admin #{}", caller.id());
    let reason = if reason.trim().is_empty() { "Refund issued by an administrator".to_string() } else { reason };
    let payment = api.payments().refund(&payment_no, order_no.as_ref(), amount, &reason).await?;
    Ok(HttpResponse::Ok().json(payment))
}

//----------------------------------------------   Inventory  ----------------------------------------------------
route!(inventory => Get "/inventory/{product_id}" impl OrderEngineDatabase);
pub async fn inventory<B: OrderEngineDatabase>(
    path: web::Path<ProductId>,
    api: web::Data<InventoryApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let product_id = path.into_inner();
    trace!("💻️ GET inventory for product #{product_id}");
    let inventory = api.fetch_inventory(product_id).await?;
    Ok(HttpResponse::Ok().json(inventory))
}

route!(update_inventory => Put "/inventory/{product_id}" impl OrderEngineDatabase);
pub async fn update_inventory<B: OrderEngineDatabase>(
    path: web::Path<ProductId>,
    body: web::Json<StockUpdateRequest>,
    api: web::Data<InventoryApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let product_id = path.into_inner();
    let StockUpdateRequest { quantity, threshold } = body.into_inner();
    debug!("💻️ PUT inventory for product #{product_id}");
    let mut updated = None;
    if let Some(quantity) = quantity {
        updated = Some(api.set_stock(product_id, quantity).await?);
    }
    if let Some(threshold) = threshold {
        updated = Some(api.set_threshold(product_id, threshold).await?);
    }
    match updated {
        Some(inventory) => Ok(HttpResponse::Ok().json(inventory)),
        None => Ok(HttpResponse::BadRequest().json(JsonResponse::failure("Nothing to update"))),
    }
}

fn forbidden(message: String) -> ServerError {
    ServerError::Engine(EngineError::Forbidden(message))
}
