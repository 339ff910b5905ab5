use std::{collections::BTreeMap, fmt::Debug};

use log::*;

use crate::{
    db::traits::{OrderEngineDatabase, OrderManagement, OrderQueryFilter, PaymentManagement, UnitOfWork},
    db_types::{
        Actor,
        CartItem,
        EntityType,
        Money,
        NewOrder,
        NewOrderItem,
        NewPayment,
        Order,
        OrderEvent,
        OrderLog,
        OrderNo,
        OrderStatus,
        PaymentNo,
        PaymentStatus,
        StoreId,
        UserId,
    },
    engine_api::{
        order_objects::{Checkout, OrderFlowConfig, OrderWithLogs},
        EngineError,
        PaymentFlowApi,
    },
    events::{
        DomainEvent,
        LowStockEvent,
        OrderCancelledEvent,
        OrderConfirmedEvent,
        OrderDeliveredEvent,
        OrderShippedEvent,
        RefundRequestedEvent,
    },
    helpers::{new_order_no, new_payment_no, retry_on_conflict},
    inventory,
    state_machine,
};

/// `OrderFlowApi` drives orders through their life: checkout reserves stock and creates the orders with their
/// payment, and every later status change goes through the order state machine. Stock follows the order: it is
/// locked at checkout, committed when the store confirms, and released (or restocked) when the order is cancelled.
///
/// Payment-side work (trades, notifications, timeouts and refunds) is delegated to the [`PaymentFlowApi`] it wraps.
#[derive(Clone)]
pub struct OrderFlowApi<B> {
    db: B,
    payments: PaymentFlowApi<B>,
    config: OrderFlowConfig,
}

impl<B> Debug for OrderFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi")
    }
}

impl<B: Clone> OrderFlowApi<B> {
    pub fn new(payments: PaymentFlowApi<B>, config: OrderFlowConfig) -> Self {
        Self { db: payments.db().clone(), payments, config }
    }

    pub fn payments(&self) -> &PaymentFlowApi<B> {
        &self.payments
    }

    pub fn config(&self) -> &OrderFlowConfig {
        &self.config
    }
}

fn order_not_found(order_no: &OrderNo) -> EngineError {
    EngineError::OrderNotFound(order_no.to_string())
}

/// Buyers act on their own orders and stores on the orders placed with them. Admins and the system may act on any.
fn authorize(order: &Order, actor: Actor) -> Result<(), EngineError> {
    match actor {
        Actor::User(id) if id == order.user_id => Ok(()),
        Actor::Store(id) if id == order.store_id => Ok(()),
        Actor::Admin(_) | Actor::System => Ok(()),
        _ => Err(EngineError::Forbidden(format!("{actor} may not act on order {}", order.order_no))),
    }
}

fn refund_request(order: &Order, reason: &str) -> Option<DomainEvent> {
    let Some(payment_no) = order.payment_no.clone() else {
        warn!("🔄️ Order {} needs a refund, but it has no payment. Skipping the refund request.", order.order_no);
        return None;
    };
    Some(DomainEvent::RefundRequested(RefundRequestedEvent {
        payment_no,
        order_no: Some(order.order_no.clone()),
        amount: order.total_amount - order.refunded_amount,
        reason: reason.to_string(),
    }))
}

async fn load_order<T: OrderManagement>(tx: &mut T, order_no: &OrderNo) -> Result<Order, EngineError> {
    tx.fetch_order_by_no(order_no).await?.ok_or_else(|| order_not_found(order_no))
}

fn validate_cart(items: &[CartItem]) -> Result<(), EngineError> {
    if items.is_empty() {
        return Err(EngineError::InvalidParameter("The cart is empty".into()));
    }
    for item in items {
        if item.quantity <= 0 {
            return Err(EngineError::InvalidParameter(format!(
                "Quantity for product #{} must be positive, not {}",
                item.product_id(),
                item.quantity
            )));
        }
        if item.snapshot.price < Money::ZERO {
            return Err(EngineError::InvalidParameter(format!(
                "Price for product #{} cannot be negative",
                item.product_id()
            )));
        }
    }
    // Every order and payment total is a partial sum of this one, so none of them can overflow either
    items
        .iter()
        .try_fold(Money::ZERO, |total, item| {
            item.snapshot.price.checked_mul(item.quantity).and_then(|subtotal| total.checked_add(subtotal))
        })
        .ok_or_else(|| EngineError::InvalidParameter("The cart total is too large".into()))?;
    Ok(())
}

impl<B> OrderFlowApi<B>
where B: OrderEngineDatabase
{
    /// Checkout. Splits the cart into one order per store, locks the stock of every line, and creates a single
    /// pending payment covering all the orders, in one unit of work. Either all of it happens or none of it does.
    ///
    /// The payment's timeout check is scheduled from its creation time, so an abandoned checkout releases its stock
    /// even if the buyer never picks a payment method.
    pub async fn reserve(
        &self,
        user_id: UserId,
        items: Vec<CartItem>,
        remark: Option<String>,
    ) -> Result<Checkout, EngineError> {
        validate_cart(&items)?;
        let mut by_store = BTreeMap::<StoreId, Vec<NewOrderItem>>::new();
        for item in items {
            by_store.entry(item.store_id).or_default().push(NewOrderItem {
                product_id: item.product_id(),
                quantity: item.quantity,
                snapshot: item.snapshot,
            });
        }
        let payment_no = new_payment_no();
        let orders = by_store
            .into_iter()
            .map(|(store_id, items)| NewOrder {
                order_no: new_order_no(),
                user_id,
                store_id,
                remark: remark.clone(),
                payment_no: Some(payment_no.clone()),
                items,
            })
            .collect::<Vec<_>>();
        let orders = orders.as_slice();
        let payment_no = &payment_no;
        let checkout = retry_on_conflict(&self.config.conflict_retry, "reserve", move || {
            self.try_reserve(user_id, payment_no, orders)
        })
        .await?;
        let payment = &checkout.payment;
        self.payments.scheduler().schedule(payment.payment_no.clone(), payment.created_at);
        info!(
            "🔄️ User #{user_id} checked out {} orders under payment {} ({})",
            checkout.orders.len(),
            payment.payment_no,
            payment.amount
        );
        Ok(checkout)
    }

    async fn try_reserve(
        &self,
        user_id: UserId,
        payment_no: &PaymentNo,
        orders: &[NewOrder],
    ) -> Result<Checkout, EngineError> {
        let mut tx = self.db.begin().await?;
        for item in orders.iter().flat_map(|o| o.items.iter()) {
            inventory::lock(&mut tx, item.product_id, item.quantity).await?;
        }
        let payment = tx
            .insert_payment(NewPayment {
                payment_no: payment_no.clone(),
                user_id,
                amount: orders.iter().map(NewOrder::total_amount).sum(),
                entity_type: EntityType::Order,
                entity_id: None,
            })
            .await?;
        let mut placed = Vec::with_capacity(orders.len());
        for order in orders {
            let order = tx.insert_order(order.clone()).await?;
            state_machine::record_creation(&mut tx, &order, Actor::User(user_id)).await?;
            placed.push(order);
        }
        tx.commit().await?;
        Ok(Checkout { orders: placed, payment })
    }

    pub async fn fetch_order(&self, order_no: &OrderNo) -> Result<Order, EngineError> {
        let mut tx = self.db.begin().await?;
        let order = load_order(&mut tx, order_no).await?;
        tx.rollback().await?;
        Ok(order)
    }

    pub async fn fetch_order_with_logs(&self, order_no: &OrderNo) -> Result<OrderWithLogs, EngineError> {
        let mut tx = self.db.begin().await?;
        let order = load_order(&mut tx, order_no).await?;
        let logs = tx.fetch_order_logs(order.id).await?;
        tx.rollback().await?;
        Ok(OrderWithLogs { order, logs })
    }

    /// The audit trail of the order, oldest entry first.
    pub async fn order_logs(&self, order_no: &OrderNo) -> Result<Vec<OrderLog>, EngineError> {
        self.fetch_order_with_logs(order_no).await.map(|o| o.logs)
    }

    pub async fn fetch_orders_for_payment(&self, payment_no: &PaymentNo) -> Result<Vec<Order>, EngineError> {
        let mut tx = self.db.begin().await?;
        let orders = tx.fetch_orders_for_payment(payment_no).await?;
        tx.rollback().await?;
        Ok(orders)
    }

    pub async fn search_orders(&self, filter: OrderQueryFilter) -> Result<Vec<Order>, EngineError> {
        let mut tx = self.db.begin().await?;
        let orders = tx.search_orders(filter).await?;
        tx.rollback().await?;
        Ok(orders)
    }

    /// Cancels an order.
    ///
    /// * An order that was never paid for is cancelled outright and its reserved stock released. No money moves.
    /// * A paid order goes to refund processing. Reserved stock is released (or, once the store has confirmed, put
    ///   back into stock) and a refund is requested.
    ///
    /// Cancelling an order that is already cancelled is a no-op.
    pub async fn cancel(&self, order_no: &OrderNo, actor: Actor, reason: &str) -> Result<Order, EngineError> {
        let (order, events) = retry_on_conflict(&self.config.conflict_retry, "cancel order", move || {
            self.try_cancel(order_no, actor, reason)
        })
        .await?;
        self.payments.bus().publish(events).await;
        if order.status == OrderStatus::Cancelled {
            self.settle_abandoned_payment(&order).await?;
        }
        Ok(order)
    }

    async fn try_cancel(
        &self,
        order_no: &OrderNo,
        actor: Actor,
        reason: &str,
    ) -> Result<(Order, Vec<DomainEvent>), EngineError> {
        let mut tx = self.db.begin().await?;
        let order = load_order(&mut tx, order_no).await?;
        authorize(&order, actor)?;
        let message = format!("Cancelled: {reason}");
        let (updated, needs_refund) = match order.status {
            OrderStatus::Cancelled => {
                debug!("🔄️ Order {order_no} is already cancelled");
                return Ok((order, vec![]));
            },
            OrderStatus::AwaitingPayment => {
                self.release_items(&mut tx, &order).await?;
                let (o, _) = state_machine::apply(
                    &mut tx,
                    &order,
                    actor,
                    OrderEvent::Cancel,
                    OrderStatus::Cancelled,
                    &message,
                )
                .await?;
                (o, false)
            },
            OrderStatus::Processing | OrderStatus::AwaitingShipment => {
                if order.status == OrderStatus::Processing {
                    self.release_items(&mut tx, &order).await?;
                } else {
                    for item in &order.items {
                        inventory::restock(&mut tx, item.product_id, item.quantity).await?;
                    }
                }
                let (o, _) = state_machine::apply(
                    &mut tx,
                    &order,
                    actor,
                    OrderEvent::Cancel,
                    OrderStatus::RefundProcessing,
                    &message,
                )
                .await?;
                (o, true)
            },
            status => {
                return Err(EngineError::InvalidTransition { order_no: order_no.clone(), status, event: OrderEvent::Cancel });
            },
        };
        tx.commit().await?;
        let mut events =
            vec![DomainEvent::OrderCancelled(OrderCancelledEvent { order: updated.clone(), reason: reason.to_string() })];
        if needs_refund {
            events.extend(refund_request(&updated, reason));
        }
        Ok((updated, events))
    }

    async fn release_items<T: crate::db::traits::InventoryManagement>(
        &self,
        tx: &mut T,
        order: &Order,
    ) -> Result<(), EngineError> {
        for item in &order.items {
            inventory::unlock(tx, item.product_id, item.quantity).await?;
        }
        Ok(())
    }

    /// Once every order of a still-pending payment has been cancelled, nothing is left to pay for, so the payment
    /// itself is cancelled too (closing any open trade).
    async fn settle_abandoned_payment(&self, order: &Order) -> Result<(), EngineError> {
        let Some(payment_no) = &order.payment_no else {
            return Ok(());
        };
        let payment = self.payments.fetch_payment(payment_no).await?;
        if payment.status != PaymentStatus::Pending {
            return Ok(());
        }
        let orders = self.fetch_orders_for_payment(payment_no).await?;
        if orders.iter().any(|o| o.status == OrderStatus::AwaitingPayment) {
            debug!("🔄️ Payment {payment_no} still covers open orders. Leaving it pending.");
            return Ok(());
        }
        self.payments.cancel_payment(payment_no, Actor::System, "All covered orders were cancelled").await?;
        Ok(())
    }

    /// The store accepts a paid order. The reserved stock is committed as sold, and a low-stock alarm is raised for
    /// every product that falls to or below its threshold.
    pub async fn confirm(&self, store_id: StoreId, order_no: &OrderNo) -> Result<Order, EngineError> {
        let (order, events) = retry_on_conflict(&self.config.conflict_retry, "confirm order", move || {
            self.try_confirm(store_id, order_no)
        })
        .await?;
        self.payments.bus().publish(events).await;
        Ok(order)
    }

    async fn try_confirm(&self, store_id: StoreId, order_no: &OrderNo) -> Result<(Order, Vec<DomainEvent>), EngineError> {
        let mut tx = self.db.begin().await?;
        let order = load_order(&mut tx, order_no).await?;
        authorize(&order, Actor::Store(store_id))?;
        let (updated, _) = state_machine::apply(
            &mut tx,
            &order,
            Actor::Store(store_id),
            OrderEvent::Confirm,
            OrderStatus::AwaitingShipment,
            "Confirmed by the store",
        )
        .await?;
        let mut events = vec![DomainEvent::OrderConfirmed(OrderConfirmedEvent { order: updated.clone() })];
        for item in &order.items {
            let inv = inventory::decrease(&mut tx, item.product_id, item.quantity).await?;
            if inv.is_low() {
                warn!("📦️ Product #{} is running low: {} left", inv.product_id, inv.quantity);
                events.push(DomainEvent::LowStock(LowStockEvent { inventory: inv }));
            }
        }
        tx.commit().await?;
        Ok((updated, events))
    }

    /// The store declines a paid order. The reservation is released and the buyer is refunded.
    pub async fn refuse(&self, store_id: StoreId, order_no: &OrderNo, reason: &str) -> Result<Order, EngineError> {
        let (order, events) = retry_on_conflict(&self.config.conflict_retry, "refuse order", move || {
            self.try_refuse(store_id, order_no, reason)
        })
        .await?;
        self.payments.bus().publish(events).await;
        Ok(order)
    }

    async fn try_refuse(
        &self,
        store_id: StoreId,
        order_no: &OrderNo,
        reason: &str,
    ) -> Result<(Order, Vec<DomainEvent>), EngineError> {
        let mut tx = self.db.begin().await?;
        let order = load_order(&mut tx, order_no).await?;
        authorize(&order, Actor::Store(store_id))?;
        let message = format!("Refused by the store: {reason}");
        let (updated, _) = state_machine::apply(
            &mut tx,
            &order,
            Actor::Store(store_id),
            OrderEvent::Refuse,
            OrderStatus::RefundProcessing,
            &message,
        )
        .await?;
        self.release_items(&mut tx, &order).await?;
        tx.commit().await?;
        let mut events =
            vec![DomainEvent::OrderCancelled(OrderCancelledEvent { order: updated.clone(), reason: message.clone() })];
        events.extend(refund_request(&updated, &message));
        Ok((updated, events))
    }

    pub async fn ship(
        &self,
        store_id: StoreId,
        order_no: &OrderNo,
        carrier: &str,
        tracking_no: &str,
    ) -> Result<Order, EngineError> {
        let (carrier, tracking_no) = (carrier.trim(), tracking_no.trim());
        if carrier.is_empty() || tracking_no.is_empty() {
            return Err(EngineError::InvalidParameter("Shipping needs a carrier and a tracking number".into()));
        }
        let mut tx = self.db.begin().await?;
        let order = load_order(&mut tx, order_no).await?;
        authorize(&order, Actor::Store(store_id))?;
        let message = format!("Shipped with {carrier}, tracking number {tracking_no}");
        let (updated, _) = state_machine::apply(
            &mut tx,
            &order,
            Actor::Store(store_id),
            OrderEvent::Ship,
            OrderStatus::InTransit,
            &message,
        )
        .await?;
        tx.commit().await?;
        let event = OrderShippedEvent { order: updated.clone(), carrier: carrier.into(), tracking_no: tracking_no.into() };
        self.payments.bus().publish(vec![DomainEvent::OrderShipped(event)]).await;
        Ok(updated)
    }

    /// The carrier delivered the parcel. Buyers cannot mark their own orders delivered.
    pub async fn deliver(&self, order_no: &OrderNo, actor: Actor) -> Result<Order, EngineError> {
        if matches!(actor, Actor::User(_)) {
            return Err(EngineError::Forbidden("Buyers confirm receipt instead".into()));
        }
        let mut tx = self.db.begin().await?;
        let order = load_order(&mut tx, order_no).await?;
        authorize(&order, actor)?;
        let (updated, _) = state_machine::apply(
            &mut tx,
            &order,
            actor,
            OrderEvent::Deliver,
            OrderStatus::AwaitingReceipt,
            "Delivered",
        )
        .await?;
        tx.commit().await?;
        self.payments.bus().publish(vec![DomainEvent::OrderDelivered(OrderDeliveredEvent { order: updated.clone() })]).await;
        Ok(updated)
    }

    pub async fn confirm_receipt(&self, order_no: &OrderNo, user_id: UserId) -> Result<Order, EngineError> {
        let mut tx = self.db.begin().await?;
        let order = load_order(&mut tx, order_no).await?;
        if order.user_id != user_id {
            return Err(EngineError::Forbidden(format!("Order {order_no} belongs to another user")));
        }
        let (updated, _) = state_machine::apply(
            &mut tx,
            &order,
            Actor::User(user_id),
            OrderEvent::ConfirmReceipt,
            OrderStatus::Completed,
            "Receipt confirmed by the buyer",
        )
        .await?;
        tx.commit().await?;
        Ok(updated)
    }

    /// Administrative close. Any non-terminal order can be closed.
    ///
    /// Stock still reserved for the order is released, and stock already committed to an unshipped order is put back.
    /// Paid orders that have not shipped yet are refunded in full. Once the goods are on their way, refunds go through
    /// the after-sale flow instead.
    pub async fn close(&self, order_no: &OrderNo, admin_id: UserId, reason: &str) -> Result<Order, EngineError> {
        let (order, events) = retry_on_conflict(&self.config.conflict_retry, "close order", move || {
            self.try_close(order_no, admin_id, reason)
        })
        .await?;
        self.payments.bus().publish(events).await;
        Ok(order)
    }

    async fn try_close(
        &self,
        order_no: &OrderNo,
        admin_id: UserId,
        reason: &str,
    ) -> Result<(Order, Vec<DomainEvent>), EngineError> {
        let mut tx = self.db.begin().await?;
        let order = load_order(&mut tx, order_no).await?;
        let message = format!("Closed by an administrator: {reason}");
        let (updated, _) = state_machine::apply(
            &mut tx,
            &order,
            Actor::Admin(admin_id),
            OrderEvent::Close,
            OrderStatus::Closed,
            &message,
        )
        .await?;
        let needs_refund = match order.status {
            OrderStatus::AwaitingPayment => {
                self.release_items(&mut tx, &order).await?;
                false
            },
            OrderStatus::Processing => {
                self.release_items(&mut tx, &order).await?;
                true
            },
            OrderStatus::AwaitingShipment => {
                for item in &order.items {
                    inventory::restock(&mut tx, item.product_id, item.quantity).await?;
                }
                true
            },
            _ => false,
        };
        tx.commit().await?;
        let mut events =
            vec![DomainEvent::OrderCancelled(OrderCancelledEvent { order: updated.clone(), reason: message.clone() })];
        if needs_refund {
            events.extend(refund_request(&updated, &message));
        }
        Ok((updated, events))
    }

    /// Applies one of the after-sale events (returns, inspections, disputes). Events that lead to refund processing
    /// also request the refund.
    ///
    /// Lifecycle events with their own operation (pay, confirm, ship, cancel, ...) are rejected here.
    pub async fn transition(
        &self,
        order_no: &OrderNo,
        actor: Actor,
        event: OrderEvent,
        message: &str,
    ) -> Result<Order, EngineError> {
        use OrderEvent as E;
        if !matches!(
            event,
            E::RequestReturn |
                E::CancelReturn |
                E::ApproveReturn |
                E::RefuseReturn |
                E::SendReturn |
                E::Refund |
                E::RaiseDispute |
                E::CancelDispute |
                E::ResolveDispute
        ) {
            return Err(EngineError::InvalidParameter(format!("{event} has a dedicated operation")));
        }
        let mut tx = self.db.begin().await?;
        let order = load_order(&mut tx, order_no).await?;
        authorize(&order, actor)?;
        let expected = state_machine::next_status(order.status, event).ok_or_else(|| EngineError::InvalidTransition {
            order_no: order_no.clone(),
            status: order.status,
            event,
        })?;
        let (updated, _) = state_machine::apply(&mut tx, &order, actor, event, expected, message).await?;
        tx.commit().await?;
        if updated.status == OrderStatus::RefundProcessing {
            self.payments.bus().publish(refund_request(&updated, message).into_iter().collect()).await;
        }
        Ok(updated)
    }
}
