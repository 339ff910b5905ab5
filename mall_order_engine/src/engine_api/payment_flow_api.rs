//! # Payment coordinator
//!
//! `PaymentFlowApi` owns the payment side of the order lifecycle: creating gateway trades, reconciling gateway
//! notifications, enforcing the payment window, cancelling, and refunding.
//!
//! The gateway is treated as an authority that is trusted only as far as it can be verified. Notifications must carry
//! a valid signature, and a reported amount that differs from the recorded one fails the payment rather than
//! accepting it. Everything that reacts to a notification is idempotent, so the gateway may deliver as often as it
//! likes.
use std::{collections::HashMap, fmt::Debug};

use chrono::Utc;
use log::*;

use crate::{
    db::traits::{OrderEngineDatabase, OrderManagement, PaymentManagement, PaymentUpdate, UnitOfWork},
    db_types::{
        Actor,
        EntityType,
        Money,
        NewPayment,
        Order,
        OrderNo,
        OrderStatus,
        Payment,
        PaymentMethod,
        PaymentNo,
        PaymentStatus,
        PayoutAccount,
        StoreId,
        UserId,
    },
    engine_api::{
        payment_objects::{NotifyAck, PaymentFlowConfig, PaymentWithOrders, TimeoutOutcome, TradeRedirect},
        EngineError,
    },
    events::{
        CancelCause,
        DomainEvent,
        EventBus,
        PaymentCancelledEvent,
        PaymentFailedEvent,
        PaymentSucceededEvent,
        RefundFailedEvent,
        RefundSucceededEvent,
    },
    gateway::{
        trade_subject,
        GatewayError,
        GatewayRegistry,
        PaymentGateway,
        RefundOutcome,
        RefundRequest,
        SettlementShare,
        TradeNotification,
        TradeQuery,
        TradeRequest,
        TradeStatus,
    },
    helpers::{new_payment_no, retry_on_conflict},
    timeout_scheduler::TimeoutSchedulerHandle,
};

#[derive(Clone)]
pub struct PaymentFlowApi<B> {
    db: B,
    gateways: GatewayRegistry,
    bus: EventBus,
    scheduler: TimeoutSchedulerHandle,
    config: PaymentFlowConfig,
}

impl<B> Debug for PaymentFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentFlowApi ({:?})", self.gateways)
    }
}

impl<B> PaymentFlowApi<B> {
    pub fn new(
        db: B,
        gateways: GatewayRegistry,
        bus: EventBus,
        scheduler: TimeoutSchedulerHandle,
        config: PaymentFlowConfig,
    ) -> Self {
        Self { db, gateways, bus, scheduler, config }
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn scheduler(&self) -> &TimeoutSchedulerHandle {
        &self.scheduler
    }

    pub fn config(&self) -> &PaymentFlowConfig {
        &self.config
    }

    fn gateway(&self, method: PaymentMethod) -> Result<std::sync::Arc<dyn PaymentGateway>, EngineError> {
        self.gateways.get(method).ok_or(EngineError::UnsupportedPaymentMethod(method))
    }
}

fn not_found(payment_no: &PaymentNo) -> EngineError {
    EngineError::PaymentNotFound(payment_no.to_string())
}

fn state_invalid(payment: &Payment, reason: impl Into<String>) -> EngineError {
    EngineError::PaymentStateInvalid {
        payment_no: payment.payment_no.to_string(),
        status: payment.status,
        reason: reason.into(),
    }
}

impl<B> PaymentFlowApi<B>
where B: OrderEngineDatabase
{
    pub async fn fetch_payment(&self, payment_no: &PaymentNo) -> Result<Payment, EngineError> {
        let mut tx = self.db.begin().await?;
        let payment = tx.fetch_payment_by_no(payment_no).await?.ok_or_else(|| not_found(payment_no))?;
        tx.rollback().await?;
        Ok(payment)
    }

    pub async fn fetch_payment_with_orders(&self, payment_no: &PaymentNo) -> Result<PaymentWithOrders, EngineError> {
        let mut tx = self.db.begin().await?;
        let payment = tx.fetch_payment_by_no(payment_no).await?.ok_or_else(|| not_found(payment_no))?;
        let orders = tx.fetch_orders_for_payment(payment_no).await?;
        tx.rollback().await?;
        Ok(PaymentWithOrders { payment, orders })
    }

    /// Creates a stand-alone payment for something other than a shopping order, e.g. an advertisement placement.
    pub async fn create_entity_payment(
        &self,
        user_id: UserId,
        entity_type: EntityType,
        entity_id: i64,
        amount: Money,
    ) -> Result<Payment, EngineError> {
        if entity_type == EntityType::Order {
            return Err(EngineError::InvalidParameter("Order payments are created at checkout".into()));
        }
        if !amount.is_positive() {
            return Err(EngineError::InvalidParameter(format!("Payment amount must be positive, not {amount}")));
        }
        let mut tx = self.db.begin().await?;
        let payment = tx
            .insert_payment(NewPayment {
                payment_no: new_payment_no(),
                user_id,
                amount,
                entity_type,
                entity_id: Some(entity_id),
            })
            .await?;
        tx.commit().await?;
        self.scheduler.schedule(payment.payment_no.clone(), payment.created_at);
        info!("💳️ Payment {} created for {entity_type} #{entity_id} ({amount})", payment.payment_no);
        Ok(payment)
    }

    /// The buyer picked a payment method. Checks that the payment can still be paid and creates the trade.
    pub async fn pay(
        &self,
        payment_no: &PaymentNo,
        user_id: UserId,
        method: PaymentMethod,
    ) -> Result<TradeRedirect, EngineError> {
        self.gateway(method)?;
        let PaymentWithOrders { payment, orders } = self.fetch_payment_with_orders(payment_no).await?;
        if payment.user_id != user_id {
            return Err(EngineError::Forbidden(format!("Payment {payment_no} belongs to another user")));
        }
        if payment.status != PaymentStatus::Pending {
            return Err(state_invalid(&payment, "Only pending payments can be paid"));
        }
        if payment.entity_type == EntityType::Order {
            if let Some(order) = orders.iter().find(|o| o.status != OrderStatus::AwaitingPayment) {
                return Err(state_invalid(&payment, format!("Order {} is {}", order.order_no, order.status)));
            }
            let total = orders.iter().map(|o| o.total_amount).sum::<Money>();
            if total != payment.amount {
                return Err(state_invalid(
                    &payment,
                    format!("The orders now total {total}, but the payment is for {}", payment.amount),
                ));
            }
        }
        let redirect_url = self.create_trade(&payment, &orders, method).await?;
        Ok(TradeRedirect { payment_no: payment_no.clone(), method, redirect_url })
    }

    /// Asks the gateway for a trade and returns the buyer's redirect target. The payment window starts now.
    pub async fn create_trade(
        &self,
        payment: &Payment,
        orders: &[Order],
        method: PaymentMethod,
    ) -> Result<String, EngineError> {
        let gateway = self.gateway(method)?;
        let request = TradeRequest {
            payment_no: payment.payment_no.clone(),
            amount: payment.amount,
            subject: trade_subject(orders, payment.entity_type),
            timeout: self.config.timeout_window,
            settlements: self.settlement_shares(orders, method).await?,
        };
        let redirect_url = gateway.create_trade(&request).await.map_err(|e| {
            warn!("💳️ Could not create a trade for {}: {e}", payment.payment_no);
            EngineError::from(e)
        })?;
        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let update = PaymentUpdate::default().with_trade_request(method, now);
        if tx.update_payment(&payment.payment_no, PaymentStatus::Pending, update).await?.is_none() {
            let current = tx.fetch_payment_by_no(&payment.payment_no).await?.ok_or_else(|| not_found(&payment.payment_no))?;
            return Err(state_invalid(&current, "The payment changed while the trade was being created"));
        }
        tx.commit().await?;
        self.scheduler.schedule(payment.payment_no.clone(), now);
        info!("💳️ Trade requested for {} via {method} ({})", payment.payment_no, payment.amount);
        Ok(redirect_url)
    }

    async fn settlement_shares(&self, orders: &[Order], method: PaymentMethod) -> Result<Vec<SettlementShare>, EngineError> {
        let mut tx = self.db.begin().await?;
        let mut shares = Vec::new();
        for order in orders {
            if Some(order.store_id) == self.config.platform_store_id {
                continue;
            }
            match tx.fetch_payout_account(order.store_id, method).await? {
                Some(account) => shares.push(SettlementShare {
                    store_id: order.store_id,
                    order_no: order.order_no.clone(),
                    account: account.account,
                    amount: order.total_amount,
                }),
                None => debug!("💳️ Store #{} has no {method} payout account. No share for it.", order.store_id),
            }
        }
        tx.rollback().await?;
        Ok(shares)
    }

    /// Best-effort request to close an open trade. Failures are logged and otherwise ignored.
    pub async fn close_trade(&self, payment: &Payment) {
        let Some(method) = payment.payment_method else {
            trace!("💳️ Payment {} never had a trade. Nothing to close.", payment.payment_no);
            return;
        };
        let Some(gateway) = self.gateways.get(method) else {
            warn!("💳️ Cannot close trade {}: no {method} gateway is configured", payment.payment_no);
            return;
        };
        match gateway.close(&payment.payment_no).await {
            Ok(()) => debug!("💳️ Trade {} closed", payment.payment_no),
            Err(e) => warn!("💳️ Could not close trade {}: {e}. Ignoring.", payment.payment_no),
        }
    }

    /// Handles an asynchronous trade notification and returns the acknowledgement the gateway expects.
    pub async fn process_notify(&self, method: PaymentMethod, params: &HashMap<String, String>) -> NotifyAck {
        let Some(gateway) = self.gateways.get(method) else {
            warn!("💳️ Received a {method} notification, but no such gateway is configured");
            return NotifyAck::Fail;
        };
        if let Err(e) = gateway.verify_notification(params) {
            warn!("💳️ Rejected a {method} notification. {e}");
            return NotifyAck::Fail;
        }
        let note = match TradeNotification::from_params(params) {
            Ok(note) => note,
            Err(e) => {
                warn!("💳️ Malformed {method} notification. {e}");
                return NotifyAck::Fail;
            },
        };
        debug!("💳️ Notification for {}: {:?}", note.payment_no, note.trade_status);
        let result = match note.trade_status {
            TradeStatus::Success | TradeStatus::Finished => {
                self.handle_success(&note.payment_no, note.trade_no, note.total_amount).await
            },
            TradeStatus::Closed => self.handle_closed(&note.payment_no).await,
            TradeStatus::WaitBuyerPay => Ok(NotifyAck::Success),
            other => {
                warn!("💳️ Ignoring notification for {} with trade status {other:?}", note.payment_no);
                Ok(NotifyAck::Success)
            },
        };
        result.unwrap_or_else(|e| {
            error!("💳️ Could not process the notification for {}. {e}", note.payment_no);
            NotifyAck::Fail
        })
    }

    /// Applies a gateway-confirmed success. Duplicate and late confirmations are acknowledged without any effect.
    pub async fn handle_success(
        &self,
        payment_no: &PaymentNo,
        trade_no: Option<String>,
        reported_amount: Option<String>,
    ) -> Result<NotifyAck, EngineError> {
        let trade_no = trade_no.as_deref();
        let reported_amount = reported_amount.as_deref();
        let (ack, events) = retry_on_conflict(&self.config.conflict_retry, "payment success", move || {
            self.try_handle_success(payment_no, trade_no, reported_amount)
        })
        .await?;
        if !events.is_empty() {
            self.scheduler.cancel(payment_no);
        }
        self.bus.publish(events).await;
        Ok(ack)
    }

    async fn try_handle_success(
        &self,
        payment_no: &PaymentNo,
        trade_no: Option<&str>,
        reported_amount: Option<&str>,
    ) -> Result<(NotifyAck, Vec<DomainEvent>), EngineError> {
        let mut tx = self.db.begin().await?;
        let payment = tx.fetch_payment_by_no(payment_no).await?.ok_or_else(|| not_found(payment_no))?;
        match payment.status {
            PaymentStatus::Pending => {},
            s if s.is_captured() => {
                debug!("💳️ Payment {payment_no} is already {s}. Duplicate notification ignored.");
                return Ok((NotifyAck::Success, vec![]));
            },
            s => {
                warn!("💳️ Late success notification for {payment_no}, which is already {s}. Ignoring it.");
                return Ok((NotifyAck::Success, vec![]));
            },
        }
        let reported = reported_amount.and_then(|s| s.parse::<Money>().ok());
        if reported != Some(payment.amount) {
            let reason = format!(
                "The gateway reported {} but {} was expected",
                reported_amount.unwrap_or("no amount"),
                payment.amount.to_decimal_string()
            );
            warn!("💳️ Payment {payment_no} failed. {reason}");
            let failed = tx
                .update_payment(payment_no, PaymentStatus::Pending, PaymentUpdate::status(PaymentStatus::Failed))
                .await?
                .ok_or_else(|| EngineError::ConcurrencyConflict(format!("Payment {payment_no} changed")))?;
            tx.commit().await?;
            let event = DomainEvent::PaymentFailed(PaymentFailedEvent::new(failed, reason));
            return Ok((NotifyAck::Fail, vec![event]));
        }
        let mut update = PaymentUpdate::status(PaymentStatus::Success);
        update.transaction_time = Some(Utc::now());
        update.trade_no = trade_no.map(str::to_string);
        let paid = tx
            .update_payment(payment_no, PaymentStatus::Pending, update)
            .await?
            .ok_or_else(|| EngineError::ConcurrencyConflict(format!("Payment {payment_no} changed")))?;
        let orders = tx.fetch_orders_for_payment(payment_no).await?;
        let mut event = DomainEvent::PaymentSucceeded(PaymentSucceededEvent::new(paid, orders));
        let mut events = self.bus.react(&mut tx, &mut event).await?;
        tx.commit().await?;
        info!("💳️ Payment {payment_no} succeeded");
        events.insert(0, event);
        Ok((NotifyAck::Success, events))
    }

    /// The gateway closed the trade. A still-pending payment fails and its orders are cancelled.
    /// Trades that match no payment of ours are acknowledged as well, or the gateway would re-deliver them forever.
    pub async fn handle_closed(&self, payment_no: &PaymentNo) -> Result<NotifyAck, EngineError> {
        match self.abandon_payment(payment_no, PaymentStatus::Failed, CancelCause::TradeClosed, "Trade closed").await {
            Ok(Some(_)) => {},
            Ok(None) => debug!("💳️ Trade {payment_no} closed, but the payment is no longer pending. Nothing to do."),
            Err(EngineError::PaymentNotFound(_)) => {
                warn!("💳️ Trade {payment_no} closed, but there is no such payment. Acknowledging it anyway.")
            },
            Err(e) => return Err(e),
        }
        Ok(NotifyAck::Success)
    }

    /// Moves a pending payment to `status`, then releases the stock and cancels the orders it covers, all in one
    /// unit of work. Returns `None` if the payment was no longer pending.
    async fn abandon_payment(
        &self,
        payment_no: &PaymentNo,
        status: PaymentStatus,
        cause: CancelCause,
        reason: &str,
    ) -> Result<Option<Payment>, EngineError> {
        let result = retry_on_conflict(&self.config.conflict_retry, "abandon payment", move || {
            self.try_abandon_payment(payment_no, status, cause, reason)
        })
        .await?;
        self.scheduler.cancel(payment_no);
        match result {
            Some((payment, events)) => {
                info!("💳️ Payment {payment_no} is now {status}: {}", cause.describe());
                self.bus.publish(events).await;
                Ok(Some(payment))
            },
            None => Ok(None),
        }
    }

    async fn try_abandon_payment(
        &self,
        payment_no: &PaymentNo,
        status: PaymentStatus,
        cause: CancelCause,
        reason: &str,
    ) -> Result<Option<(Payment, Vec<DomainEvent>)>, EngineError> {
        let mut tx = self.db.begin().await?;
        let payment = tx.fetch_payment_by_no(payment_no).await?.ok_or_else(|| not_found(payment_no))?;
        if payment.status != PaymentStatus::Pending {
            return Ok(None);
        }
        let updated = tx
            .update_payment(payment_no, PaymentStatus::Pending, PaymentUpdate::status(status))
            .await?
            .ok_or_else(|| EngineError::ConcurrencyConflict(format!("Payment {payment_no} changed")))?;
        let orders = tx.fetch_orders_for_payment(payment_no).await?;
        let mut event = DomainEvent::PaymentCancelled(PaymentCancelledEvent::new(updated.clone(), orders, cause, reason));
        let mut events = self.bus.react(&mut tx, &mut event).await?;
        tx.commit().await?;
        events.insert(0, event);
        Ok(Some((updated, events)))
    }

    /// Cancels a pending payment on behalf of its owner (or an admin): the scheduled timeout is dropped, the gateway
    /// trade is closed, and the covered orders are cancelled with their stock released.
    pub async fn cancel_payment(&self, payment_no: &PaymentNo, actor: Actor, reason: &str) -> Result<Payment, EngineError> {
        let payment = self.fetch_payment(payment_no).await?;
        match actor {
            Actor::User(id) if id != payment.user_id => {
                return Err(EngineError::Forbidden(format!("Payment {payment_no} belongs to another user")));
            },
            Actor::Store(_) => return Err(EngineError::Forbidden("Stores cannot cancel payments".into())),
            _ => {},
        }
        match payment.status {
            PaymentStatus::Pending => {},
            PaymentStatus::Cancelled => return Ok(payment),
            _ => return Err(state_invalid(&payment, "Only pending payments can be cancelled")),
        }
        self.scheduler.cancel(payment_no);
        self.close_trade(&payment).await;
        let reason = format!("{reason} (by {actor})");
        match self.abandon_payment(payment_no, PaymentStatus::Cancelled, CancelCause::Cancelled, &reason).await? {
            Some(payment) => Ok(payment),
            None => {
                let current = self.fetch_payment(payment_no).await?;
                Err(state_invalid(&current, "The payment changed while it was being cancelled"))
            },
        }
    }

    /// The live trade status according to the gateway.
    pub async fn query_trade(&self, payment_no: &PaymentNo) -> Result<TradeQuery, EngineError> {
        let payment = self.fetch_payment(payment_no).await?;
        let method = payment.payment_method.ok_or_else(|| state_invalid(&payment, "No trade has been created yet"))?;
        let gateway = self.gateway(method)?;
        gateway.query(payment_no).await.map_err(|e| EngineError::GatewayFailure(e.to_string()))
    }

    /// Called once a payment's window has elapsed. The gateway is asked for the authoritative trade status first, so
    /// a lost notification cannot time out a payment that actually went through.
    pub async fn process_timeout(&self, payment_no: &PaymentNo) -> Result<TimeoutOutcome, EngineError> {
        let payment = self.fetch_payment(payment_no).await?;
        if payment.status != PaymentStatus::Pending {
            return Ok(TimeoutOutcome::NotPending(payment.status));
        }
        let deadline = payment.timeout_deadline(self.config.timeout_window);
        if deadline > Utc::now() {
            self.scheduler.schedule_at(payment_no.clone(), deadline);
            return Ok(TimeoutOutcome::NotDue);
        }
        let gateway = match payment.payment_method {
            None => None,
            Some(method) => {
                let gateway = self.gateways.get(method);
                if gateway.is_none() {
                    warn!("💳️ No {method} gateway is configured to check {payment_no}. Timing it out regardless.");
                }
                gateway
            },
        };
        if let Some(gateway) = gateway {
            match gateway.query(payment_no).await {
                Ok(query) if query.status.is_paid() => {
                    info!("💳️ Payment {payment_no} was paid, but the notification never arrived. Applying it now.");
                    let amount = query.total_amount.map(|m| m.to_decimal_string());
                    let ack = self.handle_success(payment_no, query.trade_no, amount).await?;
                    return Ok(TimeoutOutcome::Reconciled(ack));
                },
                Ok(query) => {
                    debug!("💳️ Trade {payment_no} is {:?} at its deadline", query.status);
                    self.close_trade(&payment).await;
                },
                Err(e) => {
                    let retry_at = Utc::now() + self.config.query_retry_delay;
                    warn!("💳️ Could not check trade {payment_no} at its deadline. {e}. Checking again at {retry_at}.");
                    self.scheduler.schedule_at(payment_no.clone(), retry_at);
                    return Ok(TimeoutOutcome::Deferred);
                },
            }
        }
        let reason = "The payment window elapsed without payment";
        match self.abandon_payment(payment_no, PaymentStatus::Timeout, CancelCause::Timeout, reason).await? {
            Some(_) => Ok(TimeoutOutcome::TimedOut),
            None => Ok(TimeoutOutcome::NotPending(self.fetch_payment(payment_no).await?.status)),
        }
    }

    /// Runs the timeout check for every pending payment whose deadline has passed.
    pub async fn expire_overdue_payments(&self) -> Result<Vec<(PaymentNo, TimeoutOutcome)>, EngineError> {
        let now = Utc::now();
        let overdue = self
            .pending_payments()
            .await?
            .into_iter()
            .filter(|p| p.timeout_deadline(self.config.timeout_window) <= now)
            .collect::<Vec<_>>();
        if !overdue.is_empty() {
            info!("💳️ {} pending payments are overdue", overdue.len());
        }
        let mut outcomes = Vec::with_capacity(overdue.len());
        for payment in overdue {
            match self.process_timeout(&payment.payment_no).await {
                Ok(outcome) => outcomes.push((payment.payment_no, outcome)),
                Err(e) => error!("💳️ Timeout check for {} failed. {e}", payment.payment_no),
            }
        }
        Ok(outcomes)
    }

    /// Re-schedules the timeout check of every pending payment from its persisted request time.
    pub async fn rehydrate_timeouts(&self) -> Result<usize, EngineError> {
        let pending = self.pending_payments().await?;
        for payment in &pending {
            self.scheduler.schedule_at(payment.payment_no.clone(), payment.timeout_deadline(self.config.timeout_window));
        }
        info!("💳️ Re-scheduled {} pending payment timeouts", pending.len());
        Ok(pending.len())
    }

    async fn pending_payments(&self) -> Result<Vec<Payment>, EngineError> {
        let mut tx = self.db.begin().await?;
        let pending = tx.fetch_payments_with_status(PaymentStatus::Pending).await?;
        tx.rollback().await?;
        Ok(pending)
    }

    pub async fn register_payout_account(
        &self,
        store_id: StoreId,
        method: PaymentMethod,
        account: &str,
    ) -> Result<PayoutAccount, EngineError> {
        let account = account.trim();
        if account.is_empty() {
            return Err(EngineError::InvalidParameter("The payout account cannot be empty".into()));
        }
        let mut tx = self.db.begin().await?;
        let result = tx.upsert_payout_account(store_id, method, account).await?;
        tx.commit().await?;
        info!("💳️ Store #{store_id} registered a {method} payout account");
        Ok(result)
    }

    /// Sends money back to the buyer.
    ///
    /// The refund is attributed to `order_no` when given; otherwise it applies to the payment as a whole. Gateway
    /// system errors are retried with linear back-off, re-using the same request number so the gateway can
    /// de-duplicate. If every attempt fails, a `RefundFailed` event is published and the payment is left untouched.
    pub async fn refund(
        &self,
        payment_no: &PaymentNo,
        order_no: Option<&OrderNo>,
        amount: Money,
        reason: &str,
    ) -> Result<Payment, EngineError> {
        let (payment, order) = self.validate_refund(payment_no, order_no, amount).await?;
        let method = payment.payment_method.ok_or_else(|| state_invalid(&payment, "The payment has no payment method"))?;
        let gateway = self.gateway(method)?;
        let request_no = match &order {
            Some(o) if o.refunded_amount.is_zero() => o.order_no.to_string(),
            Some(o) => format!("{}-{}", o.order_no, o.refunded_amount.cents()),
            None => format!("REFUND-{payment_no}-{}", payment.refunded_amount.cents()),
        };
        let request = RefundRequest {
            payment_no: payment_no.clone(),
            trade_no: payment.trade_no.clone(),
            amount,
            request_no,
            reason: reason.to_string(),
        };
        let outcome = match self.refund_with_retries(gateway.as_ref(), &request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("💳️ Refund of {amount} on {payment_no} failed. {e}");
                let event = RefundFailedEvent { payment, order, amount, reason: e.to_string() };
                self.bus.publish(vec![DomainEvent::RefundFailed(event)]).await;
                return Err(EngineError::RefundFailed(e.to_string()));
            },
        };
        let trade_no = outcome.trade_no.or(payment.trade_no);
        let trade_no = &trade_no;
        let (payment, events) = retry_on_conflict(&self.config.conflict_retry, "refund bookkeeping", move || {
            self.record_refund(payment_no, order_no, amount, trade_no.clone())
        })
        .await
        .map_err(|e| {
            error!("💳️ The gateway refunded {amount} on {payment_no}, but recording it failed. {e}");
            e
        })?;
        info!("💳️ Refunded {amount} on {payment_no}. The payment is now {}", payment.status);
        self.bus.publish(events).await;
        Ok(payment)
    }

    async fn validate_refund(
        &self,
        payment_no: &PaymentNo,
        order_no: Option<&OrderNo>,
        amount: Money,
    ) -> Result<(Payment, Option<Order>), EngineError> {
        let mut tx = self.db.begin().await?;
        let payment = tx.fetch_payment_by_no(payment_no).await?.ok_or_else(|| not_found(payment_no))?;
        if !matches!(payment.status, PaymentStatus::Success | PaymentStatus::PartiallyRefunded) {
            return Err(state_invalid(&payment, "Only captured payments can be refunded"));
        }
        let order = match order_no {
            Some(no) => {
                let order =
                    tx.fetch_order_by_no(no).await?.ok_or_else(|| EngineError::OrderNotFound(no.to_string()))?;
                if order.payment_no.as_ref() != Some(payment_no) {
                    return Err(EngineError::InvalidParameter(format!("Order {no} was not paid by {payment_no}")));
                }
                Some(order)
            },
            None => None,
        };
        tx.rollback().await?;
        if !amount.is_positive() {
            return Err(EngineError::InvalidParameter(format!("Refund amount must be positive, not {amount}")));
        }
        let refundable = match &order {
            Some(o) => (o.total_amount - o.refunded_amount).min(payment.refundable_amount()),
            None => payment.refundable_amount(),
        };
        if amount > refundable {
            return Err(EngineError::InvalidParameter(format!(
                "Cannot refund {amount}. At most {refundable} is refundable"
            )));
        }
        Ok((payment, order))
    }

    async fn refund_with_retries(
        &self,
        gateway: &dyn PaymentGateway,
        request: &RefundRequest,
    ) -> Result<RefundOutcome, GatewayError> {
        let policy = self.config.refund_retry;
        let mut attempt = 1;
        loop {
            match gateway.refund(request).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        "💳️ Refund {} attempt {attempt}/{} failed. {e}. Retrying in {delay:?}",
                        request.request_no, policy.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn record_refund(
        &self,
        payment_no: &PaymentNo,
        order_no: Option<&OrderNo>,
        amount: Money,
        trade_no: Option<String>,
    ) -> Result<(Payment, Vec<DomainEvent>), EngineError> {
        let mut tx = self.db.begin().await?;
        let payment = tx.fetch_payment_by_no(payment_no).await?.ok_or_else(|| not_found(payment_no))?;
        let refunded = payment.refunded_amount + amount;
        let status = if refunded >= payment.amount { PaymentStatus::Refunded } else { PaymentStatus::PartiallyRefunded };
        let update = PaymentUpdate::status(status).with_refunded_amount(refunded);
        let updated = tx
            .update_payment(payment_no, payment.status, update)
            .await?
            .ok_or_else(|| EngineError::ConcurrencyConflict(format!("Payment {payment_no} changed")))?;
        let order = match order_no {
            Some(no) => tx.fetch_order_by_no(no).await?,
            None => None,
        };
        let mut event = DomainEvent::RefundSucceeded(RefundSucceededEvent { payment: updated.clone(), order, amount, trade_no });
        let mut events = self.bus.react(&mut tx, &mut event).await?;
        tx.commit().await?;
        events.insert(0, event);
        Ok((updated, events))
    }
}
