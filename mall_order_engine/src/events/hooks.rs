use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{
    DomainEvent,
    EventHandler,
    EventProducer,
    Handler,
    LowStockEvent,
    OrderCancelledEvent,
    OrderConfirmedEvent,
    OrderDeliveredEvent,
    OrderShippedEvent,
    PaymentCancelledEvent,
    PaymentFailedEvent,
    PaymentSucceededEvent,
    RefundFailedEvent,
    RefundRequestedEvent,
    RefundSucceededEvent,
};

pub type BoxedHookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Generates the hook registry, its handler set and the matching producers from one table of
/// `hook_name: EventType => DomainEvent::Variant` rows. Every hook holds an ordered list of subscribers, and each
/// subscriber gets its own channel, so a slow subscriber never holds up its siblings.
macro_rules! event_hooks {
    ($($hook:ident : $event:ty => $variant:ident),+ $(,)?) => {
        #[derive(Default, Clone)]
        pub struct EventHooks {
            $(pub $hook: Vec<Handler<$event>>,)+
        }

        impl EventHooks {
            $(
                pub fn $hook<F>(&mut self, f: F) -> &mut Self
                where F: (Fn($event) -> BoxedHookFuture) + Send + Sync + 'static {
                    self.$hook.push(Arc::new(f));
                    self
                }
            )+

            pub fn subscriber_count(&self) -> usize {
                0 $(+ self.$hook.len())+
            }
        }

        pub struct EventHandlers {
            $($hook: Vec<EventHandler<$event>>,)+
        }

        impl EventHandlers {
            pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
                Self {
                    $($hook: hooks
                        .$hook
                        .into_iter()
                        .map(|f| EventHandler::new(stringify!($variant), buffer_size, f))
                        .collect(),)+
                }
            }

            pub fn producers(&self) -> EventProducers {
                EventProducers {
                    $($hook: self.$hook.iter().map(|h| h.subscribe()).collect(),)+
                }
            }

            pub async fn start_handlers(self) {
                $(
                    for handler in self.$hook {
                        tokio::spawn(async move {
                            handler.start_handler().await;
                        });
                    }
                )+
            }
        }

        #[derive(Default, Clone)]
        pub struct EventProducers {
            $($hook: Vec<EventProducer<$event>>,)+
        }

        impl EventProducers {
            /// Hands the event to every subscriber registered for its type, in registration order.
            pub async fn publish(&self, event: DomainEvent) {
                match event {
                    $(
                        DomainEvent::$variant(ev) => {
                            for producer in &self.$hook {
                                producer.publish_event(ev.clone()).await;
                            }
                        },
                    )+
                }
            }
        }
    };
}

event_hooks! {
    on_payment_succeeded: PaymentSucceededEvent => PaymentSucceeded,
    on_payment_failed: PaymentFailedEvent => PaymentFailed,
    on_payment_cancelled: PaymentCancelledEvent => PaymentCancelled,
    on_order_confirmed: OrderConfirmedEvent => OrderConfirmed,
    on_order_shipped: OrderShippedEvent => OrderShipped,
    on_order_delivered: OrderDeliveredEvent => OrderDelivered,
    on_order_cancelled: OrderCancelledEvent => OrderCancelled,
    on_refund_requested: RefundRequestedEvent => RefundRequested,
    on_refund_succeeded: RefundSucceededEvent => RefundSucceeded,
    on_refund_failed: RefundFailedEvent => RefundFailed,
    on_low_stock: LowStockEvent => LowStock,
}
