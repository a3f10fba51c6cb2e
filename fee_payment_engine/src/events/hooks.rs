use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{
    EventHandler,
    EventProducer,
    Handler,
    PaymentAllocatedEvent,
    PaymentFailedEvent,
    PaymentUnmatchedEvent,
};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub payment_allocated_producer: Vec<EventProducer<PaymentAllocatedEvent>>,
    pub payment_unmatched_producer: Vec<EventProducer<PaymentUnmatchedEvent>>,
    pub payment_failed_producer: Vec<EventProducer<PaymentFailedEvent>>,
}

pub struct EventHandlers {
    pub on_payment_allocated: Option<EventHandler<PaymentAllocatedEvent>>,
    pub on_payment_unmatched: Option<EventHandler<PaymentUnmatchedEvent>>,
    pub on_payment_failed: Option<EventHandler<PaymentFailedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_payment_allocated = hooks.on_payment_allocated.map(|f| EventHandler::new(buffer_size, f));
        let on_payment_unmatched = hooks.on_payment_unmatched.map(|f| EventHandler::new(buffer_size, f));
        let on_payment_failed = hooks.on_payment_failed.map(|f| EventHandler::new(buffer_size, f));
        Self { on_payment_allocated, on_payment_unmatched, on_payment_failed }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_payment_allocated {
            result.payment_allocated_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_payment_unmatched {
            result.payment_unmatched_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_payment_failed {
            result.payment_failed_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_payment_allocated {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_payment_unmatched {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_payment_failed {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_payment_allocated: Option<Handler<PaymentAllocatedEvent>>,
    pub on_payment_unmatched: Option<Handler<PaymentUnmatchedEvent>>,
    pub on_payment_failed: Option<Handler<PaymentFailedEvent>>,
}

impl EventHooks {
    pub fn on_payment_allocated<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PaymentAllocatedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_payment_allocated = Some(Arc::new(f));
        self
    }

    pub fn on_payment_unmatched<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PaymentUnmatchedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_payment_unmatched = Some(Arc::new(f));
        self
    }

    pub fn on_payment_failed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PaymentFailedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_payment_failed = Some(Arc::new(f));
        self
    }
}
