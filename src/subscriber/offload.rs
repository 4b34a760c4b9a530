use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Reaction;
use crate::event::AnyEvent;
use crate::executor::Executor;
use crate::subscriber::{SmartSubscriber, Subscriber};

/// Runs the wrapped subscriber's reactions on `executor` instead of inline.
pub struct Offload<S> {
    subscriber: S,
    executor: Arc<dyn Executor>,
}

impl<S> Offload<S> {
    pub fn new(executor: Arc<dyn Executor>, subscriber: S) -> Self {
        Self {
            subscriber,
            executor,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.subscriber
    }
}

#[async_trait]
impl<S: Subscriber> Subscriber for Offload<S> {
    type Event = S::Event;

    async fn on_event(&self, event: Arc<S::Event>) -> Reaction {
        self.subscriber.on_event(event).await
    }

    fn executor(&self) -> Option<Arc<dyn Executor>> {
        Some(Arc::clone(&self.executor))
    }

    fn name(&self) -> &'static str {
        self.subscriber.name()
    }
}

#[async_trait]
impl<S: SmartSubscriber> SmartSubscriber for Offload<S> {
    fn interested(&self, event: &AnyEvent) -> bool {
        self.subscriber.interested(event)
    }

    async fn on_event(&self, event: AnyEvent) -> Reaction {
        self.subscriber.on_event(event).await
    }

    fn executor(&self) -> Option<Arc<dyn Executor>> {
        Some(Arc::clone(&self.executor))
    }

    fn name(&self) -> &'static str {
        self.subscriber.name()
    }
}

pub fn offload<S>(executor: Arc<dyn Executor>, subscriber: S) -> Offload<S> {
    Offload::new(executor, subscriber)
}
